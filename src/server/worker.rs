//! Per-connection request handling.
//!
//! # State Machine
//! ```text
//! AwaitRequest ──read──▶ Dispatched ──valid──▶ AwaitStore ──▶ Responded ──▶ Closed
//!      │                     │
//!      └──bad input──────────┴────────────────────────────▶ Responded ──▶ Closed
//! ```
//!
//! A worker serves exactly one request, writes exactly one response and
//! closes. It owns its admission permit, so the slot is freed however the
//! worker ends.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::AuthError;
use crate::net::{AdmissionPermit, ConnectionGuard, ConnectionId};
use crate::observability::metrics;
use crate::protocol::{read_request, write_response, Command, Operation, ProtocolError, Request, Response, Status};
use crate::server::context::ServerContext;

/// How long an oversized request's remainder is drained before closing.
const LINGER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkerState {
    AwaitRequest,
    Dispatched,
    AwaitStore,
    Responded,
    Closed,
}

pub struct Worker {
    context: Arc<ServerContext>,
    peer: SocketAddr,
    state: WorkerState,
    guard: ConnectionGuard,
    _permit: AdmissionPermit,
}

impl Worker {
    pub fn new(context: Arc<ServerContext>, peer: SocketAddr, permit: AdmissionPermit) -> Self {
        let guard = context.tracker.track();
        Self {
            context,
            peer,
            state: WorkerState::AwaitRequest,
            guard,
            _permit: permit,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.guard.id()
    }

    /// Serve one exchange on `stream`, then close it.
    pub async fn run<S>(mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let span = tracing::info_span!(
            "worker",
            connection_id = %self.id(),
            peer_addr = %self.peer,
            request_id = %Uuid::new_v4()
        );
        self.serve(stream).instrument(span).await;
    }

    async fn serve<S>(&mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let start = Instant::now();
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        let mut unread_input = false;
        let (operation, response) = match self.read(&mut reader).await {
            Ok(request) => {
                let operation = request.operation;
                (Some(operation), self.dispatch(request).await)
            }
            Err(ProtocolError::Closed) => {
                tracing::debug!("Client closed before sending a request");
                (None, Response::error(Status::from(&ProtocolError::Closed)))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable request");
                unread_input = matches!(e, ProtocolError::TooLarge { .. });
                (None, Response::error(Status::from(&e)))
            }
        };

        self.transition(WorkerState::Responded);
        match write_response(&mut write_half, &response).await {
            Ok(()) => {
                if let Err(e) = write_half.shutdown().await {
                    tracing::debug!(error = %e, "Error closing connection");
                }
                // Closing with unread input resets the connection, which can
                // destroy the response before the client reads it.
                if unread_input {
                    let mut sink = tokio::io::sink();
                    let drain = tokio::io::copy(&mut reader, &mut sink);
                    let _ = tokio::time::timeout(LINGER, drain).await;
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to write response"),
        }

        metrics::record_request(
            operation.map_or("invalid", Operation::as_str),
            response.status.as_str(),
            start,
        );
        tracing::debug!(
            status = %response.status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Exchange complete"
        );
        self.transition(WorkerState::Closed);
    }

    async fn read<R>(&mut self, reader: &mut R) -> Result<Request, ProtocolError>
    where
        R: AsyncBufRead + Unpin,
    {
        let limits = self.context.limits;
        let read = read_request(reader, limits.max_request_bytes);
        match limits.request_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| ProtocolError::Timeout)?,
            None => read.await,
        }
    }

    async fn dispatch(&mut self, request: Request) -> Response {
        self.transition(WorkerState::Dispatched);

        let command = match request.into_command() {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected request");
                return Response::error(Status::from(&e));
            }
        };

        self.transition(WorkerState::AwaitStore);
        let context = Arc::clone(&self.context);
        let call = async move {
            match command {
                Command::SignUp(input) => context.auth.sign_up(input).await,
                Command::SignIn(credential) => context.auth.sign_in(credential).await,
            }
        };

        let result = match self.context.limits.store_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::error!(timeout_ms = limit.as_millis() as u64, "Store call timed out");
                    return Response::error(Status::ServerError);
                }
            },
            None => call.await,
        };

        match result {
            Ok(account) => {
                tracing::info!(account_id = account.id, "Request succeeded");
                Response::ok(account)
            }
            Err(e) => {
                log_failure(&e);
                Response::error(Status::from(&e))
            }
        }
    }

    fn transition(&mut self, next: WorkerState) {
        debug_assert!(next > self.state, "{:?} -> {:?}", self.state, next);
        tracing::trace!(from = ?self.state, to = ?next, "Worker state");
        self.state = next;
    }
}

fn log_failure(err: &AuthError) {
    match err {
        AuthError::EmailExists | AuthError::InvalidCredential => {
            tracing::info!(kind = err.kind(), "Request refused");
        }
        AuthError::InvalidRequest(_) => {
            tracing::warn!(kind = err.kind(), error = %err, "Request refused");
        }
        AuthError::StoreUnavailable(_) | AuthError::TransactionFailed(_) => {
            tracing::error!(kind = err.kind(), error = %err, "Request failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthService, GroupMapping};
    use crate::config::PoolConfig;
    use crate::net::Admission;
    use crate::protocol::read_response;
    use crate::server::context::ExchangeLimits;
    use crate::store::memory::MemoryStore;
    use crate::store::ConnectionPool;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncWriteExt, BufReader};

    fn context(store: &MemoryStore, limits: ExchangeLimits) -> Arc<ServerContext> {
        let pool = ConnectionPool::new(Arc::new(store.clone()), PoolConfig::default());
        let auth = AuthService::new(pool, GroupMapping::default(), 1);
        Arc::new(ServerContext::new(auth, limits))
    }

    fn limits() -> ExchangeLimits {
        ExchangeLimits {
            max_request_bytes: 1024,
            request_timeout: None,
            store_timeout: None,
        }
    }

    async fn exchange(context: Arc<ServerContext>, line: &[u8]) -> Response {
        let admission = Admission::new(1);
        let (client, server) = duplex(4096);
        let worker = Worker::new(context, "127.0.0.1:1".parse().unwrap(), admission.try_admit().unwrap());
        let task = tokio::spawn(worker.run(server));

        let (read_half, mut write_half) = tokio::io::split(client);
        write_half.write_all(line).await.unwrap();
        let response = read_response(&mut BufReader::new(read_half)).await.unwrap();
        task.await.unwrap();
        assert_eq!(admission.active(), 0);
        response
    }

    #[tokio::test]
    async fn sign_up_then_sign_in() {
        let store = MemoryStore::new();
        let context = context(&store, limits());

        let response = exchange(
            Arc::clone(&context),
            br#"{"operation":"SIGNUP","account":{"identifier":"a@x.com","secret":"p","name":"Ada","street":"s","zip":"z","city":"c","privilege":"USER"}}
"#,
        )
        .await;
        assert_eq!(response.status, Status::Ok);

        let response = exchange(
            Arc::clone(&context),
            br#"{"operation":"SIGNIN","account":{"identifier":"a@x.com","secret":"p"}}
"#,
        )
        .await;
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.account.unwrap().name.as_deref(), Some("Ada"));
        assert_eq!(context.tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn unknown_operation_is_server_error() {
        let store = MemoryStore::new();
        let response = exchange(
            context(&store, limits()),
            b"{\"operation\":\"DELETE\",\"account\":{\"identifier\":\"a@x.com\",\"secret\":\"p\"}}\n",
        )
        .await;

        assert_eq!(response.status, Status::ServerError);
        assert!(response.account.is_none());
        assert_eq!(store.opened(), 0);
    }

    #[tokio::test]
    async fn slow_store_is_server_error() {
        let store = MemoryStore::new();
        store.set_latency(Duration::from_millis(500));
        let limits = ExchangeLimits {
            store_timeout: Some(Duration::from_millis(50)),
            ..limits()
        };

        let response = exchange(
            context(&store, limits),
            b"{\"operation\":\"SIGNIN\",\"account\":{\"identifier\":\"a@x.com\",\"secret\":\"p\"}}\n",
        )
        .await;

        assert_eq!(response.status, Status::ServerError);
    }

    #[tokio::test]
    async fn empty_request_is_server_error() {
        let store = MemoryStore::new();
        let admission = Admission::new(1);
        let (client, server) = duplex(1024);
        let worker = Worker::new(context(&store, limits()), "127.0.0.1:1".parse().unwrap(), admission.try_admit().unwrap());
        let task = tokio::spawn(worker.run(server));

        let (read_half, mut write_half) = tokio::io::split(client);
        write_half.shutdown().await.unwrap();
        let response = read_response(&mut BufReader::new(read_half)).await.unwrap();
        task.await.unwrap();

        assert_eq!(response.status, Status::ServerError);
        assert!(response.account.is_none());
        assert_eq!(store.opened(), 0);
        assert_eq!(admission.active(), 0);
    }

    #[tokio::test]
    async fn oversized_request_is_answered_before_close() {
        let store = MemoryStore::new();
        let limits = ExchangeLimits {
            max_request_bytes: 16,
            ..limits()
        };
        let response = exchange(context(&store, limits), &[b'x'; 64]).await;

        assert_eq!(response.status, Status::ServerError);
        assert_eq!(store.opened(), 0);
    }

    #[tokio::test]
    async fn silent_client_times_out() {
        let store = MemoryStore::new();
        let context = context(
            &store,
            ExchangeLimits {
                request_timeout: Some(Duration::from_millis(50)),
                ..limits()
            },
        );
        let admission = Admission::new(1);
        let (client, server) = duplex(1024);
        let worker = Worker::new(context, "127.0.0.1:1".parse().unwrap(), admission.try_admit().unwrap());
        let task = tokio::spawn(worker.run(server));

        let response = read_response(&mut BufReader::new(client)).await.unwrap();
        assert_eq!(response.status, Status::ServerError);
        task.await.unwrap();
    }
}
