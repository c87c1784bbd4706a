//! Accept loop and graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::net::{Admission, Incoming, Listener};
use crate::observability::metrics;
use crate::protocol::{write_response, ProtocolError, Response, Status};
use crate::server::context::ServerContext;
use crate::server::worker::Worker;
use crate::store::ConnectionPool;

/// Upper bound on the time spent answering a rejected client.
const REJECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause after a failed accept, typically fd exhaustion.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct AuthServer {
    context: Arc<ServerContext>,
    drain_timeout: Duration,
}

impl AuthServer {
    pub fn new(config: &AppConfig, pool: Arc<ConnectionPool>) -> Self {
        Self::with_context(
            ServerContext::from_config(config, pool),
            Duration::from_secs(config.lifecycle.drain_timeout_secs),
        )
    }

    pub fn with_context(context: ServerContext, drain_timeout: Duration) -> Self {
        Self {
            context: Arc::new(context),
            drain_timeout,
        }
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    /// Accept until `shutdown` fires, then drain workers and close the pool.
    pub async fn run(self, listener: Listener, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            address = ?listener.local_addr().ok(),
            max_connections = listener.max_connections(),
            "Auth server accepting connections"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown requested, no longer accepting");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok(incoming) => self.dispatch(incoming, listener.admission()),
                    Err(e) => {
                        tracing::error!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        drop(listener);
        self.drain().await;
        self.context.auth.pool().shutdown().await;
        tracing::info!("Auth server stopped");
    }

    fn dispatch(&self, incoming: Incoming, admission: &Admission) {
        let Incoming { stream, peer, permit } = incoming;
        match permit {
            Some(permit) => {
                metrics::record_connection_admitted();
                let worker = Worker::new(Arc::clone(&self.context), peer, permit);
                tokio::spawn(worker.run(stream));
            }
            None => {
                metrics::record_connection_rejected();
                tracing::warn!(
                    peer_addr = %peer,
                    max_connections = admission.max_connections(),
                    "Server at capacity, rejecting connection"
                );
                tokio::spawn(reject(stream, peer));
            }
        }
    }

    async fn drain(&self) {
        let tracker = &self.context.tracker;
        let active = tracker.active_count();
        if active == 0 {
            return;
        }

        tracing::info!(active, timeout_secs = self.drain_timeout.as_secs(), "Draining workers");
        if tokio::time::timeout(self.drain_timeout, tracker.wait_idle()).await.is_err() {
            tracing::warn!(remaining = tracker.active_count(), "Drain timeout elapsed");
        }
    }
}

/// Tell an over-limit client the server is full and close.
///
/// Anything the client already sent is read and dropped so the close does
/// not reset the connection before the client sees the response.
async fn reject(mut stream: TcpStream, peer: SocketAddr) {
    let respond = async {
        write_response(&mut stream, &Response::error(Status::ServerCapacityError)).await?;
        stream.shutdown().await?;
        tokio::io::copy(&mut stream, &mut tokio::io::sink()).await?;
        Ok::<_, ProtocolError>(())
    };

    match tokio::time::timeout(REJECT_TIMEOUT, respond).await {
        Ok(Ok(())) => tracing::debug!(peer_addr = %peer, "Capacity rejection sent"),
        Ok(Err(e)) => tracing::debug!(peer_addr = %peer, error = %e, "Capacity rejection failed"),
        Err(_) => tracing::debug!(peer_addr = %peer, "Capacity rejection timed out"),
    }
}
