//! Client for the auth server.
//!
//! Each call opens a fresh connection, performs one exchange and closes,
//! matching the server's one-request-per-connection protocol.

use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::TcpStream;

use crate::auth::{Credential, SignUpInput};
use crate::protocol::{read_response, write_request, ProtocolError, Request, Response};

#[derive(Debug, Clone)]
pub struct AuthClient {
    addr: String,
    timeout: Option<Duration>,
}

impl AuthClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: None,
        }
    }

    /// Bound every exchange, connect included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn sign_up(&self, input: &SignUpInput) -> Result<Response, ProtocolError> {
        self.send(&Request::sign_up(input)).await
    }

    pub async fn sign_in(&self, credential: &Credential) -> Result<Response, ProtocolError> {
        self.send(&Request::sign_in(credential)).await
    }

    /// Send one request and wait for its response.
    ///
    /// A server at capacity answers without reading the request; that
    /// response is returned like any other.
    pub async fn send(&self, request: &Request) -> Result<Response, ProtocolError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.exchange(request))
                .await
                .map_err(|_| ProtocolError::Timeout)?,
            None => self.exchange(request).await,
        }
    }

    async fn exchange(&self, request: &Request) -> Result<Response, ProtocolError> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        // A rejected client may find the socket already closed for writing;
        // the capacity response is still waiting to be read.
        if let Err(e) = write_request(&mut write_half, request).await {
            tracing::debug!(error = %e, "Request write failed, reading response anyway");
        }
        read_response(&mut reader).await
    }
}
