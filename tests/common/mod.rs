//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use auth_server::auth::{Credential, Privilege, SignUpInput};
use auth_server::config::AppConfig;
use auth_server::lifecycle::Shutdown;
use auth_server::net::Listener;
use auth_server::server::{AuthServer, ServerContext};
use auth_server::store::memory::MemoryStore;
use auth_server::store::ConnectionPool;
use auth_server::AuthClient;

/// A server on an ephemeral port over an in-memory store.
pub struct TestServer {
    pub addr: SocketAddr,
    pub store: MemoryStore,
    pub context: Arc<ServerContext>,
    shutdown: Shutdown,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub fn client(&self) -> AuthClient {
        AuthClient::new(self.addr.to_string()).with_timeout(Duration::from_secs(5))
    }

    pub fn active(&self) -> u64 {
        self.context.tracker.active_count()
    }

    /// Trigger shutdown and wait for the accept loop to finish draining.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not stop")
            .expect("server task panicked");
    }
}

pub fn config(max_connections: usize) -> AppConfig {
    let mut config = AppConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.listener.max_connections = max_connections;
    config.lifecycle.drain_timeout_secs = 5;
    config
}

pub async fn start_server(max_connections: usize) -> TestServer {
    start_server_with(config(max_connections), MemoryStore::new()).await
}

pub async fn start_server_with(config: AppConfig, store: MemoryStore) -> TestServer {
    let pool = ConnectionPool::new(Arc::new(store.clone()), config.pool.clone());
    let inner = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener = Listener::from_std(inner, config.listener.max_connections).unwrap();
    let addr = listener.local_addr().unwrap();

    let server = AuthServer::new(&config, pool);
    let context = Arc::clone(server.context());
    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    TestServer {
        addr,
        store,
        context,
        shutdown,
        handle,
    }
}

pub fn sign_up_input(identifier: &str, privilege: Privilege) -> SignUpInput {
    SignUpInput {
        credential: credential(identifier, "hunter2"),
        name: "Ada Lovelace".into(),
        street: "Calle Mayor 1".into(),
        zip: "48001".into(),
        city: "Bilbao".into(),
        privilege,
    }
}

pub fn credential(identifier: &str, secret: &str) -> Credential {
    Credential {
        identifier: identifier.into(),
        secret: secret.into(),
    }
}

/// Send raw bytes, half-close, and read everything the server sends back.
pub async fn raw_exchange(addr: SocketAddr, payload: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(payload).await.unwrap();
    stream.shutdown().await.unwrap();
    read_all(&mut stream).await
}

pub async fn read_all(stream: &mut TcpStream) -> String {
    let mut out = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut out))
        .await
        .expect("server did not close the connection")
        .unwrap();
    out
}

/// Poll `condition` until it holds, failing after five seconds.
pub async fn wait_for<F>(condition: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
