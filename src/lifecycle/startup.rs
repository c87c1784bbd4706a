//! Startup orchestration.
//!
//! Order: metrics exporter, store connector and pool, listener, shutdown
//! sources, then the accept loop. Any failure before the accept loop is
//! fatal.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{AppConfig, ConfigError, StoreKind};
use crate::lifecycle::console::console_shutdown;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::wait_for_shutdown_signal;
use crate::net::{Listener, ListenerError};
use crate::observability::{metrics, ObservabilityError};
use crate::server::AuthServer;
use crate::store::{ConnectionPool, Connector, MemoryStore, PgConnector, StoreError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("listener: {0}")]
    Listener(#[from] ListenerError),

    #[error("observability: {0}")]
    Observability(#[from] ObservabilityError),
}

/// Build the connector named by `store.kind` and a pool over it, warmed to
/// `pool.min_idle` connections.
pub async fn build_pool(config: &AppConfig) -> Result<Arc<ConnectionPool>, StartupError> {
    let connector: Arc<dyn Connector> = match config.store.kind {
        StoreKind::Postgres => {
            let connector = PgConnector::from_config(&config.store)?;
            if config.store.bootstrap_schema {
                connector.bootstrap_schema().await?;
            }
            Arc::new(connector)
        }
        StoreKind::Memory => {
            tracing::warn!("Using the in-memory store; accounts are lost on exit");
            Arc::new(MemoryStore::new())
        }
    };

    let pool = ConnectionPool::new(connector, config.pool.clone());
    if config.pool.min_idle > 0 {
        pool.prefill(config.pool.min_idle).await?;
    }
    Ok(pool)
}

/// Run the server until a shutdown source fires.
pub async fn run(config: AppConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse().map_err(|e| {
            ObservabilityError::Metrics(format!(
                "invalid metrics address '{}': {}",
                config.observability.metrics_address, e
            ))
        })?;
        metrics::init_metrics(addr)?;
    }

    let pool = build_pool(&config).await?;
    let listener = Listener::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        trigger.trigger();
    });

    if config.lifecycle.console_shutdown {
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            console_shutdown().await;
            trigger.trigger();
        });
        tracing::info!("Type 1 and press Enter to stop the server");
    }

    AuthServer::new(&config, pool).run(listener, server_shutdown).await;
    Ok(())
}
