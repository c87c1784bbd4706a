//! auth-server
//!
//! ```text
//!     client ──▶ net::Listener ──admitted──▶ server::Worker ──▶ AuthService
//!                     │                            │                 │
//!                     └─full─▶ SERVER_CAPACITY_ERROR   ◀── Response  ▼
//!                                                            ConnectionPool
//!                                                                 │
//!                                                                 ▼
//!                                                          PostgreSQL / memory
//! ```

use std::path::PathBuf;

use clap::Parser;

use auth_server::config::{load_config, load_defaults};
use auth_server::lifecycle;
use auth_server::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "auth-server")]
#[command(about = "Multi-client sign-up / sign-in server", long_about = None)]
struct Args {
    /// TOML configuration file. Built-in defaults are used when omitted.
    #[arg(short, long, env = "AUTH_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => load_defaults()?,
    };

    init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config_file = ?args.config,
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        store = ?config.store.kind,
        "auth-server starting"
    );

    lifecycle::run(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
