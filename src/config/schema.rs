//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the authentication server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address, admission limit).
    pub listener: ListenerConfig,

    /// Relational store endpoint and credentials.
    pub store: StoreConfig,

    /// Connection pool behavior.
    pub pool: PoolConfig,

    /// Privilege to group-id mapping applied at sign-up.
    pub groups: GroupsConfig,

    /// Optional per-exchange timeouts.
    pub timeouts: TimeoutConfig,

    /// Wire protocol limits.
    pub protocol: ProtocolConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Startup and shutdown behavior.
    pub lifecycle: LifecycleConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:5000").
    pub bind_address: String,

    /// Maximum concurrently served connections. Connections beyond this
    /// receive `SERVER_CAPACITY_ERROR`.
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5000".to_string(),
            max_connections: 10,
        }
    }
}

/// Which store backend to connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Postgres,
    Memory,
}

/// Store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,

    /// Connection URL (e.g., "postgres://db.internal:5432/odoo").
    pub url: String,

    /// Login role. Overrides any user embedded in the URL.
    pub username: Option<String>,

    /// Login password. Prefer `AUTH_STORE_PASSWORD` over the config file.
    pub password: Option<String>,

    /// Company every partner, account and company membership is attached to.
    pub company_id: i64,

    /// Create the four tables at startup if they are missing.
    pub bootstrap_schema: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Postgres,
            url: "postgres://localhost:5432/odoo".to_string(),
            username: None,
            password: None,
            company_id: 1,
            bootstrap_schema: false,
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on borrowed connections. Unset means unbounded.
    pub max_size: Option<usize>,

    /// How long a borrower waits for a slot when `max_size` is reached.
    /// Unset means wait indefinitely.
    pub acquire_timeout_secs: Option<u64>,

    /// Probe idle connections before handing them out.
    pub validate_on_borrow: bool,

    /// Evict idle connections older than this on borrow. Unset keeps them.
    pub idle_timeout_secs: Option<u64>,

    /// Connections opened at startup.
    pub min_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: None,
            acquire_timeout_secs: None,
            validate_on_borrow: true,
            idle_timeout_secs: None,
            min_idle: 0,
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_secs.map(Duration::from_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

/// Group ids attached to new accounts.
///
/// The ids are opaque store constants. USER accounts get `user`; ADMIN
/// accounts get `user` plus `admin_extra`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GroupsConfig {
    pub user: Vec<i64>,
    pub admin_extra: Vec<i64>,
}

impl Default for GroupsConfig {
    fn default() -> Self {
        Self {
            user: vec![1, 7, 8, 9],
            admin_extra: vec![2, 3, 4],
        }
    }
}

/// Timeout configuration. Every timeout is disabled unless set.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed for the client to deliver its request.
    pub request_secs: Option<u64>,

    /// Time allowed for the store work of one request.
    pub store_secs: Option<u64>,
}

impl TimeoutConfig {
    pub fn request(&self) -> Option<Duration> {
        self.request_secs.map(Duration::from_secs)
    }

    pub fn store(&self) -> Option<Duration> {
        self.store_secs.map(Duration::from_secs)
    }
}

/// Wire protocol limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Largest accepted request line, in bytes.
    pub max_request_bytes: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_request_bytes: 64 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Shut down when the operator types `1` on stdin.
    pub console_shutdown: bool,

    /// How long shutdown waits for in-flight connections.
    pub drain_timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            console_shutdown: false,
            drain_timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [listener]
            max_connections = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.max_connections, 3);
        assert_eq!(config.listener.bind_address, "0.0.0.0:5000");
        assert_eq!(config.store.kind, StoreKind::Postgres);
        assert_eq!(config.groups.user, vec![1, 7, 8, 9]);
        assert_eq!(config.groups.admin_extra, vec![2, 3, 4]);
        assert!(config.pool.max_size.is_none());
        assert!(config.timeouts.request().is_none());
    }

    #[test]
    fn store_kind_is_lowercase() {
        let config: AppConfig = toml::from_str(
            r#"
            [store]
            kind = "memory"

            [pool]
            max_size = 4
            acquire_timeout_secs = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.store.kind, StoreKind::Memory);
        assert_eq!(config.pool.max_size, Some(4));
        assert_eq!(config.pool.acquire_timeout(), Some(Duration::from_secs(2)));
    }
}
