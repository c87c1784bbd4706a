//! Configuration validation.
//!
//! Serde handles the syntax; this module checks values. Validation is a pure
//! function over `AppConfig` and reports every problem, not just the first.

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::{AppConfig, StoreKind};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check every configured value, collecting all errors.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be at least 1"));
    }

    if config.store.kind == StoreKind::Postgres {
        match Url::parse(&config.store.url) {
            Ok(url) if matches!(url.scheme(), "postgres" | "postgresql") => {}
            Ok(url) => errors.push(ValidationError::new(
                "store.url",
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new("store.url", e.to_string())),
        }
    }

    if config.pool.max_size == Some(0) {
        errors.push(ValidationError::new("pool.max_size", "must be at least 1 when set"));
    }
    if let Some(max) = config.pool.max_size {
        if config.pool.min_idle > max {
            errors.push(ValidationError::new(
                "pool.min_idle",
                format!("{} exceeds pool.max_size {}", config.pool.min_idle, max),
            ));
        }
    }
    if config.pool.acquire_timeout_secs == Some(0) {
        errors.push(ValidationError::new("pool.acquire_timeout_secs", "must be positive when set"));
    }
    if config.pool.idle_timeout_secs == Some(0) {
        errors.push(ValidationError::new("pool.idle_timeout_secs", "must be positive when set"));
    }

    if config.groups.user.is_empty() {
        errors.push(ValidationError::new("groups.user", "must list at least one group"));
    }
    let mut seen = HashSet::new();
    for gid in config.groups.user.iter().chain(&config.groups.admin_extra) {
        if !seen.insert(*gid) {
            errors.push(ValidationError::new(
                "groups",
                format!("group {} listed more than once", gid),
            ));
        }
    }

    if config.timeouts.request_secs == Some(0) {
        errors.push(ValidationError::new("timeouts.request_secs", "must be positive when set"));
    }
    if config.timeouts.store_secs == Some(0) {
        errors.push(ValidationError::new("timeouts.store_secs", "must be positive when set"));
    }

    if config.protocol.max_request_bytes == 0 {
        errors.push(ValidationError::new("protocol.max_request_bytes", "must be positive"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_error() {
        let mut config = AppConfig::default();
        config.listener.max_connections = 0;
        config.listener.bind_address = "nowhere".into();
        config.store.url = "mysql://localhost/db".into();
        config.groups.admin_extra = vec![7];

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["listener.bind_address", "listener.max_connections", "store.url", "groups"]
        );
    }

    #[test]
    fn memory_store_skips_url_check() {
        let mut config = AppConfig::default();
        config.store.kind = StoreKind::Memory;
        config.store.url = String::new();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn pool_bounds_are_checked() {
        let mut config = AppConfig::default();
        config.pool.max_size = Some(2);
        config.pool.min_idle = 3;
        config.pool.acquire_timeout_secs = Some(0);

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].to_string().starts_with("pool.min_idle"));
    }
}
