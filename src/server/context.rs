//! State shared by every worker.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{AuthService, GroupMapping};
use crate::config::AppConfig;
use crate::net::ConnectionTracker;
use crate::store::ConnectionPool;

/// Per-exchange limits.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeLimits {
    pub max_request_bytes: usize,
    /// Time allowed for the client to deliver its request line.
    pub request_timeout: Option<Duration>,
    /// Time allowed for the whole service call, including pool borrow.
    pub store_timeout: Option<Duration>,
}

impl ExchangeLimits {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_request_bytes: config.protocol.max_request_bytes,
            request_timeout: config.timeouts.request(),
            store_timeout: config.timeouts.store(),
        }
    }
}

#[derive(Debug)]
pub struct ServerContext {
    pub auth: AuthService,
    pub tracker: ConnectionTracker,
    pub limits: ExchangeLimits,
}

impl ServerContext {
    pub fn new(auth: AuthService, limits: ExchangeLimits) -> Self {
        Self {
            auth,
            tracker: ConnectionTracker::new(),
            limits,
        }
    }

    pub fn from_config(config: &AppConfig, pool: Arc<ConnectionPool>) -> Self {
        let auth = AuthService::new(pool, GroupMapping::from(&config.groups), config.store.company_id);
        Self::new(auth, ExchangeLimits::from_config(config))
    }
}
