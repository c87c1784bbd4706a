//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! listener / worker / pool
//!     → logging.rs (structured events through `tracing`)
//!     → metrics.rs (counters, gauges, histograms through `metrics`)
//!
//! Consumers:
//!     → stdout
//!     → Prometheus scrape of /metrics (when enabled)
//! ```
//!
//! # Design Decisions
//! - Every connection gets a span carrying its connection id and peer
//! - Metric updates are atomic increments; no locks on the hot path
//! - Secrets never appear in log fields

pub mod logging;
pub mod metrics;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("logging: {0}")]
    Logging(String),

    #[error("metrics: {0}")]
    Metrics(String),
}
