//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → metrics → store + pool → listener → accept loop
//!
//! Shutdown (shutdown.rs):
//!     Trigger → stop accepting → drain workers → close pool → exit
//!
//! Triggers:
//!     signals.rs: SIGTERM / SIGINT
//!     console.rs: "1" on stdin (opt-in)
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listener binds last, so traffic arrives only when the pool is ready
//! - Draining is bounded by `lifecycle.drain_timeout_secs`

pub mod console;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{build_pool, run, StartupError};
