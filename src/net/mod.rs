//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, atomic admission against max_connections)
//!     → connection.rs (id, live-connection tracking)
//!     → Hand off to a worker, or reject with SERVER_CAPACITY_ERROR
//! ```
//!
//! # Design Decisions
//! - Admission never blocks the accept loop; a full server answers at once
//! - Slots are RAII permits so they come back even if a worker panics
//! - Each connection is tracked for graceful shutdown

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{Admission, AdmissionPermit, Incoming, Listener, ListenerError};
