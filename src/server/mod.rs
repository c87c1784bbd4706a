//! Server subsystem.
//!
//! # Data Flow
//! ```text
//! acceptor.rs (accept loop)
//!     ├── admitted → worker.rs (one request, one response, close)
//!     │                  → AuthService → ConnectionPool → store
//!     └── over limit → SERVER_CAPACITY_ERROR, close
//!
//! Shutdown: stop accepting → drain workers (bounded) → close pool
//! ```
//!
//! # Design Decisions
//! - One task per admitted connection; the listener never waits on a worker
//! - Workers share only the context: service, tracker and limits
//! - Errors become a wire status in the worker and nowhere else

pub mod acceptor;
pub mod context;
pub mod worker;

pub use acceptor::AuthServer;
pub use context::{ExchangeLimits, ServerContext};
pub use worker::{Worker, WorkerState};
