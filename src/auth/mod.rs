//! Authentication subsystem.
//!
//! # Data Flow
//! ```text
//! Worker
//!     → service.rs (sign_up / sign_in)
//!         → pool borrow → transaction / lookups → pool release
//!     → Account or AuthError
//! ```
//!
//! # Design Decisions
//! - One error enum for every failure; the wire status is derived from it
//!   at the protocol boundary, never here
//! - Identifier uniqueness is checked up front and enforced by the store's
//!   unique constraint; a constraint violation is reported as `EmailExists`
//! - Group ids are opaque configuration, not interpreted

pub mod error;
pub mod model;
pub mod service;

pub use error::{AuthError, AuthResult};
pub use model::{Account, Credential, Privilege, SignUpInput};
pub use service::{AuthService, GroupMapping};
