//! Multi-client authentication server.
//!
//! Clients connect over TCP and perform one sign-up or sign-in exchange per
//! connection. Sign-up writes a partner, an account, group memberships and
//! a company membership in one store transaction; sign-in resolves a
//! credential to its account.

// Core subsystems
pub mod auth;
pub mod config;
pub mod net;
pub mod protocol;
pub mod server;
pub mod store;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub mod client;

pub use auth::AuthService;
pub use client::AuthClient;
pub use config::AppConfig;
pub use lifecycle::Shutdown;
pub use server::AuthServer;
