//! Relational store access.
//!
//! # Data Flow
//! ```text
//! AuthService
//!     → pool.rs (borrow an idle connection or open one)
//!     → Connector::connect (postgres.rs or memory.rs)
//!     → StoreConnection statements (parametrized only)
//!     → PooledConnection dropped → connection back on the idle stack
//! ```
//!
//! # Design Decisions
//! - The pool only knows the `Connector` / `StoreConnection` traits
//! - One statement per trait method; transactions are driven by the caller
//! - Unique-constraint violations are a distinct error so callers can map them

use async_trait::async_trait;
use thiserror::Error;

use crate::auth::model::{AccountRecord, InsertedPartner, NewAccount, NewPartner};

pub mod memory;
pub mod pool;
pub mod postgres;

pub use memory::MemoryStore;
pub use pool::{ConnectionPool, PooledConnection};
pub use postgres::PgConnector;

/// Errors raised by store connections and the pool.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Opening a physical connection failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// A statement violated a uniqueness constraint.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Any other statement failure.
    #[error("statement failed: {0}")]
    Query(String),

    /// No pool slot became available in time.
    #[error("timed out waiting for a pooled connection")]
    Timeout,

    /// The pool has been shut down.
    #[error("pool is shut down")]
    Closed,
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::UniqueViolation(db.message().to_string())
            }
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut => {
                StoreError::Connect(err.to_string())
            }
            _ => StoreError::Query(err.to_string()),
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Opens physical connections to the store.
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    async fn connect(&self) -> StoreResult<Box<dyn StoreConnection>>;
}

/// One live connection to the store.
///
/// Methods map one-to-one onto statements. `begin` opens a transaction and
/// sets a savepoint; `rollback` returns to the savepoint and ends the
/// transaction.
#[async_trait]
pub trait StoreConnection: Send + std::fmt::Debug {
    /// Cheap liveness probe.
    async fn ping(&mut self) -> StoreResult<()>;

    async fn begin(&mut self) -> StoreResult<()>;

    async fn commit(&mut self) -> StoreResult<()>;

    async fn rollback(&mut self) -> StoreResult<()>;

    /// Id of the account registered under `login`, if any.
    async fn find_account_id(&mut self, login: &str) -> StoreResult<Option<i64>>;

    /// Insert a partner. `None` when the statement affected no rows.
    async fn insert_partner(&mut self, partner: &NewPartner) -> StoreResult<Option<InsertedPartner>>;

    /// Insert an account. `None` when the statement affected no rows.
    async fn insert_account(&mut self, account: &NewAccount) -> StoreResult<Option<i64>>;

    /// Insert one membership row per group in a single statement.
    /// Returns the number of rows written.
    async fn insert_group_memberships(&mut self, account_id: i64, group_ids: &[i64]) -> StoreResult<u64>;

    /// Returns the number of rows written.
    async fn insert_company_membership(&mut self, company_id: i64, account_id: i64) -> StoreResult<u64>;

    /// Account matching `login` and `secret` exactly.
    async fn find_by_credential(&mut self, login: &str, secret: &str) -> StoreResult<Option<AccountRecord>>;

    /// Display name of the partner linked to `login`.
    async fn partner_name(&mut self, login: &str) -> StoreResult<Option<String>>;

    /// Close the physical connection.
    async fn close(self: Box<Self>) -> StoreResult<()>;
}
