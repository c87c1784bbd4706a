//! Authentication workflow errors.

use thiserror::Error;

use crate::store::StoreError;

/// Every way a sign-up or sign-in can fail.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The identifier is already registered.
    #[error("identifier already registered")]
    EmailExists,

    /// No account matches the presented identifier and secret.
    #[error("invalid credential")]
    InvalidCredential,

    /// The store could not be reached or no connection was available.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// A statement inside the sign-up transaction failed; the transaction
    /// was rolled back.
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// The request is missing fields or carries invalid values.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl AuthError {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::EmailExists => "email_exists",
            AuthError::InvalidCredential => "invalid_credential",
            AuthError::StoreUnavailable(_) => "store_unavailable",
            AuthError::TransactionFailed(_) => "transaction_failed",
            AuthError::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// Result type for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;
