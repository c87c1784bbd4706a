//! Wire protocol.
//!
//! # Data Flow
//! ```text
//! client line ──▶ codec.rs (bounded read, JSON decode) ──▶ message::Request
//! message::Response ──▶ codec.rs (JSON encode, newline, flush) ──▶ client
//! ```
//!
//! One request and one response per connection, each a single line of
//! JSON. The secret never appears in a response.

pub mod codec;
pub mod message;

use thiserror::Error;

pub use codec::{read_request, read_response, write_request, write_response};
pub use message::{AccountPayload, Command, Operation, Request, Response, Status};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("message exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("connection closed before a complete message arrived")]
    Closed,

    #[error("timed out waiting for the peer")]
    Timeout,
}
