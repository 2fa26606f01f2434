//! Top-level error type shared across crates.

use thiserror::Error;

/// Common error type for audit polls.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("invalid peer identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid poll key: {0}")]
    InvalidPollKey(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("{0}")]
    Other(String),
}
