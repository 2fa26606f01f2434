//! Peer identities and poll keys.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::AuditError;

/// Opaque identifier of a peer taking part in polls.
///
/// No internal structure is assumed; only equality, ordering and hashing
/// are meaningful.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerIdentity(String);

impl PeerIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse a peer identity from its string key, rejecting empty keys and
    /// keys containing whitespace.
    pub fn parse(key: &str) -> Result<Self, AuditError> {
        if key.is_empty() || key.chars().any(char::is_whitespace) {
            return Err(AuditError::InvalidIdentity(key.to_string()));
        }
        Ok(Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Peer({})", self.0)
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique key of one poll; every message of the poll carries it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PollKey(String);

impl PollKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn parse(key: &str) -> Result<Self, AuditError> {
        if key.is_empty() {
            return Err(AuditError::InvalidPollKey(key.to_string()));
        }
        Ok(Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PollKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
