//! Per-session nonces bound into nonced hashes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A random byte string contributed by one side of a poll session.
///
/// The poller and each voter contribute one; the nonced hash of a content
/// version is computed over `poller_nonce || voter_nonce || content`.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nonce(Vec<u8>);

impl Nonce {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Nonce {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce(")?;
        for b in self.0.iter().take(4) {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "\u{2026}, {} bytes)", self.0.len())
    }
}
