//! Opaque digest values carried in vote and hash blocks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The bytes of one hash computation (plain or nonced).
///
/// A digest with no bytes is *illegal*: it is what a missing or truncated
/// hash decodes to, and it never matches anything.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest(Vec<u8>);

impl Digest {
    pub const EMPTY: Self = Self(Vec::new());

    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
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

    /// Whether this digest may take part in a comparison.
    pub fn is_legal(&self) -> bool {
        !self.0.is_empty()
    }
}

impl From<Vec<u8>> for Digest {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<[u8; 32]> for Digest {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "Digest(<illegal>)");
        }
        write!(f, "Digest(")?;
        for b in self.0.iter().take(4) {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "\u{2026})")
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_digest_is_illegal() {
        assert!(!Digest::EMPTY.is_legal());
        assert!(!Digest::new(Vec::new()).is_legal());
        assert!(Digest::from_slice(&[0]).is_legal());
    }

    #[test]
    fn display_is_full_hex() {
        let d = Digest::from_slice(&[0xde, 0xad, 0xbe, 0xef, 0x01]);
        assert_eq!(d.to_string(), "deadbeef01");
        assert_eq!(format!("{d:?}"), "Digest(deadbeef\u{2026})");
    }
}
