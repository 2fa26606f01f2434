//! Content digests: plain hashes and nonced hashes.

use audit_types::{Digest, Nonce};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest as _};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;

use crate::CryptoError;

type Blake2b256 = Blake2b<U32>;

/// Hash algorithm agreed for a poll; carried in the Poll message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Blake2b256,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake2b256 => "blake2b256",
        }
    }

    /// Length in bytes of digests produced by this algorithm.
    pub fn digest_len(&self) -> usize {
        32
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "blake2b256" | "blake2b" => Ok(Self::Blake2b256),
            other => Err(CryptoError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// One-shot digest of `data`.
pub fn digest(algorithm: HashAlgorithm, data: &[u8]) -> Digest {
    digest_multi(algorithm, &[data])
}

/// One-shot digest of several slices hashed in sequence.
pub fn digest_multi(algorithm: HashAlgorithm, parts: &[&[u8]]) -> Digest {
    let mut hasher = IncrementalHasher::new(algorithm);
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}

/// Nonced digest of a whole content version: `H(poller_nonce || voter_nonce || content)`.
pub fn nonced_digest(
    algorithm: HashAlgorithm,
    poller_nonce: &Nonce,
    voter_nonce: &Nonce,
    content: &[u8],
) -> Digest {
    digest_multi(
        algorithm,
        &[poller_nonce.as_bytes(), voter_nonce.as_bytes(), content],
    )
}

/// A hasher that can be fed content in arbitrary chunks.
#[derive(Clone)]
pub enum IncrementalHasher {
    Sha256(Sha256),
    Blake2b256(Blake2b256),
}

impl IncrementalHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Blake2b256 => Self::Blake2b256(Blake2b256::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Blake2b256(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Digest {
        match self {
            Self::Sha256(h) => Digest::new(h.finalize().to_vec()),
            Self::Blake2b256(h) => Digest::new(h.finalize().to_vec()),
        }
    }
}

/// Hashes one content version into a plain digest and one nonced digest per
/// `(poller_nonce, voter_nonce)` pair, in a single pass over the content.
///
/// The poller builds one with a pair per inner-circle participant; a voter
/// builds one with its single pair.
pub struct VersionHasher {
    plain: IncrementalHasher,
    nonced: Vec<IncrementalHasher>,
    bytes_hashed: u64,
}

impl VersionHasher {
    pub fn new(algorithm: HashAlgorithm, nonce_pairs: &[(Nonce, Nonce)]) -> Self {
        let nonced = nonce_pairs
            .iter()
            .map(|(poller, voter)| {
                let mut h = IncrementalHasher::new(algorithm);
                h.update(poller.as_bytes());
                h.update(voter.as_bytes());
                h
            })
            .collect();
        Self {
            plain: IncrementalHasher::new(algorithm),
            nonced,
            bytes_hashed: 0,
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.plain.update(chunk);
        for h in &mut self.nonced {
            h.update(chunk);
        }
        self.bytes_hashed += chunk.len() as u64;
    }

    pub fn bytes_hashed(&self) -> u64 {
        self.bytes_hashed
    }

    /// Finish hashing: the plain digest and the nonced digests in pair order.
    pub fn finish(self) -> (Digest, Vec<Digest>) {
        let plain = self.plain.finalize();
        let nonced = self.nonced.into_iter().map(IncrementalHasher::finalize).collect();
        (plain, nonced)
    }
}
