//! Hashing and nonce primitives for replica audit polls.
//!
//! - **SHA-256** (default) and **Blake2b-256** content digests
//! - Incremental hashers so large content can be hashed in bounded steps
//! - [`VersionHasher`]: one plain digest plus one nonced digest per
//!   participant, fed from a single pass over the content
//! - Random nonce generation

pub mod error;
pub mod hash;
pub mod nonce;

pub use error::CryptoError;
pub use hash::{
    digest, digest_multi, nonced_digest, HashAlgorithm, IncrementalHasher, VersionHasher,
};
pub use nonce::{make_nonce, DEFAULT_NONCE_LEN};
