//! Fundamental types for replica audit polls.
//!
//! This crate defines the core types shared across every other crate in the workspace:
//! peer identities, poll keys, nonces, digests, timestamps, the canonical URL
//! order, and the per-URL vote/hash block data model.

pub mod digest;
pub mod error;
pub mod identity;
pub mod nonce;
pub mod time;
pub mod url;
pub mod vote_block;

pub use digest::Digest;
pub use error::AuditError;
pub use identity::{PeerIdentity, PollKey};
pub use nonce::Nonce;
pub use time::{Clock, SystemClock, Timestamp};
pub use url::compare_urls;
pub use vote_block::{HashBlock, HashBlockVersion, VoteBlock, VoteBlockVersion};
