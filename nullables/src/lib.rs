//! Nullable infrastructure for deterministic testing.
//!
//! Every external dependency of a poll session (clock, transport, content
//! repository, checkpoint store, identity resolution) sits behind a trait.
//! This crate provides test-friendly implementations that:
//! - Return deterministic values
//! - Can be controlled programmatically
//! - Never touch the filesystem or network
//!
//! All of them are thread-safe so sessions can run on tokio's
//! multi-threaded runtime.

pub mod clock;
pub mod network;
pub mod store;

pub use clock::NullClock;
pub use network::{NullIdentityResolver, NullTransport};
pub use store::{NullCheckpointStore, NullRepository};
