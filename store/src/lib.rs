//! Storage traits for replica audits.
//!
//! The audit engine never touches durable storage directly: local content is
//! read through [`ContentRepository`] and session state is persisted through
//! [`CheckpointStore`]. Both are injected into sessions.

pub mod checkpoint;
pub mod error;
pub mod repository;

pub use checkpoint::{load_bean, save_bean, CheckpointKey, CheckpointStore, FileCheckpointStore};
pub use error::StoreError;
pub use repository::ContentRepository;
