//! Checkpoint persistence for poll sessions.
//!
//! Checkpoints are opaque byte blobs keyed by poll, optional peer and bean
//! kind. Beans are encoded with `bincode` by [`save_bean`] / [`load_bean`].
//! Checkpoints are only read during recovery.

use audit_types::{PeerIdentity, PollKey};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::StoreError;

/// Identifies one persisted bean.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CheckpointKey {
    pub poll_key: PollKey,
    /// `None` for poll-wide beans.
    pub peer: Option<PeerIdentity>,
    pub kind: String,
}

impl CheckpointKey {
    pub fn poll(poll_key: &PollKey, kind: impl Into<String>) -> Self {
        Self {
            poll_key: poll_key.clone(),
            peer: None,
            kind: kind.into(),
        }
    }

    pub fn participant(poll_key: &PollKey, peer: &PeerIdentity, kind: impl Into<String>) -> Self {
        Self {
            poll_key: poll_key.clone(),
            peer: Some(peer.clone()),
            kind: kind.into(),
        }
    }
}

pub trait CheckpointStore: Send + Sync {
    fn save(&self, key: &CheckpointKey, bytes: &[u8]) -> Result<(), StoreError>;

    fn load(&self, key: &CheckpointKey) -> Result<Option<Vec<u8>>, StoreError>;

    /// Remove every checkpoint of a poll.
    fn remove_poll(&self, poll_key: &PollKey) -> Result<(), StoreError>;
}

pub fn save_bean<T: Serialize>(
    store: &dyn CheckpointStore,
    key: &CheckpointKey,
    bean: &T,
) -> Result<(), StoreError> {
    let bytes = bincode::serialize(bean)?;
    store.save(key, &bytes)
}

pub fn load_bean<T: DeserializeOwned>(
    store: &dyn CheckpointStore,
    key: &CheckpointKey,
) -> Result<Option<T>, StoreError> {
    match store.load(key)? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

/// Stores each checkpoint as a file under `root/<poll>/<peer>/<kind>.bin`.
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn poll_dir(&self, poll_key: &PollKey) -> PathBuf {
        self.root.join(sanitize(poll_key.as_str()))
    }

    fn path_for(&self, key: &CheckpointKey) -> PathBuf {
        let peer_dir = match &key.peer {
            Some(peer) => sanitize(peer.as_str()),
            None => "_poll".to_string(),
        };
        self.poll_dir(&key.poll_key)
            .join(peer_dir)
            .join(format!("{}.bin", sanitize(&key.kind)))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, key: &CheckpointKey, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write then rename so a crash never leaves a torn checkpoint.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), len = bytes.len(), "checkpoint saved");
        Ok(())
    }

    fn load(&self, key: &CheckpointKey) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove_poll(&self, poll_key: &PollKey) -> Result<(), StoreError> {
        match fs::remove_dir_all(self.poll_dir(poll_key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}
