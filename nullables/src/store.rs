//! Nullable storage: in-memory repository and checkpoint store.

use audit_store::{CheckpointKey, CheckpointStore, ContentRepository, StoreError};
use audit_types::{compare_urls, PollKey};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

/// In-memory content for one archival unit.
///
/// Versions are kept newest first, like the real repository.
#[derive(Debug, Default)]
pub struct NullRepository {
    au_id: String,
    content: Mutex<BTreeMap<String, Vec<Vec<u8>>>>,
    failing: Mutex<HashSet<String>>,
    repaired: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
}

impl NullRepository {
    pub fn new(au_id: impl Into<String>) -> Self {
        Self {
            au_id: au_id.into(),
            ..Self::default()
        }
    }

    /// Add `content` as the new current version of `url`.
    pub fn add_version(&self, url: &str, content: Vec<u8>) {
        self.content
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(url.to_string())
            .or_default()
            .insert(0, content);
    }

    /// Make content reads of `url` fail. Listing and lengths still work.
    pub fn fail_reads(&self, url: &str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string());
    }

    /// Current version of `url`.
    pub fn current(&self, url: &str) -> Option<Vec<u8>> {
        self.content
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .and_then(|versions| versions.first().cloned())
    }

    pub fn versions(&self, url: &str) -> Vec<Vec<u8>> {
        self.content
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .unwrap_or_default()
    }

    /// URLs that received a repair, in order.
    pub fn repaired(&self) -> Vec<String> {
        self.repaired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// URLs that were deleted, in order.
    pub fn deleted(&self) -> Vec<String> {
        self.deleted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_failing(&self, url: &str) -> bool {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(url)
    }

    fn with_version<T>(
        &self,
        url: &str,
        version: usize,
        f: impl FnOnce(&[u8]) -> T,
    ) -> Result<T, StoreError> {
        let content = self.content.lock().unwrap_or_else(PoisonError::into_inner);
        content
            .get(url)
            .and_then(|versions| versions.get(version))
            .map(|bytes| f(bytes))
            .ok_or_else(|| StoreError::NotFound(format!("{url} version {version}")))
    }
}

impl ContentRepository for NullRepository {
    fn au_id(&self) -> &str {
        &self.au_id
    }

    fn urls(&self) -> Result<Vec<String>, StoreError> {
        let content = self.content.lock().unwrap_or_else(PoisonError::into_inner);
        let mut urls: Vec<String> = content
            .iter()
            .filter(|(_, versions)| !versions.is_empty())
            .map(|(url, _)| url.clone())
            .collect();
        urls.sort_by(|a, b| compare_urls(a, b));
        Ok(urls)
    }

    fn version_count(&self, url: &str) -> Result<usize, StoreError> {
        Ok(self
            .content
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .map_or(0, Vec::len))
    }

    fn version_len(&self, url: &str, version: usize) -> Result<u64, StoreError> {
        self.with_version(url, version, |bytes| bytes.len() as u64)
    }

    fn read_range(
        &self,
        url: &str,
        version: usize,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, StoreError> {
        if self.is_failing(url) {
            return Err(StoreError::Backend(format!("read of {url} failed")));
        }
        self.with_version(url, version, |bytes| {
            let start = usize::try_from(offset).unwrap_or(usize::MAX).min(bytes.len());
            let end = start.saturating_add(len).min(bytes.len());
            bytes[start..end].to_vec()
        })
    }

    fn store_repair(&self, url: &str, content: Vec<u8>) -> Result<(), StoreError> {
        self.add_version(url, content);
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url);
        self.repaired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_string());
        Ok(())
    }

    fn delete_url(&self, url: &str) -> Result<(), StoreError> {
        self.content
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url);
        self.deleted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_string());
        Ok(())
    }
}

/// Checkpoints held in memory.
#[derive(Debug, Default)]
pub struct NullCheckpointStore {
    beans: Mutex<HashMap<CheckpointKey, Vec<u8>>>,
}

impl NullCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.beans.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of checkpoints saved for one poll.
    pub fn count_for(&self, poll_key: &PollKey) -> usize {
        self.beans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|key| &key.poll_key == poll_key)
            .count()
    }
}

impl CheckpointStore for NullCheckpointStore {
    fn save(&self, key: &CheckpointKey, bytes: &[u8]) -> Result<(), StoreError> {
        self.beans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), bytes.to_vec());
        Ok(())
    }

    fn load(&self, key: &CheckpointKey) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .beans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn remove_poll(&self, poll_key: &PollKey) -> Result<(), StoreError> {
        self.beans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|key, _| &key.poll_key != poll_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_types::PeerIdentity;

    #[test]
    fn versions_are_newest_first() {
        let repo = NullRepository::new("au");
        repo.add_version("http://x/a", b"old".to_vec());
        repo.add_version("http://x/a", b"new".to_vec());
        assert_eq!(repo.version_count("http://x/a").unwrap(), 2);
        assert_eq!(repo.read_version("http://x/a", 0).unwrap(), b"new");
        assert_eq!(repo.read_range("http://x/a", 1, 1, 10).unwrap(), b"ld");
        assert!(repo.read_range("http://x/a", 1, 3, 10).unwrap().is_empty());
        assert!(matches!(
            repo.version_len("http://x/a", 2),
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(repo.version_count("http://x/none").unwrap(), 0);
    }

    #[test]
    fn urls_come_back_in_canonical_order() {
        let repo = NullRepository::new("au");
        for url in ["http://x/b", "http://x/a/c", "http://x/a"] {
            repo.add_version(url, vec![1]);
        }
        let mut expected = vec!["http://x/a", "http://x/a/c", "http://x/b"];
        expected.sort_by(|a, b| compare_urls(a, b));
        assert_eq!(repo.urls().unwrap(), expected);
    }

    #[test]
    fn failing_reads_heal_on_repair() {
        let repo = NullRepository::new("au");
        repo.add_version("http://x/a", b"bad".to_vec());
        repo.fail_reads("http://x/a");
        assert!(repo.read_range("http://x/a", 0, 0, 8).is_err());
        assert_eq!(repo.version_len("http://x/a", 0).unwrap(), 3);

        repo.store_repair("http://x/a", b"good".to_vec()).unwrap();
        assert_eq!(repo.current("http://x/a").unwrap(), b"good");
        assert_eq!(repo.repaired(), vec!["http://x/a".to_string()]);

        repo.delete_url("http://x/a").unwrap();
        assert!(!repo.has_url("http://x/a").unwrap());
        assert_eq!(repo.deleted().len(), 1);
    }

    #[test]
    fn checkpoints_are_removed_per_poll() {
        let store = NullCheckpointStore::new();
        let p1 = PollKey::new("p1");
        let p2 = PollKey::new("p2");
        store.save(&CheckpointKey::poll(&p1, "poll"), b"a").unwrap();
        store
            .save(&CheckpointKey::participant(&p1, &PeerIdentity::new("v"), "participant"), b"b")
            .unwrap();
        store.save(&CheckpointKey::poll(&p2, "poll"), b"c").unwrap();
        assert_eq!(store.count_for(&p1), 2);

        store.remove_poll(&p1).unwrap();
        assert_eq!(store.count_for(&p1), 0);
        assert_eq!(store.load(&CheckpointKey::poll(&p2, "poll")).unwrap(), Some(b"c".to_vec()));
    }
}
