//! Read access to the locally preserved content of one archival unit.

use crate::StoreError;

/// The local content repository for one archival unit.
///
/// URLs are reported in canonical order (see [`audit_types::compare_urls`]).
/// Each URL has one or more versions, newest first; version `0` is the
/// current content.
pub trait ContentRepository: Send + Sync {
    /// Identifier of the archival unit this repository holds.
    fn au_id(&self) -> &str;

    /// Every URL with at least one version, in canonical order.
    fn urls(&self) -> Result<Vec<String>, StoreError>;

    fn has_url(&self, url: &str) -> Result<bool, StoreError> {
        Ok(self.version_count(url)? > 0)
    }

    /// Number of stored versions of `url`; zero when absent.
    fn version_count(&self, url: &str) -> Result<usize, StoreError>;

    /// Length in bytes of one version.
    fn version_len(&self, url: &str, version: usize) -> Result<u64, StoreError>;

    /// Read up to `len` bytes of a version starting at `offset`.
    ///
    /// Returns an empty buffer at end of content.
    fn read_range(
        &self,
        url: &str,
        version: usize,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, StoreError>;

    /// Store repaired content as the new current version of `url`.
    fn store_repair(&self, url: &str, content: Vec<u8>) -> Result<(), StoreError>;

    /// Remove every version of `url`.
    fn delete_url(&self, url: &str) -> Result<(), StoreError>;

    /// Read a whole version into memory.
    fn read_version(&self, url: &str, version: usize) -> Result<Vec<u8>, StoreError> {
        let len = self.version_len(url, version)?;
        let len = usize::try_from(len)
            .map_err(|_| StoreError::Backend(format!("{url} version {version} too large")))?;
        self.read_range(url, version, 0, len)
    }
}
