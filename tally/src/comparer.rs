//! Decide whether a participant's vote for one URL matches local hashes.
//!
//! A candidate version matches a local version when the plain hashes are
//! equal *and* the candidate's nonced hash equals the local nonced hash
//! computed for that participant. Hash-errored versions on either side are
//! skipped. Bad bytes in local data are always an error. Bad bytes in a
//! vote are ignored unless the vote's plain hash matched a local version,
//! in which case the vote claims content it cannot prove.

use audit_types::{Digest, HashBlock, VoteBlock};

use crate::error::{HashSide, TallyError};

/// Compares a participant's vote block against a fixed local block.
pub trait Comparer {
    fn compare(&self, candidate: &VoteBlock, participant: usize) -> Result<bool, TallyError>;
}

struct LocalVersion {
    plain: Digest,
    nonced: Vec<Digest>,
}

fn collect_local<'a>(
    url: &str,
    versions: impl Iterator<Item = (bool, &'a Digest, Vec<Digest>)>,
) -> Result<Vec<LocalVersion>, TallyError> {
    let mut local = Vec::new();
    for (hash_error, plain, nonced) in versions {
        if hash_error {
            continue;
        }
        if !plain.is_legal() {
            return Err(TallyError::IllegalByteArray {
                url: url.to_string(),
                side: HashSide::Local,
            });
        }
        local.push(LocalVersion {
            plain: plain.clone(),
            nonced,
        });
    }
    Ok(local)
}

fn compare_versions(
    url: &str,
    local: &[LocalVersion],
    index: usize,
    candidate: &VoteBlock,
) -> Result<bool, TallyError> {
    for cand in candidate.versions.iter().filter(|v| !v.hash_error) {
        if !cand.plain_hash.is_legal() {
            continue;
        }
        for loc in local.iter().filter(|l| l.plain == cand.plain_hash) {
            let expected = loc
                .nonced
                .get(index)
                .filter(|d| d.is_legal())
                .ok_or_else(|| TallyError::IllegalByteArray {
                    url: url.to_string(),
                    side: HashSide::Local,
                })?;
            if !cand.nonced_hash.is_legal() {
                return Err(TallyError::IllegalByteArray {
                    url: url.to_string(),
                    side: HashSide::Remote,
                });
            }
            if *expected == cand.nonced_hash {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Comparer bound to the poller's [`HashBlock`], which carries one nonced
/// hash per participant.
pub struct HashBlockComparer {
    url: String,
    versions: Vec<LocalVersion>,
}

impl HashBlockComparer {
    /// Fails if any non-errored local version has an illegal plain hash.
    pub fn new(block: &HashBlock) -> Result<Self, TallyError> {
        let versions = collect_local(
            &block.url,
            block
                .versions
                .iter()
                .map(|v| (v.hash_error, &v.plain_hash, v.nonced_hashes.clone())),
        )?;
        Ok(Self {
            url: block.url.clone(),
            versions,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn for_participant(&self, index: usize) -> ParticipantComparer<'_> {
        ParticipantComparer { local: self, index }
    }
}

impl Comparer for HashBlockComparer {
    fn compare(&self, candidate: &VoteBlock, participant: usize) -> Result<bool, TallyError> {
        compare_versions(&self.url, &self.versions, participant, candidate)
    }
}

/// A [`HashBlockComparer`] fixed to one participant index.
pub struct ParticipantComparer<'a> {
    local: &'a HashBlockComparer,
    index: usize,
}

impl ParticipantComparer<'_> {
    pub fn compare(&self, candidate: &VoteBlock) -> Result<bool, TallyError> {
        self.local.compare(candidate, self.index)
    }
}

/// Comparer bound to a single-nonce [`VoteBlock`], such as a voter's own
/// record. The participant index is ignored.
pub struct VoteBlockComparer {
    url: String,
    versions: Vec<LocalVersion>,
}

impl VoteBlockComparer {
    pub fn new(block: &VoteBlock) -> Result<Self, TallyError> {
        let versions = collect_local(
            &block.url,
            block
                .versions
                .iter()
                .map(|v| (v.hash_error, &v.plain_hash, vec![v.nonced_hash.clone()])),
        )?;
        Ok(Self {
            url: block.url.clone(),
            versions,
        })
    }
}

impl Comparer for VoteBlockComparer {
    fn compare(&self, candidate: &VoteBlock, _participant: usize) -> Result<bool, TallyError> {
        compare_versions(&self.url, &self.versions, 0, candidate)
    }
}
