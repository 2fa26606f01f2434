//! Per-URL vote and hash records.
//!
//! A [`VoteBlock`] is what a voter claims about one URL; a [`HashBlock`] is
//! what the poller computed itself. Versions are listed newest first, so the
//! first version is the *head* (the current content).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::Digest;

/// One content version as attested by a voter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteBlockVersion {
    /// Digest of the content alone.
    pub plain_hash: Digest,
    /// Digest of `poller_nonce || voter_nonce || content`.
    pub nonced_hash: Digest,
    /// The voter could not hash this version; it takes no part in comparison.
    pub hash_error: bool,
    /// Bytes read from the repository for this version.
    pub unfiltered_length: u64,
    /// Bytes fed to the hashers for this version.
    pub filtered_length: u64,
}

impl VoteBlockVersion {
    pub fn new(plain_hash: Digest, nonced_hash: Digest) -> Self {
        Self {
            plain_hash,
            nonced_hash,
            hash_error: false,
            unfiltered_length: 0,
            filtered_length: 0,
        }
    }

    /// A version the voter failed to hash.
    pub fn errored() -> Self {
        Self {
            plain_hash: Digest::EMPTY,
            nonced_hash: Digest::EMPTY,
            hash_error: true,
            unfiltered_length: 0,
            filtered_length: 0,
        }
    }

    pub fn with_lengths(mut self, unfiltered: u64, filtered: u64) -> Self {
        self.unfiltered_length = unfiltered;
        self.filtered_length = filtered;
        self
    }
}

/// A voter's record for one URL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteBlock {
    pub url: String,
    pub versions: Vec<VoteBlockVersion>,
}

impl VoteBlock {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            versions: Vec::new(),
        }
    }

    pub fn with_versions(url: impl Into<String>, versions: Vec<VoteBlockVersion>) -> Self {
        Self {
            url: url.into(),
            versions,
        }
    }

    pub fn add_version(&mut self, version: VoteBlockVersion) {
        self.versions.push(version);
    }

    /// The most recent version, if any.
    pub fn head(&self) -> Option<&VoteBlockVersion> {
        self.versions.first()
    }

    /// Distinct legal plain hashes of the non-errored versions, in first-seen order.
    pub fn distinct_plain_hashes(&self) -> Vec<&Digest> {
        let mut seen = HashSet::new();
        self.versions
            .iter()
            .filter(|v| !v.hash_error && v.plain_hash.is_legal())
            .map(|v| &v.plain_hash)
            .filter(|h| seen.insert(*h))
            .collect()
    }

    pub fn total_unfiltered_bytes(&self) -> u64 {
        self.versions.iter().map(|v| v.unfiltered_length).sum()
    }

    pub fn total_filtered_bytes(&self) -> u64 {
        self.versions.iter().map(|v| v.filtered_length).sum()
    }
}

/// One content version as hashed by the poller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashBlockVersion {
    pub plain_hash: Digest,
    /// One nonced hash per inner-circle participant, by participant index.
    pub nonced_hashes: Vec<Digest>,
    pub hash_error: bool,
    pub unfiltered_length: u64,
    pub filtered_length: u64,
}

impl HashBlockVersion {
    pub fn new(plain_hash: Digest, nonced_hashes: Vec<Digest>) -> Self {
        Self {
            plain_hash,
            nonced_hashes,
            hash_error: false,
            unfiltered_length: 0,
            filtered_length: 0,
        }
    }

    pub fn errored() -> Self {
        Self {
            plain_hash: Digest::EMPTY,
            nonced_hashes: Vec::new(),
            hash_error: true,
            unfiltered_length: 0,
            filtered_length: 0,
        }
    }

    pub fn with_lengths(mut self, unfiltered: u64, filtered: u64) -> Self {
        self.unfiltered_length = unfiltered;
        self.filtered_length = filtered;
        self
    }

    /// The nonced hash expected from the participant at `index`.
    pub fn nonced_hash(&self, index: usize) -> Option<&Digest> {
        self.nonced_hashes.get(index)
    }
}

/// The poller's own freshly computed record for one URL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashBlock {
    pub url: String,
    pub versions: Vec<HashBlockVersion>,
}

impl HashBlock {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            versions: Vec::new(),
        }
    }

    pub fn with_versions(url: impl Into<String>, versions: Vec<HashBlockVersion>) -> Self {
        Self {
            url: url.into(),
            versions,
        }
    }

    pub fn add_version(&mut self, version: HashBlockVersion) {
        self.versions.push(version);
    }

    /// Legal plain hashes of every non-errored local version.
    pub fn plain_hashes(&self) -> HashSet<Digest> {
        self.versions
            .iter()
            .filter(|v| !v.hash_error && v.plain_hash.is_legal())
            .map(|v| v.plain_hash.clone())
            .collect()
    }

    pub fn total_filtered_bytes(&self) -> u64 {
        self.versions.iter().map(|v| v.filtered_length).sum()
    }

    pub fn total_unfiltered_bytes(&self) -> u64 {
        self.versions.iter().map(|v| v.unfiltered_length).sum()
    }

    /// Project this block onto the single nonced hash at `index`, producing
    /// the vote block a voter would send for it.
    pub fn to_vote_block(&self, index: usize) -> VoteBlock {
        let versions = self
            .versions
            .iter()
            .map(|v| {
                if v.hash_error {
                    return VoteBlockVersion::errored();
                }
                let nonced = v.nonced_hash(index).cloned().unwrap_or_default();
                VoteBlockVersion::new(v.plain_hash.clone(), nonced)
                    .with_lengths(v.unfiltered_length, v.filtered_length)
            })
            .collect();
        VoteBlock::with_versions(self.url.clone(), versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(b: u8) -> Digest {
        Digest::from_slice(&[b; 4])
    }

    #[test]
    fn distinct_plain_hashes_skips_repeats_and_errors() {
        let vb = VoteBlock::with_versions(
            "http://x/a",
            vec![
                VoteBlockVersion::new(d(1), d(9)),
                VoteBlockVersion::new(d(1), d(8)),
                VoteBlockVersion::errored(),
                VoteBlockVersion::new(d(2), d(7)),
            ],
        );
        assert_eq!(vb.distinct_plain_hashes(), vec![&d(1), &d(2)]);
        assert_eq!(vb.head().unwrap().plain_hash, d(1));
    }

    #[test]
    fn to_vote_block_picks_participant_nonce() {
        let hb = HashBlock::with_versions(
            "http://x/a",
            vec![
                HashBlockVersion::new(d(1), vec![d(10), d(11)]),
                HashBlockVersion::errored(),
            ],
        );
        let vb = hb.to_vote_block(1);
        assert_eq!(vb.versions[0].nonced_hash, d(11));
        assert!(vb.versions[1].hash_error);
        assert_eq!(hb.plain_hashes().len(), 1);
    }
}
