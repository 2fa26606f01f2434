//! Cross-participant support for each distinct content version of a URL,
//! used to pick repair sources.

use audit_types::{Digest, VoteBlock};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::vote_block_tallier::{Verdict, VoteSink};

#[derive(Clone, Debug, Default)]
pub struct VersionCounts {
    /// Distinct plain hash to number of participants holding it.
    support: HashMap<Digest, usize>,
    /// Participant to the plain hash of its head version.
    heads: BTreeMap<usize, Digest>,
    voted: BTreeSet<usize>,
}

impl VersionCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count each distinct version in `block` once for `participant`.
    /// A participant's second vote is ignored.
    pub fn vote(&mut self, block: &VoteBlock, participant: usize) {
        if !self.voted.insert(participant) {
            return;
        }
        for hash in block.distinct_plain_hashes() {
            *self.support.entry(hash.clone()).or_insert(0) += 1;
        }
        if let Some(head) = block.head() {
            if !head.hash_error && head.plain_hash.is_legal() {
                self.heads.insert(participant, head.plain_hash.clone());
            }
        }
    }

    /// Number of participants holding `hash` in any version.
    pub fn support(&self, hash: &Digest) -> usize {
        self.support.get(hash).copied().unwrap_or(0)
    }

    /// Participants whose head version is held by at least `min_support`
    /// participants.
    pub fn repair_candidates(&self, min_support: usize) -> BTreeMap<usize, Digest> {
        self.repair_candidates_excluding(min_support, &HashSet::new())
    }

    /// As [`repair_candidates`](Self::repair_candidates), but no hash in
    /// `excluded` counts as support.
    ///
    /// Support is tallied per hash, so leaving excluded hashes out of the
    /// count changes only their own totals. Those totals drop to zero,
    /// which disqualifies exactly the heads carrying an excluded hash and
    /// leaves every other head's support as counted.
    pub fn repair_candidates_excluding(
        &self,
        min_support: usize,
        excluded: &HashSet<Digest>,
    ) -> BTreeMap<usize, Digest> {
        self.heads
            .iter()
            .filter(|(_, hash)| !excluded.contains(*hash))
            .filter(|(_, hash)| self.support(hash) >= min_support)
            .map(|(&participant, hash)| (participant, hash.clone()))
            .collect()
    }

    /// Repair candidates ordered by ascending support of their head
    /// version, ties broken by ascending participant index.
    pub fn sorted_repair_candidates(&self, min_support: usize) -> Vec<usize> {
        let mut candidates: Vec<(usize, usize)> = self
            .repair_candidates(min_support)
            .iter()
            .map(|(&participant, hash)| (self.support(hash), participant))
            .collect();
        candidates.sort_unstable();
        candidates.into_iter().map(|(_, participant)| participant).collect()
    }
}

impl VoteSink for VersionCounts {
    fn record(&mut self, participant: usize, _verdict: Verdict, block: Option<&VoteBlock>) {
        if let Some(block) = block {
            self.vote(block, participant);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_types::VoteBlockVersion;

    fn d(b: u8) -> Digest {
        Digest::from_slice(&[b; 32])
    }

    fn block(heads: &[u8]) -> VoteBlock {
        VoteBlock::with_versions(
            "u",
            heads
                .iter()
                .map(|&b| VoteBlockVersion::new(d(b), d(b + 100)))
                .collect(),
        )
    }

    #[test]
    fn repeated_versions_count_once() {
        let mut counts = VersionCounts::new();
        counts.vote(&block(&[1, 1, 1, 1, 1]), 0);
        assert_eq!(counts.support(&d(1)), 1);
    }

    #[test]
    fn candidates_need_enough_support() {
        let mut counts = VersionCounts::new();
        counts.vote(&block(&[1]), 0);
        counts.vote(&block(&[1, 2]), 1);
        counts.vote(&block(&[2, 1]), 2);
        assert_eq!(counts.support(&d(1)), 3);
        assert_eq!(counts.support(&d(2)), 2);

        assert!(counts.repair_candidates(4).is_empty());
        let three: Vec<usize> = counts.repair_candidates(3).keys().copied().collect();
        assert_eq!(three, vec![0, 1]);
        let two: Vec<usize> = counts.repair_candidates(2).keys().copied().collect();
        assert_eq!(two, vec![0, 1, 2]);
    }

    #[test]
    fn excluded_hashes_never_qualify() {
        let mut counts = VersionCounts::new();
        counts.vote(&block(&[1]), 0);
        counts.vote(&block(&[2]), 1);
        let excluded: HashSet<Digest> = [d(1)].into_iter().collect();
        let got: Vec<usize> = counts
            .repair_candidates_excluding(1, &excluded)
            .keys()
            .copied()
            .collect();
        assert_eq!(got, vec![1]);
    }

    #[test]
    fn excluded_hashes_do_not_change_other_support() {
        let mut counts = VersionCounts::new();
        // Participant 1 holds the excluded version alongside its head.
        counts.vote(&block(&[2]), 0);
        counts.vote(&block(&[2, 1]), 1);
        counts.vote(&block(&[1, 2]), 2);
        let excluded: HashSet<Digest> = [d(1)].into_iter().collect();

        let got = counts.repair_candidates_excluding(3, &excluded);
        assert_eq!(got.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
        assert!(got.values().all(|hash| *hash == d(2)));
        // Without the exclusion the excluded head has enough support too.
        assert_eq!(counts.repair_candidates(2).len(), 3);
    }

    #[test]
    fn sorted_by_support_then_index() {
        let mut counts = VersionCounts::new();
        counts.vote(&block(&[1]), 3);
        counts.vote(&block(&[2]), 0);
        counts.vote(&block(&[1]), 1);
        counts.vote(&block(&[3]), 2);
        assert_eq!(counts.sorted_repair_candidates(1), vec![0, 2, 1, 3]);
        assert_eq!(counts.sorted_repair_candidates(2), vec![1, 3]);
    }

    #[test]
    fn errored_head_is_not_a_candidate() {
        let mut counts = VersionCounts::new();
        let mut b = block(&[1]);
        b.versions.insert(0, VoteBlockVersion::errored());
        counts.vote(&b, 0);
        assert_eq!(counts.support(&d(1)), 1);
        assert!(counts.repair_candidates(1).is_empty());
    }

    #[test]
    fn second_vote_from_participant_ignored() {
        let mut counts = VersionCounts::new();
        counts.vote(&block(&[1]), 0);
        counts.vote(&block(&[1]), 0);
        assert_eq!(counts.support(&d(1)), 1);
    }
}
