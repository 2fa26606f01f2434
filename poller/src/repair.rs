//! Choosing repair sources and tracking repairs through a poll.

use audit_tally::{BlockTally, TallyPolicy, TallyResult, VersionCounts};
use audit_types::{Digest, PeerIdentity};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// What to do about one tallied URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RepairPlan {
    Nothing,
    /// Fetch the URL from one of these participants, best first.
    Repair(Vec<usize>),
    /// The poller holds a URL the voters do not; drop the local copy.
    Delete,
}

/// Inputs to [`plan_repair`] beyond the tally itself.
pub struct RepairContext<'a> {
    pub quorate: bool,
    pub policy: &'a TallyPolicy,
    pub version_counts: &'a VersionCounts,
    /// Plain hashes of every local version of the URL.
    pub local_hashes: &'a HashSet<Digest>,
    pub min_replicas_for_no_quorum_repair: usize,
}

/// Decide how to act on `result` for the URL `tally` describes.
///
/// Only quorate polls lead to repairs or deletions.
pub fn plan_repair(tally: &BlockTally, result: TallyResult, ctx: &RepairContext<'_>) -> RepairPlan {
    if !ctx.quorate {
        return RepairPlan::Nothing;
    }
    let candidates = match result {
        TallyResult::Won => return RepairPlan::Nothing,
        TallyResult::LostPollerOnlyBlock => return RepairPlan::Delete,
        TallyResult::Lost if ctx.policy.use_version_counts => {
            let eligible = ctx
                .version_counts
                .repair_candidates_excluding(1, ctx.local_hashes);
            best_first(ctx.version_counts, 1)
                .into_iter()
                .filter(|p| eligible.contains_key(p))
                .collect()
        }
        TallyResult::Lost => tally
            .disagree_voters()
            .iter()
            .copied()
            .filter(|p| {
                !(ctx.policy.exclude_poller_only_repairers
                    && tally.poller_only_voters().contains(p))
            })
            .collect(),
        TallyResult::NoQuorum
            if tally.is_voter_only() && ctx.min_replicas_for_no_quorum_repair > 0 =>
        {
            best_first(ctx.version_counts, ctx.min_replicas_for_no_quorum_repair)
        }
        TallyResult::TooClose if tally.is_voter_only() => best_first(ctx.version_counts, 1),
        TallyResult::NoQuorum | TallyResult::TooClose => return RepairPlan::Nothing,
    };
    if candidates.is_empty() {
        RepairPlan::Nothing
    } else {
        RepairPlan::Repair(candidates)
    }
}

/// Sorted repair candidates, best supported first.
fn best_first(counts: &VersionCounts, min_support: usize) -> Vec<usize> {
    let mut sorted = counts.sorted_repair_candidates(min_support);
    sorted.reverse();
    sorted
}

/// One URL queued for repair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repair {
    pub url: String,
    pub repairer: PeerIdentity,
    /// Result of the re-tally after the repair; `None` when no content
    /// arrived.
    pub result: Option<TallyResult>,
}

/// Repairs of one poll, moving from pending to active to completed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairQueue {
    /// `None` is unlimited.
    max_repairs: Option<usize>,
    pending: Vec<Repair>,
    active: Vec<Repair>,
    completed: Vec<Repair>,
    deletions: Vec<String>,
}

impl RepairQueue {
    pub fn new(max_repairs: Option<usize>) -> Self {
        Self {
            max_repairs,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len() + self.active.len() + self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, url: &str) -> bool {
        self.pending
            .iter()
            .chain(&self.active)
            .chain(&self.completed)
            .any(|r| r.url == url)
    }

    /// Queue a repair of `url` from `repairer`. Returns false when the URL
    /// is already queued or the queue is full.
    pub fn request_repair(&mut self, url: &str, repairer: PeerIdentity) -> bool {
        if self.contains(url) || self.max_repairs.is_some_and(|max| self.len() >= max) {
            return false;
        }
        self.pending.push(Repair {
            url: url.to_string(),
            repairer,
            result: None,
        });
        true
    }

    pub fn mark_for_deletion(&mut self, url: &str) {
        if !self.deletions.iter().any(|u| u == url) {
            self.deletions.push(url.to_string());
        }
    }

    /// Move every pending repair assigned to `repairer` to active and return
    /// their URLs.
    pub fn activate_for(&mut self, repairer: &PeerIdentity) -> Vec<String> {
        let (mine, rest): (Vec<Repair>, Vec<Repair>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|r| &r.repairer == repairer);
        self.pending = rest;
        let urls = mine.iter().map(|r| r.url.clone()).collect();
        self.active.extend(mine);
        urls
    }

    pub fn mark_active(&mut self, url: &str) -> bool {
        match self.pending.iter().position(|r| r.url == url) {
            Some(i) => {
                let repair = self.pending.remove(i);
                self.active.push(repair);
                true
            }
            None => false,
        }
    }

    /// Finish the repair of `url`, from either active or pending.
    pub fn mark_complete(&mut self, url: &str, result: Option<TallyResult>) -> bool {
        let found = match self.active.iter().position(|r| r.url == url) {
            Some(i) => Some(self.active.remove(i)),
            None => self
                .pending
                .iter()
                .position(|r| r.url == url)
                .map(|i| self.pending.remove(i)),
        };
        match found {
            Some(mut repair) => {
                repair.result = result;
                self.completed.push(repair);
                true
            }
            None => false,
        }
    }

    pub fn pending(&self) -> &[Repair] {
        &self.pending
    }

    pub fn active(&self) -> &[Repair] {
        &self.active
    }

    pub fn completed(&self) -> &[Repair] {
        &self.completed
    }

    pub fn deletions(&self) -> &[String] {
        &self.deletions
    }

    /// No repair is pending or active.
    pub fn is_settled(&self) -> bool {
        self.pending.is_empty() && self.active.is_empty()
    }

    /// Completed repairs whose re-tally still did not agree, or that never
    /// received content.
    pub fn unrepaired_count(&self) -> usize {
        self.completed
            .iter()
            .filter(|r| {
                matches!(
                    r.result,
                    None | Some(TallyResult::Lost) | Some(TallyResult::TooClose)
                )
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_types::{VoteBlock, VoteBlockVersion};

    fn peer(name: &str) -> PeerIdentity {
        PeerIdentity::new(name)
    }

    fn lost_tally() -> BlockTally {
        let mut tally = BlockTally::new("u", true);
        tally.add_agree_voter(0);
        tally.add_voter_only_block_voter(1);
        tally.add_voter_only_block_voter(2);
        tally.add_poller_only_block_voter(3);
        tally
    }

    fn block(hash: u8) -> VoteBlock {
        VoteBlock::with_versions(
            "u",
            vec![VoteBlockVersion::new(
                Digest::from_slice(&[hash; 4]),
                Digest::from_slice(&[hash; 4]),
            )],
        )
    }

    #[test]
    fn lost_repairs_from_disagreeing_voters() {
        let counts = VersionCounts::new();
        let policy = TallyPolicy::default();
        let local = HashSet::new();
        let ctx = RepairContext {
            quorate: true,
            policy: &policy,
            version_counts: &counts,
            local_hashes: &local,
            min_replicas_for_no_quorum_repair: 0,
        };
        assert_eq!(
            plan_repair(&lost_tally(), TallyResult::Lost, &ctx),
            RepairPlan::Repair(vec![1, 2, 3])
        );

        let policy = TallyPolicy {
            exclude_poller_only_repairers: true,
            ..TallyPolicy::default()
        };
        let ctx = RepairContext { policy: &policy, ..ctx };
        assert_eq!(
            plan_repair(&lost_tally(), TallyResult::Lost, &ctx),
            RepairPlan::Repair(vec![1, 2])
        );
    }

    #[test]
    fn lost_with_version_counts_skips_local_versions() {
        let mut counts = VersionCounts::new();
        counts.vote(&block(1), 0);
        counts.vote(&block(2), 1);
        counts.vote(&block(2), 2);
        let policy = TallyPolicy {
            use_version_counts: true,
            ..TallyPolicy::default()
        };
        let local: HashSet<Digest> = [Digest::from_slice(&[1; 4])].into_iter().collect();
        let ctx = RepairContext {
            quorate: true,
            policy: &policy,
            version_counts: &counts,
            local_hashes: &local,
            min_replicas_for_no_quorum_repair: 0,
        };
        assert_eq!(
            plan_repair(&lost_tally(), TallyResult::Lost, &ctx),
            RepairPlan::Repair(vec![2, 1])
        );
    }

    #[test]
    fn voter_only_results_use_sorted_candidates() {
        let mut counts = VersionCounts::new();
        counts.vote(&block(1), 0);
        counts.vote(&block(2), 1);
        counts.vote(&block(2), 2);
        let policy = TallyPolicy::default();
        let local = HashSet::new();
        let voter_only = BlockTally::new("u", false);
        let ctx = RepairContext {
            quorate: true,
            policy: &policy,
            version_counts: &counts,
            local_hashes: &local,
            min_replicas_for_no_quorum_repair: 2,
        };
        assert_eq!(
            plan_repair(&voter_only, TallyResult::TooClose, &ctx),
            RepairPlan::Repair(vec![2, 1, 0])
        );
        assert_eq!(
            plan_repair(&voter_only, TallyResult::NoQuorum, &ctx),
            RepairPlan::Repair(vec![2, 1])
        );
        let disabled = RepairContext {
            min_replicas_for_no_quorum_repair: 0,
            ..ctx
        };
        assert_eq!(plan_repair(&voter_only, TallyResult::NoQuorum, &disabled), RepairPlan::Nothing);
        let held = BlockTally::new("u", true);
        assert_eq!(plan_repair(&held, TallyResult::TooClose, &disabled), RepairPlan::Nothing);
    }

    #[test]
    fn won_and_inquorate_do_nothing_and_poller_only_deletes() {
        let counts = VersionCounts::new();
        let policy = TallyPolicy::default();
        let local = HashSet::new();
        let ctx = RepairContext {
            quorate: true,
            policy: &policy,
            version_counts: &counts,
            local_hashes: &local,
            min_replicas_for_no_quorum_repair: 0,
        };
        assert_eq!(plan_repair(&lost_tally(), TallyResult::Won, &ctx), RepairPlan::Nothing);
        assert_eq!(
            plan_repair(&lost_tally(), TallyResult::LostPollerOnlyBlock, &ctx),
            RepairPlan::Delete
        );
        let inquorate = RepairContext { quorate: false, ..ctx };
        assert_eq!(plan_repair(&lost_tally(), TallyResult::Lost, &inquorate), RepairPlan::Nothing);
    }

    #[test]
    fn queue_moves_repairs_through_states() {
        let mut queue = RepairQueue::new(Some(2));
        assert!(queue.request_repair("a", peer("v1")));
        assert!(!queue.request_repair("a", peer("v2")));
        assert!(queue.request_repair("b", peer("v2")));
        assert!(!queue.request_repair("c", peer("v1")), "cap reached");

        assert_eq!(queue.activate_for(&peer("v1")), vec!["a".to_string()]);
        assert_eq!(queue.active().len(), 1);
        assert!(queue.mark_active("b"));
        assert!(!queue.is_settled());

        assert!(queue.mark_complete("a", Some(TallyResult::Won)));
        assert!(queue.mark_complete("b", None));
        assert!(!queue.mark_complete("z", None));
        assert!(queue.is_settled());
        assert_eq!(queue.completed().len(), 2);
        assert_eq!(queue.unrepaired_count(), 1);
    }

    #[test]
    fn unlimited_queue_and_deletions() {
        let mut queue = RepairQueue::new(None);
        for i in 0..50 {
            assert!(queue.request_repair(&format!("u{i}"), peer("v")));
        }
        queue.mark_for_deletion("gone");
        queue.mark_for_deletion("gone");
        assert_eq!(queue.deletions(), ["gone".to_string()]);
        assert_eq!(queue.len(), 50);
    }
}
