//! Per-URL agreement accounting and the quorum/margin decision.

use audit_types::VoteBlock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::trace;

use crate::comparer::Comparer;
use crate::vote_block_tallier::{Verdict, VoteSink};
use crate::TallyError;

/// Outcome of tallying one URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TallyResult {
    /// The poller agrees with a decisive majority.
    Won,
    /// A decisive majority disagrees with the poller.
    Lost,
    /// Agreement is too close to call.
    TooClose,
    /// Too few participants voted on this URL.
    NoQuorum,
    /// A quorum of participants lack a URL the poller has.
    LostPollerOnlyBlock,
}

impl TallyResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Won => "Won",
            Self::Lost => "Lost",
            Self::TooClose => "Too Close",
            Self::NoQuorum => "No Quorum",
            Self::LostPollerOnlyBlock => "Lost Poller-Only Block",
        }
    }
}

impl fmt::Display for TallyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Switches for the tally behaviours that differ between deployments.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TallyPolicy {
    /// Only declare [`TallyResult::LostPollerOnlyBlock`] when poller-only
    /// voters are also a strict majority of the tally.
    pub poller_only_requires_majority: bool,
    /// Never pick repairers from participants that lack the block.
    pub exclude_poller_only_repairers: bool,
    /// Choose repairers from version support counts instead of the
    /// disagreeing voters.
    pub use_version_counts: bool,
}

/// Agree/disagree accounting for one URL.
///
/// Participants are identified by their index in the inner circle. Each
/// participant is counted at most once; later votes by the same participant
/// are ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTally {
    url: String,
    poller_has_block: bool,
    agree: BTreeSet<usize>,
    disagree: BTreeSet<usize>,
    poller_only: BTreeSet<usize>,
    voter_only: BTreeSet<usize>,
}

impl BlockTally {
    pub fn new(url: impl Into<String>, poller_has_block: bool) -> Self {
        Self {
            url: url.into(),
            poller_has_block,
            ..Self::default()
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// True when the poller does not hold this URL.
    pub fn is_voter_only(&self) -> bool {
        !self.poller_has_block
    }

    fn counted(&self, participant: usize) -> bool {
        self.agree.contains(&participant) || self.disagree.contains(&participant)
    }

    pub fn add_agree_voter(&mut self, participant: usize) {
        if !self.counted(participant) {
            self.agree.insert(participant);
        }
    }

    pub fn add_disagree_voter(&mut self, participant: usize) {
        if !self.counted(participant) {
            self.disagree.insert(participant);
        }
    }

    /// The participant has no version of a block the poller has.
    pub fn add_poller_only_block_voter(&mut self, participant: usize) {
        if !self.counted(participant) {
            self.disagree.insert(participant);
            self.poller_only.insert(participant);
        }
    }

    /// The participant voted a version the poller does not have.
    pub fn add_voter_only_block_voter(&mut self, participant: usize) {
        if !self.counted(participant) {
            self.disagree.insert(participant);
            self.voter_only.insert(participant);
        }
    }

    pub fn vote_missing(&mut self, participant: usize) {
        self.add_poller_only_block_voter(participant);
    }

    pub fn vote_spoiled(&mut self, _participant: usize) {}

    /// Compare `block` against local hashes and count the participant.
    pub fn vote(
        &mut self,
        block: &VoteBlock,
        participant: usize,
        comparer: &dyn Comparer,
    ) -> Result<(), TallyError> {
        if comparer.compare(block, participant)? {
            self.add_agree_voter(participant);
        } else {
            self.add_voter_only_block_voter(participant);
        }
        Ok(())
    }

    pub fn agree_voters(&self) -> &BTreeSet<usize> {
        &self.agree
    }

    pub fn disagree_voters(&self) -> &BTreeSet<usize> {
        &self.disagree
    }

    pub fn poller_only_voters(&self) -> &BTreeSet<usize> {
        &self.poller_only
    }

    pub fn voter_only_voters(&self) -> &BTreeSet<usize> {
        &self.voter_only
    }

    pub fn agree_count(&self) -> usize {
        self.agree.len()
    }

    pub fn disagree_count(&self) -> usize {
        self.disagree.len()
    }

    pub fn tallied_count(&self) -> usize {
        self.agree.len() + self.disagree.len()
    }

    /// Whether the split is at least as decisive as `margin_percent`.
    pub fn is_within_margin(&self, margin_percent: u32) -> bool {
        within_margin(self.agree_count(), self.tallied_count(), margin_percent)
    }

    pub fn tally_result(&self, quorum: usize, margin_percent: u32) -> TallyResult {
        self.tally_result_with(quorum, margin_percent, &TallyPolicy::default())
    }

    pub fn tally_result_with(
        &self,
        quorum: usize,
        margin_percent: u32,
        policy: &TallyPolicy,
    ) -> TallyResult {
        let result = decide(
            self.agree_count(),
            self.disagree_count(),
            self.poller_only.len(),
            quorum,
            margin_percent,
            policy,
        );
        trace!(url = %self.url, agree = self.agree_count(), disagree = self.disagree_count(), %result, "tally result");
        result
    }
}

impl VoteSink for BlockTally {
    fn record(&mut self, participant: usize, verdict: Verdict, _block: Option<&VoteBlock>) {
        match verdict {
            Verdict::Agree => self.add_agree_voter(participant),
            Verdict::VoterOnlyDisagree => self.add_voter_only_block_voter(participant),
            Verdict::PollerOnlyDisagree => self.add_poller_only_block_voter(participant),
        }
    }
}

fn within_margin(agree: usize, total: usize, margin_percent: u32) -> bool {
    let margin = u128::from(margin_percent.min(100));
    let agree = agree as u128 * 100;
    let total = total as u128;
    agree >= margin * total || agree <= (100 - margin) * total
}

/// The tally decision as a pure function of the counts.
pub fn decide(
    agree: usize,
    disagree: usize,
    poller_only: usize,
    quorum: usize,
    margin_percent: u32,
    policy: &TallyPolicy,
) -> TallyResult {
    let total = agree + disagree;
    if total < quorum {
        return TallyResult::NoQuorum;
    }
    if poller_only >= quorum && (!policy.poller_only_requires_majority || poller_only * 2 > total) {
        return TallyResult::LostPollerOnlyBlock;
    }
    if !within_margin(agree, total, margin_percent) {
        return TallyResult::TooClose;
    }
    if agree > disagree {
        TallyResult::Won
    } else {
        TallyResult::Lost
    }
}
