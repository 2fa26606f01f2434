//! Per-participant agreement counters accumulated across a whole poll.

use audit_types::VoteBlock;
use serde::{Deserialize, Serialize};

use crate::vote_block_tallier::{Verdict, VoteSink};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantCounts {
    pub agree: u64,
    pub disagree: u64,
    pub poller_only: u64,
    pub voter_only: u64,
    pub bytes_hashed: u64,
    pub bytes_read: u64,
}

impl ParticipantCounts {
    /// Fraction of tallied URLs on which this participant agreed.
    pub fn percent_agreement(&self) -> Option<f64> {
        let total = self.agree + self.disagree;
        (total > 0).then(|| self.agree as f64 / total as f64)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantTallies {
    counts: Vec<ParticipantCounts>,
}

impl ParticipantTallies {
    pub fn new(participants: usize) -> Self {
        Self {
            counts: vec![ParticipantCounts::default(); participants],
        }
    }

    pub fn get(&self, participant: usize) -> Option<&ParticipantCounts> {
        self.counts.get(participant)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl VoteSink for ParticipantTallies {
    fn record(&mut self, participant: usize, verdict: Verdict, block: Option<&VoteBlock>) {
        if participant >= self.counts.len() {
            self.counts.resize(participant + 1, ParticipantCounts::default());
        }
        let counts = &mut self.counts[participant];
        match verdict {
            Verdict::Agree => counts.agree += 1,
            Verdict::VoterOnlyDisagree => {
                counts.disagree += 1;
                counts.voter_only += 1;
            }
            Verdict::PollerOnlyDisagree => {
                counts.disagree += 1;
                counts.poller_only += 1;
            }
        }
        if let Some(block) = block {
            counts.bytes_hashed += block.total_filtered_bytes();
            counts.bytes_read += block.total_unfiltered_bytes();
        }
    }
}
