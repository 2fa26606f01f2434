//! Turn one participant's vote event into verdicts for a set of sinks.
//!
//! | poller has block | event        | verdict              |
//! |------------------|--------------|----------------------|
//! | yes              | vote         | agree or voter-only  |
//! | yes              | vote missing | poller-only          |
//! | no               | vote         | voter-only           |
//! | either           | otherwise    | none                 |

use audit_types::VoteBlock;

use crate::comparer::Comparer;
use crate::TallyError;

/// How one participant's vote on one URL was judged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Agree,
    /// The participant voted a version the poller does not have.
    VoterOnlyDisagree,
    /// The participant has nothing for a URL the poller has.
    PollerOnlyDisagree,
}

/// Receives verdicts. `block` is the participant's vote when it sent one.
pub trait VoteSink {
    fn record(&mut self, participant: usize, verdict: Verdict, block: Option<&VoteBlock>);
}

pub struct VoteBlockTallier<'a> {
    comparer: Option<&'a dyn Comparer>,
    sinks: Vec<&'a mut dyn VoteSink>,
}

impl<'a> VoteBlockTallier<'a> {
    /// Tallier for a URL the poller lacks.
    pub fn for_voter_url() -> Self {
        Self {
            comparer: None,
            sinks: Vec::new(),
        }
    }

    /// Tallier for a URL the poller holds.
    pub fn for_poller_url(comparer: &'a dyn Comparer) -> Self {
        Self {
            comparer: Some(comparer),
            sinks: Vec::new(),
        }
    }

    /// Tallier for re-checking a repaired URL: only the block tally is
    /// updated, so version support and participant counters stay as the
    /// first pass left them.
    pub fn for_repair(comparer: &'a dyn Comparer, tally: &'a mut dyn VoteSink) -> Self {
        Self {
            comparer: Some(comparer),
            sinks: vec![tally],
        }
    }

    pub fn with_sink(mut self, sink: &'a mut dyn VoteSink) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn poller_has_block(&self) -> bool {
        self.comparer.is_some()
    }

    fn dispatch(&mut self, participant: usize, verdict: Verdict, block: Option<&VoteBlock>) {
        for sink in self.sinks.iter_mut() {
            sink.record(participant, verdict, block);
        }
    }

    /// The participant voted `block` for this URL.
    ///
    /// Comparison runs before any sink sees the vote, so an error leaves
    /// every sink untouched.
    pub fn vote(&mut self, block: &VoteBlock, participant: usize) -> Result<(), TallyError> {
        let agreed = match self.comparer {
            Some(comparer) => comparer.compare(block, participant)?,
            None => false,
        };
        let verdict = if agreed {
            Verdict::Agree
        } else {
            Verdict::VoterOnlyDisagree
        };
        self.dispatch(participant, verdict, Some(block));
        Ok(())
    }

    /// The participant has no vote for this URL.
    pub fn vote_missing(&mut self, participant: usize) {
        if self.poller_has_block() {
            self.dispatch(participant, Verdict::PollerOnlyDisagree, None);
        }
    }

    /// The participant's stream is spoiled; it contributes nothing.
    pub fn vote_spoiled(&mut self, _participant: usize) {}
}
