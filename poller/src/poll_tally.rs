//! Tallying a whole poll: local hash blocks against every participant's
//! vote stream, URL by URL in canonical order.
//!
//! The poller feeds each [`HashBlock`] to [`PollTally::block_done`] as the
//! hasher finishes it. URLs only voters hold are tallied as they come up in
//! the merge, before the next poller URL, and the rest by
//! [`PollTally::finish`].

use audit_tally::{
    BlockTally, HashBlockComparer, ParticipantTallies, TallyPolicy, TallyResult, UrlTallier,
    VersionCounts, VoteBlockStream, VoteBlockTallier,
};
use audit_types::{compare_urls, Digest, HashBlock, PeerIdentity};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::PollerConfig;
use crate::metrics::PollMetrics;
use crate::repair::{plan_repair, RepairContext, RepairPlan, RepairQueue};
use crate::status::PollSummary;
use crate::tally_status::TallyStatus;
use crate::PollerError;

pub struct PollTally {
    quorum: usize,
    vote_margin: u32,
    policy: TallyPolicy,
    min_replicas_for_no_quorum_repair: usize,
    max_block_errors: u32,
    quorate: bool,
    inner_circle: Vec<PeerIdentity>,
    tallier: UrlTallier,
    status: TallyStatus,
    repairs: RepairQueue,
    participant_tallies: ParticipantTallies,
    results: Vec<(String, TallyResult)>,
    block_errors: u32,
    spoiled_seen: usize,
    metrics: Option<Arc<PollMetrics>>,
}

impl PollTally {
    /// `streams` holds one entry per inner-circle participant, `None` for
    /// those that did not vote. A poll is quorate when enough participants
    /// voted; only quorate polls record results and plan repairs.
    pub fn new(
        config: &PollerConfig,
        inner_circle: Vec<PeerIdentity>,
        streams: Vec<Option<Box<dyn VoteBlockStream>>>,
        quorate: bool,
    ) -> Self {
        let participants = inner_circle.len();
        let tallier = UrlTallier::new(streams);
        let spoiled_seen = tallier.spoiled_count();
        Self {
            quorum: config.quorum,
            vote_margin: config.vote_margin,
            policy: config.tally_policy,
            min_replicas_for_no_quorum_repair: config.min_replicas_for_no_quorum_repair,
            max_block_errors: config.max_block_errors,
            quorate,
            inner_circle,
            tallier,
            status: TallyStatus::new(),
            repairs: RepairQueue::new(config.repair_limit()),
            participant_tallies: ParticipantTallies::new(participants),
            results: Vec::new(),
            block_errors: 0,
            spoiled_seen,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PollMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn is_quorate(&self) -> bool {
        self.quorate
    }

    /// Tally the poller's block for one URL, after any voter URLs before it.
    pub fn block_done(&mut self, block: &HashBlock) -> Result<(), PollerError> {
        self.tally_voter_urls_before(Some(&block.url))?;
        self.note_hash_errors(block)?;

        let comparer = HashBlockComparer::new(block)?;
        let mut tally = BlockTally::new(block.url.clone(), true);
        let mut counts = VersionCounts::new();
        {
            let mut tallier = VoteBlockTallier::for_poller_url(&comparer)
                .with_sink(&mut tally)
                .with_sink(&mut counts)
                .with_sink(&mut self.participant_tallies);
            self.tallier.tally_poller_url_with(&block.url, &mut tallier)?;
        }
        self.note_spoiled();
        self.conclude(&tally, &counts, &block.plain_hashes());
        Ok(())
    }

    /// Tally every voter URL left after the last poller block.
    pub fn finish(&mut self) -> Result<(), PollerError> {
        self.tally_voter_urls_before(None)?;
        self.tallier.release();
        Ok(())
    }

    fn tally_voter_urls_before(&mut self, limit: Option<&str>) -> Result<(), PollerError> {
        while let Some(url) = self.tallier.peek_url() {
            if limit.is_some_and(|limit| compare_urls(&url, limit) != Ordering::Less) {
                break;
            }
            let mut tally = BlockTally::new(url.clone(), false);
            let mut counts = VersionCounts::new();
            {
                let mut tallier = VoteBlockTallier::for_voter_url()
                    .with_sink(&mut tally)
                    .with_sink(&mut counts)
                    .with_sink(&mut self.participant_tallies);
                self.tallier.tally_voter_url_with(&url, &mut tallier)?;
            }
            self.note_spoiled();
            self.conclude(&tally, &counts, &HashSet::new());
        }
        Ok(())
    }

    fn charge_block_error(&mut self, count: u32) -> Result<(), PollerError> {
        self.block_errors = self.block_errors.saturating_add(count);
        if self.block_errors > self.max_block_errors {
            return Err(PollerError::TooManyBlockErrors {
                count: self.block_errors,
                max: self.max_block_errors,
            });
        }
        Ok(())
    }

    fn note_hash_errors(&mut self, block: &HashBlock) -> Result<(), PollerError> {
        let errored = block.versions.iter().filter(|v| v.hash_error).count();
        if errored == 0 {
            return Ok(());
        }
        warn!(url = %block.url, errored, "local hash errors");
        self.status
            .add_error(&block.url, format!("hash error on {errored} version(s)"));
        self.charge_block_error(1)
    }

    /// Spoiled participants only drop out of the tally. Remote misbehaviour
    /// never counts against the block error budget.
    fn note_spoiled(&mut self) {
        let spoiled = self.tallier.spoiled_count();
        if spoiled <= self.spoiled_seen {
            return;
        }
        let fresh = spoiled - self.spoiled_seen;
        self.spoiled_seen = spoiled;
        debug!(fresh, spoiled, "participants spoiled");
        if let Some(metrics) = &self.metrics {
            metrics.spoiled_participants.inc_by(fresh as u64);
        }
    }

    fn conclude(&mut self, tally: &BlockTally, counts: &VersionCounts, local: &HashSet<Digest>) {
        let url = tally.url();
        let result = tally.tally_result_with(self.quorum, self.vote_margin, &self.policy);
        debug!(
            url,
            %result,
            agree = tally.agree_count(),
            disagree = tally.disagree_count(),
            "URL tallied"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_tally(result);
        }
        self.results.push((url.to_string(), result));
        if self.quorate {
            self.status.record(url, result);
        }
        let ctx = RepairContext {
            quorate: self.quorate,
            policy: &self.policy,
            version_counts: counts,
            local_hashes: local,
            min_replicas_for_no_quorum_repair: self.min_replicas_for_no_quorum_repair,
        };
        match plan_repair(tally, result, &ctx) {
            RepairPlan::Nothing => {}
            RepairPlan::Delete => self.repairs.mark_for_deletion(url),
            RepairPlan::Repair(candidates) => {
                let repairer = candidates
                    .iter()
                    .find_map(|&index| self.inner_circle.get(index))
                    .cloned();
                match repairer {
                    Some(peer) if self.repairs.request_repair(url, peer.clone()) => {
                        debug!(url, repairer = %peer, "repair queued");
                        if let Some(metrics) = &self.metrics {
                            metrics.repairs_requested.inc();
                        }
                    }
                    _ => debug!(url, "repair not queued"),
                }
            }
        }
    }

    /// Re-tally a URL after its repair arrived and was re-hashed into
    /// `block`, over fresh streams of every participant's vote. Version
    /// support and participant counters are left as the main pass set them.
    pub fn retally_repair(
        &mut self,
        block: &HashBlock,
        streams: Vec<Option<Box<dyn VoteBlockStream>>>,
    ) -> Result<Option<TallyResult>, PollerError> {
        let url = block.url.as_str();
        let mut tallier = UrlTallier::new(streams);
        tallier.seek(url)?;
        if tallier.peek_url().as_deref() != Some(url) {
            warn!(url, "no participant voted on repaired URL");
            self.repairs.mark_complete(url, None);
            return Ok(None);
        }
        let comparer = HashBlockComparer::new(block)?;
        let mut tally = BlockTally::new(url, true);
        {
            let mut repair_tallier = VoteBlockTallier::for_repair(&comparer, &mut tally);
            tallier.tally_poller_url_with(url, &mut repair_tallier)?;
        }
        let result = tally.tally_result_with(self.quorum, self.vote_margin, &self.policy);
        debug!(url, %result, "repaired URL re-tallied");
        self.status.record(url, result);
        self.repairs.mark_complete(url, Some(result));
        if let Some(metrics) = &self.metrics {
            metrics.repairs_completed.inc();
        }
        Ok(Some(result))
    }

    /// A repair that produced no content.
    pub fn repair_failed(&mut self, url: &str) {
        self.repairs.mark_complete(url, None);
    }

    pub fn results(&self) -> &[(String, TallyResult)] {
        &self.results
    }

    pub fn status(&self) -> &TallyStatus {
        &self.status
    }

    pub fn repairs(&self) -> &RepairQueue {
        &self.repairs
    }

    pub fn repairs_mut(&mut self) -> &mut RepairQueue {
        &mut self.repairs
    }

    pub fn participant_tallies(&self) -> &ParticipantTallies {
        &self.participant_tallies
    }

    pub fn block_errors(&self) -> u32 {
        self.block_errors
    }

    /// Fraction of tallied URLs on which participant `index` agreed.
    pub fn agreement_hint(&self, index: usize) -> Option<f64> {
        self.participant_tallies
            .get(index)
            .and_then(|counts| counts.percent_agreement())
    }

    pub fn summary(&self, voters: usize, bytes_hashed: u64) -> PollSummary {
        let count = |wanted: TallyResult| self.results.iter().filter(|(_, r)| *r == wanted).count();
        let deleted = self.repairs.deletions().len();
        if self.quorate {
            PollSummary {
                voters,
                agreed: self.status.agreed().len(),
                disagreed: self.status.disagreed().len(),
                too_close: self.status.too_close().len(),
                no_quorum: self.status.no_quorum().len(),
                errors: self.status.errors().len(),
                repairs_completed: self.repairs.completed().len(),
                unrepaired: self.repairs.unrepaired_count(),
                deleted,
                bytes_hashed,
                percent_agreement: self.status.percent_agreement(),
            }
        } else {
            PollSummary {
                voters,
                agreed: count(TallyResult::Won),
                disagreed: count(TallyResult::Lost),
                too_close: count(TallyResult::TooClose),
                no_quorum: count(TallyResult::NoQuorum),
                errors: self.status.errors().len(),
                bytes_hashed,
                ..PollSummary::default()
            }
        }
    }
}
