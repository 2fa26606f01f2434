//! Prometheus metrics for polls.
//!
//! [`PollMetrics`] owns its own [`Registry`] so several pollers in one
//! process (or one test binary) never collide on metric names.

use audit_tally::TallyResult;
use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, Encoder, Histogram, HistogramOpts, IntCounter,
    IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::{PollOutcome, PollerError};

pub struct PollMetrics {
    pub registry: Registry,

    /// URL tally results, labelled by result.
    pub tally_results: IntCounterVec,
    /// Participants dropped from a tally for malformed or unreadable votes.
    pub spoiled_participants: IntCounter,
    pub repairs_requested: IntCounter,
    pub repairs_completed: IntCounter,
    pub polls_completed: IntCounter,
    pub polls_aborted: IntCounter,

    /// Bytes hashed locally per poll.
    pub hashed_bytes: Histogram,
}

impl PollMetrics {
    pub fn new() -> Result<Self, PollerError> {
        let registry = Registry::new();

        let tally_results = register_int_counter_vec_with_registry!(
            Opts::new("audit_tally_results_total", "URL tally results by kind"),
            &["result"],
            registry
        )?;

        let spoiled_participants = register_int_counter_with_registry!(
            Opts::new(
                "audit_spoiled_participants_total",
                "Participants excluded from a tally"
            ),
            registry
        )?;

        let repairs_requested = register_int_counter_with_registry!(
            Opts::new("audit_repairs_requested_total", "Repairs requested from voters"),
            registry
        )?;

        let repairs_completed = register_int_counter_with_registry!(
            Opts::new("audit_repairs_completed_total", "Repairs received and re-tallied"),
            registry
        )?;

        let polls_completed = register_int_counter_with_registry!(
            Opts::new("audit_polls_completed_total", "Polls that reached a tally"),
            registry
        )?;

        let polls_aborted = register_int_counter_with_registry!(
            Opts::new("audit_polls_aborted_total", "Polls that ended without a tally"),
            registry
        )?;

        // 4 KiB up to 4 GiB.
        let hashed_bytes = register_histogram_with_registry!(
            HistogramOpts::new("audit_poll_hashed_bytes", "Bytes hashed locally per poll")
                .buckets(prometheus::exponential_buckets(4096.0, 4.0, 11)?),
            registry
        )?;

        Ok(Self {
            registry,
            tally_results,
            spoiled_participants,
            repairs_requested,
            repairs_completed,
            polls_completed,
            polls_aborted,
            hashed_bytes,
        })
    }

    pub fn record_tally(&self, result: TallyResult) {
        self.tally_results.with_label_values(&[result.as_str()]).inc();
    }

    pub fn record_outcome(&self, outcome: &PollOutcome) {
        match outcome {
            PollOutcome::Complete(summary) | PollOutcome::NoQuorum(summary) => {
                self.polls_completed.inc();
                self.hashed_bytes.observe(summary.bytes_hashed as f64);
            }
            _ => self.polls_aborted.inc(),
        }
    }

    /// Every metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, PollerError> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| PollerError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PollSummary;

    #[test]
    fn counts_results_and_outcomes() {
        let metrics = PollMetrics::new().unwrap();
        metrics.record_tally(TallyResult::Won);
        metrics.record_tally(TallyResult::Won);
        metrics.record_tally(TallyResult::TooClose);
        metrics.record_outcome(&PollOutcome::Complete(PollSummary {
            bytes_hashed: 10_000,
            ..PollSummary::default()
        }));
        metrics.record_outcome(&PollOutcome::CouldNotSchedule);

        assert_eq!(metrics.tally_results.with_label_values(&["Won"]).get(), 2);
        assert_eq!(metrics.tally_results.with_label_values(&["Too Close"]).get(), 1);
        assert_eq!(metrics.polls_completed.get(), 1);
        assert_eq!(metrics.polls_aborted.get(), 1);
        assert_eq!(metrics.hashed_bytes.get_sample_count(), 1);

        let text = metrics.encode().unwrap();
        assert!(text.contains("audit_tally_results_total"));
    }

    #[test]
    fn separate_instances_do_not_collide() {
        let a = PollMetrics::new().unwrap();
        let b = PollMetrics::new().unwrap();
        a.repairs_requested.inc();
        assert_eq!(b.repairs_requested.get(), 0);
    }
}
