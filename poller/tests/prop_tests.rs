use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use audit_crypto::HashAlgorithm;
use audit_poller::{
    observed_estimate, prove_effort, schedule_poll, verify_effort, EffortPhase, PollerConfig,
    RepairQueue, TallyStatus, WindowScheduler,
};
use audit_tally::TallyResult;
use audit_types::{Nonce, PeerIdentity, PollKey, Timestamp};

const PHASES: [EffortPhase; 6] = [
    EffortPhase::Intro,
    EffortPhase::Remaining,
    EffortPhase::PollAck,
    EffortPhase::VoteRequest,
    EffortPhase::Vote,
    EffortPhase::Repair,
];

const RESULTS: [TallyResult; 5] = [
    TallyResult::Won,
    TallyResult::Lost,
    TallyResult::TooClose,
    TallyResult::NoQuorum,
    TallyResult::LostPollerOnlyBlock,
];

proptest! {
    /// A partial run never projects less time than it already took.
    #[test]
    fn observed_estimate_covers_elapsed(
        elapsed_ms in 0u64..100_000,
        hashed in 1u64..1_000_000,
        extra in 0u64..1_000_000,
    ) {
        let elapsed = Duration::from_millis(elapsed_ms);
        let estimate = observed_estimate(elapsed, hashed, hashed + extra);
        prop_assert!(estimate >= elapsed);
    }

    /// Deadlines are ordered and respect the minimum phase lengths.
    #[test]
    fn schedule_orders_deadlines(
        now_ms in 0u64..1_000_000_000,
        estimate_ms in 0u64..100_000,
        min_vote in 1u64..10_000,
        min_tally in 1u64..10_000,
    ) {
        let config = PollerConfig {
            min_vote_duration_ms: min_vote,
            min_tally_duration_ms: min_tally,
            ..PollerConfig::default()
        };
        let now = Timestamp::from_millis(now_ms);
        let estimate = Duration::from_millis(estimate_ms);
        let schedule = schedule_poll(&config, &WindowScheduler, now, estimate).unwrap();
        prop_assert!(schedule.vote_deadline.as_millis() >= now_ms + min_vote);
        prop_assert!(schedule.poll_deadline.as_millis() >= schedule.vote_deadline.as_millis() + min_tally);
        prop_assert!(schedule.poll_deadline.as_millis() >= now_ms + estimate_ms);
    }

    /// A proof only verifies for the phase, poll and nonce it was made for.
    #[test]
    fn effort_proofs_are_bound_to_their_phase(
        key in "[a-z0-9:]{1,16}",
        nonce in prop::collection::vec(any::<u8>(), 1..32),
        made in 0usize..6,
        checked in 0usize..6,
    ) {
        let alg = HashAlgorithm::Sha256;
        let key = PollKey::new(key);
        let nonce = Nonce::new(nonce);
        let proof = prove_effort(alg, &key, &nonce, PHASES[made]);
        prop_assert_eq!(verify_effort(alg, &key, &nonce, PHASES[checked], &proof), made == checked);

        let other = PollKey::new(format!("{key}-other"));
        prop_assert!(!verify_effort(alg, &other, &nonce, PHASES[made], &proof));
    }

    /// The queue never holds a URL twice and never exceeds its limit.
    #[test]
    fn repair_queue_respects_limit(
        limit in prop::option::of(0usize..8),
        requests in prop::collection::vec((0u8..12, 0u8..3), 0..40),
    ) {
        let mut queue = RepairQueue::new(limit);
        let mut accepted = BTreeSet::new();
        for (url, repairer) in &requests {
            let url = format!("http://x/{url}");
            let peer = PeerIdentity::new(format!("v{repairer}"));
            if queue.request_repair(&url, peer) {
                prop_assert!(accepted.insert(url));
            }
        }
        prop_assert_eq!(queue.len(), accepted.len());
        if let Some(max) = limit {
            prop_assert!(queue.len() <= max);
        }

        let mut activated = 0;
        for repairer in 0..3 {
            activated += queue.activate_for(&PeerIdentity::new(format!("v{repairer}"))).len();
        }
        prop_assert_eq!(activated, accepted.len());
        prop_assert!(queue.pending().is_empty());
    }

    /// Every URL sits in the set of its latest tracked result.
    #[test]
    fn tally_status_tracks_latest_result(
        records in prop::collection::vec((0u8..6, 0usize..5), 0..50),
    ) {
        let mut status = TallyStatus::new();
        let mut latest = BTreeMap::new();
        for (url, result) in &records {
            let url = format!("http://x/{url}");
            let result = RESULTS[*result];
            status.record(&url, result);
            if result != TallyResult::LostPollerOnlyBlock {
                latest.insert(url, result);
            }
        }
        prop_assert_eq!(status.tallied_count(), latest.len());
        for (url, result) in &latest {
            let set = match result {
                TallyResult::Won => status.agreed(),
                TallyResult::Lost => status.disagreed(),
                TallyResult::TooClose => status.too_close(),
                _ => status.no_quorum(),
            };
            prop_assert!(set.contains(url), "{} missing from {:?}", url, result);
        }
    }
}
