//! Fitting a poll's local hash into the schedule.

use audit_types::Timestamp;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::PollerConfig;
use crate::PollerError;

/// Admission control for hashing work.
pub trait HashScheduler: Send + Sync {
    /// Whether `estimate` of hashing can run between `earliest_start` and
    /// `latest_finish`.
    fn is_task_schedulable(
        &self,
        earliest_start: Timestamp,
        latest_finish: Timestamp,
        estimate: Duration,
    ) -> bool;
}

/// Accepts any task that fits in its window.
#[derive(Clone, Copy, Debug, Default)]
pub struct WindowScheduler;

impl HashScheduler for WindowScheduler {
    fn is_task_schedulable(
        &self,
        earliest_start: Timestamp,
        latest_finish: Timestamp,
        estimate: Duration,
    ) -> bool {
        earliest_start.plus(estimate) <= latest_finish
    }
}

/// Deadlines chosen for a poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollSchedule {
    pub estimate: Duration,
    pub vote_deadline: Timestamp,
    pub poll_deadline: Timestamp,
    /// Extension factor that was finally accepted.
    pub extend: u32,
    pub attempts: u32,
}

/// Pick vote and poll deadlines for a hash `estimate`, stretching the
/// durations each time the scheduler refuses.
pub fn schedule_poll(
    config: &PollerConfig,
    scheduler: &dyn HashScheduler,
    now: Timestamp,
    estimate: Duration,
) -> Result<PollSchedule, PollerError> {
    let attempts = config.schedule_retries.max(1);
    let mut extend = 1u32;
    for attempt in 1..=attempts {
        let (vote, tally) = config.phase_durations(estimate, extend);
        let vote_deadline = now.plus(vote);
        let poll_deadline = vote_deadline.plus(tally);
        if scheduler.is_task_schedulable(now, poll_deadline, estimate) {
            debug!(attempt, extend, vote_ms = vote.as_millis() as u64, "hash scheduled");
            return Ok(PollSchedule {
                estimate,
                vote_deadline,
                poll_deadline,
                extend,
                attempts: attempt,
            });
        }
        let next = extend
            .saturating_mul(config.poll_extend_multiplier.max(1))
            .min(config.max_poll_extend_multiplier.max(1));
        info!(attempt, extend, next, "hash not schedulable, extending poll");
        extend = next;
    }
    Err(PollerError::CouldNotSchedule { attempts })
}

/// A new estimate from a run that stopped after `hashed` of `total` bytes
/// in `elapsed`.
pub fn observed_estimate(elapsed: Duration, hashed: u64, total: u64) -> Duration {
    if hashed == 0 {
        return elapsed.saturating_mul(2);
    }
    let nanos = elapsed.as_nanos() * u128::from(total.max(hashed)) / u128::from(hashed);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Refuses the first `refusals` requests.
    struct Refusing {
        refusals: u32,
        calls: AtomicU32,
    }

    impl HashScheduler for Refusing {
        fn is_task_schedulable(&self, _: Timestamp, _: Timestamp, _: Duration) -> bool {
            self.calls.fetch_add(1, Ordering::Relaxed) >= self.refusals
        }
    }

    fn config() -> PollerConfig {
        PollerConfig {
            min_vote_duration_ms: 1_000,
            min_tally_duration_ms: 1_000,
            ..PollerConfig::default()
        }
    }

    #[test]
    fn first_fit_uses_base_durations() {
        let now = Timestamp::from_millis(0);
        let s = schedule_poll(&config(), &WindowScheduler, now, Duration::from_millis(10)).unwrap();
        assert_eq!(s.extend, 1);
        assert_eq!(s.attempts, 1);
        assert_eq!(s.vote_deadline, Timestamp::from_millis(1_000));
        assert_eq!(s.poll_deadline, Timestamp::from_millis(2_000));
    }

    #[test]
    fn refusals_extend_the_poll() {
        let scheduler = Refusing {
            refusals: 2,
            calls: AtomicU32::new(0),
        };
        let now = Timestamp::from_millis(0);
        let s = schedule_poll(&config(), &scheduler, now, Duration::from_millis(10)).unwrap();
        assert_eq!(s.attempts, 3);
        assert_eq!(s.extend, 4);
        assert_eq!(s.vote_deadline, Timestamp::from_millis(4_000));
    }

    #[test]
    fn extension_is_capped() {
        let scheduler = Refusing {
            refusals: 3,
            calls: AtomicU32::new(0),
        };
        let config = PollerConfig {
            schedule_retries: 4,
            max_poll_extend_multiplier: 3,
            ..config()
        };
        let s = schedule_poll(&config, &scheduler, Timestamp::EPOCH, Duration::from_millis(10)).unwrap();
        assert_eq!(s.extend, 3);
    }

    #[test]
    fn exhausted_retries_cannot_schedule() {
        let scheduler = Refusing {
            refusals: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let err = schedule_poll(&config(), &scheduler, Timestamp::EPOCH, Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, PollerError::CouldNotSchedule { attempts: 3 }));
        assert_eq!(scheduler.calls.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn observed_estimate_projects_partial_runs() {
        assert_eq!(
            observed_estimate(Duration::from_millis(100), 50, 200),
            Duration::from_millis(400)
        );
        assert_eq!(
            observed_estimate(Duration::from_millis(100), 0, 200),
            Duration::from_millis(200)
        );
    }
}
