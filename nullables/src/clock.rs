//! Nullable clock: deterministic time for testing.

use audit_types::{Clock, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};

/// A deterministic clock for testing.
///
/// Time only advances when you tell it to.
#[derive(Debug, Default)]
pub struct NullClock {
    current_ms: AtomicU64,
}

impl NullClock {
    pub fn new(initial_ms: u64) -> Self {
        Self {
            current_ms: AtomicU64::new(initial_ms),
        }
    }

    /// Advance time by a number of milliseconds.
    pub fn advance_millis(&self, ms: u64) {
        self.current_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Set the time to a specific value.
    pub fn set_millis(&self, ms: u64) {
        self.current_ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for NullClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.current_ms.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moves_only_when_told() {
        let clock = NullClock::new(1_000);
        assert_eq!(clock.now(), Timestamp::from_millis(1_000));
        clock.advance_millis(250);
        assert_eq!(clock.now(), Timestamp::from_millis(1_250));
        clock.set_millis(10);
        assert_eq!(clock.now().as_millis(), 10);
    }
}
