//! Session status values and poll outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a poll this peer called stands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollerStatus {
    #[default]
    Initializing,
    /// The hashing work could not be scheduled.
    NoTime,
    Hashing,
    Tallying,
    Complete,
    NoQuorum,
    Aborted,
    Expired,
    Error,
}

impl PollerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::NoTime => "No Time Available",
            Self::Hashing => "Hashing",
            Self::Tallying => "Tallying",
            Self::Complete => "Complete",
            Self::NoQuorum => "No Quorum",
            Self::Aborted => "Aborted",
            Self::Expired => "Expired",
            Self::Error => "Error",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Initializing | Self::Hashing | Self::Tallying)
    }
}

impl fmt::Display for PollerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where this peer stands in a poll it was invited to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoterStatus {
    #[default]
    Initialized,
    AcceptedPoll,
    Hashing,
    Voted,
    NoTime,
    Complete,
    Expired,
    Error,
    DeclinedPoll,
    Aborted,
}

impl VoterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "Initialized",
            Self::AcceptedPoll => "Accepted Poll",
            Self::Hashing => "Hashing",
            Self::Voted => "Voted",
            Self::NoTime => "No Time Available",
            Self::Complete => "Complete",
            Self::Expired => "Expired",
            Self::Error => "Error",
            Self::DeclinedPoll => "Declined Poll",
            Self::Aborted => "Aborted",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::NoTime
                | Self::Complete
                | Self::Expired
                | Self::Error
                | Self::DeclinedPoll
                | Self::Aborted
        )
    }
}

impl fmt::Display for VoterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where one inner-circle participant stands, from the poller's side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    #[default]
    Invited,
    Accepted,
    Declined,
    Voted,
    Complete,
    Dropped,
}

impl PeerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invited => "Invited",
            Self::Accepted => "Accepted",
            Self::Declined => "Declined",
            Self::Voted => "Voted",
            Self::Complete => "Complete",
            Self::Dropped => "Dropped",
        }
    }
}

/// Counts describing a finished tally.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PollSummary {
    pub voters: usize,
    pub agreed: usize,
    pub disagreed: usize,
    pub too_close: usize,
    pub no_quorum: usize,
    pub errors: usize,
    pub repairs_completed: usize,
    pub unrepaired: usize,
    pub deleted: usize,
    pub bytes_hashed: u64,
    /// Agreed URLs over all decided URLs; `None` when nothing was decided.
    pub percent_agreement: Option<f64>,
}

/// How a poll ended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PollOutcome {
    Complete(PollSummary),
    /// Too few voters took part for any URL to reach quorum.
    NoQuorum(PollSummary),
    /// The local hash could not be fitted into the schedule.
    CouldNotSchedule,
    Aborted(String),
    Expired,
}

impl PollOutcome {
    pub fn status(&self) -> PollerStatus {
        match self {
            Self::Complete(_) => PollerStatus::Complete,
            Self::NoQuorum(_) => PollerStatus::NoQuorum,
            Self::CouldNotSchedule => PollerStatus::NoTime,
            Self::Aborted(_) => PollerStatus::Aborted,
            Self::Expired => PollerStatus::Expired,
        }
    }

    pub fn summary(&self) -> Option<&PollSummary> {
        match self {
            Self::Complete(summary) | Self::NoQuorum(summary) => Some(summary),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_maps_to_status() {
        assert_eq!(PollOutcome::CouldNotSchedule.status(), PollerStatus::NoTime);
        assert_eq!(
            PollOutcome::NoQuorum(PollSummary::default()).status(),
            PollerStatus::NoQuorum
        );
        assert!(PollOutcome::Expired.summary().is_none());
        assert!(PollerStatus::Complete.is_final());
        assert!(!PollerStatus::Tallying.is_final());
        assert!(VoterStatus::DeclinedPoll.is_final());
        assert!(!VoterStatus::Voted.is_final());
    }
}
