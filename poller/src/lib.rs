//! Poll sessions for replica audits.
//!
//! [`V3Poller`] calls a poll over one archival unit: it invites an inner
//! circle of voters, hashes its own copy, tallies every URL against the
//! votes, repairs what it lost and sends each voter a receipt.
//! [`V3Voter`] answers an invitation: it hashes its own copy under the
//! poll's nonces, votes, and serves repairs.

pub mod config;
pub mod effort;
pub mod error;
pub mod hasher;
pub mod metrics;
pub mod poll_tally;
pub mod poller;
pub mod repair;
pub mod scheduler;
pub mod state;
pub mod status;
pub mod tally_status;
pub mod voter;

pub use config::{AuditConfig, PollerConfig, VoterConfig};
pub use effort::{prove_effort, verify_effort, EffortPhase};
pub use error::PollerError;
pub use hasher::{BlockHasher, HashStep, OverrunGuard};
pub use metrics::PollMetrics;
pub use poll_tally::PollTally;
pub use poller::{PollerDeps, TallyPlan, V3Poller, VoterReport};
pub use repair::{plan_repair, Repair, RepairContext, RepairPlan, RepairQueue};
pub use scheduler::{observed_estimate, schedule_poll, HashScheduler, PollSchedule, WindowScheduler};
pub use state::{ParticipantState, PollState, VoterState};
pub use status::{PeerStatus, PollOutcome, PollSummary, PollerStatus, VoterStatus};
pub use tally_status::TallyStatus;
pub use voter::{V3Voter, VoterDeps};
