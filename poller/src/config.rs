//! Poller and voter configuration with TOML file support.

use audit_crypto::{HashAlgorithm, DEFAULT_NONCE_LEN};
use audit_tally::TallyPolicy;
use audit_utils::LogFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::PollerError;

/// Settings for polls this peer calls.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Minimum number of tallied participants for a URL result.
    #[serde(default = "default_quorum")]
    pub quorum: usize,

    /// Percentage a URL result must clear to be decisive.
    #[serde(default = "default_vote_margin")]
    pub vote_margin: u32,

    /// Cap on repairs per poll. Negative means unlimited.
    #[serde(default = "default_max_repairs")]
    pub max_repairs: i64,

    /// Local hash and vote stream errors tolerated before the poll aborts.
    #[serde(default = "default_max_block_errors")]
    pub max_block_errors: u32,

    #[serde(default = "default_nonce_length")]
    pub nonce_length: usize,

    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,

    /// Vote phase length as a multiple of the hash estimate.
    #[serde(default = "default_vote_duration_multiplier")]
    pub vote_duration_multiplier: u32,

    /// Tally phase length as a multiple of the hash estimate.
    #[serde(default = "default_tally_duration_multiplier")]
    pub tally_duration_multiplier: u32,

    /// Factor applied to the poll durations each time the scheduler
    /// rejects the hashing window.
    #[serde(default = "default_poll_extend_multiplier")]
    pub poll_extend_multiplier: u32,

    /// Upper bound on the accumulated extension factor.
    #[serde(default = "default_max_poll_extend_multiplier")]
    pub max_poll_extend_multiplier: u32,

    #[serde(default = "default_schedule_retries")]
    pub schedule_retries: u32,

    /// Bytes hashed per hasher step.
    #[serde(default = "default_hash_step_bytes")]
    pub hash_step_bytes: usize,

    /// Hashing throughput assumed when estimating a poll.
    #[serde(default = "default_hash_bytes_per_ms")]
    pub hash_bytes_per_ms: u64,

    #[serde(default = "default_min_phase_duration_ms")]
    pub min_vote_duration_ms: u64,

    #[serde(default = "default_min_phase_duration_ms")]
    pub min_tally_duration_ms: u64,

    /// Hashing may run to this percentage of its estimate before it is
    /// aborted and rescheduled.
    #[serde(default = "default_hash_slack_percent")]
    pub hash_slack_percent: u32,

    /// Minimum version support for repairing a voter-only URL that failed
    /// quorum. Zero disables such repairs.
    #[serde(default)]
    pub min_replicas_for_no_quorum_repair: usize,

    /// Spill received votes to files in this directory instead of memory.
    #[serde(default)]
    pub vote_spill_dir: Option<PathBuf>,

    #[serde(default)]
    pub tally_policy: TallyPolicy,
}

fn default_quorum() -> usize {
    5
}

fn default_vote_margin() -> u32 {
    75
}

fn default_max_repairs() -> i64 {
    1000
}

fn default_max_block_errors() -> u32 {
    10
}

fn default_nonce_length() -> usize {
    DEFAULT_NONCE_LEN
}

fn default_vote_duration_multiplier() -> u32 {
    4
}

fn default_tally_duration_multiplier() -> u32 {
    5
}

fn default_poll_extend_multiplier() -> u32 {
    2
}

fn default_max_poll_extend_multiplier() -> u32 {
    10
}

fn default_schedule_retries() -> u32 {
    3
}

fn default_hash_step_bytes() -> usize {
    64 * 1024
}

fn default_hash_bytes_per_ms() -> u64 {
    10_000
}

fn default_min_phase_duration_ms() -> u64 {
    5_000
}

fn default_hash_slack_percent() -> u32 {
    200
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            quorum: default_quorum(),
            vote_margin: default_vote_margin(),
            max_repairs: default_max_repairs(),
            max_block_errors: default_max_block_errors(),
            nonce_length: default_nonce_length(),
            hash_algorithm: HashAlgorithm::default(),
            vote_duration_multiplier: default_vote_duration_multiplier(),
            tally_duration_multiplier: default_tally_duration_multiplier(),
            poll_extend_multiplier: default_poll_extend_multiplier(),
            max_poll_extend_multiplier: default_max_poll_extend_multiplier(),
            schedule_retries: default_schedule_retries(),
            hash_step_bytes: default_hash_step_bytes(),
            hash_bytes_per_ms: default_hash_bytes_per_ms(),
            min_vote_duration_ms: default_min_phase_duration_ms(),
            min_tally_duration_ms: default_min_phase_duration_ms(),
            hash_slack_percent: default_hash_slack_percent(),
            min_replicas_for_no_quorum_repair: 0,
            vote_spill_dir: None,
            tally_policy: TallyPolicy::default(),
        }
    }
}

impl PollerConfig {
    /// `None` when repairs are unlimited.
    pub fn repair_limit(&self) -> Option<usize> {
        usize::try_from(self.max_repairs).ok()
    }

    /// Expected time to hash `bytes` of content.
    pub fn hash_estimate(&self, bytes: u64) -> Duration {
        Duration::from_millis(bytes / self.hash_bytes_per_ms.max(1) + 1)
    }

    /// Vote and tally phase lengths for a hash estimate, stretched by
    /// `extend`.
    pub fn phase_durations(&self, estimate: Duration, extend: u32) -> (Duration, Duration) {
        let extend = extend.max(1);
        let vote = (estimate * self.vote_duration_multiplier)
            .max(Duration::from_millis(self.min_vote_duration_ms))
            * extend;
        let tally = (estimate * self.tally_duration_multiplier)
            .max(Duration::from_millis(self.min_tally_duration_ms))
            * extend;
        (vote, tally)
    }

    /// Longest hashing run allowed for an estimate before it counts as an
    /// overrun.
    pub fn hash_allowance(&self, estimate: Duration) -> Duration {
        estimate * self.hash_slack_percent / 100
    }
}

/// Settings for polls this peer is invited to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoterConfig {
    /// Supply repairs to pollers at all.
    #[serde(default = "default_true")]
    pub serve_repairs: bool,

    /// Minimum earlier agreement with a poller, in percent, before serving
    /// it repairs.
    #[serde(default = "default_min_percent_agreement_for_repairs")]
    pub min_percent_agreement_for_repairs: u32,

    #[serde(default = "default_min_nomination_size")]
    pub min_nomination_size: usize,

    #[serde(default = "default_max_nomination_size")]
    pub max_nomination_size: usize,

    #[serde(default = "default_nonce_length")]
    pub nonce_length: usize,

    #[serde(default = "default_hash_step_bytes")]
    pub hash_step_bytes: usize,

    #[serde(default = "default_hash_bytes_per_ms")]
    pub hash_bytes_per_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_min_percent_agreement_for_repairs() -> u32 {
    50
}

fn default_min_nomination_size() -> usize {
    1
}

fn default_max_nomination_size() -> usize {
    5
}

impl Default for VoterConfig {
    fn default() -> Self {
        Self {
            serve_repairs: true,
            min_percent_agreement_for_repairs: default_min_percent_agreement_for_repairs(),
            min_nomination_size: default_min_nomination_size(),
            max_nomination_size: default_max_nomination_size(),
            nonce_length: default_nonce_length(),
            hash_step_bytes: default_hash_step_bytes(),
            hash_bytes_per_ms: default_hash_bytes_per_ms(),
        }
    }
}

/// Everything a peer needs to take part in audits.
///
/// Loaded from TOML via [`AuditConfig::from_toml_file`] or built in code.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Where session checkpoints are written. No checkpoints when unset.
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,

    #[serde(default)]
    pub poller: PollerConfig,

    #[serde(default)]
    pub voter: VoterConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            log_level: default_log_level(),
            checkpoint_dir: None,
            poller: PollerConfig::default(),
            voter: VoterConfig::default(),
        }
    }
}

impl AuditConfig {
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, PollerError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| PollerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, PollerError> {
        toml::from_str(s).map_err(|e| PollerError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, PollerError> {
        toml::to_string_pretty(self).map_err(|e| PollerError::Config(e.to_string()))
    }

    /// Install the global tracing subscriber this config asks for.
    pub fn init_logging(&self) {
        audit_utils::init_logging(self.log_format, &self.log_level);
    }

    /// Like [`AuditConfig::init_logging`], but a subscriber that is
    /// already installed wins.
    pub fn try_init_logging(&self) -> bool {
        audit_utils::try_init_logging(self.log_format, &self.log_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AuditConfig::default();
        assert_eq!(config.poller.quorum, 5);
        assert_eq!(config.poller.vote_margin, 75);
        assert_eq!(config.poller.max_repairs, 1000);
        assert_eq!(config.poller.max_block_errors, 10);
        assert_eq!(config.poller.nonce_length, 20);
        assert_eq!(config.poller.hash_algorithm, HashAlgorithm::Sha256);
        assert_eq!(config.poller.schedule_retries, 3);
        assert_eq!(config.poller.hash_step_bytes, 65536);
        assert_eq!(config.voter.max_nomination_size, 5);
        assert_eq!(config.voter.min_percent_agreement_for_repairs, 50);
        assert!(!config.poller.tally_policy.use_version_counts);
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = AuditConfig::default();
        let text = config.to_toml_string().unwrap();
        let parsed = AuditConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config = AuditConfig::from_toml_str("").unwrap();
        assert_eq!(config, AuditConfig::default());
    }

    #[test]
    fn partial_toml_overrides() {
        let text = r#"
            log_format = "json"

            [poller]
            quorum = 3
            hash_algorithm = "blake2b256"
            max_repairs = -1

            [poller.tally_policy]
            use_version_counts = true

            [voter]
            serve_repairs = false
        "#;
        let config = AuditConfig::from_toml_str(text).unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.poller.quorum, 3);
        assert_eq!(config.poller.vote_margin, 75);
        assert_eq!(config.poller.hash_algorithm, HashAlgorithm::Blake2b256);
        assert_eq!(config.poller.repair_limit(), None);
        assert!(config.poller.tally_policy.use_version_counts);
        assert!(!config.voter.serve_repairs);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = AuditConfig::from_toml_file("/nonexistent/audit.toml").unwrap_err();
        assert!(matches!(err, PollerError::Config(_)));
    }

    #[test]
    fn phase_durations_respect_minimums_and_extension() {
        let config = PollerConfig {
            min_vote_duration_ms: 100,
            min_tally_duration_ms: 100,
            ..PollerConfig::default()
        };
        let (vote, tally) = config.phase_durations(Duration::from_millis(10), 1);
        assert_eq!(vote, Duration::from_millis(100));
        assert_eq!(tally, Duration::from_millis(100));
        let (vote, tally) = config.phase_durations(Duration::from_millis(100), 2);
        assert_eq!(vote, Duration::from_millis(800));
        assert_eq!(tally, Duration::from_millis(1000));
        assert_eq!(config.hash_allowance(Duration::from_millis(100)), Duration::from_millis(200));
    }
}
