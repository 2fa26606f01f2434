use audit_crypto::CryptoError;
use audit_network::NetworkError;
use audit_psm::PsmError;
use audit_store::StoreError;
use audit_tally::TallyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("tally error: {0}")]
    Tally(#[from] TallyError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("state machine error: {0}")]
    Psm(#[from] PsmError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("hashing cancelled")]
    Cancelled,

    #[error("deadline passed: {0}")]
    DeadlinePassed(String),

    #[error("hashing took {elapsed_ms}ms against an allowance of {allowed_ms}ms")]
    HashOverrun { elapsed_ms: u64, allowed_ms: u64 },

    #[error("too many block errors: {count} (max {max})")]
    TooManyBlockErrors { count: u32, max: u32 },

    #[error("could not schedule hashing after {attempts} attempts")]
    CouldNotSchedule { attempts: u32 },

    #[error("session channel closed")]
    ChannelClosed,

    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),
}

impl PollerError {
    /// Whether a retry with a fresh hash estimate may succeed.
    pub fn is_overrun(&self) -> bool {
        matches!(self, Self::HashOverrun { .. })
    }
}
