use thiserror::Error;

/// Which side of a comparison carried the bad bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashSide {
    /// The poller's own hash data.
    Local,
    /// A participant's vote.
    Remote,
}

#[derive(Debug, Error)]
pub enum TallyError {
    /// A hash that must be present was null or empty.
    #[error("illegal {side:?} hash bytes for {url}")]
    IllegalByteArray { url: String, side: HashSide },

    /// The merge walk was driven out of order.
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// A participant's vote block stream could not be read.
    #[error("vote stream error: {0}")]
    Stream(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl TallyError {
    /// Whether this error reflects corruption of the poller's own data.
    pub fn is_local_corruption(&self) -> bool {
        matches!(
            self,
            Self::IllegalByteArray {
                side: HashSide::Local,
                ..
            }
        )
    }
}

impl From<bincode::Error> for TallyError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
