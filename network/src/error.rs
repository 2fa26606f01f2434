use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("peer {0} not found")]
    PeerNotFound(String),

    #[error("no session for poll {0}")]
    NoSession(String),

    #[error("outbound queue to {0} is full")]
    QueueFull(String),

    #[error("channel to {0} is closed")]
    Closed(String),

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
}
