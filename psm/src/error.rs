use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PsmError {
    #[error("machine {machine}: {reason}")]
    InvalidMachine { machine: String, reason: String },

    #[error("no handler registered for {0}")]
    UnknownHandler(String),

    #[error("machine {machine} has no state {state}")]
    UnknownState { machine: String, state: String },

    #[error("checkpoint is for machine {found}, expected {expected}")]
    MachineMismatch { expected: String, found: String },
}
