//! Events driving a state machine.

use audit_messages::{Opcode, PollMessage};
use std::fmt;

/// An event is either a control tag returned by a handler or a received
/// protocol message.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Ok,
    Error(String),
    RepairNeeded,
    RepairNotNeeded,
    Message(Box<PollMessage>),
}

/// What a transition table is keyed on. Messages are keyed by opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Ok,
    Error,
    RepairNeeded,
    RepairNotNeeded,
    Message(Opcode),
}

impl Event {
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error(reason.into())
    }

    pub fn message(message: PollMessage) -> Self {
        Self::Message(Box::new(message))
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Ok => EventKind::Ok,
            Self::Error(_) => EventKind::Error,
            Self::RepairNeeded => EventKind::RepairNeeded,
            Self::RepairNotNeeded => EventKind::RepairNotNeeded,
            Self::Message(msg) => EventKind::Message(msg.opcode),
        }
    }

    pub fn as_message(&self) -> Option<&PollMessage> {
        match self {
            Self::Message(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("Ok"),
            Self::Error(reason) => write!(f, "Error({reason})"),
            Self::RepairNeeded => f.write_str("RepairNeeded"),
            Self::RepairNotNeeded => f.write_str("RepairNotNeeded"),
            Self::Message(msg) => write!(f, "Message({})", msg.opcode),
        }
    }
}
