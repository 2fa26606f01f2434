//! Routes inbound messages to the session that owns their poll.

use audit_messages::{Opcode, PollMessage};
use audit_types::PollKey;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::NetworkError;

/// Per-poll inbound queues. Sessions register when they start and
/// unregister when they end.
#[derive(Default)]
pub struct MessageRouter {
    sessions: RwLock<HashMap<PollKey, mpsc::UnboundedSender<PollMessage>>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, poll_key: PollKey) -> mpsc::UnboundedReceiver<PollMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(poll_key, tx);
        rx
    }

    pub fn unregister(&self, poll_key: &PollKey) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(poll_key);
    }

    pub fn has_session(&self, poll_key: &PollKey) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(poll_key)
    }

    /// Deliver `message` to its poll's session. Keepalives are dropped.
    pub fn route(&self, message: PollMessage) -> Result<(), NetworkError> {
        if message.opcode == Opcode::NoOp {
            trace!(from = %message.sender, "dropping keepalive");
            return Ok(());
        }
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let tx = sessions
            .get(&message.poll_key)
            .ok_or_else(|| NetworkError::NoSession(message.poll_key.to_string()))?;
        debug!(poll = %message.poll_key, opcode = %message.opcode, from = %message.sender, "routing message");
        tx.send(message)
            .map_err(|e| NetworkError::Closed(e.0.poll_key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_types::PeerIdentity;

    #[tokio::test]
    async fn routes_by_poll_key() {
        let router = MessageRouter::new();
        let mut rx = router.register(PollKey::new("a"));
        let msg = PollMessage::no_op(PollKey::new("a"), PeerIdentity::new("v1"));
        router.route(msg).unwrap();

        let vote = PollMessage::nominate(PollKey::new("a"), PeerIdentity::new("v1"), vec![]);
        router.route(vote.clone()).unwrap();
        assert_eq!(rx.recv().await.unwrap(), vote);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unknown_poll_is_an_error() {
        let router = MessageRouter::new();
        let msg = PollMessage::nominate(PollKey::new("zz"), PeerIdentity::new("v1"), vec![]);
        assert!(matches!(router.route(msg), Err(NetworkError::NoSession(_))));
    }

    #[test]
    fn unregister_removes_session() {
        let router = MessageRouter::new();
        let _rx = router.register(PollKey::new("a"));
        assert!(router.has_session(&PollKey::new("a")));
        router.unregister(&PollKey::new("a"));
        assert!(!router.has_session(&PollKey::new("a")));
    }
}
