//! Nullable network: record messages without sending them.

use audit_messages::{Opcode, PollMessage};
use audit_network::{IdentityResolver, NetworkError, Transport};
use audit_types::PeerIdentity;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// A transport that records messages instead of sending them.
#[derive(Debug, Default)]
pub struct NullTransport {
    sent: Mutex<Vec<(PeerIdentity, PollMessage)>>,
    failing: AtomicBool,
}

impl NullTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later send fail (or succeed again).
    pub fn fail_sends(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    /// All messages "sent", with their destination.
    pub fn sent(&self) -> Vec<(PeerIdentity, PollMessage)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Messages sent to one peer.
    pub fn sent_to(&self, peer: &PeerIdentity) -> Vec<PollMessage> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| to == peer)
            .map(|(_, message)| message)
            .collect()
    }

    /// Opcodes of every message sent, in order.
    pub fn opcodes(&self) -> Vec<Opcode> {
        self.sent().into_iter().map(|(_, m)| m.opcode).collect()
    }

    /// Clear all recorded messages.
    pub fn reset(&self) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Transport for NullTransport {
    fn send(&self, to: &PeerIdentity, message: PollMessage) -> Result<(), NetworkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NetworkError::Closed(to.to_string()));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((to.clone(), message));
        Ok(())
    }
}

/// Resolves any well-formed identity key.
#[derive(Clone, Debug)]
pub struct NullIdentityResolver {
    local: PeerIdentity,
}

impl NullIdentityResolver {
    pub fn new(local: PeerIdentity) -> Self {
        Self { local }
    }
}

impl IdentityResolver for NullIdentityResolver {
    fn local_identity(&self) -> PeerIdentity {
        self.local.clone()
    }

    fn resolve(&self, key: &str) -> Result<PeerIdentity, NetworkError> {
        PeerIdentity::parse(key).map_err(|e| NetworkError::InvalidIdentity(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_types::PollKey;

    #[test]
    fn records_sends_until_told_to_fail() {
        let transport = NullTransport::new();
        let v1 = PeerIdentity::new("v1");
        let key = PollKey::new("poll");
        transport
            .send(&v1, PollMessage::no_op(key.clone(), PeerIdentity::new("p")))
            .unwrap();
        assert_eq!(transport.opcodes(), vec![Opcode::NoOp]);
        assert_eq!(transport.sent_to(&v1).len(), 1);
        assert!(transport.sent_to(&PeerIdentity::new("v2")).is_empty());

        transport.fail_sends(true);
        assert!(transport
            .send(&v1, PollMessage::no_op(key, PeerIdentity::new("p")))
            .is_err());
        assert_eq!(transport.sent().len(), 1);
        transport.reset();
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn resolver_accepts_any_identity() {
        let resolver = NullIdentityResolver::new(PeerIdentity::new("me"));
        assert_eq!(resolver.local_identity(), PeerIdentity::new("me"));
        assert_eq!(resolver.resolve("anyone").unwrap(), PeerIdentity::new("anyone"));
    }
}
