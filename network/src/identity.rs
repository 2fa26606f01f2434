//! Mapping between peer identity strings and [`PeerIdentity`] values.

use audit_types::PeerIdentity;
use std::collections::HashSet;

use crate::NetworkError;

pub trait IdentityResolver: Send + Sync {
    /// Identity of the local peer.
    fn local_identity(&self) -> PeerIdentity;

    /// Resolve a string key to a known identity.
    fn resolve(&self, key: &str) -> Result<PeerIdentity, NetworkError>;

    fn key_of(&self, identity: &PeerIdentity) -> String {
        identity.as_str().to_string()
    }
}

/// Resolver over a fixed set of known peers.
pub struct StaticIdentityResolver {
    local: PeerIdentity,
    known: HashSet<PeerIdentity>,
}

impl StaticIdentityResolver {
    pub fn new(local: PeerIdentity, peers: impl IntoIterator<Item = PeerIdentity>) -> Self {
        let mut known: HashSet<PeerIdentity> = peers.into_iter().collect();
        known.insert(local.clone());
        Self { local, known }
    }
}

impl IdentityResolver for StaticIdentityResolver {
    fn local_identity(&self) -> PeerIdentity {
        self.local.clone()
    }

    fn resolve(&self, key: &str) -> Result<PeerIdentity, NetworkError> {
        let id = PeerIdentity::parse(key)
            .map_err(|e| NetworkError::InvalidIdentity(e.to_string()))?;
        if self.known.contains(&id) {
            Ok(id)
        } else {
            Err(NetworkError::PeerNotFound(key.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_peers_only() {
        let resolver = StaticIdentityResolver::new(
            PeerIdentity::new("local"),
            [PeerIdentity::new("v1")],
        );
        assert_eq!(resolver.resolve("v1").unwrap(), PeerIdentity::new("v1"));
        assert_eq!(resolver.resolve("local").unwrap(), resolver.local_identity());
        assert!(matches!(resolver.resolve("v9"), Err(NetworkError::PeerNotFound(_))));
        assert!(matches!(resolver.resolve(" "), Err(NetworkError::InvalidIdentity(_))));
    }
}
