//! Message transport for poll sessions.
//!
//! Sessions send through the [`Transport`] trait (fire-and-forget) and
//! receive through a per-poll inbound queue fed by a [`MessageRouter`].
//! [`ChannelTransport`] is an in-process implementation over tokio `mpsc`
//! channels, used when every peer lives in one process.

pub mod channel;
pub mod error;
pub mod identity;
pub mod router;

pub use channel::{ChannelHub, ChannelTransport};
pub use error::NetworkError;
pub use identity::{IdentityResolver, StaticIdentityResolver};
pub use router::MessageRouter;

use audit_messages::PollMessage;
use audit_types::PeerIdentity;

/// Outbound message sink.
///
/// Sending never waits for delivery; retries and acknowledgement belong to
/// the implementation.
pub trait Transport: Send + Sync {
    fn send(&self, to: &PeerIdentity, message: PollMessage) -> Result<(), NetworkError>;
}
