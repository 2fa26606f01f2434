//! Span constructors with consistent names and fields, so poll traces can
//! be filtered and correlated by poll key and peer.

use tracing::{debug_span, info_span, Span};

/// Span covering an entire poll on the poller side.
pub fn poll_span(poll_key: &str, au_id: &str) -> Span {
    info_span!("poll", key = %poll_key, au = %au_id)
}

/// Span covering a voter's participation in someone else's poll.
pub fn vote_span(poll_key: &str, poller: &str) -> Span {
    info_span!("vote", key = %poll_key, poller = %poller)
}

/// Span covering one participant's protocol exchange inside a poll.
pub fn participant_span(poll_key: &str, peer: &str) -> Span {
    info_span!("participant", key = %poll_key, peer = %peer)
}

/// Span covering the tally phase of a poll.
pub fn tally_span(poll_key: &str, participants: usize) -> Span {
    info_span!("tally", key = %poll_key, participants = participants)
}

/// Span covering a hashing pass over an archival unit.
pub fn hash_span(poll_key: &str, bytes: u64) -> Span {
    debug_span!("hash", key = %poll_key, budget = bytes)
}

/// Span covering the handling of one inbound protocol message.
pub fn message_span(peer: &str, opcode: &str) -> Span {
    debug_span!("message", peer = %peer, opcode = %opcode)
}
