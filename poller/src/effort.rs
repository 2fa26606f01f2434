//! Effort proofs exchanged during a poll.
//!
//! A proof is a digest over the poll key, a session nonce and a phase
//! label. The receiving side recomputes it from what it already knows and
//! compares.

use audit_crypto::{digest_multi, HashAlgorithm};
use audit_types::{Nonce, PollKey};

/// Protocol step a proof belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EffortPhase {
    /// Poll invitation, over the poller nonce.
    Intro,
    /// PollProof, over the poller nonce.
    Remaining,
    /// PollAck, over the voter nonce.
    PollAck,
    /// VoteRequest, over the poller nonce.
    VoteRequest,
    /// Vote, over the voter nonce.
    Vote,
    /// RepairRequest, over the poller nonce.
    Repair,
}

impl EffortPhase {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Intro => "intro",
            Self::Remaining => "remaining",
            Self::PollAck => "poll-ack",
            Self::VoteRequest => "vote-request",
            Self::Vote => "vote",
            Self::Repair => "repair",
        }
    }
}

const DOMAIN: &[u8] = b"audit-effort-v1";

pub fn prove_effort(
    algorithm: HashAlgorithm,
    poll_key: &PollKey,
    nonce: &Nonce,
    phase: EffortPhase,
) -> Vec<u8> {
    digest_multi(
        algorithm,
        &[
            DOMAIN,
            phase.label().as_bytes(),
            poll_key.as_str().as_bytes(),
            nonce.as_bytes(),
        ],
    )
    .as_bytes()
    .to_vec()
}

pub fn verify_effort(
    algorithm: HashAlgorithm,
    poll_key: &PollKey,
    nonce: &Nonce,
    phase: EffortPhase,
    proof: &[u8],
) -> bool {
    !proof.is_empty() && prove_effort(algorithm, poll_key, nonce, phase) == proof
}
