//! Poll protocol messages exchanged between a poller and its voters.
//!
//! Every message is a [`PollMessage`]: an [`Opcode`] plus the fields that
//! opcode uses. Fields an opcode does not use stay at their defaults.

use audit_crypto::HashAlgorithm;
use audit_types::{Nonce, PeerIdentity, PollKey, Timestamp, VoteBlock};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol version carried in every message.
pub const PROTOCOL_VERSION: u16 = 3;

/// All message kinds in the poll protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Opcode {
    Poll,
    PollAck,
    PollProof,
    Nominate,
    VoteRequest,
    Vote,
    RepairRequest,
    RepairReply,
    EvaluationReceipt,
    /// Keepalive. Never dispatched to a state machine handler.
    NoOp,
}

impl Opcode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poll => "Poll",
            Self::PollAck => "PollAck",
            Self::PollProof => "PollProof",
            Self::Nominate => "Nominate",
            Self::VoteRequest => "VoteRequest",
            Self::Vote => "Vote",
            Self::RepairRequest => "RepairRequest",
            Self::RepairReply => "RepairReply",
            Self::EvaluationReceipt => "EvaluationReceipt",
            Self::NoOp => "NoOp",
        }
    }

    /// Messages a poller receives from voters.
    pub fn is_to_poller(&self) -> bool {
        matches!(
            self,
            Self::PollAck | Self::Nominate | Self::Vote | Self::RepairReply
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a voter declined a poll invitation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollNak {
    /// The voter could not schedule the hashing work before the deadline.
    NoTime,
    /// The voter is already taking part in too many polls.
    TooManyVoters,
    /// The voter does not hold the archival unit yet.
    NotCrawled,
    Other,
}

/// A single poll protocol message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PollMessage {
    pub opcode: Opcode,
    pub poll_key: PollKey,
    pub sender: PeerIdentity,
    pub protocol_version: u16,
    pub hash_algorithm: HashAlgorithm,
    pub poller_nonce: Nonce,
    pub voter_nonce: Nonce,
    pub effort_proof: Vec<u8>,
    pub vote_deadline: Timestamp,
    pub expiration: Timestamp,
    pub nominees: Vec<PeerIdentity>,
    pub vote_blocks: Vec<VoteBlock>,
    /// Set on the last Vote message of a vote.
    pub vote_complete: bool,
    /// URL a repair is requested for or supplied for.
    pub target_url: Option<String>,
    /// Current content of `target_url` in a RepairReply.
    pub repair_data: Option<Vec<u8>>,
    /// Fraction of the voter's URLs the poller agreed with, in a receipt.
    pub agreement_hint: Option<f64>,
    pub nak: Option<PollNak>,
}

impl PollMessage {
    /// A message with every optional field empty.
    pub fn new(opcode: Opcode, poll_key: PollKey, sender: PeerIdentity) -> Self {
        Self {
            opcode,
            poll_key,
            sender,
            protocol_version: PROTOCOL_VERSION,
            hash_algorithm: HashAlgorithm::default(),
            poller_nonce: Nonce::default(),
            voter_nonce: Nonce::default(),
            effort_proof: Vec::new(),
            vote_deadline: Timestamp::EPOCH,
            expiration: Timestamp::EPOCH,
            nominees: Vec::new(),
            vote_blocks: Vec::new(),
            vote_complete: false,
            target_url: None,
            repair_data: None,
            agreement_hint: None,
            nak: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn poll(
        poll_key: PollKey,
        sender: PeerIdentity,
        hash_algorithm: HashAlgorithm,
        poller_nonce: Nonce,
        effort_proof: Vec<u8>,
        vote_deadline: Timestamp,
        expiration: Timestamp,
    ) -> Self {
        Self {
            hash_algorithm,
            poller_nonce,
            effort_proof,
            vote_deadline,
            expiration,
            ..Self::new(Opcode::Poll, poll_key, sender)
        }
    }

    pub fn poll_ack(
        poll_key: PollKey,
        sender: PeerIdentity,
        poller_nonce: Nonce,
        voter_nonce: Nonce,
        effort_proof: Vec<u8>,
    ) -> Self {
        Self {
            poller_nonce,
            voter_nonce,
            effort_proof,
            ..Self::new(Opcode::PollAck, poll_key, sender)
        }
    }

    /// A PollAck refusing the invitation.
    pub fn poll_nak(poll_key: PollKey, sender: PeerIdentity, reason: PollNak) -> Self {
        Self {
            nak: Some(reason),
            ..Self::new(Opcode::PollAck, poll_key, sender)
        }
    }

    pub fn poll_proof(
        poll_key: PollKey,
        sender: PeerIdentity,
        voter_nonce: Nonce,
        effort_proof: Vec<u8>,
    ) -> Self {
        Self {
            voter_nonce,
            effort_proof,
            ..Self::new(Opcode::PollProof, poll_key, sender)
        }
    }

    pub fn nominate(poll_key: PollKey, sender: PeerIdentity, nominees: Vec<PeerIdentity>) -> Self {
        Self {
            nominees,
            ..Self::new(Opcode::Nominate, poll_key, sender)
        }
    }

    pub fn vote_request(poll_key: PollKey, sender: PeerIdentity, effort_proof: Vec<u8>) -> Self {
        Self {
            effort_proof,
            ..Self::new(Opcode::VoteRequest, poll_key, sender)
        }
    }

    pub fn vote(
        poll_key: PollKey,
        sender: PeerIdentity,
        voter_nonce: Nonce,
        vote_blocks: Vec<VoteBlock>,
        effort_proof: Vec<u8>,
    ) -> Self {
        Self {
            voter_nonce,
            vote_blocks,
            effort_proof,
            vote_complete: true,
            ..Self::new(Opcode::Vote, poll_key, sender)
        }
    }

    pub fn repair_request(
        poll_key: PollKey,
        sender: PeerIdentity,
        url: impl Into<String>,
        effort_proof: Vec<u8>,
    ) -> Self {
        Self {
            target_url: Some(url.into()),
            effort_proof,
            ..Self::new(Opcode::RepairRequest, poll_key, sender)
        }
    }

    /// A repair reply. `content` is `None` when the voter cannot supply it.
    pub fn repair_reply(
        poll_key: PollKey,
        sender: PeerIdentity,
        url: impl Into<String>,
        content: Option<Vec<u8>>,
    ) -> Self {
        Self {
            target_url: Some(url.into()),
            repair_data: content,
            ..Self::new(Opcode::RepairReply, poll_key, sender)
        }
    }

    pub fn evaluation_receipt(
        poll_key: PollKey,
        sender: PeerIdentity,
        agreement_hint: Option<f64>,
    ) -> Self {
        Self {
            agreement_hint,
            ..Self::new(Opcode::EvaluationReceipt, poll_key, sender)
        }
    }

    pub fn no_op(poll_key: PollKey, sender: PeerIdentity) -> Self {
        Self::new(Opcode::NoOp, poll_key, sender)
    }

    pub fn is_nak(&self) -> bool {
        self.nak.is_some()
    }
}

impl fmt::Display for PollMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {} from {}", self.opcode, self.poll_key, self.sender)?;
        if !self.vote_blocks.is_empty() {
            write!(f, " blocks={}", self.vote_blocks.len())?;
        }
        if let Some(url) = &self.target_url {
            write!(f, " url={url}")?;
        }
        if let Some(nak) = &self.nak {
            write!(f, " nak={nak:?}")?;
        }
        f.write_str("]")
    }
}
