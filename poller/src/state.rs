//! Serializable session state, checkpointed between processed events.

use audit_crypto::HashAlgorithm;
use audit_psm::InterpState;
use audit_tally::{ParticipantTallies, VoteBlocks};
use audit_types::{Nonce, PeerIdentity, PollKey, Timestamp, VoteBlock};
use serde::{Deserialize, Serialize};

use crate::repair::RepairQueue;
use crate::status::{PeerStatus, PollerStatus, VoterStatus};
use crate::tally_status::TallyStatus;

/// Checkpoint kind of [`PollState`].
pub const POLL_STATE_KIND: &str = "poll-state";
/// Checkpoint kind of [`ParticipantState`].
pub const PARTICIPANT_STATE_KIND: &str = "participant-state";
/// Checkpoint kind of [`VoterState`].
pub const VOTER_STATE_KIND: &str = "voter-state";

/// Poll-wide state of a poll this peer called.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PollState {
    pub poll_key: PollKey,
    pub au_id: String,
    pub poller: PeerIdentity,
    pub hash_algorithm: HashAlgorithm,
    pub created: Timestamp,
    pub vote_deadline: Timestamp,
    pub poll_deadline: Timestamp,
    pub quorum: usize,
    pub vote_margin: u32,
    pub status: PollerStatus,
    /// Participants by index.
    pub inner_circle: Vec<PeerIdentity>,
    pub bytes_hashed: u64,
    pub block_errors: u32,
    pub tally_status: TallyStatus,
    pub repair_queue: RepairQueue,
    pub participant_tallies: ParticipantTallies,
}

impl PollState {
    pub fn new(
        poll_key: PollKey,
        au_id: impl Into<String>,
        poller: PeerIdentity,
        hash_algorithm: HashAlgorithm,
        created: Timestamp,
        inner_circle: Vec<PeerIdentity>,
    ) -> Self {
        let participants = inner_circle.len();
        Self {
            poll_key,
            au_id: au_id.into(),
            poller,
            hash_algorithm,
            created,
            vote_deadline: created,
            poll_deadline: created,
            quorum: 0,
            vote_margin: 0,
            status: PollerStatus::Initializing,
            inner_circle,
            bytes_hashed: 0,
            block_errors: 0,
            tally_status: TallyStatus::new(),
            repair_queue: RepairQueue::default(),
            participant_tallies: ParticipantTallies::new(participants),
        }
    }

    pub fn participant_index(&self, peer: &PeerIdentity) -> Option<usize> {
        self.inner_circle.iter().position(|p| p == peer)
    }
}

/// The poller's view of one inner-circle participant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticipantState {
    pub peer: PeerIdentity,
    pub index: usize,
    pub status: PeerStatus,
    pub poller_nonce: Nonce,
    pub voter_nonce: Nonce,
    pub nominees: Vec<PeerIdentity>,
    pub vote: VoteBlocks,
    pub vote_proof: Vec<u8>,
    pub repair_urls: Vec<String>,
    pub repairs_received: usize,
    pub agreement_hint: Option<f64>,
    pub interp: Option<InterpState>,
    pub error: Option<String>,
}

impl ParticipantState {
    pub fn new(peer: PeerIdentity, index: usize, poller_nonce: Nonce) -> Self {
        Self {
            peer,
            index,
            status: PeerStatus::Invited,
            poller_nonce,
            voter_nonce: Nonce::default(),
            nominees: Vec::new(),
            vote: VoteBlocks::in_memory(),
            vote_proof: Vec::new(),
            repair_urls: Vec::new(),
            repairs_received: 0,
            agreement_hint: None,
            interp: None,
            error: None,
        }
    }
}

/// State of a poll this peer was invited to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoterState {
    pub poll_key: PollKey,
    pub au_id: String,
    pub poller: PeerIdentity,
    pub voter: PeerIdentity,
    pub hash_algorithm: HashAlgorithm,
    pub poller_nonce: Nonce,
    pub voter_nonce: Nonce,
    pub vote_deadline: Timestamp,
    pub expiration: Timestamp,
    pub status: VoterStatus,
    /// Proof carried by the invitation.
    pub intro_proof: Vec<u8>,
    /// Proof carried by the PollProof message.
    pub remaining_proof: Vec<u8>,
    pub nominees: Vec<PeerIdentity>,
    pub vote_blocks: Vec<VoteBlock>,
    pub agreement_hint: Option<f64>,
    pub repairs_served: Vec<String>,
    pub interp: Option<InterpState>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_store::{load_bean, save_bean, CheckpointKey, FileCheckpointStore};
    use audit_tally::TallyResult;
    use audit_types::{Digest, VoteBlockVersion};

    fn vote_block(url: &str) -> VoteBlock {
        VoteBlock::with_versions(
            url,
            vec![
                VoteBlockVersion::new(Digest::from_slice(&[1; 32]), Digest::from_slice(&[2; 32]))
                    .with_lengths(100, 90),
                VoteBlockVersion::errored(),
            ],
        )
    }

    fn participant() -> ParticipantState {
        let mut p = ParticipantState::new(PeerIdentity::new("v1"), 2, Nonce::new(vec![1; 20]));
        p.status = PeerStatus::Voted;
        p.voter_nonce = Nonce::new(vec![2; 20]);
        p.nominees = vec![PeerIdentity::new("v7"), PeerIdentity::new("v8")];
        p.vote.extend([vote_block("http://a/1"), vote_block("http://a/2")]).unwrap();
        p.vote_proof = vec![9; 32];
        p.repair_urls = vec!["http://a/2".into()];
        p.agreement_hint = Some(0.5);
        p.interp = Some(InterpState {
            machine: "poller-tally".into(),
            state: "WaitRepair".into(),
        });
        p
    }

    fn poll_state() -> PollState {
        let mut state = PollState::new(
            PollKey::new("poll-1"),
            "au-1",
            PeerIdentity::new("poller"),
            HashAlgorithm::Blake2b256,
            Timestamp::from_millis(1_000),
            vec![PeerIdentity::new("v0"), PeerIdentity::new("v1")],
        );
        state.vote_deadline = Timestamp::from_millis(5_000);
        state.poll_deadline = Timestamp::from_millis(9_000);
        state.quorum = 2;
        state.vote_margin = 75;
        state.status = PollerStatus::Tallying;
        state.bytes_hashed = 4096;
        state.block_errors = 1;
        state.tally_status.record("http://a/1", TallyResult::Won);
        state.tally_status.add_error("http://a/3", "hash error");
        state.repair_queue = RepairQueue::new(Some(10));
        state.repair_queue.request_repair("http://a/2", PeerIdentity::new("v1"));
        state
    }

    fn voter_state() -> VoterState {
        VoterState {
            poll_key: PollKey::new("poll-1"),
            au_id: "au-1".into(),
            poller: PeerIdentity::new("poller"),
            voter: PeerIdentity::new("v1"),
            hash_algorithm: HashAlgorithm::Sha256,
            poller_nonce: Nonce::new(vec![1; 20]),
            voter_nonce: Nonce::new(vec![2; 20]),
            vote_deadline: Timestamp::from_millis(5_000),
            expiration: Timestamp::from_millis(9_000),
            status: VoterStatus::Voted,
            intro_proof: vec![3; 32],
            remaining_proof: vec![4; 32],
            nominees: vec![PeerIdentity::new("v9")],
            vote_blocks: vec![vote_block("http://a/1")],
            agreement_hint: Some(0.75),
            repairs_served: vec!["http://a/1".into()],
            interp: Some(InterpState {
                machine: "voter".into(),
                state: "WaitReceiptOrRepairRequest".into(),
            }),
            error: None,
        }
    }

    #[test]
    fn beans_round_trip_through_bincode() {
        let poll = poll_state();
        let bytes = bincode::serialize(&poll).unwrap();
        assert_eq!(bincode::deserialize::<PollState>(&bytes).unwrap(), poll);

        let p = participant();
        let bytes = bincode::serialize(&p).unwrap();
        assert_eq!(bincode::deserialize::<ParticipantState>(&bytes).unwrap(), p);

        let v = voter_state();
        let bytes = bincode::serialize(&v).unwrap();
        assert_eq!(bincode::deserialize::<VoterState>(&bytes).unwrap(), v);
    }

    #[test]
    fn beans_round_trip_through_json() {
        let v = voter_state();
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(serde_json::from_str::<VoterState>(&json).unwrap(), v);
    }

    #[test]
    fn beans_round_trip_through_checkpoint_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path()).unwrap();
        let poll = poll_state();
        let p = participant();

        let poll_key = CheckpointKey::poll(&poll.poll_key, POLL_STATE_KIND);
        let peer_key = CheckpointKey::participant(&poll.poll_key, &p.peer, PARTICIPANT_STATE_KIND);
        save_bean(&store, &poll_key, &poll).unwrap();
        save_bean(&store, &peer_key, &p).unwrap();

        assert_eq!(load_bean::<PollState>(&store, &poll_key).unwrap(), Some(poll));
        assert_eq!(load_bean::<ParticipantState>(&store, &peer_key).unwrap(), Some(p));
    }

    #[test]
    fn participant_index_follows_inner_circle() {
        let state = poll_state();
        assert_eq!(state.participant_index(&PeerIdentity::new("v1")), Some(1));
        assert_eq!(state.participant_index(&PeerIdentity::new("nobody")), None);
    }
}
