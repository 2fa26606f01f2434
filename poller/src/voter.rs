//! The invited side of a poll.
//!
//! A [`V3Voter`] is built from the poller's invitation and driven by
//! [`V3Voter::run`] from an inbound queue of the poll's messages. The state
//! is checkpointed after every processed event and
//! [`V3Voter::resume`] picks a saved session back up.
//!
//! The vote is hashed by the drive loop rather than inside a handler, one
//! step at a time with a yield between steps. The vote deadline and the
//! cancel flag are checked before every step.

use audit_crypto::make_nonce;
use audit_messages::{Opcode, PollMessage, PollNak};
use audit_network::Transport;
use audit_psm::machines::voter as handlers;
use audit_psm::{voter_machine, Event, HandlerRegistry, Interp, ERROR_HANDLER};
use audit_store::{load_bean, save_bean, CheckpointKey, CheckpointStore, ContentRepository};
use audit_types::{Clock, PeerIdentity, PollKey};
use audit_utils::spans::{message_span, vote_span};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn, Instrument, Span};

use crate::config::VoterConfig;
use crate::effort::{prove_effort, verify_effort, EffortPhase};
use crate::hasher::{BlockHasher, HashStep};
use crate::scheduler::HashScheduler;
use crate::state::{VoterState, VOTER_STATE_KIND};
use crate::status::VoterStatus;
use crate::PollerError;

/// Everything a voter needs from its host.
#[derive(Clone)]
pub struct VoterDeps {
    pub repository: Arc<dyn ContentRepository>,
    pub transport: Arc<dyn Transport>,
    pub scheduler: Arc<dyn HashScheduler>,
    pub clock: Arc<dyn Clock>,
    pub checkpoints: Option<Arc<dyn CheckpointStore>>,
}

struct VoterSession {
    state: VoterState,
    config: VoterConfig,
    deps: VoterDeps,
    known_peers: Vec<PeerIdentity>,
    /// Agreement with this poller in earlier polls, as a fraction.
    poller_agreement: Option<f64>,
    ack_proof: Vec<u8>,
    pending_repair: Option<String>,
    /// Set by `generateVote`; the drive loop hashes before its next wait.
    hash_pending: bool,
    cancel: Arc<AtomicBool>,
}

impl VoterSession {
    fn send(&self, message: PollMessage) -> Event {
        match self.deps.transport.send(&self.state.poller, message) {
            Ok(()) => Event::Ok,
            Err(e) => Event::error(format!("send failed: {e}")),
        }
    }

    fn verify(&self, phase: EffortPhase, nonce_is_voter: bool, proof: &[u8]) -> bool {
        let nonce = if nonce_is_voter {
            &self.state.voter_nonce
        } else {
            &self.state.poller_nonce
        };
        verify_effort(self.state.hash_algorithm, &self.state.poll_key, nonce, phase, proof)
    }

    fn decline(&mut self, reason: PollNak, status: VoterStatus) -> Event {
        self.state.status = status;
        let nak = PollMessage::poll_nak(self.state.poll_key.clone(), self.state.voter.clone(), reason);
        if let Event::Error(e) = self.send(nak) {
            warn!(error = %e, "could not send PollAck refusal");
        }
        Event::error(format!("declined: {reason:?}"))
    }

    fn content_bytes(&self) -> Result<u64, PollerError> {
        let repository = &self.deps.repository;
        let mut total = 0u64;
        for url in repository.urls()? {
            if repository.version_count(&url)? > 0 {
                total = total.saturating_add(repository.version_len(&url, 0)?);
            }
        }
        Ok(total)
    }

    async fn hash_vote(&mut self) -> Result<(), PollerError> {
        let pairs = vec![(self.state.poller_nonce.clone(), self.state.voter_nonce.clone())];
        let mut hasher = BlockHasher::new(
            self.deps.repository.clone(),
            self.state.hash_algorithm,
            pairs,
            self.config.hash_step_bytes,
        )?
        .with_cancel(self.cancel.clone())
        .with_deadline(self.state.vote_deadline, self.deps.clock.clone());
        let mut blocks = Vec::new();
        loop {
            match hasher.step()? {
                HashStep::Progress(_) => tokio::task::yield_now().await,
                HashStep::Block(block) => blocks.push(block.to_vote_block(0)),
                HashStep::Done => break,
            }
        }
        debug!(blocks = blocks.len(), bytes = hasher.bytes_hashed(), "vote hashed");
        self.state.vote_blocks = blocks;
        Ok(())
    }

    fn hash_failed(&mut self, error: PollerError) -> Event {
        match error {
            PollerError::DeadlinePassed(reason) => {
                self.state.status = VoterStatus::NoTime;
                Event::error(format!("vote not ready: {reason}"))
            }
            PollerError::Cancelled => {
                self.state.status = VoterStatus::Aborted;
                Event::error("vote cancelled")
            }
            e => Event::error(format!("hashing failed: {e}")),
        }
    }

    fn may_serve_repairs(&self) -> bool {
        if !self.config.serve_repairs {
            return false;
        }
        let minimum = self.config.min_percent_agreement_for_repairs;
        match self.poller_agreement {
            Some(agreement) => agreement * 100.0 >= f64::from(minimum),
            None => minimum == 0,
        }
    }
}

fn verify_poll_effort(_: &Event, s: &mut VoterSession) -> Event {
    if !s.verify(EffortPhase::Intro, false, &s.state.intro_proof) {
        return Event::error("bad Poll effort proof");
    }
    let now = s.deps.clock.now();
    if s.state.expiration.has_passed(now) {
        return s.decline(PollNak::Other, VoterStatus::Expired);
    }
    let bytes = match s.content_bytes() {
        Ok(0) => return s.decline(PollNak::NotCrawled, VoterStatus::DeclinedPoll),
        Ok(bytes) => bytes,
        Err(e) => return Event::error(format!("cannot size content: {e}")),
    };
    let estimate = std::time::Duration::from_millis(bytes / s.config.hash_bytes_per_ms.max(1) + 1);
    if !s
        .deps
        .scheduler
        .is_task_schedulable(now, s.state.vote_deadline, estimate)
    {
        info!(bytes, "no time to hash before the vote deadline");
        return s.decline(PollNak::NoTime, VoterStatus::NoTime);
    }
    Event::Ok
}

fn prove_poll_ack(_: &Event, s: &mut VoterSession) -> Event {
    match make_nonce(s.config.nonce_length) {
        Ok(nonce) => s.state.voter_nonce = nonce,
        Err(e) => return Event::error(format!("cannot make nonce: {e}")),
    }
    s.ack_proof = prove_effort(
        s.state.hash_algorithm,
        &s.state.poll_key,
        &s.state.voter_nonce,
        EffortPhase::PollAck,
    );
    s.state.status = VoterStatus::AcceptedPoll;
    Event::Ok
}

fn send_poll_ack(_: &Event, s: &mut VoterSession) -> Event {
    s.send(PollMessage::poll_ack(
        s.state.poll_key.clone(),
        s.state.voter.clone(),
        s.state.poller_nonce.clone(),
        s.state.voter_nonce.clone(),
        s.ack_proof.clone(),
    ))
}

fn receive_poll_proof(event: &Event, s: &mut VoterSession) -> Event {
    let Some(proof) = event.as_message() else {
        return Event::error("no PollProof to receive");
    };
    if proof.voter_nonce != s.state.voter_nonce {
        return Event::error("PollProof for another voter nonce");
    }
    s.state.remaining_proof = proof.effort_proof.clone();
    Event::Ok
}

fn verify_poll_proof(_: &Event, s: &mut VoterSession) -> Event {
    if s.verify(EffortPhase::Remaining, false, &s.state.remaining_proof) {
        Event::Ok
    } else {
        Event::error("bad PollProof effort proof")
    }
}

fn send_nominate(_: &Event, s: &mut VoterSession) -> Event {
    let candidates: Vec<PeerIdentity> = s
        .known_peers
        .iter()
        .filter(|p| **p != s.state.poller && **p != s.state.voter)
        .take(s.config.max_nomination_size)
        .cloned()
        .collect();
    s.state.nominees = if candidates.len() >= s.config.min_nomination_size {
        candidates
    } else {
        Vec::new()
    };
    s.send(PollMessage::nominate(
        s.state.poll_key.clone(),
        s.state.voter.clone(),
        s.state.nominees.clone(),
    ))
}

fn generate_vote(_: &Event, s: &mut VoterSession) -> Event {
    s.state.status = VoterStatus::Hashing;
    s.state.vote_blocks.clear();
    s.hash_pending = true;
    Event::Ok
}

fn receive_vote_request(event: &Event, s: &mut VoterSession) -> Event {
    let Some(request) = event.as_message() else {
        return Event::error("no VoteRequest to receive");
    };
    if s.verify(EffortPhase::VoteRequest, false, &request.effort_proof) {
        Event::Ok
    } else {
        Event::error("bad VoteRequest effort proof")
    }
}

fn send_vote(_: &Event, s: &mut VoterSession) -> Event {
    let proof = prove_effort(
        s.state.hash_algorithm,
        &s.state.poll_key,
        &s.state.voter_nonce,
        EffortPhase::Vote,
    );
    let vote = PollMessage::vote(
        s.state.poll_key.clone(),
        s.state.voter.clone(),
        s.state.voter_nonce.clone(),
        s.state.vote_blocks.clone(),
        proof,
    );
    let sent = s.send(vote);
    if sent == Event::Ok {
        s.state.status = VoterStatus::Voted;
    }
    sent
}

fn receive_repair_request(event: &Event, s: &mut VoterSession) -> Event {
    let Some(request) = event.as_message() else {
        return Event::error("no RepairRequest to receive");
    };
    if !s.verify(EffortPhase::Repair, false, &request.effort_proof) {
        return Event::error("bad RepairRequest effort proof");
    }
    match &request.target_url {
        Some(url) => {
            s.pending_repair = Some(url.clone());
            Event::Ok
        }
        None => Event::error("RepairRequest without a URL"),
    }
}

fn send_repair(_: &Event, s: &mut VoterSession) -> Event {
    let Some(url) = s.pending_repair.take() else {
        return Event::error("no repair pending");
    };
    let content = if s.may_serve_repairs() {
        match s.deps.repository.read_version(&url, 0) {
            Ok(content) => Some(content),
            Err(e) => {
                warn!(url, error = %e, "cannot read repair content");
                None
            }
        }
    } else {
        debug!(url, "repair refused to this poller");
        None
    };
    let served = content.is_some();
    let reply = PollMessage::repair_reply(s.state.poll_key.clone(), s.state.voter.clone(), &url, content);
    let sent = s.send(reply);
    if served && sent == Event::Ok {
        s.state.repairs_served.push(url);
    }
    sent
}

fn receive_receipt(event: &Event, s: &mut VoterSession) -> Event {
    let Some(receipt) = event.as_message() else {
        return Event::error("no EvaluationReceipt to receive");
    };
    s.state.agreement_hint = receipt.agreement_hint;
    Event::Ok
}

fn process_receipt(_: &Event, s: &mut VoterSession) -> Event {
    s.state.status = VoterStatus::Complete;
    info!(
        agreement = ?s.state.agreement_hint,
        repairs_served = s.state.repairs_served.len(),
        "poll complete"
    );
    Event::Ok
}

fn record_error(event: &Event, s: &mut VoterSession) -> Event {
    let reason = match event {
        Event::Error(reason) => reason.clone(),
        other => format!("failed after {other}"),
    };
    if !s.state.status.is_final() {
        s.state.status = VoterStatus::Error;
    }
    info!(status = %s.state.status, %reason, "vote ended");
    s.state.error = Some(reason);
    Event::Ok
}

fn voter_registry() -> HandlerRegistry<VoterSession> {
    HandlerRegistry::new()
        .with(handlers::VERIFY_POLL_EFFORT, verify_poll_effort)
        .with(handlers::PROVE_POLL_ACK, prove_poll_ack)
        .with(handlers::SEND_POLL_ACK, send_poll_ack)
        .with(handlers::RECEIVE_POLL_PROOF, receive_poll_proof)
        .with(handlers::VERIFY_POLL_PROOF, verify_poll_proof)
        .with(handlers::SEND_NOMINATE, send_nominate)
        .with(handlers::GENERATE_VOTE, generate_vote)
        .with(handlers::RECEIVE_VOTE_REQUEST, receive_vote_request)
        .with(handlers::SEND_VOTE, send_vote)
        .with(handlers::RECEIVE_REPAIR_REQUEST, receive_repair_request)
        .with(handlers::SEND_REPAIR, send_repair)
        .with(handlers::RECEIVE_RECEIPT, receive_receipt)
        .with(handlers::PROCESS_RECEIPT, process_receipt)
        .with(ERROR_HANDLER, record_error)
}

/// This peer's side of one poll it was invited to.
pub struct V3Voter {
    session: VoterSession,
    interp: Interp<VoterSession>,
    started: bool,
}

impl V3Voter {
    /// Accept `invitation`, a Poll message, as `identity`.
    pub fn new(
        config: VoterConfig,
        deps: VoterDeps,
        identity: PeerIdentity,
        invitation: &PollMessage,
    ) -> Result<Self, PollerError> {
        if invitation.opcode != Opcode::Poll {
            return Err(PollerError::UnexpectedMessage(invitation.to_string()));
        }
        let state = VoterState {
            poll_key: invitation.poll_key.clone(),
            au_id: deps.repository.au_id().to_string(),
            poller: invitation.sender.clone(),
            voter: identity,
            hash_algorithm: invitation.hash_algorithm,
            poller_nonce: invitation.poller_nonce.clone(),
            voter_nonce: Default::default(),
            vote_deadline: invitation.vote_deadline,
            expiration: invitation.expiration,
            status: VoterStatus::Initialized,
            intro_proof: invitation.effort_proof.clone(),
            remaining_proof: Vec::new(),
            nominees: Vec::new(),
            vote_blocks: Vec::new(),
            agreement_hint: None,
            repairs_served: Vec::new(),
            interp: None,
            error: None,
        };
        let interp = Interp::new(Arc::new(voter_machine()), Arc::new(voter_registry()))?;
        Ok(Self::with_state(config, deps, state, interp, false))
    }

    /// Pick up a checkpointed session where it stopped.
    pub fn resume(config: VoterConfig, deps: VoterDeps, state: VoterState) -> Result<Self, PollerError> {
        let machine = Arc::new(voter_machine());
        let registry = Arc::new(voter_registry());
        let interp = match &state.interp {
            Some(saved) => Interp::resume(machine, registry, saved)?,
            None => Interp::new(machine, registry)?,
        };
        let started = state.interp.is_some();
        // A session stopped mid-hash starts its vote over.
        let hash_pending = state.status == VoterStatus::Hashing && state.vote_blocks.is_empty();
        let mut voter = Self::with_state(config, deps, state, interp, started);
        voter.session.hash_pending = hash_pending;
        Ok(voter)
    }

    /// The checkpointed state of `voter`'s session in `poll_key`, if any.
    pub fn load_checkpoint(
        store: &dyn CheckpointStore,
        poll_key: &PollKey,
        voter: &PeerIdentity,
    ) -> Result<Option<VoterState>, PollerError> {
        let key = CheckpointKey::participant(poll_key, voter, VOTER_STATE_KIND);
        Ok(load_bean(store, &key)?)
    }

    fn with_state(
        config: VoterConfig,
        deps: VoterDeps,
        state: VoterState,
        interp: Interp<VoterSession>,
        started: bool,
    ) -> Self {
        Self {
            session: VoterSession {
                state,
                config,
                deps,
                known_peers: Vec::new(),
                poller_agreement: None,
                ack_proof: Vec::new(),
                pending_repair: None,
                hash_pending: false,
                cancel: Arc::new(AtomicBool::new(false)),
            },
            interp,
            started,
        }
    }

    /// Peers this voter may nominate.
    pub fn with_known_peers(mut self, peers: Vec<PeerIdentity>) -> Self {
        self.session.known_peers = peers;
        self
    }

    /// Agreement with this poller in an earlier poll, as a fraction.
    pub fn with_poller_agreement(mut self, agreement: Option<f64>) -> Self {
        self.session.poller_agreement = agreement;
        self
    }

    pub fn state(&self) -> &VoterState {
        &self.session.state
    }

    /// Setting the flag stops vote hashing at its next step.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.session.cancel.clone()
    }

    /// Run the session until the voter machine ends or the poll expires.
    pub async fn run(
        self,
        inbound: mpsc::UnboundedReceiver<PollMessage>,
    ) -> Result<VoterState, PollerError> {
        let span = vote_span(
            self.session.state.poll_key.as_str(),
            self.session.state.poller.as_str(),
        );
        self.drive(inbound).instrument(span).await
    }

    async fn drive(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<PollMessage>,
    ) -> Result<VoterState, PollerError> {
        if !self.started {
            self.interp.start(&mut self.session)?;
            self.started = true;
            self.checkpoint();
        }
        while !self.interp.is_final_state() {
            if self.session.hash_pending {
                self.session.hash_pending = false;
                match self.session.hash_vote().await {
                    Ok(()) => self.checkpoint(),
                    Err(e) => {
                        let event = self.session.hash_failed(e);
                        self.interp.handle_event(event, &mut self.session)?;
                        self.checkpoint();
                    }
                }
                continue;
            }
            let remaining = self
                .session
                .state
                .expiration
                .remaining_from(self.session.deps.clock.now());
            let event = match timeout(remaining, inbound.recv()).await {
                Ok(Some(message)) if message.opcode == Opcode::NoOp => continue,
                Ok(Some(message)) => Event::message(message),
                Ok(None) => Event::error("poller channel closed"),
                Err(_) => {
                    if !self.session.state.status.is_final() {
                        self.session.state.status = VoterStatus::Expired;
                    }
                    Event::error(format!("poll expired in {}", self.interp.current_state()))
                }
            };
            let span = match event.as_message() {
                Some(message) => message_span(message.sender.as_str(), message.opcode.as_str()),
                None => Span::none(),
            };
            span.in_scope(|| self.interp.handle_event(event, &mut self.session))?;
            self.checkpoint();
        }
        if let Some(store) = &self.session.deps.checkpoints {
            if let Err(e) = store.remove_poll(&self.session.state.poll_key) {
                warn!(error = %e, "removing vote checkpoints failed");
            }
        }
        self.session.state.interp = Some(self.interp.snapshot());
        Ok(self.session.state)
    }

    fn checkpoint(&mut self) {
        self.session.state.interp = Some(self.interp.snapshot());
        let Some(store) = &self.session.deps.checkpoints else {
            return;
        };
        let key = CheckpointKey::participant(
            &self.session.state.poll_key,
            &self.session.state.voter,
            VOTER_STATE_KIND,
        );
        if let Err(e) = save_bean(store.as_ref(), &key, &self.session.state) {
            warn!(error = %e, "vote checkpoint failed");
        }
    }
}
