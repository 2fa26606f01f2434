//! The calling side of a poll.
//!
//! [`V3Poller::run`] drives one poll from invitations to receipts. Every
//! inner-circle voter gets its own task that runs the solicit machine to
//! collect its vote and then the tally machine to settle repairs and send
//! the receipt. Hashing, tallying and repair bookkeeping stay with the
//! aggregator in `run`, which hears from the voter tasks through
//! [`VoterReport`]s and forwards inbound messages to them by sender.
//!
//! With a checkpoint store configured, the poll state and each
//! participant's session are saved as they change, and
//! [`V3Poller::resume`] rebuilds an interrupted poll from them.

use audit_crypto::{make_nonce, HashAlgorithm};
use audit_messages::{Opcode, PollMessage};
use audit_network::Transport;
use audit_psm::machines::poller as handlers;
use audit_psm::{
    poller_solicit_machine, poller_tally_machine, Event, EventKind, HandlerRegistry, Interp,
    InterpState, ERROR_HANDLER,
};
use audit_store::{load_bean, save_bean, CheckpointKey, CheckpointStore, ContentRepository};
use audit_tally::{VoteBlockStream, VoteBlocks};
use audit_types::{Clock, Nonce, PeerIdentity, PollKey, Timestamp};
use audit_utils::spans::{hash_span, participant_span, poll_span, tally_span};
use audit_utils::{format_duration, StatsCounter};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn, Instrument};

use crate::config::PollerConfig;
use crate::effort::{prove_effort, verify_effort, EffortPhase};
use crate::hasher::{BlockHasher, HashStep, OverrunGuard};
use crate::metrics::PollMetrics;
use crate::poll_tally::PollTally;
use crate::scheduler::{observed_estimate, schedule_poll, HashScheduler, PollSchedule};
use crate::state::{ParticipantState, PollState, PARTICIPANT_STATE_KIND, POLL_STATE_KIND};
use crate::status::{PeerStatus, PollOutcome, PollerStatus};
use crate::PollerError;

/// Floor for the hashing allowance, so tiny archival units do not trip the
/// overrun check on scheduler jitter alone.
const MIN_HASH_ALLOWANCE: Duration = Duration::from_secs(1);

/// What a voter task tells the aggregator.
#[derive(Debug)]
pub enum VoterReport {
    Voted {
        index: usize,
        voter_nonce: Nonce,
        nominees: Vec<PeerIdentity>,
        vote: VoteBlocks,
    },
    /// The session ended without a vote or without settling.
    Failed {
        index: usize,
        status: PeerStatus,
        reason: String,
    },
    Repair {
        index: usize,
        url: String,
        content: Option<Vec<u8>>,
    },
    Finished {
        index: usize,
        agreement_hint: Option<f64>,
    },
}

/// What the aggregator tells a voter task once the poll is tallied.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TallyPlan {
    pub repair_urls: Vec<String>,
    pub agreement_hint: Option<f64>,
}

/// Everything a poll needs from its host.
#[derive(Clone)]
pub struct PollerDeps {
    pub repository: Arc<dyn ContentRepository>,
    pub transport: Arc<dyn Transport>,
    pub scheduler: Arc<dyn HashScheduler>,
    pub clock: Arc<dyn Clock>,
    pub checkpoints: Option<Arc<dyn CheckpointStore>>,
    pub metrics: Option<Arc<PollMetrics>>,
}

// ---------------------------------------------------------------------------
// Per-voter session
// ---------------------------------------------------------------------------

struct ParticipantSession {
    state: ParticipantState,
    poll_key: PollKey,
    poller: PeerIdentity,
    algorithm: HashAlgorithm,
    vote_deadline: Timestamp,
    poll_deadline: Timestamp,
    transport: Arc<dyn Transport>,
    reports: mpsc::UnboundedSender<VoterReport>,
    /// Proof most recently produced by this side.
    proof: Vec<u8>,
    ack_proof: Vec<u8>,
    plan: TallyPlan,
    outstanding: Vec<String>,
}

impl ParticipantSession {
    fn send(&self, message: PollMessage) -> Event {
        match self.transport.send(&self.state.peer, message) {
            Ok(()) => Event::Ok,
            Err(e) => Event::error(format!("send failed: {e}")),
        }
    }

    fn prove(&mut self, phase: EffortPhase) {
        self.proof = prove_effort(self.algorithm, &self.poll_key, &self.state.poller_nonce, phase);
    }

    fn vote_proof_holds(&self) -> bool {
        verify_effort(
            self.algorithm,
            &self.poll_key,
            &self.state.voter_nonce,
            EffortPhase::Vote,
            &self.state.vote_proof,
        )
    }

    /// Append a partial vote to the participant's store. `None` means the
    /// blocks were kept and the session waits for the next part.
    fn store_partial_vote(&mut self, message: PollMessage) -> Option<Event> {
        if message.voter_nonce != self.state.voter_nonce {
            return Some(Event::error("Vote under another voter nonce"));
        }
        let blocks = message.vote_blocks.len();
        match self.state.vote.extend(message.vote_blocks) {
            Ok(()) => {
                debug!(blocks, stored = self.state.vote.len(), "partial vote stored");
                None
            }
            Err(e) => Some(Event::error(format!("cannot store vote: {e}"))),
        }
    }
}

fn prove_intro_effort(_: &Event, s: &mut ParticipantSession) -> Event {
    s.prove(EffortPhase::Intro);
    Event::Ok
}

fn send_poll(_: &Event, s: &mut ParticipantSession) -> Event {
    s.send(PollMessage::poll(
        s.poll_key.clone(),
        s.poller.clone(),
        s.algorithm,
        s.state.poller_nonce.clone(),
        s.proof.clone(),
        s.vote_deadline,
        s.poll_deadline,
    ))
}

fn receive_poll_ack(event: &Event, s: &mut ParticipantSession) -> Event {
    let Some(ack) = event.as_message() else {
        return Event::error("no PollAck to receive");
    };
    if let Some(reason) = ack.nak {
        s.state.status = PeerStatus::Declined;
        return Event::error(format!("poll declined: {reason:?}"));
    }
    if ack.poller_nonce != s.state.poller_nonce {
        return Event::error("PollAck for another poller nonce");
    }
    if ack.voter_nonce.is_empty() {
        return Event::error("PollAck without a voter nonce");
    }
    s.state.voter_nonce = ack.voter_nonce.clone();
    s.ack_proof = ack.effort_proof.clone();
    s.state.status = PeerStatus::Accepted;
    Event::Ok
}

fn verify_poll_ack_effort(_: &Event, s: &mut ParticipantSession) -> Event {
    if verify_effort(
        s.algorithm,
        &s.poll_key,
        &s.state.voter_nonce,
        EffortPhase::PollAck,
        &s.ack_proof,
    ) {
        Event::Ok
    } else {
        Event::error("bad PollAck effort proof")
    }
}

fn prove_remaining_effort(_: &Event, s: &mut ParticipantSession) -> Event {
    s.prove(EffortPhase::Remaining);
    Event::Ok
}

fn send_poll_proof(_: &Event, s: &mut ParticipantSession) -> Event {
    s.send(PollMessage::poll_proof(
        s.poll_key.clone(),
        s.poller.clone(),
        s.state.voter_nonce.clone(),
        s.proof.clone(),
    ))
}

fn receive_nominate(event: &Event, s: &mut ParticipantSession) -> Event {
    let Some(nominate) = event.as_message() else {
        return Event::error("no Nominate to receive");
    };
    s.state.nominees = nominate.nominees.clone();
    Event::Ok
}

fn send_vote_request(_: &Event, s: &mut ParticipantSession) -> Event {
    s.prove(EffortPhase::VoteRequest);
    s.send(PollMessage::vote_request(
        s.poll_key.clone(),
        s.poller.clone(),
        s.proof.clone(),
    ))
}

/// The last part of a vote. Earlier parts are already in `state.vote`. A
/// vote only counts once its effort proof checks out, so a bad proof ends
/// the session before the participant is reported as voted.
fn receive_vote(event: &Event, s: &mut ParticipantSession) -> Event {
    let Some(vote) = event.as_message() else {
        return Event::error("no Vote to receive");
    };
    if vote.voter_nonce != s.state.voter_nonce {
        return Event::error("Vote under another voter nonce");
    }
    s.state.vote_proof = vote.effort_proof.clone();
    if !s.vote_proof_holds() {
        return Event::error("bad Vote effort proof");
    }
    if let Err(e) = s.state.vote.extend(vote.vote_blocks.iter().cloned()) {
        return Event::error(format!("cannot store vote: {e}"));
    }
    s.state.status = PeerStatus::Voted;
    Event::Ok
}

fn verify_vote_effort(_: &Event, s: &mut ParticipantSession) -> Event {
    if s.vote_proof_holds() {
        Event::Ok
    } else {
        Event::error("bad Vote effort proof")
    }
}

fn tally(_: &Event, s: &mut ParticipantSession) -> Event {
    s.outstanding = s.plan.repair_urls.clone();
    s.state.repair_urls = s.plan.repair_urls.clone();
    if s.outstanding.is_empty() {
        Event::RepairNotNeeded
    } else {
        Event::RepairNeeded
    }
}

fn prove_repair_effort(_: &Event, s: &mut ParticipantSession) -> Event {
    s.prove(EffortPhase::Repair);
    Event::Ok
}

fn send_repair_request(_: &Event, s: &mut ParticipantSession) -> Event {
    for url in &s.outstanding {
        let request =
            PollMessage::repair_request(s.poll_key.clone(), s.poller.clone(), url, s.proof.clone());
        if let Event::Error(reason) = s.send(request) {
            return Event::Error(reason);
        }
    }
    Event::Ok
}

fn receive_repair(event: &Event, s: &mut ParticipantSession) -> Event {
    let Some(reply) = event.as_message() else {
        return Event::error("no RepairReply to receive");
    };
    let Some(url) = reply.target_url.as_deref() else {
        return Event::error("RepairReply without a URL");
    };
    let Some(pos) = s.outstanding.iter().position(|u| u == url) else {
        return Event::error(format!("unrequested repair for {url}"));
    };
    s.outstanding.remove(pos);
    s.state.repairs_received += 1;
    let report = VoterReport::Repair {
        index: s.state.index,
        url: url.to_string(),
        content: reply.repair_data.clone(),
    };
    if s.reports.send(report).is_err() {
        return Event::error("poll no longer running");
    }
    if s.outstanding.is_empty() {
        Event::Ok
    } else {
        Event::RepairNeeded
    }
}

fn send_receipt(_: &Event, s: &mut ParticipantSession) -> Event {
    s.state.agreement_hint = s.plan.agreement_hint;
    s.state.status = PeerStatus::Complete;
    s.send(PollMessage::evaluation_receipt(
        s.poll_key.clone(),
        s.poller.clone(),
        s.plan.agreement_hint,
    ))
}

fn drop_participant(event: &Event, s: &mut ParticipantSession) -> Event {
    let reason = match event {
        Event::Error(reason) => reason.clone(),
        other => format!("failed after {other}"),
    };
    warn!(peer = %s.state.peer, %reason, "participant dropped");
    if s.state.status != PeerStatus::Declined {
        s.state.status = PeerStatus::Dropped;
    }
    s.state.error = Some(reason);
    Event::Ok
}

fn participant_registry() -> HandlerRegistry<ParticipantSession> {
    HandlerRegistry::new()
        .with(handlers::PROVE_INTRO_EFFORT, prove_intro_effort)
        .with(handlers::SEND_POLL, send_poll)
        .with(handlers::RECEIVE_POLL_ACK, receive_poll_ack)
        .with(handlers::VERIFY_POLL_ACK_EFFORT, verify_poll_ack_effort)
        .with(handlers::PROVE_REMAINING_EFFORT, prove_remaining_effort)
        .with(handlers::SEND_POLL_PROOF, send_poll_proof)
        .with(handlers::RECEIVE_NOMINATE, receive_nominate)
        .with(handlers::SEND_VOTE_REQUEST, send_vote_request)
        .with(handlers::RECEIVE_VOTE, receive_vote)
        .with(handlers::VERIFY_VOTE_EFFORT, verify_vote_effort)
        .with(handlers::TALLY, tally)
        .with(handlers::PROVE_REPAIR_EFFORT, prove_repair_effort)
        .with(handlers::SEND_REPAIR_REQUEST, send_repair_request)
        .with(handlers::RECEIVE_REPAIR, receive_repair)
        .with(handlers::SEND_RECEIPT, send_receipt)
        .with(ERROR_HANDLER, drop_participant)
}

/// Where a participant task begins.
enum TaskStart {
    /// Run the solicit machine, from a saved position when one is given.
    Solicit(Option<InterpState>),
    /// The vote was reported before a restart; go straight to settling.
    Settle,
}

struct ParticipantTask {
    session: ParticipantSession,
    inbox: mpsc::UnboundedReceiver<PollMessage>,
    plan: oneshot::Receiver<TallyPlan>,
    registry: Arc<HandlerRegistry<ParticipantSession>>,
    clock: Arc<dyn Clock>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
}

impl ParticipantTask {
    async fn run(mut self, start: TaskStart) {
        if let Err(e) = self.run_machines(start).await {
            self.fail(e.to_string());
        }
    }

    async fn run_machines(&mut self, start: TaskStart) -> Result<(), PollerError> {
        if let TaskStart::Solicit(saved) = start {
            if !self.solicit(saved).await? {
                return Ok(());
            }
        }
        self.settle().await
    }

    /// Collect the vote and report it. False when the session ended
    /// without one.
    async fn solicit(&mut self, saved: Option<InterpState>) -> Result<bool, PollerError> {
        let machine = Arc::new(poller_solicit_machine());
        let mut solicit = match saved {
            Some(saved) => {
                debug!(state = %saved.state, "solicit resumed");
                Interp::resume(machine, self.registry.clone(), &saved)?
            }
            None => {
                let mut interp = Interp::new(machine, self.registry.clone())?;
                interp.start(&mut self.session)?;
                interp
            }
        };
        self.checkpoint(&solicit);
        let vote_deadline = self.session.vote_deadline;
        self.drive(&mut solicit, vote_deadline).await?;
        if solicit.is_error() {
            let reason = solicit.last_error().unwrap_or("solicit failed").to_string();
            self.fail(reason);
            return Ok(false);
        }
        // Both vote stores clone as a handle: shared blocks or a file path.
        self.report(VoterReport::Voted {
            index: self.session.state.index,
            voter_nonce: self.session.state.voter_nonce.clone(),
            nominees: self.session.state.nominees.clone(),
            vote: self.session.state.vote.clone(),
        });
        Ok(true)
    }

    /// Wait for the tally, then request repairs and send the receipt.
    async fn settle(&mut self) -> Result<(), PollerError> {
        let remaining = self
            .session
            .poll_deadline
            .remaining_from(self.clock.now());
        self.session.plan = match timeout(remaining, &mut self.plan).await {
            Ok(Ok(plan)) => plan,
            Ok(Err(_)) => {
                self.fail("poll ended before the tally".to_string());
                return Ok(());
            }
            Err(_) => {
                self.fail("poll deadline passed before the tally".to_string());
                return Ok(());
            }
        };

        let mut settle = Interp::new(Arc::new(poller_tally_machine()), self.registry.clone())?;
        settle.start(&mut self.session)?;
        self.checkpoint(&settle);
        let poll_deadline = self.session.poll_deadline;
        self.drive(&mut settle, poll_deadline).await?;
        if settle.is_error() {
            let reason = settle.last_error().unwrap_or("settle failed").to_string();
            self.fail(reason);
        } else {
            self.report(VoterReport::Finished {
                index: self.session.state.index,
                agreement_hint: self.session.state.agreement_hint,
            });
        }
        Ok(())
    }

    /// Feed inbound messages to `interp` while it waits, injecting an error
    /// once `deadline` passes. Partial votes go straight to the vote store.
    async fn drive(
        &mut self,
        interp: &mut Interp<ParticipantSession>,
        deadline: Timestamp,
    ) -> Result<(), PollerError> {
        while interp.is_waiting() {
            let remaining = deadline.remaining_from(self.clock.now());
            let event = match timeout(remaining, self.inbox.recv()).await {
                Ok(Some(message))
                    if message.opcode == Opcode::Vote
                        && !message.vote_complete
                        && interp.accepts(EventKind::Message(Opcode::Vote)) =>
                {
                    match self.session.store_partial_vote(message) {
                        Some(event) => event,
                        None => {
                            self.checkpoint(interp);
                            continue;
                        }
                    }
                }
                Ok(Some(message)) => Event::message(message),
                // The poll is gone; leave the checkpoint as it was.
                Ok(None) => return Err(PollerError::ChannelClosed),
                Err(_) => Event::error(format!(
                    "deadline {deadline} passed in {}",
                    interp.current_state()
                )),
            };
            interp.handle_event(event, &mut self.session)?;
            self.checkpoint(interp);
        }
        Ok(())
    }

    fn checkpoint(&mut self, interp: &Interp<ParticipantSession>) {
        let Some(store) = &self.checkpoints else {
            return;
        };
        self.session.state.interp = Some(interp.snapshot());
        let key = CheckpointKey::participant(
            &self.session.poll_key,
            &self.session.state.peer,
            PARTICIPANT_STATE_KIND,
        );
        if let Err(e) = save_bean(store.as_ref(), &key, &self.session.state) {
            warn!(error = %e, "participant checkpoint failed");
        }
    }

    fn fail(&self, reason: String) {
        self.report(VoterReport::Failed {
            index: self.session.state.index,
            status: match self.session.state.status {
                PeerStatus::Declined => PeerStatus::Declined,
                _ => PeerStatus::Dropped,
            },
            reason,
        });
    }

    fn report(&self, report: VoterReport) {
        if self.session.reports.send(report).is_err() {
            debug!("poll gone, report dropped");
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Inbound routing and report collection for the aggregator.
struct Exchange {
    inbound: mpsc::UnboundedReceiver<PollMessage>,
    inbound_open: bool,
    inboxes: HashMap<PeerIdentity, mpsc::UnboundedSender<PollMessage>>,
    reports: mpsc::UnboundedReceiver<VoterReport>,
    clock: Arc<dyn Clock>,
    stats: StatsCounter,
}

const ROUTED: &str = "routed";
const KEEPALIVES: &str = "keepalives";
const OUTSIDERS: &str = "outsiders";
const LATE: &str = "late";

impl Exchange {
    /// The next report, routing inbound messages meanwhile. `None` once
    /// `deadline` passes or every voter task is gone.
    async fn next_report(&mut self, deadline: Timestamp) -> Option<VoterReport> {
        loop {
            let remaining = deadline.remaining_from(self.clock.now());
            tokio::select! {
                report = self.reports.recv() => return report,
                message = self.inbound.recv(), if self.inbound_open => match message {
                    Some(message) => self.route(message),
                    None => self.inbound_open = false,
                },
                _ = tokio::time::sleep(remaining) => return None,
            }
        }
    }

    fn route(&self, message: PollMessage) {
        if message.opcode == Opcode::NoOp {
            self.stats.increment(KEEPALIVES);
            return;
        }
        match self.inboxes.get(&message.sender) {
            Some(inbox) => {
                if inbox.send(message).is_err() {
                    self.stats.increment(LATE);
                    debug!("message for a finished participant dropped");
                } else {
                    self.stats.increment(ROUTED);
                }
            }
            None => {
                self.stats.increment(OUTSIDERS);
                debug!(from = %message.sender, opcode = %message.opcode, "message from outside the inner circle dropped");
            }
        }
    }
}

enum HashRun {
    Finished { bytes: u64 },
    Overrun { elapsed: Duration, allowance: Duration, bytes: u64 },
}

fn release_votes(participants: &mut [ParticipantState]) {
    for participant in participants {
        if let Err(e) = participant.vote.release() {
            warn!(peer = %participant.peer, error = %e, "vote release failed");
        }
    }
}

fn has_vote(participant: &ParticipantState) -> bool {
    matches!(participant.status, PeerStatus::Voted | PeerStatus::Complete)
}

fn vote_streams(
    participants: &[ParticipantState],
) -> Result<Vec<Option<Box<dyn VoteBlockStream>>>, PollerError> {
    participants
        .iter()
        .map(|p| {
            if has_vote(p) {
                Ok(Some(p.vote.stream()?))
            } else {
                Ok(None)
            }
        })
        .collect()
}

/// One poll called by this peer.
pub struct V3Poller {
    config: PollerConfig,
    deps: PollerDeps,
    state: PollState,
    cancel: Arc<AtomicBool>,
    /// Participants read back by [`V3Poller::resume`].
    restored: Option<Vec<ParticipantState>>,
}

impl V3Poller {
    pub fn new(
        config: PollerConfig,
        deps: PollerDeps,
        identity: PeerIdentity,
        poll_key: PollKey,
        inner_circle: Vec<PeerIdentity>,
    ) -> Self {
        let mut state = PollState::new(
            poll_key,
            deps.repository.au_id(),
            identity,
            config.hash_algorithm,
            deps.clock.now(),
            inner_circle,
        );
        state.quorum = config.quorum;
        state.vote_margin = config.vote_margin;
        Self {
            config,
            deps,
            state,
            cancel: Arc::new(AtomicBool::new(false)),
            restored: None,
        }
    }

    /// Rebuild a poll from the checkpoints in `deps.checkpoints`. `None`
    /// when nothing was saved for `poll_key`.
    ///
    /// Participants that had voted keep their vote. Those still being
    /// solicited continue from their saved machine state, and a
    /// participant with no checkpoint of its own is invited afresh.
    pub fn resume(
        mut config: PollerConfig,
        deps: PollerDeps,
        poll_key: &PollKey,
    ) -> Result<Option<Self>, PollerError> {
        let Some(store) = deps.checkpoints.clone() else {
            return Ok(None);
        };
        let key = CheckpointKey::poll(poll_key, POLL_STATE_KIND);
        let Some(state) = load_bean::<PollState>(store.as_ref(), &key)? else {
            return Ok(None);
        };
        let mut participants = Vec::with_capacity(state.inner_circle.len());
        for (index, peer) in state.inner_circle.iter().enumerate() {
            let key = CheckpointKey::participant(poll_key, peer, PARTICIPANT_STATE_KIND);
            let participant = match load_bean::<ParticipantState>(store.as_ref(), &key)? {
                Some(saved) => saved,
                None => ParticipantState::new(peer.clone(), index, make_nonce(config.nonce_length)?),
            };
            participants.push(participant);
        }
        info!(
            poll = %poll_key,
            status = %state.status,
            voted = participants.iter().filter(|p| has_vote(p)).count(),
            "poll restored"
        );
        config.quorum = state.quorum;
        config.vote_margin = state.vote_margin;
        config.hash_algorithm = state.hash_algorithm;
        Ok(Some(Self {
            config,
            deps,
            state,
            cancel: Arc::new(AtomicBool::new(false)),
            restored: Some(participants),
        }))
    }

    pub fn poll_key(&self) -> &PollKey {
        &self.state.poll_key
    }

    /// Setting the flag aborts the poll at its next check.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Run the poll to the end. `inbound` carries every message addressed
    /// to this poll.
    pub async fn run(
        self,
        inbound: mpsc::UnboundedReceiver<PollMessage>,
    ) -> Result<PollOutcome, PollerError> {
        let span = poll_span(self.state.poll_key.as_str(), &self.state.au_id);
        self.run_poll(inbound).instrument(span).await
    }

    async fn run_poll(
        mut self,
        inbound: mpsc::UnboundedReceiver<PollMessage>,
    ) -> Result<PollOutcome, PollerError> {
        let total_bytes = self.content_bytes()?;
        let estimate = self.config.hash_estimate(total_bytes);
        let now = self.deps.clock.now();
        let restored = self.restored.take();
        let resumed = restored.is_some();
        let schedule = if resumed {
            PollSchedule {
                estimate,
                vote_deadline: self.state.vote_deadline,
                poll_deadline: self.state.poll_deadline,
                extend: 1,
                attempts: 0,
            }
        } else {
            match schedule_poll(&self.config, self.deps.scheduler.as_ref(), now, estimate) {
                Ok(schedule) => schedule,
                Err(PollerError::CouldNotSchedule { attempts }) => {
                    warn!(attempts, bytes = total_bytes, "poll could not be scheduled");
                    return Ok(self.conclude(PollOutcome::CouldNotSchedule));
                }
                Err(e) => return Err(e),
            }
        };
        self.state.vote_deadline = schedule.vote_deadline;
        self.state.poll_deadline = schedule.poll_deadline;

        let mut participants = match restored {
            Some(participants) => participants,
            None => {
                let mut participants = Vec::with_capacity(self.state.inner_circle.len());
                for (index, peer) in self.state.inner_circle.iter().enumerate() {
                    let nonce = make_nonce(self.config.nonce_length)?;
                    participants.push(ParticipantState::new(peer.clone(), index, nonce));
                }
                participants
            }
        };
        if schedule.poll_deadline.has_passed(now) {
            warn!(deadline = %schedule.poll_deadline, "restored poll already expired");
            release_votes(&mut participants);
            return Ok(self.conclude(PollOutcome::Expired));
        }
        info!(
            voters = self.state.inner_circle.len(),
            bytes = total_bytes,
            estimate = %format_duration(estimate),
            vote_window = %format_duration(schedule.vote_deadline.remaining_from(now)),
            poll_deadline = %schedule.poll_deadline,
            resumed,
            "poll called"
        );

        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(participant_registry());
        let mut inboxes = HashMap::new();
        let mut plans = Vec::with_capacity(participants.len());
        // Dropping the set aborts every participant task with the poll.
        let mut tasks = JoinSet::new();
        for participant in participants.iter_mut() {
            let Some(start) = self.task_start(participant)? else {
                plans.push(None);
                continue;
            };
            let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
            let (plan_tx, plan_rx) = oneshot::channel();
            inboxes.insert(participant.peer.clone(), inbox_tx);
            plans.push(Some(plan_tx));
            let task = ParticipantTask {
                session: ParticipantSession {
                    state: participant.clone(),
                    poll_key: self.state.poll_key.clone(),
                    poller: self.state.poller.clone(),
                    algorithm: self.config.hash_algorithm,
                    vote_deadline: schedule.vote_deadline,
                    poll_deadline: schedule.poll_deadline,
                    transport: self.deps.transport.clone(),
                    reports: report_tx.clone(),
                    proof: Vec::new(),
                    ack_proof: Vec::new(),
                    plan: TallyPlan::default(),
                    outstanding: Vec::new(),
                },
                inbox: inbox_rx,
                plan: plan_rx,
                registry: registry.clone(),
                clock: self.deps.clock.clone(),
                checkpoints: self.deps.checkpoints.clone(),
            };
            // The aggregator waits on anyone still being solicited.
            if matches!(start, TaskStart::Solicit(_)) {
                participant.status = PeerStatus::Invited;
            }
            let span = participant_span(self.state.poll_key.as_str(), participant.peer.as_str());
            tasks.spawn(task.run(start).instrument(span));
        }
        drop(report_tx);

        let mut exchange = Exchange {
            inbound,
            inbound_open: true,
            inboxes,
            reports: report_rx,
            clock: self.deps.clock.clone(),
            stats: StatsCounter::new(&[ROUTED, KEEPALIVES, OUTSIDERS, LATE]),
        };
        self.checkpoint_poll();
        let outcome = self
            .conduct(&mut exchange, &mut participants, plans, &schedule, total_bytes)
            .await;
        tasks.abort_all();
        debug!(messages = ?exchange.stats.snapshot(), "inbound routing");
        release_votes(&mut participants);
        Ok(self.conclude(outcome?))
    }

    /// How `participant`'s task begins, or `None` when it needs no task.
    /// A participant invited afresh gets its vote store here.
    fn task_start(&self, participant: &mut ParticipantState) -> Result<Option<TaskStart>, PollerError> {
        match participant.status {
            PeerStatus::Invited | PeerStatus::Accepted => {
                let saved = participant
                    .interp
                    .take()
                    .filter(|saved| saved.machine == handlers::SOLICIT_MACHINE);
                if saved.is_none() {
                    participant.vote = self.vote_store(participant.index)?;
                }
                Ok(Some(TaskStart::Solicit(saved)))
            }
            PeerStatus::Voted => Ok(Some(TaskStart::Settle)),
            PeerStatus::Complete | PeerStatus::Declined | PeerStatus::Dropped => Ok(None),
        }
    }

    /// An empty vote store, on disk when a spill directory is configured.
    fn vote_store(&self, index: usize) -> Result<VoteBlocks, PollerError> {
        match &self.config.vote_spill_dir {
            Some(dir) => {
                let path = dir.join(format!("{}-{index}.votes", self.state.poll_key));
                Ok(VoteBlocks::on_disk(path)?)
            }
            None => Ok(VoteBlocks::in_memory()),
        }
    }

    async fn conduct(
        &mut self,
        exchange: &mut Exchange,
        participants: &mut [ParticipantState],
        mut plans: Vec<Option<oneshot::Sender<TallyPlan>>>,
        schedule: &PollSchedule,
        total_bytes: u64,
    ) -> Result<PollOutcome, PollerError> {
        self.collect_votes(exchange, participants, schedule.vote_deadline)
            .await?;
        let voted = participants.iter().filter(|p| has_vote(p)).count();
        let quorate = voted >= self.config.quorum;
        info!(voted, quorum = self.config.quorum, quorate, "voting closed");
        if self.cancelled() {
            return Ok(PollOutcome::Aborted("cancelled".to_string()));
        }

        self.state.status = PollerStatus::Hashing;
        self.checkpoint_poll();
        let pairs: Vec<(Nonce, Nonce)> = participants
            .iter()
            .map(|p| (p.poller_nonce.clone(), p.voter_nonce.clone()))
            .collect();
        let span = tally_span(self.state.poll_key.as_str(), participants.len());
        let hashed = self
            .hash_and_tally(participants, &pairs, quorate, schedule, total_bytes)
            .instrument(span)
            .await;
        let mut tally = match hashed {
            Ok(tally) => tally,
            Err(e) => return hash_failure(e),
        };

        self.state.status = PollerStatus::Tallying;
        for url in tally.repairs().deletions().to_vec() {
            match self.deps.repository.delete_url(&url) {
                Ok(()) => info!(url, "deleted block no voter holds"),
                Err(e) => warn!(url, error = %e, "delete failed"),
            }
        }

        let mut settling = BTreeSet::new();
        for (index, participant) in participants.iter().enumerate() {
            let Some(plan_tx) = plans.get_mut(index).and_then(Option::take) else {
                continue;
            };
            if !has_vote(participant) {
                continue;
            }
            let plan = TallyPlan {
                repair_urls: tally.repairs_mut().activate_for(&participant.peer),
                agreement_hint: tally.agreement_hint(index),
            };
            debug!(peer = %participant.peer, repairs = plan.repair_urls.len(), "tally plan sent");
            if plan_tx.send(plan).is_ok() {
                settling.insert(index);
            }
        }
        self.checkpoint_poll();

        while !settling.is_empty() {
            let Some(report) = exchange.next_report(schedule.poll_deadline).await else {
                break;
            };
            match report {
                VoterReport::Repair { index, url, content } => {
                    debug!(index, url, "repair received");
                    self.apply_repair(&mut tally, participants, &pairs, &url, content)?;
                }
                VoterReport::Finished {
                    index,
                    agreement_hint,
                } => {
                    if let Some(p) = participants.get_mut(index) {
                        p.status = PeerStatus::Complete;
                        p.agreement_hint = agreement_hint;
                    }
                    settling.remove(&index);
                }
                VoterReport::Failed {
                    index,
                    status,
                    reason,
                } => {
                    if let Some(p) = participants.get_mut(index) {
                        p.status = status;
                        p.error = Some(reason);
                    }
                    settling.remove(&index);
                }
                VoterReport::Voted { index, .. } => debug!(index, "late vote ignored"),
            }
        }

        let unsettled: Vec<String> = tally
            .repairs()
            .active()
            .iter()
            .chain(tally.repairs().pending())
            .map(|r| r.url.clone())
            .collect();
        for url in unsettled {
            warn!(url, "repair never arrived");
            tally.repair_failed(&url);
        }

        let summary = tally.summary(voted, self.state.bytes_hashed);
        self.state.tally_status = tally.status().clone();
        self.state.repair_queue = tally.repairs().clone();
        self.state.participant_tallies = tally.participant_tallies().clone();
        self.state.block_errors = tally.block_errors();
        Ok(if quorate {
            PollOutcome::Complete(summary)
        } else {
            PollOutcome::NoQuorum(summary)
        })
    }

    async fn collect_votes(
        &mut self,
        exchange: &mut Exchange,
        participants: &mut [ParticipantState],
        deadline: Timestamp,
    ) -> Result<(), PollerError> {
        while participants.iter().any(|p| p.status == PeerStatus::Invited) {
            let Some(report) = exchange.next_report(deadline).await else {
                break;
            };
            match report {
                VoterReport::Voted {
                    index,
                    voter_nonce,
                    nominees,
                    vote,
                } => {
                    if let Some(p) = participants.get_mut(index) {
                        info!(
                            peer = %p.peer,
                            nonce = %hex::encode(voter_nonce.as_bytes()),
                            blocks = vote.len(),
                            nominees = nominees.len(),
                            "vote received"
                        );
                        p.voter_nonce = voter_nonce;
                        p.nominees = nominees;
                        p.vote = vote;
                        p.status = PeerStatus::Voted;
                    }
                }
                VoterReport::Failed {
                    index,
                    status,
                    reason,
                } => {
                    if let Some(p) = participants.get_mut(index) {
                        info!(peer = %p.peer, %reason, "no vote");
                        p.status = status;
                        p.error = Some(reason);
                    }
                }
                other => debug!(report = ?other, "report before the tally ignored"),
            }
        }
        for p in participants.iter_mut() {
            if p.status == PeerStatus::Invited {
                p.status = PeerStatus::Dropped;
                p.error = Some("no vote before the deadline".to_string());
            }
        }
        Ok(())
    }

    async fn hash_and_tally(
        &mut self,
        participants: &[ParticipantState],
        pairs: &[(Nonce, Nonce)],
        quorate: bool,
        schedule: &PollSchedule,
        total_bytes: u64,
    ) -> Result<PollTally, PollerError> {
        let mut estimate = schedule.estimate;
        let mut rescheduled = false;
        loop {
            let mut tally = PollTally::new(
                &self.config,
                self.state.inner_circle.clone(),
                vote_streams(participants)?,
                quorate,
            );
            if let Some(metrics) = &self.deps.metrics {
                tally = tally.with_metrics(metrics.clone());
            }
            let allowance = self.config.hash_allowance(estimate).max(MIN_HASH_ALLOWANCE);
            let span = hash_span(self.state.poll_key.as_str(), total_bytes);
            let run = self
                .hash_once(&mut tally, pairs, allowance)
                .instrument(span)
                .await?;
            match run {
                HashRun::Finished { bytes } => {
                    tally.finish()?;
                    self.state.bytes_hashed = bytes;
                    self.state.block_errors = tally.block_errors();
                    return Ok(tally);
                }
                HashRun::Overrun {
                    elapsed,
                    allowance,
                    bytes,
                } => {
                    let observed = observed_estimate(elapsed, bytes, total_bytes);
                    let now = self.deps.clock.now();
                    let fits = self.deps.scheduler.is_task_schedulable(
                        now,
                        self.state.poll_deadline,
                        observed,
                    );
                    if rescheduled || !fits {
                        return Err(PollerError::HashOverrun {
                            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                            allowed_ms: u64::try_from(allowance.as_millis()).unwrap_or(u64::MAX),
                        });
                    }
                    warn!(
                        elapsed = %format_duration(elapsed),
                        hashed = bytes,
                        observed = %format_duration(observed),
                        "hash overran its estimate, rescheduling"
                    );
                    estimate = observed;
                    rescheduled = true;
                }
            }
        }
    }

    async fn hash_once(
        &self,
        tally: &mut PollTally,
        pairs: &[(Nonce, Nonce)],
        allowance: Duration,
    ) -> Result<HashRun, PollerError> {
        let mut hasher = BlockHasher::new(
            self.deps.repository.clone(),
            self.config.hash_algorithm,
            pairs.to_vec(),
            self.config.hash_step_bytes,
        )?
        .with_cancel(self.cancel.clone())
        .with_deadline(self.state.poll_deadline, self.deps.clock.clone());
        let guard = OverrunGuard::new(allowance);
        loop {
            if guard.check().is_err() {
                return Ok(HashRun::Overrun {
                    elapsed: guard.elapsed(),
                    allowance,
                    bytes: hasher.bytes_hashed(),
                });
            }
            match hasher.step()? {
                HashStep::Progress(_) => tokio::task::yield_now().await,
                HashStep::Block(block) => tally.block_done(&block)?,
                HashStep::Done => {
                    return Ok(HashRun::Finished {
                        bytes: hasher.bytes_hashed(),
                    })
                }
            }
        }
    }

    /// Store a repair, re-hash the URL and re-tally it.
    fn apply_repair(
        &self,
        tally: &mut PollTally,
        participants: &[ParticipantState],
        pairs: &[(Nonce, Nonce)],
        url: &str,
        content: Option<Vec<u8>>,
    ) -> Result<(), PollerError> {
        let Some(content) = content else {
            info!(url, "repairer sent no content");
            tally.repair_failed(url);
            return Ok(());
        };
        if let Err(e) = self.deps.repository.store_repair(url, content) {
            warn!(url, error = %e, "storing repair failed");
            tally.repair_failed(url);
            return Ok(());
        }
        let mut hasher = BlockHasher::for_urls(
            self.deps.repository.clone(),
            self.config.hash_algorithm,
            pairs.to_vec(),
            self.config.hash_step_bytes,
            vec![url.to_string()],
        );
        let Some(block) = hasher.hash_all()?.into_iter().next() else {
            tally.repair_failed(url);
            return Ok(());
        };
        let result = tally.retally_repair(&block, vote_streams(participants)?)?;
        info!(url, result = ?result, "repair applied");
        Ok(())
    }

    fn content_bytes(&self) -> Result<u64, PollerError> {
        let repository = &self.deps.repository;
        let mut total = 0u64;
        for url in repository.urls()? {
            for version in 0..repository.version_count(&url)? {
                total = total.saturating_add(repository.version_len(&url, version)?);
            }
        }
        Ok(total)
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn checkpoint_poll(&self) {
        let Some(store) = &self.deps.checkpoints else {
            return;
        };
        let key = CheckpointKey::poll(&self.state.poll_key, POLL_STATE_KIND);
        if let Err(e) = save_bean(store.as_ref(), &key, &self.state) {
            warn!(error = %e, "poll checkpoint failed");
        }
    }

    fn conclude(&mut self, outcome: PollOutcome) -> PollOutcome {
        self.state.status = outcome.status();
        if let Some(metrics) = &self.deps.metrics {
            metrics.record_outcome(&outcome);
        }
        if let Some(store) = &self.deps.checkpoints {
            if let Err(e) = store.remove_poll(&self.state.poll_key) {
                warn!(error = %e, "removing poll checkpoints failed");
            }
        }
        match outcome.summary() {
            Some(summary) => info!(
                status = %outcome.status(),
                agreed = summary.agreed,
                disagreed = summary.disagreed,
                repairs = summary.repairs_completed,
                "poll finished"
            ),
            None => info!(status = %outcome.status(), "poll finished"),
        }
        outcome
    }
}

/// Map a failed hashing pass to how the poll ends. Local corruption and
/// infrastructure faults stay errors.
fn hash_failure(error: PollerError) -> Result<PollOutcome, PollerError> {
    match error {
        PollerError::DeadlinePassed(reason) => {
            warn!(%reason, "poll expired while hashing");
            Ok(PollOutcome::Expired)
        }
        PollerError::Cancelled => Ok(PollOutcome::Aborted("cancelled".to_string())),
        e @ (PollerError::HashOverrun { .. } | PollerError::TooManyBlockErrors { .. }) => {
            warn!(error = %e, "poll aborted");
            Ok(PollOutcome::Aborted(e.to_string()))
        }
        other => Err(other),
    }
}
