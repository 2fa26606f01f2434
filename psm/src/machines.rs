//! The poller and voter protocol machines.
//!
//! A poller runs [`poller_solicit_machine`] once per voter to collect its
//! vote, then [`poller_tally_machine`] for the same voter once the poll has
//! been tallied. A voter runs [`voter_machine`] for each poll it joins.

use audit_messages::Opcode;

use crate::event::EventKind;
use crate::machine::{Machine, State};

const OK: EventKind = EventKind::Ok;

pub mod poller {
    pub const SOLICIT_MACHINE: &str = "poller-solicit";
    pub const TALLY_MACHINE: &str = "poller-tally";

    pub const PROVE_INTRO_EFFORT: &str = "proveIntroEffort";
    pub const SEND_POLL: &str = "sendPoll";
    pub const RECEIVE_POLL_ACK: &str = "receivePollAck";
    pub const VERIFY_POLL_ACK_EFFORT: &str = "verifyPollAckEffort";
    pub const PROVE_REMAINING_EFFORT: &str = "proveRemainingEffort";
    pub const SEND_POLL_PROOF: &str = "sendPollProof";
    pub const RECEIVE_NOMINATE: &str = "receiveNominate";
    pub const SEND_VOTE_REQUEST: &str = "sendVoteRequest";
    pub const RECEIVE_VOTE: &str = "receiveVote";

    pub const VERIFY_VOTE_EFFORT: &str = "verifyVoteEffort";
    pub const TALLY: &str = "tally";
    pub const PROVE_REPAIR_EFFORT: &str = "proveRepairEffort";
    pub const SEND_REPAIR_REQUEST: &str = "sendRepairRequest";
    pub const RECEIVE_REPAIR: &str = "receiveRepair";
    pub const SEND_RECEIPT: &str = "sendReceipt";
}

pub mod voter {
    pub const MACHINE: &str = "voter";

    pub const VERIFY_POLL_EFFORT: &str = "verifyPollEffort";
    pub const PROVE_POLL_ACK: &str = "provePollAck";
    pub const SEND_POLL_ACK: &str = "sendPollAck";
    pub const RECEIVE_POLL_PROOF: &str = "receivePollProof";
    pub const VERIFY_POLL_PROOF: &str = "verifyPollProof";
    pub const SEND_NOMINATE: &str = "sendNominate";
    pub const GENERATE_VOTE: &str = "generateVote";
    pub const RECEIVE_VOTE_REQUEST: &str = "receiveVoteRequest";
    pub const SEND_VOTE: &str = "sendVote";
    pub const RECEIVE_REPAIR_REQUEST: &str = "receiveRepairRequest";
    pub const SEND_REPAIR: &str = "sendRepair";
    pub const RECEIVE_RECEIPT: &str = "receiveReceipt";
    pub const PROCESS_RECEIPT: &str = "processReceipt";
}

fn on_msg(state: State, opcode: Opcode, next: &'static str) -> State {
    state.on(EventKind::Message(opcode), next)
}

/// Invite one voter and collect its vote.
pub fn poller_solicit_machine() -> Machine {
    use poller::*;
    Machine::new(
        SOLICIT_MACHINE,
        "Initialize",
        vec![
            State::initial("Initialize").on(OK, "ProveIntroEffort"),
            State::normal("ProveIntroEffort", PROVE_INTRO_EFFORT).on(OK, "SendPoll"),
            State::normal("SendPoll", SEND_POLL).on(OK, "WaitPollAck"),
            on_msg(State::wait("WaitPollAck"), Opcode::PollAck, "ReceivePollAck"),
            State::normal("ReceivePollAck", RECEIVE_POLL_ACK).on(OK, "VerifyPollAckEffort"),
            State::normal("VerifyPollAckEffort", VERIFY_POLL_ACK_EFFORT).on(OK, "ProveRemainingEffort"),
            State::normal("ProveRemainingEffort", PROVE_REMAINING_EFFORT).on(OK, "SendPollProof"),
            State::normal("SendPollProof", SEND_POLL_PROOF).on(OK, "WaitNominate"),
            on_msg(State::wait("WaitNominate"), Opcode::Nominate, "ReceiveNominate"),
            State::normal("ReceiveNominate", RECEIVE_NOMINATE).on(OK, "SendVoteRequest"),
            State::normal("SendVoteRequest", SEND_VOTE_REQUEST).on(OK, "WaitVote"),
            on_msg(State::wait("WaitVote"), Opcode::Vote, "ReceiveVote"),
            State::normal("ReceiveVote", RECEIVE_VOTE).on(OK, "Voted"),
            State::final_state("Voted"),
        ],
    )
}

/// Settle with one voter after the tally: request repairs if needed,
/// then send the receipt.
pub fn poller_tally_machine() -> Machine {
    use poller::*;
    Machine::new(
        TALLY_MACHINE,
        "Initialize",
        vec![
            State::initial("Initialize").on(OK, "VerifyVoteEffort"),
            State::normal("VerifyVoteEffort", VERIFY_VOTE_EFFORT).on(OK, "Tally"),
            State::normal("Tally", TALLY)
                .on(EventKind::RepairNeeded, "ProveRepairEffort")
                .on(EventKind::RepairNotNeeded, "SendReceipt"),
            State::normal("ProveRepairEffort", PROVE_REPAIR_EFFORT).on(OK, "SendRepairRequest"),
            State::normal("SendRepairRequest", SEND_REPAIR_REQUEST).on(OK, "WaitRepair"),
            on_msg(State::wait("WaitRepair"), Opcode::RepairReply, "ReceiveRepair"),
            State::normal("ReceiveRepair", RECEIVE_REPAIR)
                .on(EventKind::RepairNeeded, "WaitRepair")
                .on(OK, "SendReceipt"),
            State::normal("SendReceipt", SEND_RECEIPT).on(OK, "Complete"),
            State::final_state("Complete"),
        ],
    )
}

pub fn voter_machine() -> Machine {
    use voter::*;
    Machine::new(
        MACHINE,
        "Initialize",
        vec![
            State::initial("Initialize").on(OK, "VerifyPollEffort"),
            State::normal("VerifyPollEffort", VERIFY_POLL_EFFORT).on(OK, "ProvePollAck"),
            State::normal("ProvePollAck", PROVE_POLL_ACK).on(OK, "SendPollAck"),
            State::normal("SendPollAck", SEND_POLL_ACK).on(OK, "WaitPollProof"),
            on_msg(State::wait("WaitPollProof"), Opcode::PollProof, "ReceivePollProof"),
            State::normal("ReceivePollProof", RECEIVE_POLL_PROOF).on(OK, "VerifyPollProof"),
            State::normal("VerifyPollProof", VERIFY_POLL_PROOF).on(OK, "SendNominate"),
            State::normal("SendNominate", SEND_NOMINATE).on(OK, "GenerateVote"),
            State::normal("GenerateVote", GENERATE_VOTE).on(OK, "WaitVoteRequest"),
            on_msg(State::wait("WaitVoteRequest"), Opcode::VoteRequest, "ReceiveVoteRequest"),
            State::normal("ReceiveVoteRequest", RECEIVE_VOTE_REQUEST).on(OK, "SendVote"),
            State::normal("SendVote", SEND_VOTE).on(OK, "WaitReceiptOrRepairRequest"),
            on_msg(
                on_msg(
                    State::wait("WaitReceiptOrRepairRequest"),
                    Opcode::RepairRequest,
                    "ReceiveRepairRequest",
                ),
                Opcode::EvaluationReceipt,
                "ReceiveReceipt",
            ),
            State::normal("ReceiveRepairRequest", RECEIVE_REPAIR_REQUEST).on(OK, "SendRepair"),
            State::normal("SendRepair", SEND_REPAIR).on(OK, "WaitReceiptOrRepairRequest"),
            State::normal("ReceiveReceipt", RECEIVE_RECEIPT).on(OK, "ProcessReceipt"),
            State::normal("ProcessReceipt", PROCESS_RECEIPT).on(OK, "Complete"),
            State::final_state("Complete"),
        ],
    )
}
