//! Runs a [`Machine`] against a session context.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::event::{Event, EventKind};
use crate::machine::{Machine, State, StateKind, ERROR_STATE};
use crate::registry::HandlerRegistry;
use crate::PsmError;

/// Serializable position of an interpreter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpState {
    pub machine: String,
    pub state: String,
}

pub struct Interp<C> {
    machine: Arc<Machine>,
    registry: Arc<HandlerRegistry<C>>,
    current: &'static str,
    last_error: Option<String>,
}

impl<C> Interp<C> {
    /// Fails if the machine is malformed or a handler it names is missing.
    pub fn new(machine: Arc<Machine>, registry: Arc<HandlerRegistry<C>>) -> Result<Self, PsmError> {
        machine.validate()?;
        if let Some(missing) = machine
            .handler_names()
            .into_iter()
            .find(|name| !registry.contains(name))
        {
            return Err(PsmError::UnknownHandler(missing.to_string()));
        }
        let current = machine.initial();
        Ok(Self {
            machine,
            registry,
            current,
            last_error: None,
        })
    }

    /// Rebuild an interpreter parked at a checkpointed state.
    pub fn resume(
        machine: Arc<Machine>,
        registry: Arc<HandlerRegistry<C>>,
        saved: &InterpState,
    ) -> Result<Self, PsmError> {
        if saved.machine != machine.name() {
            return Err(PsmError::MachineMismatch {
                expected: machine.name().to_string(),
                found: saved.machine.clone(),
            });
        }
        let current = machine
            .state(&saved.state)
            .map(State::name)
            .ok_or_else(|| PsmError::UnknownState {
                machine: machine.name().to_string(),
                state: saved.state.clone(),
            })?;
        let mut interp = Self::new(machine, registry)?;
        interp.current = current;
        Ok(interp)
    }

    pub fn snapshot(&self) -> InterpState {
        InterpState {
            machine: self.machine.name().to_string(),
            state: self.current.to_string(),
        }
    }

    pub fn current_state(&self) -> &'static str {
        self.current
    }

    fn state(&self) -> Result<&State, PsmError> {
        self.machine
            .state(self.current)
            .ok_or_else(|| PsmError::UnknownState {
                machine: self.machine.name().to_string(),
                state: self.current.to_string(),
            })
    }

    pub fn is_waiting(&self) -> bool {
        self.state().is_ok_and(|s| s.kind() == StateKind::Wait)
    }

    pub fn is_final_state(&self) -> bool {
        self.state().is_ok_and(|s| s.kind() == StateKind::Final)
    }

    pub fn is_error(&self) -> bool {
        self.current == ERROR_STATE
    }

    /// Reason carried by the error event that ended the machine, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Leave the initial state.
    pub fn start(&mut self, ctx: &mut C) -> Result<(), PsmError> {
        self.handle_event(Event::Ok, ctx)
    }

    /// Process `event` and every event the handlers return, stopping in a
    /// wait or final state.
    pub fn handle_event(&mut self, event: Event, ctx: &mut C) -> Result<(), PsmError> {
        let mut pending = Some(event);
        while let Some(event) = pending.take() {
            let state = self.state()?;
            if state.kind() == StateKind::Final {
                debug!(machine = self.machine.name(), state = self.current, %event, "event after final state ignored");
                return Ok(());
            }
            let kind = event.kind();
            let next = match state.next_for(kind) {
                Some(next) => next,
                None => {
                    let reason = format!("unexpected {event} in {}", self.current);
                    warn!(machine = self.machine.name(), state = self.current, %event, "unexpected event");
                    pending = Some(Event::Error(reason));
                    continue;
                }
            };
            if let Event::Error(reason) = &event {
                self.last_error = Some(reason.clone());
            }
            let target = self
                .machine
                .state(next)
                .ok_or_else(|| PsmError::UnknownState {
                    machine: self.machine.name().to_string(),
                    state: next.to_string(),
                })?;
            trace!(machine = self.machine.name(), from = self.current, to = next, %event, "transition");
            self.current = target.name();
            if let Some(entry) = target.entry() {
                let handler = self
                    .registry
                    .get(entry)
                    .ok_or_else(|| PsmError::UnknownHandler(entry.to_string()))?;
                let result = handler(&event, ctx);
                if target.kind() != StateKind::Final {
                    pending = Some(result);
                }
            }
        }
        Ok(())
    }

    /// Whether a message with this opcode would be accepted right now.
    pub fn accepts(&self, kind: EventKind) -> bool {
        self.state()
            .is_ok_and(|s| s.kind() != StateKind::Final && kind != EventKind::Error && s.next_for(kind).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_messages::{Opcode, PollMessage};
    use audit_types::{PeerIdentity, PollKey};

    type Trace = Vec<&'static str>;

    fn machine() -> Arc<Machine> {
        Arc::new(Machine::new(
            "ping",
            "Init",
            vec![
                State::initial("Init").on(EventKind::Ok, "Send"),
                State::normal("Send", "send").on(EventKind::Ok, "Wait"),
                State::wait("Wait").on(EventKind::Message(Opcode::PollAck), "Receive"),
                State::normal("Receive", "receive").on(EventKind::Ok, "Done"),
                State::final_state("Done"),
            ],
        ))
    }

    fn registry() -> HandlerRegistry<Trace> {
        HandlerRegistry::new()
            .with("send", |_, t: &mut Trace| {
                t.push("send");
                Event::Ok
            })
            .with("receive", |_, t: &mut Trace| {
                t.push("receive");
                Event::Ok
            })
            .with("error", |_, t: &mut Trace| {
                t.push("error");
                Event::Ok
            })
    }

    fn msg(op: Opcode) -> Event {
        Event::message(PollMessage::new(op, PollKey::new("k"), PeerIdentity::new("p")))
    }

    #[test]
    fn runs_to_wait_then_final() {
        let mut trace = Trace::new();
        let mut interp = Interp::new(machine(), Arc::new(registry())).unwrap();
        interp.start(&mut trace).unwrap();
        assert!(interp.is_waiting());
        assert_eq!(interp.current_state(), "Wait");
        interp.handle_event(msg(Opcode::PollAck), &mut trace).unwrap();
        assert!(interp.is_final_state());
        assert!(!interp.is_error());
        assert_eq!(trace, vec!["send", "receive"]);
    }

    #[test]
    fn unexpected_message_in_wait_is_an_error() {
        let mut trace = Trace::new();
        let mut interp = Interp::new(machine(), Arc::new(registry())).unwrap();
        interp.start(&mut trace).unwrap();
        interp.handle_event(msg(Opcode::Vote), &mut trace).unwrap();
        assert!(interp.is_error());
        assert!(interp.is_final_state());
        assert!(interp.last_error().unwrap().contains("unexpected"));
        assert_eq!(trace, vec!["send", "error"]);
    }

    #[test]
    fn handler_error_ends_in_error_state() {
        let mut trace = Trace::new();
        let reg = registry().with("send", |_, _t: &mut Trace| Event::error("boom"));
        let mut interp = Interp::new(machine(), Arc::new(reg)).unwrap();
        interp.start(&mut trace).unwrap();
        assert!(interp.is_error());
        assert_eq!(interp.last_error(), Some("boom"));
        assert_eq!(trace, vec!["error"]);
        // Events after the end are ignored.
        interp.handle_event(msg(Opcode::PollAck), &mut trace).unwrap();
        assert_eq!(trace, vec!["error"]);
    }

    #[test]
    fn missing_handler_is_rejected() {
        let reg: HandlerRegistry<Trace> = HandlerRegistry::new().with("send", |_, _| Event::Ok);
        assert!(matches!(
            Interp::new(machine(), Arc::new(reg)),
            Err(PsmError::UnknownHandler(_))
        ));
    }

    #[test]
    fn snapshot_and_resume() {
        let mut trace = Trace::new();
        let registry = Arc::new(registry());
        let mut interp = Interp::new(machine(), registry.clone()).unwrap();
        interp.start(&mut trace).unwrap();
        let saved = interp.snapshot();
        let json = serde_json::to_string(&saved).unwrap();
        let restored: InterpState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, saved);

        let mut resumed = Interp::resume(machine(), registry, &restored).unwrap();
        assert!(resumed.is_waiting());
        resumed.handle_event(msg(Opcode::PollAck), &mut trace).unwrap();
        assert!(resumed.is_final_state());
    }

    #[test]
    fn resume_rejects_foreign_checkpoints() {
        let registry = Arc::new(registry());
        let wrong_machine = InterpState {
            machine: "other".into(),
            state: "Wait".into(),
        };
        assert!(matches!(
            Interp::resume(machine(), registry.clone(), &wrong_machine),
            Err(PsmError::MachineMismatch { .. })
        ));
        let wrong_state = InterpState {
            machine: "ping".into(),
            state: "Nope".into(),
        };
        assert!(matches!(
            Interp::resume(machine(), registry, &wrong_state),
            Err(PsmError::UnknownState { .. })
        ));
    }

    #[test]
    fn accepts_reports_wait_state_messages() {
        let mut trace = Trace::new();
        let mut interp = Interp::new(machine(), Arc::new(registry())).unwrap();
        interp.start(&mut trace).unwrap();
        assert!(interp.accepts(EventKind::Message(Opcode::PollAck)));
        assert!(!interp.accepts(EventKind::Message(Opcode::Vote)));
    }
}
