//! Static description of a protocol state machine.

use std::collections::BTreeMap;

use crate::event::EventKind;
use crate::PsmError;

/// Name of the implicit error state present in every machine.
pub const ERROR_STATE: &str = "Error";
/// Entry handler of the error state.
pub const ERROR_HANDLER: &str = "error";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateKind {
    /// Runs its entry handler and moves on.
    Normal,
    /// Parks until a message arrives.
    Wait,
    /// Terminal.
    Final,
}

#[derive(Clone, Debug)]
pub struct State {
    name: &'static str,
    kind: StateKind,
    entry: Option<&'static str>,
    transitions: BTreeMap<EventKind, &'static str>,
}

impl State {
    pub fn normal(name: &'static str, entry: &'static str) -> Self {
        Self::with_kind(name, StateKind::Normal, Some(entry))
    }

    pub fn wait(name: &'static str) -> Self {
        Self::with_kind(name, StateKind::Wait, None)
    }

    pub fn final_state(name: &'static str) -> Self {
        Self::with_kind(name, StateKind::Final, None)
    }

    /// A normal state with no entry handler; only the initial state.
    pub fn initial(name: &'static str) -> Self {
        Self::with_kind(name, StateKind::Normal, None)
    }

    fn with_kind(name: &'static str, kind: StateKind, entry: Option<&'static str>) -> Self {
        Self {
            name,
            kind,
            entry,
            transitions: BTreeMap::new(),
        }
    }

    /// On `event`, go to `next` and run its entry handler.
    pub fn on(mut self, event: EventKind, next: &'static str) -> Self {
        self.transitions.insert(event, next);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }

    pub fn entry(&self) -> Option<&'static str> {
        self.entry
    }

    /// Target for `event`. Error events always lead to the error state.
    pub fn next_for(&self, event: EventKind) -> Option<&'static str> {
        match self.transitions.get(&event) {
            Some(next) => Some(next),
            None if event == EventKind::Error => Some(ERROR_STATE),
            None => None,
        }
    }
}

/// A named set of states with an initial state.
#[derive(Clone, Debug)]
pub struct Machine {
    name: &'static str,
    initial: &'static str,
    states: BTreeMap<&'static str, State>,
}

impl Machine {
    /// The error state is added automatically.
    pub fn new(name: &'static str, initial: &'static str, states: Vec<State>) -> Self {
        let mut map: BTreeMap<&'static str, State> =
            states.into_iter().map(|s| (s.name, s)).collect();
        map.entry(ERROR_STATE).or_insert_with(|| {
            State::with_kind(ERROR_STATE, StateKind::Final, Some(ERROR_HANDLER))
        });
        Self {
            name,
            initial,
            states: map,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn initial(&self) -> &'static str {
        self.initial
    }

    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.get(name)
    }

    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.states.values()
    }

    /// Every handler named by an entry.
    pub fn handler_names(&self) -> Vec<&'static str> {
        self.states.values().filter_map(|s| s.entry).collect()
    }

    fn invalid(&self, reason: String) -> PsmError {
        PsmError::InvalidMachine {
            machine: self.name.to_string(),
            reason,
        }
    }

    /// Check that every transition leads to a known state, that normal
    /// states other than the initial one have an entry handler, and that
    /// final states have no way out.
    pub fn validate(&self) -> Result<(), PsmError> {
        if !self.states.contains_key(self.initial) {
            return Err(self.invalid(format!("initial state {} missing", self.initial)));
        }
        for state in self.states.values() {
            for next in state.transitions.values() {
                if !self.states.contains_key(next) {
                    return Err(self.invalid(format!("{} leads to unknown {next}", state.name)));
                }
            }
            match state.kind {
                StateKind::Normal if state.entry.is_none() && state.name != self.initial => {
                    return Err(self.invalid(format!("{} has no entry handler", state.name)));
                }
                StateKind::Final if !state.transitions.is_empty() => {
                    return Err(self.invalid(format!("final state {} has transitions", state.name)));
                }
                StateKind::Wait if state.entry.is_some() => {
                    return Err(self.invalid(format!("wait state {} has an entry handler", state.name)));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_state_is_implicit() {
        let m = Machine::new(
            "m",
            "Init",
            vec![
                State::initial("Init").on(EventKind::Ok, "Done"),
                State::final_state("Done"),
            ],
        );
        m.validate().unwrap();
        let error = m.state(ERROR_STATE).unwrap();
        assert_eq!(error.kind(), StateKind::Final);
        assert_eq!(error.entry(), Some(ERROR_HANDLER));
        assert_eq!(m.state("Init").unwrap().next_for(EventKind::Error), Some(ERROR_STATE));
        assert_eq!(m.state("Init").unwrap().next_for(EventKind::RepairNeeded), None);
    }

    #[test]
    fn dangling_transition_is_invalid() {
        let m = Machine::new("m", "Init", vec![State::initial("Init").on(EventKind::Ok, "Nowhere")]);
        assert!(matches!(m.validate(), Err(PsmError::InvalidMachine { .. })));
    }

    #[test]
    fn missing_initial_is_invalid() {
        let m = Machine::new("m", "Init", vec![State::final_state("Done")]);
        assert!(m.validate().is_err());
    }
}
