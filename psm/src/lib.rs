//! Table-driven protocol state machines.
//!
//! A [`Machine`] maps `(state, event kind)` to a next state; each state may
//! name an entry handler. An [`Interp`] walks a machine for one session,
//! looking handlers up in a [`HandlerRegistry`] and threading an explicit
//! session context through every call. A handler returns the next event:
//! [`Event::Ok`] advances along the happy path, [`Event::Error`] ends in the
//! error state, and branch tags pick between alternatives.

pub mod error;
pub mod event;
pub mod interp;
pub mod machine;
pub mod machines;
pub mod registry;

pub use error::PsmError;
pub use event::{Event, EventKind};
pub use interp::{Interp, InterpState};
pub use machine::{Machine, State, StateKind, ERROR_HANDLER, ERROR_STATE};
pub use machines::{poller_solicit_machine, poller_tally_machine, voter_machine};
pub use registry::{Handler, HandlerRegistry};
