//! Shared utilities for replica audit polls.

pub mod logging;
pub mod spans;
pub mod stats;
pub mod time;

pub use logging::{init_logging, try_init_logging, LogFormat};
pub use stats::StatsCounter;
pub use time::format_duration;
