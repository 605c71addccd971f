//! Bidirectional relay between a network connection and a process.

pub mod pump;
pub mod session;

pub use pump::{Direction, PumpEnd};
pub use session::{Relay, SessionError, SessionSummary, forward};
