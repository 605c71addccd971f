//! cmdrelay Server Library
//!
//! Exposes a spawned process's stdin and stdout over TCP, one process per
//! connection:
//! - Process spawning with stderr merged into stdout
//! - Bidirectional relay with replacement rules on process output
//! - TCP listener running one relay session per connection

pub mod listener;
pub mod process;
pub mod relay;

pub use listener::Listener;
pub use relay::{Relay, SessionError, SessionSummary};
