//! `cmdrelay` Core Library
//!
//! Shared functionality for the `cmdrelay` server:
//! - Configuration resolution and hierarchy
//! - Literal byte replacement rules applied to process output
//! - Common error types
//! - Tracing initialisation

pub mod config;
pub mod error;
pub mod replace;
pub mod tracing_init;

pub use config::{Config, DEFAULT_READ_SIZE, IgnoredEnvVar, LoadedConfig};
pub use error::{Error, Result};
pub use replace::{ReplacementRule, ReplacementTable};
