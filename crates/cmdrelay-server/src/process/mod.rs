//! Process management for relay sessions.

pub mod spawner;

pub use spawner::{ProcessOutput, ProcessSpawner, SpawnError, SpawnedProcess, terminate};
