//! Configuration resolution for cmdrelay.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/cmdrelay/settings.json`)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::replace::{ReplacementRule, ReplacementTable};

/// Default chunk size for a single read on either side of a session.
pub const DEFAULT_READ_SIZE: usize = 4096;

/// Complete cmdrelay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the listener binds to.
    pub listen: SocketAddr,
    /// Program path followed by its arguments.
    pub command: Vec<String>,
    /// Rules applied, in order, to everything the process writes.
    pub replacements: Vec<ReplacementRule>,
    /// Bytes requested per read.
    pub read_size: usize,
    /// Grace period for the process to exit after its stdin is closed.
    pub terminate_timeout_secs: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 4444)),
            command: Vec::new(),
            replacements: Vec::new(),
            read_size: DEFAULT_READ_SIZE,
            terminate_timeout_secs: 5,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.command.is_empty() || self.command[0].is_empty() {
            return Err(Error::Config("command must not be empty".to_string()));
        }
        if self.read_size == 0 {
            return Err(Error::Config("read_size must be greater than zero".to_string()));
        }
        if let Some(rule) = self.replacements.iter().find(|r| r.pattern().is_empty()) {
            return Err(Error::Config(format!(
                "replacement rule {rule:?} has an empty pattern"
            )));
        }
        Ok(())
    }

    pub fn replacement_table(&self) -> ReplacementTable {
        ReplacementTable::new(self.replacements.clone())
    }

    pub const fn terminate_timeout(&self) -> Duration {
        Duration::from_secs(self.terminate_timeout_secs)
    }
}

/// On-disk settings. Every field is optional so a file only overrides
/// what it names.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    listen: Option<SocketAddr>,
    command: Option<Vec<String>>,
    replacements: Option<Vec<ReplacementRule>>,
    read_size: Option<usize>,
    terminate_timeout_secs: Option<u64>,
    log_level: Option<String>,
}

/// An environment override whose value could not be parsed.
///
/// Returned instead of logged because configuration is resolved before the
/// tracing subscriber exists; the binary reports these once logging is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredEnvVar {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

/// Configuration plus the environment values that were ignored while
/// resolving it.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub ignored_env: Vec<IgnoredEnvVar>,
}

/// Load configuration with hierarchical resolution.
///
/// A missing global file is skipped; a missing explicit file is an error.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            merge_config(&mut config, load_config_file(&global_path)?);
        }
    }

    if let Some(path) = explicit {
        merge_config(&mut config, load_config_file(path)?);
    }

    let ignored_env = apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(LoadedConfig {
        config,
        ignored_env,
    })
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("cmdrelay").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: ConfigFile) {
    if let Some(listen) = overlay.listen {
        base.listen = listen;
    }
    if let Some(command) = overlay.command {
        base.command = command;
    }
    if let Some(replacements) = overlay.replacements {
        base.replacements = replacements;
    }
    if let Some(read_size) = overlay.read_size {
        base.read_size = read_size;
    }
    if let Some(secs) = overlay.terminate_timeout_secs {
        base.terminate_timeout_secs = secs;
    }
    if let Some(level) = overlay.log_level {
        base.log_level = level;
    }
}

fn apply_env_overrides(
    config: &mut Config,
    var: impl Fn(&str) -> Option<String>,
) -> Vec<IgnoredEnvVar> {
    let mut ignored = Vec::new();
    let mut reject = |key: &'static str, value: String, reason: String| {
        ignored.push(IgnoredEnvVar { key, value, reason });
    };

    if let Some(val) = var("CMDRELAY_LISTEN") {
        match val.parse() {
            Ok(addr) => config.listen = addr,
            Err(e) => reject("CMDRELAY_LISTEN", val, e.to_string()),
        }
    }
    if let Some(val) = var("CMDRELAY_READ_SIZE") {
        match val.parse() {
            Ok(n) => config.read_size = n,
            Err(e) => reject("CMDRELAY_READ_SIZE", val, e.to_string()),
        }
    }
    if let Some(val) = var("CMDRELAY_TERMINATE_TIMEOUT") {
        match val.parse() {
            Ok(n) => config.terminate_timeout_secs = n,
            Err(e) => reject("CMDRELAY_TERMINATE_TIMEOUT", val, e.to_string()),
        }
    }
    if let Some(val) = var("CMDRELAY_LOG_LEVEL") {
        config.log_level = val;
    }

    ignored
}
