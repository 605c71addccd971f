//! cmdrelay Server
//!
//! Listens on TCP and, for every connection, spawns the configured command
//! and relays bytes between the connection and the command's stdio.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};

use cmdrelay_core::config::load_config;
use cmdrelay_core::tracing_init::{filter_for, init_tracing};
use cmdrelay_core::{Config, LoadedConfig, ReplacementRule};
use cmdrelay_server::{Listener, Relay};

#[derive(Parser, Debug)]
#[command(name = "cmdrelay")]
#[command(
    version,
    about = "Expose a process's stdin/stdout over TCP, one process per connection"
)]
struct Args {
    /// JSON settings file, applied on top of the global settings file.
    #[arg(long, short, env = "CMDRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Rewrite PATTERN to REPLACEMENT in process output. Repeatable; rules
    /// apply in the order given and replace any rules from settings files.
    #[arg(long = "replace", value_name = "PATTERN=REPLACEMENT")]
    replacements: Vec<ReplacementRule>,

    /// Bytes requested per read on either side of a session.
    #[arg(long)]
    read_size: Option<usize>,

    /// Seconds to wait for the process to exit after a session ends before
    /// killing it.
    #[arg(long)]
    terminate_timeout: Option<u64>,

    /// Log level filter (e.g. "info", "debug", "trace").
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "CMDRELAY_LOG_JSON")]
    log_json: bool,

    /// Command to run for each connection, followed by its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    command: Vec<String>,
}

impl Args {
    /// Overlay CLI arguments on configuration resolved from files and the
    /// environment. Only arguments that were given replace anything.
    fn apply_to(&self, config: &mut Config) {
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if !self.replacements.is_empty() {
            config.replacements.clone_from(&self.replacements);
        }
        if let Some(read_size) = self.read_size {
            config.read_size = read_size;
        }
        if let Some(secs) = self.terminate_timeout {
            config.terminate_timeout_secs = secs;
        }
        if let Some(level) = &self.log_level {
            config.log_level.clone_from(level);
        }
        if !self.command.is_empty() {
            config.command.clone_from(&self.command);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let LoadedConfig {
        mut config,
        ignored_env,
    } = load_config(args.config.as_deref())?;
    args.apply_to(&mut config);

    init_tracing(
        &filter_for("cmdrelay_server", &config.log_level),
        args.log_json,
    );

    for ignored in &ignored_env {
        warn!(
            key = ignored.key,
            value = %ignored.value,
            error = %ignored.reason,
            "Ignoring invalid environment override"
        );
    }
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen,
        command = ?config.command,
        replacements = config.replacements.len(),
        "Starting cmdrelay"
    );

    let relay = Relay::from_config(&config)?;
    let listener = Listener::bind(config.listen, relay).await?;
    info!(addr = %listener.local_addr()?, "Listening");

    tokio::select! {
        () = listener.serve() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("cmdrelay stopped");
    Ok(())
}
