//! Relay session: one network connection paired with one process.
//!
//! ```text
//! network read  → process stdin                 (inbound pump)
//! process stdout/stderr → replacements → network write   (outbound pump)
//! ```
//!
//! Both pumps run concurrently inside the session task. The first one to
//! stop ends the session: the other pump is dropped (cancelling its
//! outstanding read), the network write side is shut down, process stdin is
//! closed and the process is reaped.

use std::process::ExitStatus;
use std::time::Duration;

use cmdrelay_core::{Config, DEFAULT_READ_SIZE, ReplacementTable};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::pump::{Direction, PumpEnd, pump};
use crate::process::{ProcessSpawner, SpawnError, SpawnedProcess, terminate};

/// Default grace period for the process to exit after its stdin closes.
const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs relay sessions for a fixed command and replacement table.
///
/// Holds no per-session state; clone it into each connection task.
#[derive(Debug, Clone)]
pub struct Relay {
    spawner: ProcessSpawner,
    replacements: ReplacementTable,
    read_size: usize,
    terminate_timeout: Duration,
}

/// What happened during a session that ended normally.
#[derive(Debug)]
pub struct SessionSummary {
    /// The pump that stopped first.
    pub ended_by: Direction,
    pub reason: PumpEnd,
    /// Bytes read from the network peer.
    pub bytes_from_network: u64,
    /// Bytes read from the process, before replacements.
    pub bytes_from_process: u64,
    /// `None` if the process could not be reaped.
    pub exit_status: Option<ExitStatus>,
}

/// Errors that end a session before any byte is relayed.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

impl Relay {
    pub fn new(spawner: ProcessSpawner, replacements: ReplacementTable) -> Self {
        Self {
            spawner,
            replacements,
            read_size: DEFAULT_READ_SIZE,
            terminate_timeout: DEFAULT_TERMINATE_TIMEOUT,
        }
    }

    /// Build a relay from resolved configuration.
    pub fn from_config(config: &Config) -> Result<Self, SpawnError> {
        let spawner = ProcessSpawner::new(config.command.clone())?;
        Ok(Self::new(spawner, config.replacement_table())
            .with_read_size(config.read_size)
            .with_terminate_timeout(config.terminate_timeout()))
    }

    /// Bytes requested per read on either side. Zero is treated as one.
    #[must_use]
    pub fn with_read_size(mut self, read_size: usize) -> Self {
        self.read_size = read_size.max(1);
        self
    }

    #[must_use]
    pub fn with_terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = timeout;
        self
    }

    pub const fn replacements(&self) -> &ReplacementTable {
        &self.replacements
    }

    /// Spawn the command and relay bytes between it and `stream` until
    /// either side reaches end-of-stream.
    ///
    /// Stream-level failures end the session like an end-of-stream and are
    /// reported in the summary; only a spawn failure is returned as an
    /// error. The stream is closed in every case.
    pub async fn run<S>(&self, stream: S) -> Result<SessionSummary, SessionError>
    where
        S: AsyncRead + AsyncWrite,
    {
        let (net_rx, mut net_tx) = tokio::io::split(stream);

        let SpawnedProcess {
            mut child,
            pid,
            stdin,
            output,
        } = match self.spawner.spawn() {
            Ok(process) => process,
            Err(e) => {
                if let Err(shutdown_err) = net_tx.shutdown().await {
                    debug!(error = %shutdown_err, "Network shutdown after spawn failure failed");
                }
                return Err(e.into());
            }
        };
        debug!(?pid, "Session started");

        let mut summary = forward(
            net_rx,
            &mut net_tx,
            output,
            stdin,
            &self.replacements,
            self.read_size,
        )
        .await;
        summary.exit_status = terminate(&mut child, self.terminate_timeout).await;

        info!(
            ?pid,
            ended_by = %summary.ended_by,
            reason = %summary.reason,
            bytes_from_network = summary.bytes_from_network,
            bytes_from_process = summary.bytes_from_process,
            exit_status = ?summary.exit_status,
            "Session ended"
        );
        Ok(summary)
    }
}

/// Relay between an already-open network stream and process pipes.
///
/// Returns once either direction stops. `proc_in` is dropped before
/// returning and `net_tx` is shut down. `exit_status` in the returned
/// summary is always `None`.
pub async fn forward<NR, NW, PR, PW>(
    net_rx: NR,
    net_tx: &mut NW,
    proc_out: PR,
    proc_in: PW,
    rules: &ReplacementTable,
    read_size: usize,
) -> SessionSummary
where
    NR: AsyncRead + Unpin,
    NW: AsyncWrite + Unpin,
    PR: AsyncRead + Unpin,
    PW: AsyncWrite + Unpin,
{
    let verbatim = ReplacementTable::default();
    let mut bytes_from_network = 0;
    let mut bytes_from_process = 0;

    let (ended_by, reason) = {
        let inbound = pump(
            Direction::Inbound,
            net_rx,
            proc_in,
            read_size,
            &verbatim,
            &mut bytes_from_network,
        );
        let outbound = pump(
            Direction::Outbound,
            proc_out,
            &mut *net_tx,
            read_size,
            rules,
            &mut bytes_from_process,
        );
        tokio::select! {
            end = inbound => (Direction::Inbound, end),
            end = outbound => (Direction::Outbound, end),
        }
    };

    if reason.is_graceful() {
        debug!(%ended_by, "End of stream");
    } else {
        warn!(%ended_by, error = %reason, "Stream failed, ending session");
    }

    if let Err(e) = net_tx.shutdown().await {
        debug!(error = %e, "Network shutdown failed");
    }

    SessionSummary {
        ended_by,
        reason,
        bytes_from_network,
        bytes_from_process,
        exit_status: None,
    }
}
