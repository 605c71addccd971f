//! Process spawner for relay sessions.
//!
//! Launches the configured command with stdin piped and stdout/stderr merged
//! into a single pipe, so the relay sees exactly what a terminal would.

use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info, warn};

/// Combined stdout/stderr of a spawned process.
pub type ProcessOutput = Box<dyn AsyncRead + Send + Unpin>;

/// Launches one process per session from a fixed argv.
///
/// Cloning is cheap; every session spawns from the same command.
#[derive(Clone)]
pub struct ProcessSpawner {
    command: Arc<[String]>,
}

/// A freshly spawned process with its pipes taken out.
pub struct SpawnedProcess {
    /// Child handle, used to reap the process once the session ends.
    pub child: Child,
    /// OS process id, if the process is still running.
    pub pid: Option<u32>,
    /// Write end of the process's stdin.
    pub stdin: ChildStdin,
    /// Read end of the merged stdout/stderr pipe.
    pub output: ProcessOutput,
}

impl ProcessSpawner {
    /// Create a spawner. The first element is the program, the rest are its
    /// arguments.
    pub fn new(command: Vec<String>) -> Result<Self, SpawnError> {
        match command.first() {
            Some(program) if !program.is_empty() => Ok(Self {
                command: command.into(),
            }),
            _ => Err(SpawnError::EmptyCommand),
        }
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Spawn the process.
    ///
    /// The child is killed if its handle is dropped before being reaped.
    pub fn spawn(&self) -> Result<SpawnedProcess, SpawnError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or(SpawnError::EmptyCommand)?;

        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::piped()).kill_on_drop(true);
        let output_pipe = merge_output(&mut cmd)?;

        let mut child = cmd.spawn().map_err(|e| SpawnError::SpawnFailed {
            program: program.clone(),
            source: e,
        })?;
        // The command still owns our copies of the pipe's write end; the
        // reader only sees end-of-stream once they are gone.
        drop(cmd);

        let pid = child.id();
        let stdin = child.stdin.take().ok_or(SpawnError::MissingPipe("stdin"))?;
        let output = match output_pipe {
            Some(output) => output,
            None => Box::new(
                child
                    .stdout
                    .take()
                    .ok_or(SpawnError::MissingPipe("stdout"))?,
            ),
        };

        info!(command = ?self.command, pid, "Spawned process");

        Ok(SpawnedProcess {
            child,
            pid,
            stdin,
            output,
        })
    }
}

impl fmt::Debug for ProcessSpawner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSpawner")
            .field("command", &self.command)
            .finish()
    }
}

/// Point both stdout and stderr at one anonymous pipe and return its
/// read end.
#[cfg(unix)]
fn merge_output(cmd: &mut Command) -> Result<Option<ProcessOutput>, SpawnError> {
    use std::os::fd::OwnedFd;
    use tokio::net::unix::pipe;

    let (reader, writer) = std::io::pipe().map_err(SpawnError::Pipe)?;
    let stderr_writer = writer.try_clone().map_err(SpawnError::Pipe)?;
    cmd.stdout(writer).stderr(stderr_writer);

    let receiver =
        pipe::Receiver::from_owned_fd(OwnedFd::from(reader)).map_err(SpawnError::Pipe)?;
    Ok(Some(Box::new(receiver)))
}

/// Without unix pipes stderr cannot share stdout's pipe; it is inherited
/// and only stdout is relayed.
#[cfg(not(unix))]
fn merge_output(cmd: &mut Command) -> Result<Option<ProcessOutput>, SpawnError> {
    warn!("stderr merging unsupported on this platform; stderr is inherited");
    cmd.stdout(Stdio::piped()).stderr(Stdio::inherit());
    Ok(None)
}

/// Wait for `child` to exit, killing it if it is still running after
/// `grace`.
///
/// Callers close the process's stdin first so well-behaved commands exit on
/// their own.
pub async fn terminate(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(?status, "Process exited");
            Some(status)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Error waiting for process");
            child.kill().await.ok();
            None
        }
        Err(_) => {
            warn!(
                grace_secs = grace.as_secs_f64(),
                "Process still running after session end, killing"
            );
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill process");
                return None;
            }
            child.try_wait().ok().flatten()
        }
    }
}

/// Errors from spawning a session's process.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("Command is empty")]
    EmptyCommand,

    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to set up output pipe: {0}")]
    Pipe(#[source] std::io::Error),

    #[error("Process {0} was not captured")]
    MissingPipe(&'static str),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn empty_command_rejected() {
        assert!(matches!(
            ProcessSpawner::new(Vec::new()),
            Err(SpawnError::EmptyCommand)
        ));
        assert!(matches!(
            ProcessSpawner::new(argv(&[""])),
            Err(SpawnError::EmptyCommand)
        ));
    }

    #[tokio::test]
    async fn missing_program_is_spawn_failure() {
        let spawner = ProcessSpawner::new(argv(&["/nonexistent/cmdrelay-test-binary"])).unwrap();
        match spawner.spawn() {
            Err(SpawnError::SpawnFailed { program, .. }) => {
                assert_eq!(program, "/nonexistent/cmdrelay-test-binary");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("spawn should fail"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stderr_merged_into_output() {
        let spawner =
            ProcessSpawner::new(argv(&["sh", "-c", "echo out; echo err 1>&2"])).unwrap();
        let mut process = spawner.spawn().unwrap();
        assert!(process.pid.is_some());

        let mut output = String::new();
        process.output.read_to_string(&mut output).await.unwrap();
        assert_eq!(output, "out\nerr\n");

        let status = terminate(&mut process.child, Duration::from_secs(5)).await;
        assert!(status.unwrap().success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn closing_stdin_lets_cat_exit() {
        let spawner = ProcessSpawner::new(argv(&["cat"])).unwrap();
        let SpawnedProcess {
            mut child,
            mut stdin,
            mut output,
            ..
        } = spawner.spawn().unwrap();

        stdin.write_all(b"ping").await.unwrap();
        drop(stdin);

        let mut echoed = Vec::new();
        output.read_to_end(&mut echoed).await.unwrap();
        assert_eq!(echoed, b"ping");
        assert!(terminate(&mut child, Duration::from_secs(5)).await.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_kills_after_grace() {
        let spawner = ProcessSpawner::new(argv(&["sleep", "30"])).unwrap();
        let mut process = spawner.spawn().unwrap();

        let started = std::time::Instant::now();
        let status = terminate(&mut process.child, Duration::from_millis(100)).await;
        assert!(started.elapsed() < Duration::from_secs(10));
        if let Some(status) = status {
            assert!(!status.success());
        }
    }
}
