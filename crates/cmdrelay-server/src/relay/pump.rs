//! One direction of a session: read a chunk, rewrite it, write it, flush.
//!
//! A pump always keeps exactly one read outstanding on its source. The next
//! read is issued as soon as a chunk arrives and runs concurrently with the
//! write of that chunk; the chunk after it is only handled once the write
//! has been flushed. That flush is the only backpressure between the two
//! ends.

use std::fmt;
use std::io;

use cmdrelay_core::ReplacementTable;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Which way bytes flow through a pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Network peer to process stdin.
    Inbound,
    /// Process stdout/stderr to network peer.
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => f.write_str("network->process"),
            Self::Outbound => f.write_str("process->network"),
        }
    }
}

/// Result of a single read.
#[derive(Debug)]
pub(crate) enum ReadOutcome {
    /// `n > 0` bytes landed at the front of the buffer.
    Data(usize),
    /// The source will never produce more bytes.
    EndOfStream,
    /// The read errored; the source is treated as closed.
    Failed(io::Error),
}

impl From<io::Result<usize>> for ReadOutcome {
    fn from(result: io::Result<usize>) -> Self {
        match result {
            Ok(0) => Self::EndOfStream,
            Ok(n) => Self::Data(n),
            Err(e) => Self::Failed(e),
        }
    }
}

/// Why a pump stopped.
#[derive(Debug, thiserror::Error)]
pub enum PumpEnd {
    #[error("end of stream")]
    EndOfStream,

    #[error("read failed: {0}")]
    ReadFailed(#[source] io::Error),

    #[error("write failed: {0}")]
    WriteFailed(#[source] io::Error),
}

impl PumpEnd {
    /// `true` for a plain end-of-stream, `false` for an I/O failure.
    pub const fn is_graceful(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

/// Move bytes from `reader` to `writer` until either side gives out.
///
/// Every chunk passes through `rules` before it is written. `transferred`
/// counts bytes read from `reader`; it stays accurate when the returned
/// future is dropped part-way.
pub async fn pump<R, W>(
    direction: Direction,
    mut reader: R,
    mut writer: W,
    read_size: usize,
    rules: &ReplacementTable,
    transferred: &mut u64,
) -> PumpEnd
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut current = vec![0u8; read_size];
    let mut next = vec![0u8; read_size];

    let mut outcome = ReadOutcome::from(reader.read(&mut current).await);
    loop {
        let n = match outcome {
            ReadOutcome::Data(n) => n,
            ReadOutcome::EndOfStream => return PumpEnd::EndOfStream,
            ReadOutcome::Failed(e) => return PumpEnd::ReadFailed(e),
        };
        *transferred += n as u64;

        let chunk = rules.apply(&current[..n]);
        trace!(%direction, read = n, written = chunk.len(), "Forwarding chunk");

        let write = async {
            writer.write_all(&chunk).await?;
            writer.flush().await
        };
        let read = async { Ok::<_, io::Error>(ReadOutcome::from(reader.read(&mut next).await)) };

        match tokio::try_join!(write, read) {
            Ok(((), read)) => outcome = read,
            Err(e) => return PumpEnd::WriteFailed(e),
        }
        drop(chunk);
        std::mem::swap(&mut current, &mut next);
    }
}
