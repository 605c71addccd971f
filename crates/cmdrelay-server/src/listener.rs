//! TCP listener that runs one relay session per accepted connection.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::relay::{Relay, SessionSummary};

/// Pause after a failed accept so a persistent error (e.g. fd exhaustion)
/// does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts connections and hands each one to its own relay session.
pub struct Listener {
    listener: TcpListener,
    relay: Relay,
}

impl Listener {
    /// Bind to `addr`. Port 0 picks an ephemeral port; see
    /// [`Listener::local_addr`].
    pub async fn bind(addr: SocketAddr, relay: Relay) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, relay })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever.
    ///
    /// Sessions run on independent tasks; a failing session or accept never
    /// stops the loop.
    pub async fn serve(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    self.spawn_session(stream, peer);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        let relay = self.relay.clone();
        let session_id = Uuid::new_v4();
        let span = info_span!("session", %session_id, %peer);

        tokio::spawn(
            async move {
                info!("Connection accepted");
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "Failed to set TCP_NODELAY");
                }
                match relay.run(stream).await {
                    Ok(SessionSummary { ended_by, .. }) => {
                        debug!(%ended_by, "Session closed");
                    }
                    Err(e) => {
                        error!(error = %e, "Session failed");
                    }
                }
            }
            .instrument(span),
        );
    }
}
