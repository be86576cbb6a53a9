//! Client facade — the three caller-visible operations.
//!
//! LIFECYCLE
//! =========
//! 1. `connect` → dial + handshake, pump spawned, peer address returned
//! 2. pump populates the queue in the background
//! 3. callers poll `get_events` / call `send` at any time, from any task
//! 4. `disconnect` (or drop) → pump aborted, socket closed, `Disconnected`
//!
//! The facade owns the single-connection invariant: `connect` on a live
//! client tears the old session down first, and concurrent `connect` calls
//! serialize on the connection lock so the last one wins with the loser's
//! partial state discarded.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::conn::{self, LinkState, Shared};
use crate::error::{ConnectError, SendError};
use crate::event::Event;
use crate::pump;

/// Handle to a live pump task; aborting on drop ties the background task's
/// lifetime to the session that spawned it.
struct PumpHandle {
    task: JoinHandle<()>,
}

impl Drop for PumpHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A signal-relay peer client holding at most one live relay session.
pub struct RelayClient {
    shared: Arc<Shared>,
    /// Serializes `connect`/`disconnect` and owns the pump handle.
    conn: Mutex<Option<PumpHandle>>,
}

impl RelayClient {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
            conn: Mutex::new(None),
        }
    }

    /// Establish a session with the relay at `sig_url` and return the local
    /// peer address it assigned.
    ///
    /// Any existing session is torn down first; queued events survive the
    /// replacement.
    ///
    /// # Errors
    ///
    /// [`ConnectError`] on an invalid URL, dial/TLS failure, handshake
    /// timeout, or relay rejection.
    pub async fn connect(&self, sig_url: &str) -> Result<String, ConnectError> {
        let mut conn = self.conn.lock().await;

        // Tear down the previous session: abort its pump first so a held
        // write lock is released before we take it below.
        conn.take();
        let generation = self.shared.bump_generation();
        self.shared.fail_pending("connection replaced");
        self.shared.set_state(LinkState::Connecting);
        if let Some(mut sink) = self.shared.writer.lock().await.take() {
            let _ = sink.close().await;
        }

        match conn::establish(sig_url, &self.shared.config).await {
            Ok((peer_url, stream, decoder)) => {
                let (sink, source) = stream.split();
                *self.shared.writer.lock().await = Some(sink);
                self.shared.set_connected(peer_url.clone());

                let task = tokio::spawn(pump::run(
                    Arc::clone(&self.shared),
                    source,
                    decoder,
                    sig_url.to_owned(),
                    generation,
                ));
                *conn = Some(PumpHandle { task });
                Ok(peer_url)
            }
            Err(error) => {
                self.shared.set_state(LinkState::Disconnected);
                Err(error)
            }
        }
    }

    /// Tear down the session. Always succeeds locally; socket errors during
    /// close are swallowed.
    pub async fn disconnect(&self) {
        let mut conn = self.conn.lock().await;
        conn.take();
        self.shared.bump_generation();
        self.shared.fail_pending("disconnected");
        if let Some(mut sink) = self.shared.writer.lock().await.take() {
            let _ = sink.close().await;
        }
        self.shared.set_state(LinkState::Disconnected);
        tracing::info!("relay session closed");
    }

    /// Drain every event that arrived since the previous call, in arrival
    /// order. Non-blocking and infallible; with no session (or nothing new)
    /// the result is empty.
    #[must_use]
    pub fn get_events(&self) -> Vec<Event> {
        self.shared.queue.drain()
    }

    /// Send `data` to the peer at `peer_url` through the relay.
    ///
    /// # Errors
    ///
    /// [`SendError::NotConnected`] without a session (no implicit connect);
    /// [`SendError::PeerUnreachable`] when the relay refuses the
    /// destination; [`SendError::Transport`] / [`SendError::AckTimeout`] on
    /// write or acknowledgement failure.
    pub async fn send(&self, peer_url: &str, data: impl Into<Vec<u8>>) -> Result<(), SendError> {
        conn::send(&self.shared, peer_url, data.into()).await
    }

    /// Current lifecycle state of the session.
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.shared.link_state()
    }

    /// The relay-assigned local peer address, while a session is live.
    #[must_use]
    pub fn local_url(&self) -> Option<String> {
        self.shared.local_url()
    }
}

impl Default for RelayClient {
    fn default() -> Self {
        Self::new()
    }
}
