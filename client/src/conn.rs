//! Connection lifecycle and the serialized send path.
//!
//! DESIGN
//! ======
//! Exactly one relay session is live at a time. The session's transport is
//! split: the pump owns the read half outright, while the write half sits
//! behind `Shared::writer`, a mutex taken by every send and held across the
//! whole re-handshake during reconnection — so a send either serializes
//! cleanly after other writers or blocks until recovery resolves.
//!
//! A generation counter stamps each session. `connect` bumps it when
//! replacing a session, which lets a stale pump detect that it lost the race
//! and stand down instead of clobbering the new session's state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use frames::{FrameDecoder, RelayFrame, encode_frame};

use crate::config::Config;
use crate::error::{ConnectError, SendError};
use crate::event::EventQueue;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSink = SplitSink<WsStream, Message>;
pub(crate) type WsSource = SplitStream<WsStream>;

/// Lifecycle of the single relay session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

struct StateCell {
    state: LinkState,
    local_url: Option<String>,
    generation: u64,
}

/// State shared between the facade, the send path, and the pump.
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) queue: EventQueue,
    /// Write half of the active socket. Also the handshake lock: the
    /// reconnect path holds it for the duration of a re-handshake so sends
    /// block rather than interleave with recovery.
    pub(crate) writer: Mutex<Option<WsSink>>,
    state: StdMutex<StateCell>,
    pending: StdMutex<HashMap<u64, oneshot::Sender<Result<(), SendError>>>>,
    seq: AtomicU64,
}

impl Shared {
    pub(crate) fn new(config: Config) -> Self {
        Self {
            config,
            queue: EventQueue::new(),
            writer: Mutex::new(None),
            state: StdMutex::new(StateCell {
                state: LinkState::Disconnected,
                local_url: None,
                generation: 0,
            }),
            pending: StdMutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    pub(crate) fn link_state(&self) -> LinkState {
        self.state_cell().state
    }

    pub(crate) fn local_url(&self) -> Option<String> {
        self.state_cell().local_url.clone()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.state_cell().generation
    }

    /// Invalidate the current session and return the replacement generation.
    pub(crate) fn bump_generation(&self) -> u64 {
        let mut cell = self.state_cell();
        cell.generation += 1;
        cell.generation
    }

    pub(crate) fn set_state(&self, state: LinkState) {
        let mut cell = self.state_cell();
        cell.state = state;
        if state == LinkState::Disconnected {
            cell.local_url = None;
        }
    }

    pub(crate) fn set_connected(&self, local_url: String) {
        let mut cell = self.state_cell();
        cell.state = LinkState::Connected;
        cell.local_url = Some(local_url);
    }

    /// Transition only if `generation` is still the live session.
    pub(crate) fn transition_if_current(&self, generation: u64, state: LinkState) -> bool {
        let mut cell = self.state_cell();
        if cell.generation != generation {
            return false;
        }
        cell.state = state;
        if state == LinkState::Disconnected {
            cell.local_url = None;
        }
        true
    }

    /// Mark `generation` connected under `local_url`, unless it was replaced.
    pub(crate) fn set_connected_if_current(&self, generation: u64, local_url: String) -> bool {
        let mut cell = self.state_cell();
        if cell.generation != generation {
            return false;
        }
        cell.state = LinkState::Connected;
        cell.local_url = Some(local_url);
        true
    }

    /// Resolve one in-flight send with the relay's verdict.
    pub(crate) fn complete_pending(&self, seq: u64, result: Result<(), SendError>) {
        let sender = self.pending_lock().remove(&seq);
        match sender {
            Some(tx) => {
                // The caller may have timed out and dropped the receiver.
                let _ = tx.send(result);
            }
            None => tracing::debug!(seq, "acknowledgement for unknown message"),
        }
    }

    /// Fail every in-flight send, e.g. when the transport drops.
    pub(crate) fn fail_pending(&self, reason: &str) {
        let pending: Vec<_> = self.pending_lock().drain().collect();
        for (_, tx) in pending {
            let _ = tx.send(Err(SendError::Transport(reason.to_owned())));
        }
    }

    fn pending_insert(&self, seq: u64, tx: oneshot::Sender<Result<(), SendError>>) {
        self.pending_lock().insert(seq, tx);
    }

    fn pending_remove(&self, seq: u64) {
        self.pending_lock().remove(&seq);
    }

    fn state_cell(&self) -> std::sync::MutexGuard<'_, StateCell> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending_lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Result<(), SendError>>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Dial the relay and run the `Hello`/`Welcome` handshake.
///
/// Returns the assigned local peer address, the open socket, and the decoder
/// holding any bytes the relay sent after the `Welcome` — those belong to
/// the pump, not the handshake.
pub(crate) async fn establish(
    sig_url: &str,
    config: &Config,
) -> Result<(String, WsStream, FrameDecoder), ConnectError> {
    if !sig_url.starts_with("ws://") && !sig_url.starts_with("wss://") {
        return Err(ConnectError::InvalidUrl(sig_url.to_owned()));
    }

    let (mut stream, _response) = timeout(config.connect_timeout, connect_async(sig_url))
        .await
        .map_err(|_| ConnectError::Timeout(config.connect_timeout))?
        .map_err(ConnectError::from_ws)?;

    stream
        .send(Message::Binary(encode_frame(&RelayFrame::Hello).into()))
        .await
        .map_err(ConnectError::from_ws)?;

    let mut decoder = FrameDecoder::with_max_frame_size(config.max_frame_size);
    loop {
        while let Some(frame) = decoder.next_frame()? {
            match frame {
                RelayFrame::Welcome { peer_url } => {
                    tracing::info!(%sig_url, %peer_url, "relay session established");
                    return Ok((peer_url, stream, decoder));
                }
                RelayFrame::Reject { reason, .. } => {
                    return Err(ConnectError::Rejected(reason));
                }
                other => {
                    tracing::debug!(kind = ?other.kind(), "ignoring pre-welcome frame");
                }
            }
        }

        let message = timeout(config.connect_timeout, stream.next())
            .await
            .map_err(|_| ConnectError::Timeout(config.connect_timeout))?;
        match message {
            Some(Ok(Message::Binary(bytes))) => decoder.feed(&bytes),
            Some(Ok(Message::Close(_))) | None => return Err(ConnectError::Closed),
            Some(Ok(_)) => {}
            Some(Err(error)) => return Err(ConnectError::from_ws(error)),
        }
    }
}

/// Deliver one addressed payload through the relay.
///
/// The frame write is atomic with respect to other senders (one lock, one
/// `Sink::send`); the ack wait happens after the lock is released so slow
/// relays do not serialize unrelated sends.
pub(crate) async fn send(shared: &Shared, peer_url: &str, data: Vec<u8>) -> Result<(), SendError> {
    match shared.link_state() {
        // A reconnecting session is still "the" session; the write lock
        // below blocks until recovery resolves one way or the other.
        LinkState::Connected | LinkState::Reconnecting => {}
        LinkState::Disconnected | LinkState::Connecting => return Err(SendError::NotConnected),
    }

    let seq = shared.seq.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = oneshot::channel();
    shared.pending_insert(seq, tx);

    let frame = encode_frame(&RelayFrame::Message {
        seq,
        peer_url: peer_url.to_owned(),
        data,
    });

    {
        let mut writer = shared.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            shared.pending_remove(seq);
            return Err(SendError::NotConnected);
        };
        if let Err(error) = sink.send(Message::Binary(frame.into())).await {
            shared.pending_remove(seq);
            // The pump sees the same dead socket on its read side and runs
            // the reconnect path; nothing more to do here.
            return Err(SendError::Transport(error.to_string()));
        }
    }

    match timeout(shared.config.ack_timeout, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_closed)) => Err(SendError::Transport(
            "connection dropped before acknowledgement".to_owned(),
        )),
        Err(_elapsed) => {
            shared.pending_remove(seq);
            Err(SendError::AckTimeout)
        }
    }
}
