//! Event pump — the background read loop of a relay session.
//!
//! DESIGN
//! ======
//! One pump task runs per live session and is the sole producer of events.
//! Every read is bounded by `read_timeout`; a timeout, read error, or EOF is
//! treated as a transient transport drop and handled in place with bounded,
//! jittered exponential backoff. The queue is never cleared when the pump
//! stops — events observed before a drop stay retrievable.
//!
//! Per-frame decode failures are not fatal: they become `ConnectionError`
//! events and the decoder resynchronizes at the next frame boundary.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use frames::{FrameDecoder, RelayFrame};

use crate::conn::{self, LinkState, Shared, WsSource};
use crate::error::SendError;
use crate::event::Event;

/// Run the pump until the session ends (teardown, replacement, or exhausted
/// reconnect attempts).
pub(crate) async fn run(
    shared: Arc<Shared>,
    mut source: WsSource,
    mut decoder: FrameDecoder,
    sig_url: String,
    generation: u64,
) {
    loop {
        // The handshake may have left whole frames in the decoder (the relay
        // can coalesce them with the Welcome); surface those before blocking
        // on the socket.
        drain_decoder(&shared, &mut decoder);

        let drop_reason = match timeout(shared.config.read_timeout, source.next()).await {
            Ok(Some(Ok(Message::Binary(bytes)))) => {
                decoder.feed(&bytes);
                continue;
            }
            // Text, ping and pong are not part of the relay protocol;
            // tungstenite already answers pings at the protocol layer.
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => "relay closed the session".to_owned(),
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(error))) => format!("read failed: {error}"),
            Err(_elapsed) => format!(
                "no frames within {:?}",
                shared.config.read_timeout
            ),
        };

        tracing::warn!(%sig_url, %drop_reason, "transport drop detected");
        match reconnect(&shared, &sig_url, generation).await {
            Some((new_source, new_decoder)) => {
                source = new_source;
                decoder = new_decoder;
            }
            None => return,
        }
    }
}

/// Translate every decodable frame in the buffer into queued events.
fn drain_decoder(shared: &Shared, decoder: &mut FrameDecoder) {
    loop {
        match decoder.next_frame() {
            Ok(Some(frame)) => handle_frame(shared, frame),
            Ok(None) => return,
            Err(error) => {
                // Recoverable by contract: the decoder has already consumed
                // (or is skipping) the bad frame.
                tracing::warn!(%error, "dropping undecodable frame");
                shared.queue.push(Event::ConnectionError {
                    message: error.to_string(),
                });
            }
        }
    }
}

fn handle_frame(shared: &Shared, frame: RelayFrame) {
    match frame {
        RelayFrame::PeerJoined { peer_url } => {
            shared.queue.push(Event::PeerJoined { peer_url });
        }
        RelayFrame::PeerLeft { peer_url } => {
            shared.queue.push(Event::PeerLeft { peer_url });
        }
        RelayFrame::Message { peer_url, data, .. } => {
            shared.queue.push(Event::MessageReceived { peer_url, data });
        }
        RelayFrame::Ack { seq } => shared.complete_pending(seq, Ok(())),
        RelayFrame::Reject {
            seq: Some(seq),
            reason,
        } => shared.complete_pending(seq, Err(SendError::PeerUnreachable(reason))),
        RelayFrame::Reject { seq: None, reason } => {
            shared.queue.push(Event::ConnectionError { message: reason });
        }
        RelayFrame::Hello | RelayFrame::Welcome { .. } => {
            tracing::debug!(kind = ?frame.kind(), "ignoring unexpected mid-session frame");
        }
    }
}

/// Heal a transient drop in place.
///
/// Holds the write lock for the whole retry loop so sends block behind the
/// re-handshake. Returns the new read half on success, or `None` when the
/// session was replaced or retries are exhausted.
async fn reconnect(
    shared: &Arc<Shared>,
    sig_url: &str,
    generation: u64,
) -> Option<(WsSource, FrameDecoder)> {
    if !shared.transition_if_current(generation, LinkState::Reconnecting) {
        // A newer connect already replaced this session.
        return None;
    }
    shared.fail_pending("connection dropped");

    let mut writer = shared.writer.lock().await;
    *writer = None;

    let max_attempts = shared.config.reconnect_max_attempts;
    let mut delay = shared.config.reconnect_base_delay;
    let mut last_error = "no attempts made".to_owned();

    for attempt in 1..=max_attempts {
        tokio::time::sleep(with_jitter(delay)).await;
        if shared.generation() != generation {
            return None;
        }

        match conn::establish(sig_url, &shared.config).await {
            Ok((peer_url, stream, decoder)) => {
                let (sink, source) = stream.split();
                if !shared.set_connected_if_current(generation, peer_url.clone()) {
                    return None;
                }
                *writer = Some(sink);
                tracing::info!(%sig_url, %peer_url, attempt, "session re-established");
                shared.queue.push(Event::Reconnected { peer_url });
                return Some((source, decoder));
            }
            Err(error) => {
                tracing::warn!(%sig_url, attempt, %error, "reconnect attempt failed");
                last_error = error.to_string();
                delay = (delay * 2).min(shared.config.reconnect_max_delay);
            }
        }
    }

    // Exhausted: surface the failure to idle pollers and go quiet.
    if shared.transition_if_current(generation, LinkState::Disconnected) {
        shared.queue.push(Event::ConnectionError {
            message: format!("reconnect failed after {max_attempts} attempts: {last_error}"),
        });
    }
    None
}

/// Add up to 25% random jitter so reconnecting clients do not stampede.
fn with_jitter(delay: Duration) -> Duration {
    let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    let jitter = rand::rng().random_range(0..=millis / 4);
    delay + Duration::from_millis(jitter)
}
