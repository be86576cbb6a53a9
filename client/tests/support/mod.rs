//! In-process mock relay for integration tests.
//!
//! Speaks the real frames protocol over tokio-tungstenite: accepts the
//! `Hello`/`Welcome` handshake, assigns sequential peer addresses, forwards
//! addressed messages between connected peers with `Ack`/`Reject` verdicts,
//! and broadcasts presence frames. Tests can also inject frames (or raw
//! bytes) toward a specific peer and force-drop connections to exercise the
//! reconnect path.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use client::Config;
use frames::{FrameDecoder, RelayFrame, encode_frame};

/// Per-connection instruction from the test harness.
enum Command {
    Frame(RelayFrame),
    Raw(Vec<u8>),
    Close,
}

struct RelayState {
    base_url: String,
    peers: Mutex<HashMap<String, mpsc::Sender<Command>>>,
    /// Every message frame the relay decoded: (from, to, payload).
    received: Mutex<Vec<(String, String, Vec<u8>)>>,
    /// Frames coalesced into the same binary message as the `Welcome`.
    welcome_bundle: Mutex<Vec<RelayFrame>>,
    next_peer: AtomicU64,
    mute_acks: AtomicBool,
}

pub struct MockRelay {
    state: Arc<RelayState>,
    accept_task: JoinHandle<()>,
}

impl MockRelay {
    pub async fn spawn() -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock relay");
        let addr = listener.local_addr().expect("local addr");

        let state = Arc::new(RelayState {
            base_url: format!("ws://{addr}"),
            peers: Mutex::new(HashMap::new()),
            received: Mutex::new(Vec::new()),
            welcome_bundle: Mutex::new(Vec::new()),
            next_peer: AtomicU64::new(1),
            mute_acks: AtomicBool::new(false),
        });

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(serve_conn(Arc::clone(&accept_state), stream));
            }
        });

        Self { state, accept_task }
    }

    /// Signal URL clients should dial.
    pub fn url(&self) -> String {
        self.state.base_url.clone()
    }

    /// Stop accepting messages *and* answering acks, without closing sockets.
    pub fn set_mute_acks(&self, mute: bool) {
        self.state.mute_acks.store(mute, Ordering::Relaxed);
    }

    /// Coalesce `frame` into the same binary message as future `Welcome`s.
    pub async fn bundle_with_welcome(&self, frame: RelayFrame) {
        self.state.welcome_bundle.lock().await.push(frame);
    }

    /// Push a frame to one connected peer. Returns false if unknown.
    pub async fn send_frame(&self, peer_url: &str, frame: RelayFrame) -> bool {
        self.send_command(peer_url, Command::Frame(frame)).await
    }

    /// Push raw bytes (possibly not a whole frame) to one connected peer.
    pub async fn send_raw(&self, peer_url: &str, bytes: Vec<u8>) -> bool {
        self.send_command(peer_url, Command::Raw(bytes)).await
    }

    /// Force-close one peer's socket; the listener stays up so the peer can
    /// reconnect.
    pub async fn drop_peer(&self, peer_url: &str) -> bool {
        self.send_command(peer_url, Command::Close).await
    }

    /// Addresses of currently connected peers.
    pub async fn connected_peers(&self) -> Vec<String> {
        self.state.peers.lock().await.keys().cloned().collect()
    }

    /// Every (from, to, payload) message the relay decoded so far.
    pub async fn received(&self) -> Vec<(String, String, Vec<u8>)> {
        self.state.received.lock().await.clone()
    }

    /// Stop listening and drop every connection; dials now fail outright.
    pub async fn shutdown(&self) {
        self.accept_task.abort();
        let peers: Vec<String> = self.connected_peers().await;
        for peer in peers {
            self.drop_peer(&peer).await;
        }
        // Let in-flight close handshakes settle.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    async fn send_command(&self, peer_url: &str, command: Command) -> bool {
        let tx = self.state.peers.lock().await.get(peer_url).cloned();
        match tx {
            Some(tx) => tx.send(command).await.is_ok(),
            None => false,
        }
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_conn(state: Arc<RelayState>, stream: TcpStream) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = ws.split();
    let mut decoder = FrameDecoder::new();

    // Handshake: wait for Hello, then assign an address.
    loop {
        match decoder.next_frame() {
            Ok(Some(RelayFrame::Hello)) => break,
            Ok(Some(_)) | Err(_) => return,
            Ok(None) => {}
        }
        match source.next().await {
            Some(Ok(Message::Binary(bytes))) => decoder.feed(&bytes),
            Some(Ok(_)) => {}
            Some(Err(_)) | None => return,
        }
    }

    let peer_url = format!(
        "{}/peer/{}",
        state.base_url,
        state.next_peer.fetch_add(1, Ordering::Relaxed)
    );
    let (tx, mut rx) = mpsc::channel::<Command>(64);
    state.peers.lock().await.insert(peer_url.clone(), tx);

    let welcome = RelayFrame::Welcome {
        peer_url: peer_url.clone(),
    };
    let mut handshake_bytes = encode_frame(&welcome);
    for frame in state.welcome_bundle.lock().await.iter() {
        handshake_bytes.extend_from_slice(&encode_frame(frame));
    }
    if sink
        .send(Message::Binary(handshake_bytes.into()))
        .await
        .is_err()
    {
        state.peers.lock().await.remove(&peer_url);
        return;
    }
    broadcast_presence(&state, &peer_url, true).await;

    loop {
        tokio::select! {
            command = rx.recv() => {
                let outcome = match command {
                    Some(Command::Frame(frame)) => {
                        sink.send(Message::Binary(encode_frame(&frame).into())).await
                    }
                    Some(Command::Raw(bytes)) => sink.send(Message::Binary(bytes.into())).await,
                    Some(Command::Close) | None => break,
                };
                if outcome.is_err() {
                    break;
                }
            }
            message = source.next() => {
                match message {
                    Some(Ok(Message::Binary(bytes))) => {
                        decoder.feed(&bytes);
                        if handle_inbound(&state, &peer_url, &mut decoder, &mut sink).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.peers.lock().await.remove(&peer_url);
    broadcast_presence(&state, &peer_url, false).await;
}

type ServerSink =
    futures_util::stream::SplitSink<tokio_tungstenite::WebSocketStream<TcpStream>, Message>;

async fn handle_inbound(
    state: &Arc<RelayState>,
    sender_url: &str,
    decoder: &mut FrameDecoder,
    sink: &mut ServerSink,
) -> Result<(), ()> {
    loop {
        let frame = match decoder.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            // A real relay would drop the peer; interleaved or corrupted
            // frames must fail the test loudly.
            Err(error) => panic!("mock relay failed to decode inbound frame: {error}"),
        };

        let RelayFrame::Message {
            seq,
            peer_url: dest,
            data,
        } = frame
        else {
            continue;
        };

        if state.mute_acks.load(Ordering::Relaxed) {
            continue;
        }

        state
            .received
            .lock()
            .await
            .push((sender_url.to_owned(), dest.clone(), data.clone()));

        let dest_tx = state.peers.lock().await.get(&dest).cloned();
        let verdict = match dest_tx {
            Some(tx) => {
                let forwarded = RelayFrame::Message {
                    seq: 0,
                    peer_url: sender_url.to_owned(),
                    data,
                };
                let _ = tx.send(Command::Frame(forwarded)).await;
                RelayFrame::Ack { seq }
            }
            None => RelayFrame::Reject {
                seq: Some(seq),
                reason: format!("no such peer: {dest}"),
            },
        };
        sink.send(Message::Binary(encode_frame(&verdict).into()))
            .await
            .map_err(|_| ())?;
    }
}

async fn broadcast_presence(state: &Arc<RelayState>, peer_url: &str, joined: bool) {
    let frame = if joined {
        RelayFrame::PeerJoined {
            peer_url: peer_url.to_owned(),
        }
    } else {
        RelayFrame::PeerLeft {
            peer_url: peer_url.to_owned(),
        }
    };

    let peers: Vec<_> = state
        .peers
        .lock()
        .await
        .iter()
        .filter(|(url, _)| url.as_str() != peer_url)
        .map(|(_, tx)| tx.clone())
        .collect();
    for tx in peers {
        let _ = tx.send(Command::Frame(frame.clone())).await;
    }
}

/// Client config tuned for fast in-process tests.
pub fn fast_config() -> Config {
    Config {
        connect_timeout: Duration::from_secs(2),
        read_timeout: Duration::from_secs(2),
        ack_timeout: Duration::from_millis(500),
        max_frame_size: 256,
        reconnect_max_attempts: 5,
        reconnect_base_delay: Duration::from_millis(10),
        reconnect_max_delay: Duration::from_millis(100),
    }
}
