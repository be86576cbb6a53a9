//! Signal-relay peer client.
//!
//! ARCHITECTURE
//! ============
//! A [`RelayClient`] owns at most one live session against a signal relay.
//! `connect` performs the secure WebSocket dial plus `Hello`/`Welcome`
//! handshake and spawns the event pump, a background task that owns the read
//! half of the socket, decodes wire frames, and appends typed [`Event`]s to a
//! shared FIFO queue. Callers drain that queue with `get_events` and push
//! addressed payloads with `send`, which serializes writes over the shared
//! write half. Transient transport drops are healed in place with bounded,
//! jittered backoff; only exhausted retries surface to pollers as a
//! [`Event::ConnectionError`].

mod client;
mod config;
mod conn;
mod error;
mod event;
mod pump;

pub use client::RelayClient;
pub use config::Config;
pub use conn::LinkState;
pub use error::{ConnectError, SendError};
pub use event::{Event, EventQueue};
