//! Typed events and the shared FIFO queue.
//!
//! DESIGN
//! ======
//! The pump is the sole producer and `get_events` the sole consumer. The
//! queue has its own lock, never held together with the transport lock, and
//! draining is destructive: an event is returned to exactly one caller,
//! exactly once, in arrival order.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use serde::{Serialize, Serializer};

/// One asynchronous occurrence on the relay session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A peer became reachable through the relay.
    PeerJoined { peer_url: String },
    /// A peer left the relay.
    PeerLeft { peer_url: String },
    /// An addressed payload arrived; `peer_url` is the sender.
    MessageReceived {
        peer_url: String,
        #[serde(serialize_with = "lossy_text")]
        data: Vec<u8>,
    },
    /// A fault the client recovered from (or gave up on) in the background.
    ConnectionError { message: String },
    /// A transient drop was healed; `peer_url` is the (possibly new) local
    /// address assigned by the relay.
    Reconnected { peer_url: String },
}

/// Serialize payload bytes as lossy UTF-8 text for display surfaces.
fn lossy_text<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(data))
}

/// FIFO queue between the pump and `get_events`.
#[derive(Debug, Default)]
pub struct EventQueue {
    inner: Mutex<VecDeque<Event>>,
}

impl EventQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event in arrival order.
    pub fn push(&self, event: Event) {
        self.lock().push_back(event);
    }

    /// Remove and return everything currently queued. Non-blocking; an empty
    /// queue yields an empty vec.
    #[must_use]
    pub fn drain(&self) -> Vec<Event> {
        self.lock().drain(..).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Event>> {
        // A panic while holding the lock only ever leaves a fully-formed
        // queue behind, so the poisoned state is safe to reuse.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "event_test.rs"]
mod tests;
