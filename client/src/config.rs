//! Client tuning knobs: timeouts, frame bound, and reconnect backoff.

use std::time::Duration;

/// Tunables for a [`crate::RelayClient`].
#[derive(Clone, Debug)]
pub struct Config {
    /// Bound on the dial plus `Hello`/`Welcome` handshake.
    pub connect_timeout: Duration,
    /// Bound on a single read before the pump treats the session as dropped.
    pub read_timeout: Duration,
    /// Bound on waiting for the relay's ack of an outbound message.
    pub ack_timeout: Duration,
    /// Largest frame body the decoder will buffer.
    pub max_frame_size: usize,
    /// Reconnect attempts before giving up on a dropped session.
    pub reconnect_max_attempts: u32,
    /// Delay before the first reconnect attempt; doubles per attempt.
    pub reconnect_base_delay: Duration,
    /// Cap on the per-attempt reconnect delay.
    pub reconnect_max_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(5),
            max_frame_size: frames::DEFAULT_MAX_FRAME_SIZE,
            reconnect_max_attempts: 5,
            reconnect_base_delay: Duration::from_millis(250),
            reconnect_max_delay: Duration::from_secs(8),
        }
    }
}

impl Config {
    /// Defaults overridden by `RELAY_*` environment variables where set.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_u64("RELAY_CONNECT_TIMEOUT_MS") {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("RELAY_READ_TIMEOUT_MS") {
            config.read_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("RELAY_ACK_TIMEOUT_MS") {
            config.ack_timeout = Duration::from_millis(ms);
        }
        if let Some(bytes) = env_u64("RELAY_MAX_FRAME_SIZE") {
            config.max_frame_size = usize::try_from(bytes).unwrap_or(usize::MAX);
        }
        if let Some(attempts) = env_u64("RELAY_RECONNECT_MAX_ATTEMPTS") {
            config.reconnect_max_attempts = u32::try_from(attempts).unwrap_or(u32::MAX);
        }
        config
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.parse().ok()
}
