//! Error taxonomy for the relay client.
//!
//! Establishment failures (`ConnectError`) and send-path failures
//! (`SendError`) surface synchronously to the caller. Everything the pump
//! recovers from on its own — per-frame decode errors, transient drops under
//! retry — is reported through the event queue instead.

use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Failure to establish (or re-establish) a relay session.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The dial or handshake did not complete within the configured bound.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    /// TLS negotiation with the relay failed.
    #[error("tls handshake failed: {0}")]
    Tls(String),
    /// Socket-level failure while dialing or during the handshake.
    #[error("websocket connect failed: {0}")]
    Transport(Box<tungstenite::Error>),
    /// The relay refused the session.
    #[error("relay rejected the session: {0}")]
    Rejected(String),
    /// The relay closed the socket before assigning a peer address.
    #[error("relay closed before assigning a peer address")]
    Closed,
    /// The signal URL is not a `ws://` or `wss://` URL.
    #[error("invalid signal url: {0}")]
    InvalidUrl(String),
    /// The relay sent bytes that do not decode during the handshake.
    #[error("frame decode failed during handshake: {0}")]
    Codec(#[from] frames::CodecError),
}

impl ConnectError {
    /// Classify a tungstenite error, splitting out the TLS sub-cause.
    pub(crate) fn from_ws(error: tungstenite::Error) -> Self {
        match error {
            tungstenite::Error::Tls(tls) => Self::Tls(tls.to_string()),
            other => Self::Transport(Box::new(other)),
        }
    }
}

/// Failure to deliver one outbound message.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// No active session; `send` never connects implicitly.
    #[error("not connected to a relay")]
    NotConnected,
    /// The relay refused the destination.
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),
    /// Socket-level failure while writing, or the session dropped while the
    /// message was in flight.
    #[error("transport failed: {0}")]
    Transport(String),
    /// The relay did not acknowledge the message within the configured bound.
    #[error("timed out waiting for relay acknowledgement")]
    AckTimeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_error_displays_sub_cause() {
        let err = ConnectError::Timeout(Duration::from_secs(10));
        assert!(err.to_string().contains("timed out"));

        let err = ConnectError::Rejected("session refused".to_owned());
        assert_eq!(err.to_string(), "relay rejected the session: session refused");
    }

    #[test]
    fn ws_error_classification_splits_tls() {
        let err = ConnectError::from_ws(tungstenite::Error::ConnectionClosed);
        assert!(matches!(err, ConnectError::Transport(_)));
    }

    #[test]
    fn send_error_messages_name_the_failure() {
        assert_eq!(
            SendError::NotConnected.to_string(),
            "not connected to a relay"
        );
        assert!(
            SendError::PeerUnreachable("no such peer".to_owned())
                .to_string()
                .contains("no such peer")
        );
    }
}
