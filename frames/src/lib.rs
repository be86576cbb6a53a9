//! Shared frame model and codec for the relay wire protocol.
//!
//! This crate owns the wire representation spoken between a peer client and
//! the signal relay: a 5-byte header (frame kind + big-endian body length)
//! followed by a protobuf-encoded body. The header exists so the stream can
//! be reframed without decoding the body; the relay and the client both feed
//! raw socket chunks into [`FrameDecoder`], which reassembles frames across
//! arbitrary chunk boundaries.
//!
//! DESIGN
//! ======
//! - Every per-frame failure is recoverable: the decoder always consumes the
//!   declared body length, so a bad frame never desynchronizes the ones
//!   behind it.
//! - The body length is bounded by `max_frame_size` before any allocation.
//!   Oversized bodies are skipped in place (`FrameTooLarge`), which keeps
//!   memory bounded against a misbehaving relay.

use bytes::{Buf, BytesMut};
use prost::Message;

/// Bytes in the fixed frame header: 1 kind byte + 4 length bytes.
pub const HEADER_LEN: usize = 5;

/// Default upper bound on a frame body, in bytes.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Error returned by [`FrameDecoder::next_frame`].
///
/// All variants are per-frame: the offending frame has been consumed (or is
/// being skipped) by the time the error is returned, and the next call picks
/// up at the following frame boundary.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The kind byte on the wire does not map to a known [`Kind`].
    #[error("unknown frame kind: {0}")]
    UnknownKind(u8),
    /// The header declared a body larger than the configured bound.
    #[error("frame body of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
    /// The body bytes could not be decoded as a protobuf `WireBody`.
    #[error("failed to decode frame body: {0}")]
    Decode(#[from] prost::DecodeError),
    /// The body decoded but a field required by the frame kind was absent.
    #[error("frame missing required field `{0}`")]
    MissingField(&'static str),
}

/// Frame kind discriminant, the first byte of every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    /// Client opens the handshake.
    Hello,
    /// Relay answers the handshake with the assigned peer address.
    Welcome,
    /// A peer became reachable through the relay.
    PeerJoined,
    /// A peer left the relay.
    PeerLeft,
    /// Addressed payload: destination outbound, source inbound.
    Message,
    /// Relay accepted an outbound message.
    Ack,
    /// Relay refused a handshake or an outbound message.
    Reject,
}

impl Kind {
    /// Wire value of this kind.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Hello => 0,
            Self::Welcome => 1,
            Self::PeerJoined => 2,
            Self::PeerLeft => 3,
            Self::Message => 4,
            Self::Ack => 5,
            Self::Reject => 6,
        }
    }

    /// Parse a kind from its wire value.
    fn from_u8(value: u8) -> Result<Self, CodecError> {
        match value {
            0 => Ok(Self::Hello),
            1 => Ok(Self::Welcome),
            2 => Ok(Self::PeerJoined),
            3 => Ok(Self::PeerLeft),
            4 => Ok(Self::Message),
            5 => Ok(Self::Ack),
            6 => Ok(Self::Reject),
            other => Err(CodecError::UnknownKind(other)),
        }
    }
}

/// A single decoded message on the relay wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayFrame {
    /// Client → relay: open the session handshake.
    Hello,
    /// Relay → client: session accepted, `peer_url` is the assigned address.
    Welcome { peer_url: String },
    /// Relay → client: `peer_url` became reachable.
    PeerJoined { peer_url: String },
    /// Relay → client: `peer_url` left.
    PeerLeft { peer_url: String },
    /// Addressed payload. Outbound `peer_url` is the destination and `seq`
    /// correlates the relay's ack; inbound `peer_url` is the source.
    Message {
        seq: u64,
        peer_url: String,
        data: Vec<u8>,
    },
    /// Relay → client: message `seq` was accepted for delivery.
    Ack { seq: u64 },
    /// Relay → client: refusal. `seq` is present when refusing a message,
    /// absent when refusing the handshake itself.
    Reject { seq: Option<u64>, reason: String },
}

impl RelayFrame {
    /// Wire kind of this frame.
    #[must_use]
    pub fn kind(&self) -> Kind {
        match self {
            Self::Hello => Kind::Hello,
            Self::Welcome { .. } => Kind::Welcome,
            Self::PeerJoined { .. } => Kind::PeerJoined,
            Self::PeerLeft { .. } => Kind::PeerLeft,
            Self::Message { .. } => Kind::Message,
            Self::Ack { .. } => Kind::Ack,
            Self::Reject { .. } => Kind::Reject,
        }
    }
}

/// Encode a frame into header + protobuf body bytes.
///
/// # Panics
///
/// Never panics in practice; writing to `Vec<u8>` is infallible and body
/// lengths fit in `u32` for any frame this library constructs.
#[must_use]
pub fn encode_frame(frame: &RelayFrame) -> Vec<u8> {
    let body = frame_to_body(frame);
    let body_len = body.encoded_len();

    let mut out = Vec::with_capacity(HEADER_LEN + body_len);
    out.push(frame.kind().as_u8());
    out.extend_from_slice(&u32::try_from(body_len).unwrap_or(u32::MAX).to_be_bytes());
    // Encoding into a Vec<u8> is infallible; the only error prost returns
    // here is `BufferTooSmall`, which cannot occur with a growable Vec.
    body.encode(&mut out).unwrap_or_default();
    out
}

fn frame_to_body(frame: &RelayFrame) -> WireBody {
    match frame {
        RelayFrame::Hello => WireBody::default(),
        RelayFrame::Welcome { peer_url }
        | RelayFrame::PeerJoined { peer_url }
        | RelayFrame::PeerLeft { peer_url } => WireBody {
            peer_url: Some(peer_url.clone()),
            ..WireBody::default()
        },
        RelayFrame::Message {
            seq,
            peer_url,
            data,
        } => WireBody {
            seq: Some(*seq),
            peer_url: Some(peer_url.clone()),
            data: Some(data.clone()),
            reason: None,
        },
        RelayFrame::Ack { seq } => WireBody {
            seq: Some(*seq),
            ..WireBody::default()
        },
        RelayFrame::Reject { seq, reason } => WireBody {
            seq: *seq,
            reason: Some(reason.clone()),
            ..WireBody::default()
        },
    }
}

fn body_to_frame(kind: Kind, body: WireBody) -> Result<RelayFrame, CodecError> {
    let peer_url = |body: &WireBody| {
        body.peer_url
            .clone()
            .ok_or(CodecError::MissingField("peer_url"))
    };

    match kind {
        Kind::Hello => Ok(RelayFrame::Hello),
        Kind::Welcome => Ok(RelayFrame::Welcome {
            peer_url: peer_url(&body)?,
        }),
        Kind::PeerJoined => Ok(RelayFrame::PeerJoined {
            peer_url: peer_url(&body)?,
        }),
        Kind::PeerLeft => Ok(RelayFrame::PeerLeft {
            peer_url: peer_url(&body)?,
        }),
        Kind::Message => Ok(RelayFrame::Message {
            seq: body.seq.ok_or(CodecError::MissingField("seq"))?,
            peer_url: peer_url(&body)?,
            data: body.data.unwrap_or_default(),
        }),
        Kind::Ack => Ok(RelayFrame::Ack {
            seq: body.seq.ok_or(CodecError::MissingField("seq"))?,
        }),
        Kind::Reject => Ok(RelayFrame::Reject {
            seq: body.seq,
            reason: body.reason.ok_or(CodecError::MissingField("reason"))?,
        }),
    }
}

/// Incremental frame decoder over a raw byte stream.
///
/// Feed socket chunks with [`feed`](Self::feed), then call
/// [`next_frame`](Self::next_frame) until it returns `Ok(None)` (need more
/// bytes). The decoder never trusts the length field beyond `max_frame_size`
/// and discards oversized bodies without buffering them.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_size: usize,
    /// Remaining body bytes to discard after a rejected header.
    skip: usize,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_size,
            skip: 0,
        }
    }

    /// Append raw bytes received from the transport.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes currently buffered and not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Try to decode the next complete frame.
    ///
    /// Returns `Ok(None)` when the buffer holds only a partial frame.
    ///
    /// # Errors
    ///
    /// Per-frame failures ([`CodecError`]) are recoverable: the bad frame's
    /// declared body is consumed (or scheduled for skipping), so calling
    /// again resumes at the next frame boundary.
    pub fn next_frame(&mut self) -> Result<Option<RelayFrame>, CodecError> {
        // Finish discarding an oversized or unknown body first.
        if self.skip > 0 {
            let drop = self.skip.min(self.buf.len());
            self.buf.advance(drop);
            self.skip -= drop;
            if self.skip > 0 {
                return Ok(None);
            }
        }

        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let kind_byte = self.buf[0];
        let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;

        if len > self.max_frame_size {
            self.buf.advance(HEADER_LEN);
            self.skip = len;
            return Err(CodecError::FrameTooLarge {
                len,
                max: self.max_frame_size,
            });
        }

        let kind = match Kind::from_u8(kind_byte) {
            Ok(kind) => kind,
            Err(err) => {
                // Length is still trusted (bounded above), so the body can
                // be skipped and the stream resynchronizes.
                self.buf.advance(HEADER_LEN);
                self.skip = len;
                return Err(err);
            }
        };

        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }

        self.buf.advance(HEADER_LEN);
        let body_bytes = self.buf.split_to(len);
        let body = WireBody::decode(body_bytes.as_ref())?;
        body_to_frame(kind, body).map(Some)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Protobuf body shared by every frame kind; which fields are required
/// depends on the kind byte in the header.
#[derive(Clone, PartialEq, Message)]
struct WireBody {
    #[prost(uint64, optional, tag = "1")]
    seq: Option<u64>,
    #[prost(string, optional, tag = "2")]
    peer_url: Option<String>,
    #[prost(bytes = "vec", optional, tag = "3")]
    data: Option<Vec<u8>>,
    #[prost(string, optional, tag = "4")]
    reason: Option<String>,
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
