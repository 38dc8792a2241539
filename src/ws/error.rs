#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

use crate::error::Kind;

/// Socket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the socket server
    Connection(tokio_tungstenite::tungstenite::Error),
    /// A zero-length frame was read off the wire
    EmptyFrame,
    /// The frame's leading byte is not one of `o`, `h`, `c` or `a`
    UnknownFrameType {
        /// The raw frame, kept verbatim for diagnostics
        raw: Vec<u8>,
    },
    /// The JSON array of a data frame, or a push payload, could not be decoded
    Decode(serde_json::Error),
    /// The server broke the framing protocol, e.g. by not opening with an `o` frame
    ProtocolViolation(String),
    /// The connection is closed, with the reason it was torn down
    ConnectionClosed {
        /// Why the connection went away
        reason: String,
    },
    /// The request's deadline passed before a reply arrived
    Timeout,
    /// Every attempt at answering a heartbeat failed
    PingExhausted {
        /// How many writes were attempted
        attempts: u8,
    },
}

impl WsError {
    pub(crate) fn closed<S: Into<String>>(reason: S) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::EmptyFrame => write!(f, "empty frame received"),
            Self::UnknownFrameType { raw } => write!(
                f,
                "unknown frame type received. Raw: {}",
                String::from_utf8_lossy(raw)
            ),
            Self::Decode(e) => write!(f, "Failed to decode frame payload: {e}"),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {msg}"),
            Self::ConnectionClosed { reason } => write!(f, "WebSocket connection closed: {reason}"),
            Self::Timeout => write!(f, "WebSocket request timed out"),
            Self::PingExhausted { attempts } => {
                write!(f, "failed to ping after {attempts} attempts")
            }
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        let kind = match e {
            WsError::Timeout | WsError::PingExhausted { .. } => Kind::Timeout,
            _ => Kind::WebSocket,
        };
        crate::error::Error::with_source(kind, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(Kind::WebSocket, WsError::Connection(e))
    }
}
