//! Wire framing for the Tradovate socket.
//!
//! Every physical message starts with a one byte discriminator:
//!
//! | Byte | Frame                                             |
//! |------|---------------------------------------------------|
//! | `o`  | [`Frame::Open`], the server is ready for `authorize` |
//! | `h`  | [`Frame::Heartbeat`], must be answered with `[]`    |
//! | `c`  | [`Frame::Close`], the peer is going away            |
//! | `a`  | [`Frame::Data`], followed by a JSON array of [`Message`]s |

use std::fmt::Write as _;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::value::RawValue;

use super::error::WsError;
use super::types::{EntityEvent, ShutdownNotice};
use crate::Result;

/// Payload sent in reply to a heartbeat frame.
pub const HEARTBEAT_REPLY: &str = "[]";

/// One decoded unit read off the socket.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Frame {
    Open,
    Heartbeat,
    Close,
    Data(Vec<Message>),
}

/// The `e` field of a [`Message`].
///
/// Replies to requests carry no `e` field at all and decode as [`EventKind::Unsolicited`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// No event tag: a reply correlated by its `i` field
    #[default]
    #[serde(skip_deserializing)]
    Unsolicited,
    /// An entity was created, updated or deleted
    Props,
    /// The server is about to close the connection
    Shutdown,
    /// Quotes, DOMs or histograms
    #[serde(rename = "md")]
    MarketData,
    Chart,
    /// Market replay clock synchronization
    Clock,
}

/// A single request reply or push event carried in a [`Frame::Data`].
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(rename = "e", default)]
    pub event: EventKind,
    /// Correlation id; `0` for push events
    #[serde(rename = "i", default)]
    pub id: u64,
    #[serde(rename = "s", default)]
    pub status: i64,
    #[serde(rename = "d", default)]
    data: Option<Box<RawValue>>,
}

impl Message {
    /// Builds a message by hand, mostly useful for tests and replaying recorded traffic.
    pub fn new(event: EventKind, id: u64, status: i64, data: &str) -> Result<Self> {
        let data = RawValue::from_string(data.to_owned()).map_err(WsError::Decode)?;

        Ok(Self {
            event,
            id,
            status,
            data: Some(data),
        })
    }

    /// A reply to an outstanding request rather than a server-pushed event.
    #[must_use]
    pub fn is_reply(&self) -> bool {
        self.event == EventKind::Unsolicited
    }

    /// Replies with a `2xx` or `3xx` status are successful.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }

    /// The raw JSON text of the `d` field, `null` when it was absent.
    #[must_use]
    pub fn payload(&self) -> &str {
        self.data.as_deref().map_or("null", RawValue::get)
    }

    /// Decodes the `d` field into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(self.payload()).map_err(WsError::Decode)?)
    }

    /// Decodes the body of a `props` event.
    pub fn entity_event(&self) -> Result<EntityEvent> {
        self.decode()
    }

    /// Decodes the body of a `shutdown` event.
    pub fn shutdown_notice(&self) -> Result<ShutdownNotice> {
        self.decode()
    }

    /// The text carried by a failed reply: the unquoted string when `d` is a JSON string,
    /// otherwise the raw JSON.
    pub(crate) fn error_text(&self) -> String {
        serde_json::from_str::<String>(self.payload()).unwrap_or_else(|_| self.payload().to_owned())
    }
}

/// Decodes one physical socket message into a [`Frame`].
///
/// Only the `a` frame carries a body; trailing bytes after `o`, `h` and `c` are ignored.
pub fn parse(raw: &[u8]) -> std::result::Result<Frame, WsError> {
    let Some((&tag, body)) = raw.split_first() else {
        return Err(WsError::EmptyFrame);
    };

    match tag {
        b'o' => Ok(Frame::Open),
        b'h' => Ok(Frame::Heartbeat),
        b'c' => Ok(Frame::Close),
        b'a' => serde_json::from_slice(body)
            .map(Frame::Data)
            .map_err(WsError::Decode),
        _ => Err(WsError::UnknownFrameType { raw: raw.to_vec() }),
    }
}

/// Encodes an outbound request: `path`, id and query on their own lines, then the optional body.
pub(crate) fn encode_request(path: &str, id: u64, query: &str, body: Option<&str>) -> String {
    let mut payload = String::with_capacity(
        path.len() + query.len() + body.map_or(0, str::len) + 24,
    );

    // Writing into a String cannot fail
    let _ = write!(payload, "{path}\n{id}\n{query}\n");
    if let Some(body) = body {
        payload.push_str(body);
    }

    payload
}
