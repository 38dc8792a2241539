//! Payloads of the push events the core itself needs to look into.
//!
//! Entity bodies stay opaque: [`EntityEvent::entity`] holds the same JSON the REST API returns
//! for `entityType/item`, to be decoded by the embedding application.

use std::fmt;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::value::RawValue;

use crate::ws::error::WsError;
use crate::Result;

/// What happened to the entity in a `props` event.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum_macros::Display)]
pub enum EventType {
    Created,
    Updated,
    Deleted,
}

/// Body of a `props` push event.
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityEvent {
    pub event_type: EventType,
    /// e.g. `order`, `position`, `cashBalance`
    pub entity_type: String,
    entity: Box<RawValue>,
}

impl EntityEvent {
    /// The raw JSON of the entity (an object, or an array of objects).
    #[must_use]
    pub fn entity(&self) -> &str {
        self.entity.get()
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(self.entity.get()).map_err(WsError::Decode)?)
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum_macros::Display)]
pub enum ShutdownCode {
    Maintenance,
    ConnectionQuotaReached,
    IPQuotaReached,
}

/// Body of a `shutdown` push event, sent before the server closes the connection.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownNotice {
    pub reason_code: Option<ShutdownCode>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl fmt::Display for ShutdownNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason_code {
            Some(code) => write!(f, "shutdown received with code {code}")?,
            None => write!(f, "shutdown received")?,
        }

        match self.reason.as_deref() {
            Some(reason) if !reason.is_empty() => write!(f, ". Reason: {reason}"),
            _ => Ok(()),
        }
    }
}
