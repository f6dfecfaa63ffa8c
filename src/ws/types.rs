use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_repr::Serialize_repr;
use strum_macros::Display;

use crate::Result;

/// High-level connection phase reported to the host.
///
/// `Closed` and `Error` are not terminal: the manager moves back to `Connecting` when it
/// reconnects.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Connecting,
    Open,
    Closed,
    Error,
}

/// Raw ready-state of the underlying transport, numbered the way browsers number
/// `WebSocket.readyState`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    /// Convert a raw code back into a [`ReadyState`]. Unknown codes map to `Closed`.
    #[must_use]
    pub const fn from_u8(code: u8) -> Self {
        match code {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether a transport in this state still needs an explicit close.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

/// A payload received from the remote peer.
///
/// Text frames are decoded as JSON when possible; anything else is passed through verbatim.
/// Decoding never fails.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Inbound {
    Json(Value),
    Text(String),
}

impl Inbound {
    #[must_use]
    pub fn decode(raw: String) -> Self {
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(raw),
        }
    }

    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Json(Value::String(text)) => Some(text),
            Self::Json(_) => None,
        }
    }

    /// Deserialize a decoded JSON payload into a concrete type.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        let value = match self {
            Self::Json(value) => value.clone(),
            Self::Text(text) => Value::String(text.clone()),
        };
        Ok(serde_json::from_value(value)?)
    }
}

/// A payload submitted for sending.
///
/// Text is written as-is, structured values are serialized to JSON text.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Json(Value),
}

impl Outbound {
    /// Serialize any [`Serialize`] value into a structured outbound payload.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    /// The text frame that goes on the wire.
    #[must_use]
    pub fn into_payload(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Json(value) => value.to_string(),
        }
    }
}

impl From<String> for Outbound {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Outbound {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Value> for Outbound {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Immutable snapshot of a connection, as handed to the host.
///
/// Serializes to the dictionary shape hosts expect:
/// `{"state": "OPEN", "last_message": ..., "error": null, "ready_state": 1}`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionState {
    #[serde(rename = "state")]
    pub phase: Phase,
    /// Last payload delivered to the application
    pub last_message: Option<Inbound>,
    /// Human-readable description of the last failure, if this snapshot reports one
    pub error: Option<String>,
    /// Live ready-state of the transport when the snapshot was taken
    pub ready_state: ReadyState,
}

impl ConnectionState {
    #[must_use]
    pub fn new(
        phase: Phase,
        last_message: Option<Inbound>,
        error: Option<String>,
        ready_state: ReadyState,
    ) -> Self {
        Self {
            phase,
            last_message,
            error,
            ready_state,
        }
    }

    /// The snapshot a manager holds before anything has happened.
    #[must_use]
    pub fn initial() -> Self {
        Self::new(Phase::Connecting, None, None, ReadyState::Connecting)
    }

    /// Open in both the reported phase and the transport's own ready-state.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.phase == Phase::Open && self.ready_state == ReadyState::Open
    }
}

/// An event raised by a transport handle.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Error,
    Close {
        /// Close code as defined by RFC 6455
        code: u16,
        reason: String,
    },
}
