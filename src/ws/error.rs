#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket server
    #[cfg(feature = "tungstenite")]
    Connection(tokio_tungstenite::tungstenite::Error),
    /// The endpoint could not be turned into a WebSocket handshake request
    InvalidEndpoint(String),
    /// A configured header name or value is not valid HTTP
    InvalidHeader(String),
    /// The transport is not in the `OPEN` ready-state
    NotOpen,
    /// WebSocket connection was closed
    ConnectionClosed,
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "tungstenite")]
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::InvalidEndpoint(reason) => write!(f, "Invalid WebSocket endpoint: {reason}"),
            Self::InvalidHeader(name) => write!(f, "Invalid WebSocket header: {name}"),
            Self::NotOpen => write!(f, "WebSocket is not open"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            #[cfg(feature = "tungstenite")]
            Self::Connection(e) => Some(e),
            _ => None,
        }
    }
}

impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}
