//! Resilient WebSocket connection management.
//!
//! This module provides a connection manager that owns one logical duplex stream, keeps it
//! alive across disconnects and reports every observable change to the host.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: Owns the connection lifecycle, reconnection with backoff and the
//!   outbound queue, running as a single task per connection
//! - [`Transport`]: Trait for the underlying socket primitive, with a `tokio-tungstenite`
//!   implementation behind the `tungstenite` feature
//! - [`Notifier`]: Trait for the host-side sink that receives [`ConnectionState`] snapshots,
//!   errors and inbound payloads
//!
//! # Example
//!
//! ```ignore
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Notification>();
//! let connection = ConnectionManager::new(config, TungsteniteTransport, tx)?;
//! connection.connect();
//!
//! while let Some(Notification::State(state)) = rx.recv().await {
//!     println!("{} ({:?})", state.phase, state.error);
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod traits;
pub mod transport;
pub mod types;

pub use connection::{ConnectionManager, WeakConnectionManager};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use traits::*;
pub use transport::EventSender;
pub use types::{ConnectionState, Inbound, Outbound, Phase, ReadyState, TransportEvent};
