//! Core traits for the connection manager's collaborators.

use tokio::sync::mpsc;

use super::config::Config;
use super::transport::EventSender;
use super::types::{ConnectionState, Inbound, ReadyState};

/// Opens transport handles for a [`ConnectionManager`](super::ConnectionManager).
///
/// The manager calls [`Transport::open`] every time it (re)connects. Implementations must not
/// block: the handshake happens in the background and its outcome is reported through the
/// [`EventSender`] as [`TransportEvent`](super::types::TransportEvent)s.
///
/// # Example
///
/// ```ignore
/// struct Loopback;
///
/// impl Transport for Loopback {
///     type Handle = LoopbackHandle;
///
///     fn open(&mut self, config: &Config, events: EventSender) -> crate::Result<LoopbackHandle> {
///         events.emit(TransportEvent::Open);
///         Ok(LoopbackHandle::new(events))
///     }
/// }
/// ```
pub trait Transport: Send + 'static {
    type Handle: TransportHandle;

    /// Start opening a connection to `config.endpoint`.
    ///
    /// An `Err` is a synchronous construction failure: the manager reports it as an `ERROR`
    /// state and does not retry.
    fn open(&mut self, config: &Config, events: EventSender) -> crate::Result<Self::Handle>;
}

/// A single live (or formerly live) duplex socket.
pub trait TransportHandle: Send + 'static {
    /// Current raw ready-state. Must reflect the live value, not a cached one.
    fn ready_state(&self) -> ReadyState;

    /// Write one text frame. Only called while the ready-state is `Open`.
    fn send(&mut self, payload: &str) -> crate::Result<()>;

    /// Begin closing the socket. Called only while `Connecting` or `Open`.
    fn close(&mut self);
}

/// Host-side sink for everything a connection manager observes.
///
/// Callbacks run on the manager's task, one at a time and in event order. They must not block.
/// Calling [`ConnectionManager::destroy`](super::ConnectionManager::destroy) from inside a
/// callback is allowed and takes effect before the callback returns.
///
/// The manager owns its notifier, so a notifier that keeps a strong
/// [`ConnectionManager`](super::ConnectionManager) clone forms a cycle and dropping the other
/// clones no longer tears the connection down. Hold a
/// [`WeakConnectionManager`](super::connection::WeakConnectionManager) instead.
pub trait Notifier: Send + 'static {
    /// Called for every phase transition and every inbound message.
    fn on_state_change(&mut self, state: &ConnectionState);

    /// Called for every error condition, in addition to the matching state report.
    fn on_error(&mut self, message: &str);

    /// Called with each inbound payload, before the state report that carries it.
    fn on_message(&mut self, _message: &Inbound) {}
}

/// Everything a [`Notifier`] can be told, as a single value.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    State(ConnectionState),
    Error(String),
    Message(Inbound),
}

/// Forward notifications into a channel so hosts can consume them as an ordered stream.
impl Notifier for mpsc::UnboundedSender<Notification> {
    fn on_state_change(&mut self, state: &ConnectionState) {
        _ = self.send(Notification::State(state.clone()));
    }

    fn on_error(&mut self, message: &str) {
        _ = self.send(Notification::Error(message.to_owned()));
    }

    fn on_message(&mut self, message: &Inbound) {
        _ = self.send(Notification::Message(message.clone()));
    }
}
