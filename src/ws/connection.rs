#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::config::{Config, ReconnectBackoff};
use super::traits::{Notifier, Transport, TransportHandle};
use super::transport::EventSender;
use super::types::{ConnectionState, Inbound, Outbound, Phase, ReadyState, TransportEvent};
use crate::Result;

/// Close code for a connection that dropped without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Message reported for runtime transport errors. Transports do not expose more detail.
pub const CONNECTION_ERROR_MESSAGE: &str = "WebSocket connection error";

/// Everything the manager task reacts to, in one ordered stream.
#[derive(Debug)]
pub(crate) enum Input {
    Connect,
    Send {
        payload: String,
        reply: oneshot::Sender<bool>,
    },
    Destroy,
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    ReconnectDue {
        timer: u64,
    },
}

/// Manages a single WebSocket connection: lifecycle, reconnection, outbound queue and state
/// reporting.
///
/// All work happens on one background task per manager. Commands from any clone of the
/// manager, events from the transport and reconnection timers are serialized through a
/// single channel, so the [`Notifier`] observes state changes in exactly the order they
/// occurred.
///
/// - Reconnects after a close with exponential backoff plus jitter, up to
///   `max_attempts` consecutive attempts
/// - Queues messages submitted while the socket is not open and drains them in FIFO order
///   once it opens
/// - Reports every transition as a [`ConnectionState`] snapshot
///
/// Must be created inside a tokio runtime. Dropping the last clone tears the connection down.
/// A [`Notifier`] that needs to reach its own manager should hold a
/// [`WeakConnectionManager`]; a strong clone inside the notifier keeps the manager alive until
/// [`destroy`](Self::destroy) is called.
///
/// # Example
///
/// ```rust, no_run
/// use livefeed::ws::{ConnectionManager, Notification};
/// use livefeed::ws::config::Config;
///
/// # async fn example() -> livefeed::Result<()> {
/// let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Notification>();
/// let manager = ConnectionManager::open(Config::new("wss://feed.example.com/ws"), tx)?;
///
/// manager.send("hello").await;
///
/// while let Some(notification) = rx.recv().await {
///     println!("{notification:?}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

struct Shared {
    /// Ordered input channel into the manager task
    input_tx: mpsc::UnboundedSender<Input>,
    /// Latest reported snapshot
    state_rx: watch::Receiver<ConnectionState>,
    /// Cancelled exactly once, when the manager is torn down
    teardown: CancellationToken,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.teardown.cancel();
        _ = self.input_tx.send(Input::Destroy);
    }
}

impl ConnectionManager {
    /// Create a manager and start its task. Nothing is opened until [`Self::connect`].
    pub fn new<T, N>(config: Config, transport: T, notifier: N) -> Result<Self>
    where
        T: Transport,
        N: Notifier,
    {
        config.validate()?;

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::initial());
        let teardown = CancellationToken::new();

        let driver = Driver {
            backoff: ReconnectBackoff::new(&config.reconnect),
            config,
            transport,
            notifier,
            input_tx: input_tx.clone(),
            state_tx,
            teardown: teardown.clone(),
            socket: None,
            generation: 0,
            attempts: 0,
            queue: VecDeque::new(),
            timer: None,
            next_timer_id: 0,
            last_message: None,
        };

        tokio::spawn(driver.run(input_rx));

        Ok(Self {
            shared: Arc::new(Shared {
                input_tx,
                state_rx,
                teardown,
            }),
        })
    }

    /// (Re)open the connection, discarding any current transport and pending reconnection.
    ///
    /// No-op once the manager has been destroyed.
    pub fn connect(&self) {
        if self.is_destroyed() {
            return;
        }

        _ = self.shared.input_tx.send(Input::Connect);
    }

    /// Submit a message.
    ///
    /// Returns `true` only if the message was handed to an open transport. While the
    /// transport is still connecting or is closed the message is queued and `false` is
    /// returned; it goes out, in order, the next time the connection opens. Without any
    /// transport the message is dropped.
    pub async fn send<M: Into<Outbound>>(&self, message: M) -> bool {
        if self.is_destroyed() {
            return false;
        }

        let (reply, reply_rx) = oneshot::channel();
        let input = Input::Send {
            payload: message.into().into_payload(),
            reply,
        };
        if self.shared.input_tx.send(input).is_err() {
            return false;
        }

        reply_rx.await.unwrap_or(false)
    }

    /// Serialize `message` to JSON and [`send`](Self::send) it.
    pub async fn send_json<R: Serialize + ?Sized>(&self, message: &R) -> Result<bool> {
        let outbound = Outbound::json(message)?;
        Ok(self.send(outbound).await)
    }

    /// Tear the manager down for good.
    ///
    /// Takes effect immediately, also when called from inside a [`Notifier`] callback: no
    /// further state is reported, any pending reconnection is cancelled, the transport is
    /// closed and queued messages are discarded.
    pub fn destroy(&self) {
        if self.shared.teardown.is_cancelled() {
            return;
        }

        self.shared.teardown.cancel();
        _ = self.shared.input_tx.send(Input::Destroy);
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.shared.teardown.is_cancelled()
    }

    /// Get the most recently reported state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state_rx.borrow().clone()
    }

    /// Create a handle that does not keep the manager alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakConnectionManager {
        WeakConnectionManager {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Subscribe to state snapshots.
    ///
    /// A watch receiver only keeps the latest value; use a [`Notifier`] to see every
    /// transition.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_rx.clone()
    }
}

/// Non-owning handle to a [`ConnectionManager`], obtained with
/// [`ConnectionManager::downgrade`].
#[derive(Clone)]
pub struct WeakConnectionManager {
    shared: Weak<Shared>,
}

impl WeakConnectionManager {
    /// Get a strong handle, or `None` once every [`ConnectionManager`] clone is gone.
    #[must_use]
    pub fn upgrade(&self) -> Option<ConnectionManager> {
        self.shared
            .upgrade()
            .map(|shared| ConnectionManager { shared })
    }
}

#[cfg(feature = "tungstenite")]
impl ConnectionManager {
    /// Create a manager on [`TungsteniteTransport`](super::transport::TungsteniteTransport) and
    /// start connecting right away.
    pub fn open<N: Notifier>(config: Config, notifier: N) -> Result<Self> {
        let manager = Self::new(config, super::transport::TungsteniteTransport, notifier)?;
        manager.connect();
        Ok(manager)
    }
}

/// A transport handle together with the sender its events arrive through.
struct Socket<H> {
    handle: H,
    events: EventSender,
}

/// Cancellable deferred `connect()`.
struct ReconnectTimer {
    id: u64,
    cancel: CancellationToken,
}

/// State owned by the manager task.
struct Driver<T: Transport, N: Notifier> {
    config: Config,
    transport: T,
    notifier: N,
    input_tx: mpsc::UnboundedSender<Input>,
    state_tx: watch::Sender<ConnectionState>,
    teardown: CancellationToken,
    socket: Option<Socket<T::Handle>>,
    /// Bumped for every opened transport; events tagged with an older value are stale
    generation: u64,
    /// Consecutive reconnection attempts since the last successful open
    attempts: u32,
    backoff: ReconnectBackoff,
    queue: VecDeque<String>,
    timer: Option<ReconnectTimer>,
    next_timer_id: u64,
    last_message: Option<Inbound>,
}

impl<T: Transport, N: Notifier> Driver<T, N> {
    async fn run(mut self, mut input_rx: mpsc::UnboundedReceiver<Input>) {
        while let Some(input) = input_rx.recv().await {
            match input {
                Input::Connect => self.connect(),
                Input::Send { payload, reply } => {
                    _ = reply.send(self.send(payload));
                }
                Input::Transport { generation, event } => self.on_event(generation, event),
                Input::ReconnectDue { timer } => self.on_reconnect_due(timer),
                Input::Destroy => {
                    self.destroy();
                    break;
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %self.config.endpoint, "Connection manager stopped");
    }

    fn is_torn_down(&self) -> bool {
        self.teardown.is_cancelled()
    }

    fn connect(&mut self) {
        if self.is_torn_down() {
            return;
        }

        self.cleanup();
        self.generation = self.generation.wrapping_add(1);
        let events = EventSender::new(self.input_tx.clone(), self.generation);

        match self.transport.open(&self.config, events.clone()) {
            Ok(handle) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    endpoint = %self.config.endpoint,
                    attempt = self.attempts,
                    "Opening WebSocket"
                );
                self.socket = Some(Socket { handle, events });
                self.report(Phase::Connecting, None);
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(endpoint = %self.config.endpoint, error = %e, "Unable to create WebSocket");
                let message = format!("Failed to create WebSocket: {e}");
                self.report(Phase::Error, Some(message.clone()));
                self.notify_error(&message);
            }
        }
    }

    fn on_event(&mut self, generation: u64, event: TransportEvent) {
        if self.is_torn_down() || generation != self.generation || self.socket.is_none() {
            #[cfg(feature = "tracing")]
            tracing::trace!(?event, generation, "Ignoring event from a discarded transport");
            return;
        }

        match event {
            TransportEvent::Open => {
                self.attempts = 0;
                self.backoff.reset();
                self.report(Phase::Open, None);
                self.flush();
            }
            TransportEvent::Message(raw) => {
                let message = Inbound::decode(raw);
                #[cfg(feature = "tracing")]
                tracing::trace!(?message, "Received message");
                self.last_message = Some(message.clone());
                self.notifier.on_message(&message);
                self.report(Phase::Open, None);
            }
            TransportEvent::Error => {
                self.report(Phase::Error, Some(CONNECTION_ERROR_MESSAGE.to_owned()));
                self.notify_error(CONNECTION_ERROR_MESSAGE);
            }
            TransportEvent::Close { code, reason } => {
                let description = close_description(code, &reason);
                #[cfg(feature = "tracing")]
                tracing::debug!(code, %description, "WebSocket closed");
                self.report(Phase::Closed, Some(description));

                if self.should_reconnect() {
                    self.schedule_reconnect();
                }
            }
        }
    }

    fn should_reconnect(&self) -> bool {
        !self.is_torn_down()
            && self.config.reconnect.enabled
            && self.attempts < self.config.reconnect.max_attempts
    }

    fn schedule_reconnect(&mut self) {
        self.cancel_timer();
        self.attempts = self.attempts.saturating_add(1);

        let delay = self.backoff.next_delay();
        let id = self.next_timer_id;
        self.next_timer_id = self.next_timer_id.wrapping_add(1);

        #[cfg(feature = "tracing")]
        tracing::debug!(attempt = self.attempts, ?delay, "Scheduling reconnect");

        let cancel = self.teardown.child_token();
        let fired = cancel.clone();
        let input_tx = self.input_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;

                () = fired.cancelled() => {}
                () = sleep(delay) => {
                    _ = input_tx.send(Input::ReconnectDue { timer: id });
                }
            }
        });

        self.timer = Some(ReconnectTimer { id, cancel });
    }

    fn on_reconnect_due(&mut self, id: u64) {
        match &self.timer {
            Some(timer) if timer.id == id && !timer.cancel.is_cancelled() => {
                self.timer = None;
                self.connect();
            }
            _ => {
                #[cfg(feature = "tracing")]
                tracing::trace!(id, "Ignoring stale reconnect timer");
            }
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel.cancel();
        }
    }

    /// Discard the current transport and any pending reconnection.
    fn cleanup(&mut self) {
        self.cancel_timer();

        if let Some(mut socket) = self.socket.take() {
            // Detach first so nothing fires from a handle that is being discarded
            socket.events.detach();
            if socket.handle.ready_state().is_live() {
                socket.handle.close();
            }
        }
    }

    fn destroy(&mut self) {
        self.teardown.cancel();
        self.cleanup();
        self.queue.clear();
    }

    fn ready_state(&self) -> Option<ReadyState> {
        self.socket
            .as_ref()
            .map(|socket| socket.handle.ready_state())
    }

    fn send(&mut self, payload: String) -> bool {
        if self.is_torn_down() {
            return false;
        }

        match self.ready_state() {
            None => {
                #[cfg(feature = "tracing")]
                tracing::debug!("No transport, dropping outbound message");
                false
            }
            Some(ReadyState::Open) if self.queue.is_empty() => self.transmit(&payload),
            Some(ReadyState::Open) => {
                // Older messages are still waiting, keep FIFO order
                self.queue.push_back(payload);
                self.flush()
            }
            Some(_) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(queued = self.queue.len() + 1, "Transport not open, queueing message");
                self.queue.push_back(payload);
                false
            }
        }
    }

    /// Write one payload to an open transport. A rejected payload is lost.
    fn transmit(&mut self, payload: &str) -> bool {
        let Some(socket) = self.socket.as_mut() else {
            return false;
        };

        match socket.handle.send(payload) {
            Ok(()) => true,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Failed to send message");
                let message = format!("Failed to send message: {e}");
                self.report(Phase::Error, Some(message.clone()));
                self.notify_error(&message);
                false
            }
        }
    }

    /// Drain the queue in order while the transport stays open. Returns `true` if the queue
    /// was emptied without a failed send.
    fn flush(&mut self) -> bool {
        while let Some(payload) = self.queue.pop_front() {
            if self.is_torn_down() || self.ready_state() != Some(ReadyState::Open) {
                self.queue.push_front(payload);
                return false;
            }

            if !self.transmit(&payload) {
                return false;
            }
        }

        true
    }

    fn report(&mut self, phase: Phase, error: Option<String>) {
        if self.is_torn_down() {
            return;
        }

        let ready_state = self.ready_state().unwrap_or(ReadyState::Closed);
        let state = ConnectionState::new(phase, self.last_message.clone(), error, ready_state);

        #[cfg(feature = "tracing")]
        tracing::trace!(%phase, ?ready_state, "Connection state changed");

        self.state_tx.send_replace(state.clone());
        self.notifier.on_state_change(&state);
    }

    fn notify_error(&mut self, message: &str) {
        if self.is_torn_down() {
            return;
        }

        self.notifier.on_error(message);
    }
}

/// Human-readable description of a close event.
fn close_description(code: u16, reason: &str) -> String {
    if !reason.is_empty() {
        reason.to_owned()
    } else if code == ABNORMAL_CLOSURE {
        "Connection lost".to_owned()
    } else {
        format!("Closed with code {code}")
    }
}
