#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper in this module"
)]

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use livefeed::Result;
use livefeed::ws::config::Config;
use livefeed::ws::{
    ConnectionState, EventSender, Notification, Phase, ReadyState, Transport, TransportEvent,
    TransportHandle, WsError,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// How long to wait for a notification before declaring that none is coming.
///
/// Tests that rely on reconnect timers run with a paused clock, so this is virtual time.
pub const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Transport whose sockets are driven by the test.
#[derive(Clone, Default)]
pub struct MockTransport {
    sockets: Arc<Mutex<Vec<MockSocket>>>,
    fail_open: Arc<AtomicBool>,
}

impl MockTransport {
    /// Make every subsequent `open` fail synchronously.
    pub fn fail_open(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }

    /// Number of sockets opened so far.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.sockets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// The most recently opened socket.
    #[must_use]
    pub fn latest(&self) -> MockSocket {
        self.sockets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
            .unwrap()
    }

    #[must_use]
    pub fn socket(&self, index: usize) -> MockSocket {
        self.sockets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)[index]
            .clone()
    }
}

impl Transport for MockTransport {
    type Handle = MockHandle;

    fn open(&mut self, _config: &Config, events: EventSender) -> Result<MockHandle> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(WsError::InvalidEndpoint("refused by mock".to_owned()).into());
        }

        let socket = MockSocket {
            inner: Arc::new(SocketInner {
                ready: AtomicU8::new(ReadyState::Connecting.as_u8()),
                sent: Mutex::new(Vec::new()),
                events,
                closed_by_client: AtomicBool::new(false),
                reject_sends: AtomicBool::new(false),
                sends_until_closing: AtomicUsize::new(usize::MAX),
            }),
        };
        self.sockets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(socket.clone());

        Ok(MockHandle { socket })
    }
}

/// Test-side view of one opened socket.
#[derive(Clone)]
pub struct MockSocket {
    inner: Arc<SocketInner>,
}

struct SocketInner {
    ready: AtomicU8,
    sent: Mutex<Vec<String>>,
    events: EventSender,
    closed_by_client: AtomicBool,
    reject_sends: AtomicBool,
    sends_until_closing: AtomicUsize,
}

impl MockSocket {
    /// Complete the handshake.
    pub fn open(&self) {
        self.set_ready(ReadyState::Open);
        self.inner.events.emit(TransportEvent::Open);
    }

    pub fn message(&self, raw: &str) -> bool {
        self.inner
            .events
            .emit(TransportEvent::Message(raw.to_owned()))
    }

    pub fn error(&self) {
        self.inner.events.emit(TransportEvent::Error);
    }

    /// Close from the server side.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.set_ready(ReadyState::Closed);
        self.inner.events.emit(TransportEvent::Close {
            code,
            reason: reason.to_owned(),
        })
    }

    pub fn set_ready(&self, state: ReadyState) {
        self.inner.ready.store(state.as_u8(), Ordering::SeqCst);
    }

    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.inner.ready.load(Ordering::SeqCst))
    }

    /// Reject every subsequent send with an error.
    pub fn reject_sends(&self) {
        self.inner.reject_sends.store(true, Ordering::SeqCst);
    }

    /// Accept `count` more sends, then drop to `Closing` without telling anyone.
    pub fn start_closing_after(&self, count: usize) {
        self.inner
            .sends_until_closing
            .store(count, Ordering::SeqCst);
    }

    #[must_use]
    pub fn sent(&self) -> Vec<String> {
        self.inner
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn was_closed_by_client(&self) -> bool {
        self.inner.closed_by_client.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.inner.events.is_detached()
    }
}

pub struct MockHandle {
    socket: MockSocket,
}

impl TransportHandle for MockHandle {
    fn ready_state(&self) -> ReadyState {
        self.socket.ready_state()
    }

    fn send(&mut self, payload: &str) -> Result<()> {
        let inner = &self.socket.inner;
        if inner.reject_sends.load(Ordering::SeqCst) {
            return Err(WsError::ConnectionClosed.into());
        }
        if self.ready_state() != ReadyState::Open {
            return Err(WsError::NotOpen.into());
        }

        inner
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload.to_owned());

        let remaining = inner.sends_until_closing.load(Ordering::SeqCst);
        if remaining != usize::MAX {
            if remaining <= 1 {
                self.socket.set_ready(ReadyState::Closing);
            }
            inner
                .sends_until_closing
                .store(remaining.saturating_sub(1), Ordering::SeqCst);
        }

        Ok(())
    }

    fn close(&mut self) {
        self.socket
            .inner
            .closed_by_client
            .store(true, Ordering::SeqCst);
        self.socket.set_ready(ReadyState::Closed);
    }
}

/// Receive the next notification, failing the test if none arrives.
pub async fn next(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Notification {
    timeout(NOTIFICATION_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for a notification")
        .expect("notification channel closed")
}

/// Receive the next notification and require it to be a state report.
pub async fn next_state(rx: &mut mpsc::UnboundedReceiver<Notification>) -> ConnectionState {
    match next(rx).await {
        Notification::State(state) => state,
        other => panic!("expected a state report, got {other:?}"),
    }
}

/// Receive the next state report and check its phase.
pub async fn expect_phase(
    rx: &mut mpsc::UnboundedReceiver<Notification>,
    phase: Phase,
) -> ConnectionState {
    let state = next_state(rx).await;
    assert_eq!(state.phase, phase, "unexpected state {state:?}");
    state
}

/// Assert that nothing is reported for a long (virtual) while.
pub async fn expect_silence(rx: &mut mpsc::UnboundedReceiver<Notification>) {
    // A closed channel (manager task gone) counts as silence
    if let Ok(Some(notification)) = timeout(NOTIFICATION_TIMEOUT, rx.recv()).await {
        panic!("expected no notification, got {notification:?}");
    }
}

/// A configuration for the mock transport with a short base interval.
#[must_use]
pub fn config(max_attempts: u32) -> Config {
    let mut config = Config::new("ws://x");
    config.reconnect.max_attempts = max_attempts;
    config.reconnect.interval = Duration::from_millis(1000);
    config
}
