use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use super::connection::Input;
use super::types::TransportEvent;

/// Delivers [`TransportEvent`]s from one transport handle to its manager.
///
/// Every handle gets its own sender. Once the manager discards a handle the sender is
/// detached and further events are dropped.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Input>,
    generation: u64,
    detached: Arc<AtomicBool>,
}

impl EventSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Input>, generation: u64) -> Self {
        Self {
            tx,
            generation,
            detached: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Hand an event to the manager. Returns `false` if it was dropped because the handle was
    /// detached or the manager is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        if self.is_detached() {
            return false;
        }

        self.tx
            .send(Input::Transport {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    pub(crate) fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }
}

#[cfg(feature = "tungstenite")]
pub use tungstenite::{TungsteniteHandle, TungsteniteTransport};

#[cfg(feature = "tungstenite")]
mod tungstenite {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::time::Duration;

    use futures::{SinkExt as _, StreamExt as _};
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
    use tokio_tungstenite::tungstenite::handshake::client::Request;
    use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
    use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::Message;

    use super::EventSender;
    use crate::Result;
    use crate::ws::config::Config;
    use crate::ws::error::WsError;
    use crate::ws::traits::{Transport, TransportHandle};
    use crate::ws::types::{ReadyState, TransportEvent};

    /// Close code reported when the connection drops without a close frame.
    const ABNORMAL_CLOSURE: u16 = 1006;
    /// Close code reported when the peer sends a close frame without a status.
    const NO_STATUS_RECEIVED: u16 = 1005;
    /// How long a closing socket may wait for the peer's close frame.
    const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

    /// [`Transport`] backed by `tokio-tungstenite`.
    ///
    /// Each handle runs one background task that owns the socket: it performs the handshake,
    /// forwards text frames to the manager and writes outbound frames in submission order.
    #[non_exhaustive]
    #[derive(Debug, Clone, Copy, Default)]
    pub struct TungsteniteTransport;

    impl Transport for TungsteniteTransport {
        type Handle = TungsteniteHandle;

        fn open(&mut self, config: &Config, events: EventSender) -> Result<TungsteniteHandle> {
            let request = handshake_request(config)?;

            let ready = Arc::new(AtomicU8::new(ReadyState::Connecting.as_u8()));
            let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

            let task = tokio::spawn(run_socket(
                request,
                Arc::clone(&ready),
                outgoing_rx,
                events,
            ));

            Ok(TungsteniteHandle {
                ready,
                outgoing_tx,
                task,
            })
        }
    }

    /// Handle to a socket opened by [`TungsteniteTransport`].
    #[derive(Debug)]
    pub struct TungsteniteHandle {
        ready: Arc<AtomicU8>,
        outgoing_tx: mpsc::UnboundedSender<Message>,
        task: JoinHandle<()>,
    }

    impl TransportHandle for TungsteniteHandle {
        fn ready_state(&self) -> ReadyState {
            ReadyState::from_u8(self.ready.load(Ordering::Acquire))
        }

        fn send(&mut self, payload: &str) -> Result<()> {
            if self.ready_state() != ReadyState::Open {
                return Err(WsError::NotOpen.into());
            }

            self.outgoing_tx
                .send(Message::Text(payload.into()))
                .map_err(|_e| WsError::ConnectionClosed)?;
            Ok(())
        }

        fn close(&mut self) {
            match self.ready_state() {
                ReadyState::Connecting => {
                    // Nothing to close gracefully until the handshake completes
                    self.task.abort();
                    self.ready
                        .store(ReadyState::Closed.as_u8(), Ordering::Release);
                }
                ReadyState::Open => {
                    self.ready
                        .store(ReadyState::Closing.as_u8(), Ordering::Release);
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "".into(),
                    };
                    _ = self.outgoing_tx.send(Message::Close(Some(frame)));
                }
                _ => {}
            }
        }
    }

    impl Drop for TungsteniteHandle {
        fn drop(&mut self) {
            // An open socket closes itself once `outgoing_tx` is gone; a pending handshake must
            // be cut short.
            if self.ready_state() == ReadyState::Connecting {
                self.task.abort();
            }
        }
    }

    fn handshake_request(config: &Config) -> Result<Request> {
        let mut request = config
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| WsError::InvalidEndpoint(e.to_string()))?;

        let headers = request.headers_mut();
        for (name, value) in &config.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_e| WsError::InvalidHeader(name.clone()))?;
            let header_value =
                HeaderValue::from_str(value).map_err(|_e| WsError::InvalidHeader(name.clone()))?;
            headers.insert(header_name, header_value);
        }

        if !config.subprotocols.is_empty() {
            let protocols = HeaderValue::from_str(&config.subprotocols.join(", "))
                .map_err(|_e| WsError::InvalidHeader(SEC_WEBSOCKET_PROTOCOL.to_string()))?;
            headers.insert(SEC_WEBSOCKET_PROTOCOL, protocols);
        }

        Ok(request)
    }

    /// Drive one socket from handshake to close.
    async fn run_socket(
        request: Request,
        ready: Arc<AtomicU8>,
        mut outgoing_rx: mpsc::UnboundedReceiver<Message>,
        events: EventSender,
    ) {
        let ws_stream = match connect_async(request).await {
            Ok((ws_stream, _response)) => ws_stream,
            Err(e) => {
                let error = WsError::Connection(e);
                #[cfg(feature = "tracing")]
                tracing::warn!(%error, "Unable to connect");
                #[cfg(not(feature = "tracing"))]
                let _ = &error;

                ready.store(ReadyState::Closed.as_u8(), Ordering::Release);
                events.emit(TransportEvent::Error);
                events.emit(TransportEvent::Close {
                    code: ABNORMAL_CLOSURE,
                    reason: String::new(),
                });
                return;
            }
        };

        // `close()` may have raced the handshake
        if ready
            .compare_exchange(
                ReadyState::Connecting.as_u8(),
                ReadyState::Open.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }
        events.emit(TransportEvent::Open);

        let (mut write, mut read) = ws_stream.split();
        let mut close_code = ABNORMAL_CLOSURE;
        let mut close_reason = String::new();

        loop {
            tokio::select! {
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            #[cfg(feature = "tracing")]
                            tracing::trace!(%text, "Received WebSocket text message");
                            events.emit(TransportEvent::Message(text.to_string()));
                        }
                        Some(Ok(Message::Close(frame))) => {
                            match frame {
                                Some(frame) => {
                                    close_code = u16::from(frame.code);
                                    close_reason = frame.reason.as_str().to_owned();
                                }
                                None => close_code = NO_STATUS_RECEIVED,
                            }
                            break;
                        }
                        Some(Ok(_)) => {
                            // Ignore binary frames and control frames
                        }
                        Some(Err(e)) => {
                            let error = WsError::Connection(e);
                            #[cfg(feature = "tracing")]
                            tracing::warn!(%error, "WebSocket read failed");
                            #[cfg(not(feature = "tracing"))]
                            let _ = &error;
                            events.emit(TransportEvent::Error);
                            break;
                        }
                        None => break,
                    }
                }

                outgoing = outgoing_rx.recv() => {
                    let Some(message) = outgoing else {
                        // Handle dropped
                        break;
                    };
                    let closing = matches!(message, Message::Close(_));
                    if let Err(e) = write.send(message).await {
                        let error = WsError::Connection(e);
                        #[cfg(feature = "tracing")]
                        tracing::warn!(%error, "WebSocket write failed");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &error;
                        if !closing {
                            events.emit(TransportEvent::Error);
                        }
                        break;
                    }
                }
            }
        }

        ready.store(ReadyState::Closing.as_u8(), Ordering::Release);
        _ = timeout(CLOSE_TIMEOUT, write.close()).await;
        ready.store(ReadyState::Closed.as_u8(), Ordering::Release);

        events.emit(TransportEvent::Close {
            code: close_code,
            reason: close_reason,
        });
    }

}
