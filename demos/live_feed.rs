//! Live feed explorer.
//!
//! Connects to a WebSocket endpoint, sends a subscription message and logs every state
//! transition and inbound payload for a while before tearing the connection down.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info,livefeed=debug cargo run --example live_feed --features tracing -- wss://ws.postman-echo.com/raw
//! ```

use std::time::Duration;

use livefeed::ws::config::Config;
use livefeed::ws::{ConnectionManager, Inbound, Notification};
use serde_json::json;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

const DEFAULT_ENDPOINT: &str = "wss://ws.postman-echo.com/raw";
const RUN_FOR: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_owned());

    let mut config = Config::new(endpoint.as_str());
    config.reconnect.max_attempts = 3;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Notification>();
    let manager = ConnectionManager::open(config, tx)?;
    info!(endpoint = %endpoint, state = ?manager.state(), "Connecting");

    // Queued until the socket opens
    let sent = manager
        .send_json(&json!({"type": "subscribe", "channel": "ticker"}))
        .await?;
    debug!(sent, "Submitted subscription");

    let deadline = Instant::now() + RUN_FOR;
    let mut received = 0_usize;

    while let Ok(Some(notification)) = timeout(
        deadline.saturating_duration_since(Instant::now()),
        rx.recv(),
    )
    .await
    {
        match notification {
            Notification::State(state) => info!(
                state = %state.phase,
                ready_state = ?state.ready_state,
                error = ?state.error,
                "State changed"
            ),
            Notification::Message(Inbound::Json(value)) => {
                received += 1;
                info!(kind = "json", %value);
            }
            Notification::Message(Inbound::Text(text)) => {
                received += 1;
                info!(kind = "text", %text);
            }
            Notification::Error(message) => warn!(%message, "Connection error"),
            _ => {}
        }
    }

    manager.destroy();
    info!(received, destroyed = manager.is_destroyed(), "Done");

    Ok(())
}
