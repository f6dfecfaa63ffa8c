#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::collections::BTreeMap;
use std::time::Duration;

use backoff::backoff::Backoff as _;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bon::Builder;
use rand::Rng as _;
use url::Url;

use crate::Result;
use crate::error::Error;

const DEFAULT_RECONNECT_INTERVAL_DURATION: Duration = Duration::from_millis(3000);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 1.5;
const DEFAULT_MAX_JITTER_DURATION: Duration = Duration::from_secs(1);

/// Configuration for a single managed WebSocket connection.
///
/// Immutable once handed to a [`ConnectionManager`](super::ConnectionManager).
///
/// ```
/// use livefeed::ws::config::Config;
///
/// let config = Config::builder()
///     .endpoint("wss://feed.example.com/ws")
///     .subprotocols(vec!["json".to_owned()])
///     .build();
///
/// assert!(config.reconnect.enabled);
/// assert_eq!(config.reconnect.max_attempts, 5);
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Address of the remote peer, `ws://` or `wss://`
    #[builder(into)]
    pub endpoint: String,
    /// Extra handshake headers, passed through to the transport untouched
    #[builder(default)]
    pub headers: BTreeMap<String, String>,
    /// Requested subprotocols, in preference order
    #[builder(default)]
    pub subprotocols: Vec<String>,
    /// Reconnection strategy configuration
    #[builder(default)]
    pub reconnect: ReconnectConfig,
}

impl Config {
    /// Configuration for `endpoint` with every other field at its default.
    #[must_use]
    pub fn new<S: Into<String>>(endpoint: S) -> Self {
        Self::builder().endpoint(endpoint).build()
    }

    /// Check the configuration before a manager is built around it.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::validation("endpoint must be a non-empty string"));
        }

        let url = Url::parse(&self.endpoint)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::validation(format!(
                "endpoint must start with ws:// or wss://, got {}",
                self.endpoint
            )));
        }

        if !self.reconnect.backoff_multiplier.is_finite() || self.reconnect.backoff_multiplier < 1.0
        {
            return Err(Error::validation(format!(
                "backoff multiplier must be at least 1.0, got {}",
                self.reconnect.backoff_multiplier
            )));
        }

        Ok(())
    }
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Reconnect automatically after the connection closes
    pub enabled: bool,
    /// Base delay before the first reconnection attempt
    pub interval: Duration,
    /// Maximum number of consecutive reconnection attempts. The count resets once a
    /// connection opens.
    pub max_attempts: u32,
    /// Upper bound on the exponential part of the delay
    pub max_backoff: Duration,
    /// Growth factor between consecutive attempts
    pub backoff_multiplier: f64,
    /// Upper bound (exclusive) of the uniform jitter added to every delay
    pub max_jitter: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_RECONNECT_INTERVAL_DURATION,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_jitter: DEFAULT_MAX_JITTER_DURATION,
        }
    }
}

impl From<&ReconnectConfig> for ExponentialBackoff {
    fn from(config: &ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.interval)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.backoff_multiplier)
            // Jitter is additive and applied by `ReconnectBackoff`
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None) // We handle max attempts separately
            .build()
    }
}

/// Delay policy for reconnection attempts.
///
/// Attempt `n` (starting at 1) waits `min(interval * multiplier^(n-1), max_backoff)` plus a
/// uniformly random jitter in `[0, max_jitter)`.
#[derive(Debug)]
pub struct ReconnectBackoff {
    exponential: ExponentialBackoff,
    max_jitter: Duration,
}

impl ReconnectBackoff {
    #[must_use]
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            exponential: config.into(),
            max_jitter: config.max_jitter,
        }
    }

    /// Delay for the next attempt. Each call advances the exponential sequence.
    pub fn next_delay(&mut self) -> Duration {
        let base = self
            .exponential
            .next_backoff()
            .unwrap_or(self.exponential.max_interval);

        base.saturating_add(self.jitter())
    }

    /// Restart the sequence at the base interval.
    pub fn reset(&mut self) {
        self.exponential.reset();
    }

    fn jitter(&self) -> Duration {
        let bound = u64::try_from(self.max_jitter.as_nanos()).unwrap_or(u64::MAX);
        if bound == 0 {
            return Duration::ZERO;
        }

        Duration::from_nanos(rand::rng().random_range(0..bound))
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Kind;

    use super::*;

    /// Lower bounds for attempts 1..=8 under the default configuration.
    const DEFAULT_FLOORS: [Duration; 8] = [
        Duration::from_millis(3000),
        Duration::from_millis(4500),
        Duration::from_millis(6750),
        Duration::from_millis(10_125),
        Duration::from_micros(15_187_500),
        Duration::from_micros(22_781_250),
        Duration::from_secs(30),
        Duration::from_secs(30),
    ];

    #[test]
    fn defaults() {
        let config = Config::new("ws://localhost:8080");

        assert!(config.headers.is_empty());
        assert!(config.subprotocols.is_empty());
        assert!(config.reconnect.enabled);
        assert_eq!(config.reconnect.interval, Duration::from_millis(3000));
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.max_backoff, Duration::from_secs(30));
        assert_eq!(config.reconnect.max_jitter, Duration::from_secs(1));
    }

    #[test]
    fn backoff_sequence_stays_within_bounds() {
        let mut backoff = ReconnectBackoff::new(&ReconnectConfig::default());

        for (attempt, floor) in DEFAULT_FLOORS.iter().enumerate() {
            let delay = backoff.next_delay();
            assert!(
                delay >= *floor && delay < *floor + Duration::from_secs(1),
                "attempt {} delay {delay:?} outside [{floor:?}, {floor:?} + 1s)",
                attempt + 1
            );
        }
    }

    #[test]
    fn backoff_reset_restarts_sequence() {
        let mut backoff = ReconnectBackoff::new(&ReconnectConfig::default());
        for _ in 0..4 {
            let _delay = backoff.next_delay();
        }

        backoff.reset();

        let first = backoff.next_delay();
        assert!(first >= Duration::from_millis(3000) && first < Duration::from_millis(4000));
    }

    #[test]
    fn zero_jitter_is_exact() {
        let config = ReconnectConfig {
            interval: Duration::from_millis(100),
            max_backoff: Duration::from_millis(250),
            backoff_multiplier: 2.0,
            max_jitter: Duration::ZERO,
            ..ReconnectConfig::default()
        };
        let mut backoff = ReconnectBackoff::new(&config);

        // randomization is disabled, but the backoff crate may still add up to a nanosecond
        let tolerance = Duration::from_micros(1);
        for expected in [100, 200, 250, 250] {
            let delay = backoff.next_delay();
            let expected = Duration::from_millis(expected);
            assert!(delay >= expected && delay <= expected + tolerance, "{delay:?}");
        }
    }

    #[test]
    fn sub_millisecond_jitter_is_applied() {
        let config = ReconnectConfig {
            interval: Duration::from_millis(100),
            max_jitter: Duration::from_micros(500),
            ..ReconnectConfig::default()
        };

        let jitters: Vec<Duration> = (0..32)
            .map(|_| {
                let mut backoff = ReconnectBackoff::new(&config);
                backoff.next_delay() - Duration::from_millis(100)
            })
            .collect();

        assert!(
            jitters.iter().all(|jitter| *jitter <= Duration::from_micros(500)),
            "{jitters:?}"
        );
        assert!(
            jitters.iter().any(|jitter| *jitter > Duration::from_micros(1)),
            "{jitters:?}"
        );
    }

    #[test]
    fn validate_accepts_ws_schemes() {
        Config::new("ws://x").validate().unwrap();
        Config::new("wss://example.com/ws").validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_endpoints() {
        for endpoint in ["", "   ", "not-a-valid-url", "http://example.com"] {
            let error = Config::new(endpoint).validate().unwrap_err();
            assert_eq!(error.kind(), Kind::Validation, "{endpoint}");
        }
    }

    #[test]
    fn validate_rejects_shrinking_backoff() {
        let mut config = Config::new("ws://x");
        config.reconnect.backoff_multiplier = 0.5;

        let error = config.validate().unwrap_err();
        assert_eq!(error.kind(), Kind::Validation);
    }
}
