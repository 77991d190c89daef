//! Configuration for the realtime client.

use rand::Rng;
use std::time::Duration;
use stratus_codec::DEFAULT_PRIMARY_KEY;
use stratus_protocol::DecoderConfig;

/// Configuration for a [`RealtimeClient`](crate::RealtimeClient).
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Name of the primary-key column.
    pub primary_key: String,
    /// Reconnect and fetch-retry backoff.
    pub reconnect: ReconnectConfig,
    /// Re-fetch a limited query when a removal leaves its window short.
    pub backfill_on_gap: bool,
    /// Emit a snapshot even when an applied event changed nothing.
    pub emit_unchanged: bool,
}

impl RealtimeConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            reconnect: ReconnectConfig::default(),
            backfill_on_gap: false,
            emit_unchanged: false,
        }
    }

    /// Sets the primary-key column.
    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    /// Sets the reconnect configuration.
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Enables or disables gap backfill.
    pub fn with_backfill_on_gap(mut self, enabled: bool) -> Self {
        self.backfill_on_gap = enabled;
        self
    }

    /// Enables or disables emission for events that change nothing.
    pub fn with_emit_unchanged(mut self, enabled: bool) -> Self {
        self.emit_unchanged = enabled;
        self
    }

    /// Decoder configuration derived from this configuration.
    pub fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig::default().with_primary_key(self.primary_key.clone())
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Backoff for reconnect attempts and fetch retries.
///
/// Retries are unlimited; only the delay grows.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for the delay (before jitter).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter.
    pub add_jitter: bool,
}

impl ReconnectConfig {
    /// Creates the default backoff: 250ms doubling up to 30s, with jitter.
    pub fn new() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Backoff that retries immediately. Useful in tests.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    ///
    /// Attempt 0 is immediate.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter && delay_secs > 0.0 {
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::new()
    }
}
