//! Realtime delivery configuration
//!
//! Tunables for the three timeouts of the core (presence grace,
//! per-connection send timeout, catch-up window), the dispatcher's
//! ordering buffer, the typing TTL, and the retry policy for transient
//! persistence failures.

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Realtime delivery configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Seconds a user may have zero connections before "went offline"
    /// fires. Absorbs page refreshes and brief network blips.
    #[serde(default = "default_presence_grace_secs")]
    pub presence_grace_secs: u64,

    /// Per-connection push deadline in milliseconds. On expiry the
    /// connection is dropped; the event survives via projections and
    /// catch-up.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Outbound frame queue capacity per connection.
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,

    /// Maximum number of missed events replayed on reconnect; beyond this
    /// the client is told to fully resync.
    #[serde(default = "default_catchup_max_events")]
    pub catchup_max_events: usize,

    /// Maximum age in seconds of the oldest missed event still eligible
    /// for incremental replay.
    #[serde(default = "default_catchup_max_age_secs")]
    pub catchup_max_age_secs: u64,

    /// How many out-of-order events the dispatcher buffers while waiting
    /// for a sequence gap to fill.
    #[serde(default = "default_ordering_buffer_depth")]
    pub ordering_buffer_depth: usize,

    /// Milliseconds a typing indicator stays alive without refresh.
    #[serde(default = "default_typing_ttl_ms")]
    pub typing_ttl_ms: u64,

    /// Retry policy for transient persistence failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff in milliseconds; doubles per failed attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub backoff_ms: u64,
}

impl RetryConfig {
    /// Backoff to sleep after the given zero-based failed attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(1 << attempt.min(10)))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl RealtimeConfig {
    pub fn presence_grace(&self) -> Duration {
        Duration::from_secs(self.presence_grace_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn typing_ttl(&self) -> Duration {
        Duration::from_millis(self.typing_ttl_ms)
    }

    /// Validate realtime configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.presence_grace_secs == 0 || self.presence_grace_secs > 300 {
            return Err(ValidationError::InvalidPresenceGrace);
        }
        if self.send_timeout_ms < 100 || self.send_timeout_ms > 30_000 {
            return Err(ValidationError::InvalidSendTimeout);
        }
        if self.send_queue_capacity == 0 {
            return Err(ValidationError::InvalidSendQueueCapacity);
        }
        if self.catchup_max_events == 0 || self.catchup_max_age_secs == 0 {
            return Err(ValidationError::InvalidCatchUpWindow);
        }
        if self.ordering_buffer_depth == 0 {
            return Err(ValidationError::InvalidOrderingBufferDepth);
        }
        if self.typing_ttl_ms < 500 || self.typing_ttl_ms > 60_000 {
            return Err(ValidationError::InvalidTypingTtl);
        }
        if self.retry.max_attempts == 0 || self.retry.max_attempts > 10 {
            return Err(ValidationError::InvalidRetryAttempts);
        }
        Ok(())
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            presence_grace_secs: default_presence_grace_secs(),
            send_timeout_ms: default_send_timeout_ms(),
            send_queue_capacity: default_send_queue_capacity(),
            catchup_max_events: default_catchup_max_events(),
            catchup_max_age_secs: default_catchup_max_age_secs(),
            ordering_buffer_depth: default_ordering_buffer_depth(),
            typing_ttl_ms: default_typing_ttl_ms(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_presence_grace_secs() -> u64 {
    10
}

fn default_send_timeout_ms() -> u64 {
    2_000
}

fn default_send_queue_capacity() -> usize {
    64
}

fn default_catchup_max_events() -> usize {
    500
}

fn default_catchup_max_age_secs() -> u64 {
    86_400
}

fn default_ordering_buffer_depth() -> usize {
    64
}

fn default_typing_ttl_ms() -> u64 {
    5_000
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    50
}
