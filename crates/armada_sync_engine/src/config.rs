//! Configuration for the client sync engine.

use std::time::Duration;

/// Configuration for the sync engine.
///
/// Every knob is also settable through the environment (`ARMADA_*`
/// variables, see [`SyncConfig::from_env`]) so deployments can tune retry
/// and reconnect behavior without rebuilding.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Retry policy for outbox delivery.
    pub retry: RetryConfig,
    /// Retry policy for connection recovery.
    pub reconnect: RetryConfig,
    /// How long an in-flight delivery waits for its acknowledgment before
    /// reverting to pending.
    pub ack_timeout: Duration,
    /// Maximum number of activity feed entries retained.
    pub activity_feed_capacity: usize,
}

impl SyncConfig {
    /// Creates a configuration with default policies.
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::default(),
            reconnect: RetryConfig::new(5)
                .with_initial_delay(Duration::from_millis(500))
                .with_max_delay(Duration::from_secs(30)),
            ack_timeout: Duration::from_secs(10),
            activity_feed_capacity: 100,
        }
    }

    /// Sets the outbox retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the reconnect policy.
    pub fn with_reconnect(mut self, reconnect: RetryConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the acknowledgment timeout.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Sets the activity feed capacity.
    pub fn with_activity_feed_capacity(mut self, capacity: usize) -> Self {
        self.activity_feed_capacity = capacity;
        self
    }

    /// Builds a configuration from `ARMADA_*` environment variables,
    /// falling back to defaults for anything unset or unparseable.
    ///
    /// Recognized variables:
    /// - `ARMADA_OUTBOX_MAX_ATTEMPTS`
    /// - `ARMADA_RECONNECT_MAX_ATTEMPTS`
    /// - `ARMADA_BACKOFF_BASE_MS`
    /// - `ARMADA_BACKOFF_MULTIPLIER`
    /// - `ARMADA_BACKOFF_CAP_MS`
    /// - `ARMADA_ACK_TIMEOUT_MS`
    /// - `ARMADA_ACTIVITY_FEED_CAPACITY`
    pub fn from_env() -> Self {
        let mut config = Self::new();

        if let Some(attempts) = env_u32("ARMADA_OUTBOX_MAX_ATTEMPTS") {
            config.retry.max_attempts = attempts;
        }
        if let Some(attempts) = env_u32("ARMADA_RECONNECT_MAX_ATTEMPTS") {
            config.reconnect.max_attempts = attempts;
        }
        if let Some(base) = env_u64("ARMADA_BACKOFF_BASE_MS") {
            config.retry.initial_delay = Duration::from_millis(base);
            config.reconnect.initial_delay = Duration::from_millis(base);
        }
        if let Some(multiplier) = env_f64("ARMADA_BACKOFF_MULTIPLIER") {
            config.retry.backoff_multiplier = multiplier;
            config.reconnect.backoff_multiplier = multiplier;
        }
        if let Some(cap) = env_u64("ARMADA_BACKOFF_CAP_MS") {
            config.retry.max_delay = Duration::from_millis(cap);
            config.reconnect.max_delay = Duration::from_millis(cap);
        }
        if let Some(timeout) = env_u64("ARMADA_ACK_TIMEOUT_MS") {
            config.ack_timeout = Duration::from_millis(timeout);
        }
        if let Some(capacity) = env_u64("ARMADA_ACTIVITY_FEED_CAPACITY") {
            config.activity_feed_capacity = capacity as usize;
        }

        config
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the computed delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with the given attempt budget.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
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

    /// Disables jitter (deterministic delays, mostly for tests).
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Calculates the delay before the given attempt (1-indexed).
    ///
    /// Attempt 0 has no delay. Jitter adds up to 25% on top of the
    /// exponential delay, capped separately so the cap itself still holds
    /// a meaningful bound.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            use rand::Rng;
            let jitter = capped * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(capped + jitter)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok()?.parse().ok()
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse().ok()
}

fn env_f64(name: &str) -> Option<f64> {
    std::env::var(name).ok()?.parse().ok()
}
