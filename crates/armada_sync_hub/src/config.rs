//! Hub configuration.

use std::time::Duration;

/// Configuration for the dispatch hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Depth of each connection's bounded outbound queue. On overflow the
    /// connection is dropped rather than buffered without bound.
    pub outbound_queue_depth: usize,
    /// Secret key for HMAC token validation.
    pub auth_secret: Vec<u8>,
    /// Auth token expiration.
    pub token_expiry: Duration,
    /// How many recent change-sets the conflict detector keeps per entity
    /// for the field-disjointness test. Base versions older than the
    /// window classify conservatively as overlapping.
    pub history_window: usize,
}

impl HubConfig {
    /// Creates a configuration with the given auth secret.
    pub fn new(auth_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            outbound_queue_depth: 256,
            auth_secret: auth_secret.into(),
            token_expiry: Duration::from_secs(24 * 60 * 60),
            history_window: 64,
        }
    }

    /// Sets the outbound queue depth.
    pub fn with_outbound_queue_depth(mut self, depth: usize) -> Self {
        self.outbound_queue_depth = depth;
        self
    }

    /// Sets the token expiration.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }

    /// Sets the per-entity change history window.
    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    /// Builds a configuration from `ARMADA_HUB_*` environment variables,
    /// falling back to defaults for anything unset or unparseable.
    ///
    /// Recognized variables:
    /// - `ARMADA_HUB_AUTH_SECRET`
    /// - `ARMADA_HUB_QUEUE_DEPTH`
    /// - `ARMADA_HUB_TOKEN_EXPIRY_SECS`
    /// - `ARMADA_HUB_HISTORY_WINDOW`
    pub fn from_env() -> Self {
        let secret = std::env::var("ARMADA_HUB_AUTH_SECRET")
            .map(String::into_bytes)
            .unwrap_or_else(|_| DEV_SECRET.to_vec());
        let mut config = Self::new(secret);

        if let Some(depth) = env_u64("ARMADA_HUB_QUEUE_DEPTH") {
            config.outbound_queue_depth = depth as usize;
        }
        if let Some(secs) = env_u64("ARMADA_HUB_TOKEN_EXPIRY_SECS") {
            config.token_expiry = Duration::from_secs(secs);
        }
        if let Some(window) = env_u64("ARMADA_HUB_HISTORY_WINDOW") {
            config.history_window = window as usize;
        }

        config
    }
}

/// Placeholder secret for local development and tests. Deployments must
/// set `ARMADA_HUB_AUTH_SECRET`.
const DEV_SECRET: &[u8] = b"armada-dev-secret-change-me";

impl Default for HubConfig {
    fn default() -> Self {
        Self::new(DEV_SECRET)
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse().ok()
}
