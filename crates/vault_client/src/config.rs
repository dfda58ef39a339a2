//! Configuration for the vault client.

use std::time::Duration;

/// Client-side session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// How long before expiry the background task refreshes the token.
    pub refresh_margin: Duration,
    /// Delay between refresh attempts after a transient failure.
    pub refresh_retry_interval: Duration,
    /// Retries stop at `expires_at + expiry_grace`.
    pub expiry_grace: Duration,
}

impl ClientConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the refresh margin.
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Sets the retry interval for transient refresh failures.
    pub fn with_refresh_retry_interval(mut self, interval: Duration) -> Self {
        self.refresh_retry_interval = interval;
        self
    }

    /// Sets the grace period after expiry.
    pub fn with_expiry_grace(mut self, grace: Duration) -> Self {
        self.expiry_grace = grace;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            refresh_margin: Duration::from_secs(2 * 60),
            refresh_retry_interval: Duration::from_secs(5),
            expiry_grace: Duration::from_secs(1),
        }
    }
}
