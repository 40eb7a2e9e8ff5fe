//! Retry ceilings, backoff curve, and client-side throttling.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_core::Backoff;

const fn default_max_rate_limit_retries() -> u32 {
    5
}

const fn default_max_transient_retries() -> u32 {
    3
}

const fn default_backoff_base_ms() -> u64 {
    1_000
}

const fn default_backoff_max_ms() -> u64 {
    10_000
}

const fn default_retry_after_secs() -> u64 {
    60
}

const fn default_calls_per_minute() -> u32 {
    50
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Rate-limited retries of one request before giving up.
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,

    /// Network/5xx retries of one request before giving up.
    #[serde(default = "default_max_transient_retries")]
    pub max_transient_retries: u32,

    /// First exponential backoff delay.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Backoff delay ceiling.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Wait used when a rate-limit response carries no usable `Retry-After`.
    #[serde(default = "default_retry_after_secs")]
    pub default_retry_after_secs: u64,

    /// Client-side request budget per tenant per minute. `0` disables it.
    #[serde(default = "default_calls_per_minute")]
    pub calls_per_minute: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_rate_limit_retries: default_max_rate_limit_retries(),
            max_transient_retries: default_max_transient_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            default_retry_after_secs: default_retry_after_secs(),
            calls_per_minute: default_calls_per_minute(),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub const fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    #[must_use]
    pub const fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    #[must_use]
    pub const fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_base(), self.backoff_max())
    }

    #[must_use]
    pub const fn default_retry_after(&self) -> Duration {
        Duration::from_secs(self.default_retry_after_secs)
    }
}
