//! Client-side sliding-window request budget per tenant.
//!
//! The provider enforces a per-tenant minute limit and answers 429 past it.
//! Spacing requests locally avoids most of those round-trips.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;

#[derive(Debug)]
pub struct Throttle {
    limit: usize,
    window: Duration,
    calls: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl Throttle {
    /// `limit` calls per `window` per key. A limit of `0` disables throttling.
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: usize::try_from(limit).unwrap_or(usize::MAX),
            window,
            calls: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Wait until a call for `key` fits the window, then record it.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Cancelled`] if `cancel` fires while waiting.
    pub async fn acquire(&self, key: &str, cancel: &CancellationToken) -> Result<(), FetchError> {
        if self.limit == 0 {
            return Ok(());
        }
        loop {
            let Some(wait) = self.try_acquire(key, Instant::now()) else {
                return Ok(());
            };
            tracing::debug!(
                tenant = key,
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "request budget spent; waiting"
            );
            tokio::select! {
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                () = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Record a call and return `None`, or return how long until a slot frees.
    fn try_acquire(&self, key: &str, now: Instant) -> Option<Duration> {
        let mut calls = self
            .calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let history = calls.entry(key.to_string()).or_default();
        while history
            .front()
            .is_some_and(|&at| now.duration_since(at) >= self.window)
        {
            history.pop_front();
        }
        if history.len() < self.limit {
            history.push_back(now);
            return None;
        }
        history
            .front()
            .map(|&oldest| (oldest + self.window).saturating_duration_since(now))
    }
}
