//! Sliding-window decision logic.
//!
//! The window is store-agnostic: it drives any [`TimestampStore`] through
//! record, prune, count and expire, then shapes a [`RateLimitResult`].

use std::time::Duration;

use tracing::trace;
use uuid::Uuid;

use super::backend::TimestampStore;
use super::result::RateLimitResult;

/// Default number of submissions admitted per window.
pub const DEFAULT_LIMIT: u32 = 3;
/// Default window length in seconds.
pub const DEFAULT_WINDOW_SECS: u64 = 3600;

/// A trailing time window with a maximum request count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindow {
    limit: u32,
    window: Duration,
}

impl SlidingWindow {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn window_millis(&self) -> u64 {
        self.window.as_millis() as u64
    }

    fn remaining(&self, count: u64) -> u32 {
        (self.limit as u64).saturating_sub(count) as u32
    }

    /// Record one attempt for `key` at `now` and decide whether it is admitted.
    ///
    /// The attempt is recorded before counting, so it takes part in its own
    /// check and exactly `limit` attempts pass per window. A rejected attempt
    /// stays recorded.
    pub async fn check<S>(&self, store: &S, key: &str, now: u64) -> Result<RateLimitResult, S::Error>
    where
        S: TimestampStore + ?Sized,
    {
        let window_ms = self.window_millis();
        let request_id = format!("{}-{}", now, Uuid::new_v4());

        store.record(key, now, &request_id).await?;
        store.prune(key, now.saturating_sub(window_ms)).await?;
        let count = store.count(key).await?;
        store.set_expiry(key, self.window).await?;

        trace!(key = %key, count, limit = self.limit, "Counted requests in window");

        if count > self.limit as u64 {
            let oldest = store.oldest(key).await?.unwrap_or(now);
            return Ok(RateLimitResult {
                limited: true,
                remaining: 0,
                reset_time: oldest + window_ms,
            });
        }

        Ok(RateLimitResult {
            limited: false,
            remaining: self.remaining(count),
            reset_time: now + window_ms,
        })
    }

    /// Report the quota for `key` without recording anything.
    ///
    /// `limited` is true when the next check would be rejected.
    pub async fn status<S>(&self, store: &S, key: &str, now: u64) -> Result<RateLimitResult, S::Error>
    where
        S: TimestampStore + ?Sized,
    {
        let window_ms = self.window_millis();

        store.prune(key, now.saturating_sub(window_ms)).await?;
        let count = store.count(key).await?;

        let reset_time = if count > 0 {
            store.oldest(key).await?.unwrap_or(now) + window_ms
        } else {
            now + window_ms
        };

        Ok(RateLimitResult {
            limited: count >= self.limit as u64,
            remaining: self.remaining(count),
            reset_time,
        })
    }

    /// Forget every recorded attempt for `key`.
    pub async fn reset<S>(&self, store: &S, key: &str) -> Result<(), S::Error>
    where
        S: TimestampStore + ?Sized,
    {
        store.clear(key).await
    }
}

impl Default for SlidingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT, Duration::from_secs(DEFAULT_WINDOW_SECS))
    }
}
