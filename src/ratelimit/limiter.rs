//! Public rate limiter with shared-store fallback.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::backend::TimestampStore;
use super::clock::{Clock, SystemClock};
use super::local::MemoryStore;
use super::result::RateLimitResult;
use super::shared::RedisStore;
use super::window::SlidingWindow;
use crate::config::FormguardConfig;
use crate::error::{Result, StoreError};

/// A shared store usable by the limiter.
pub type SharedStore = Arc<dyn TimestampStore<Error = StoreError>>;

/// The contact-form rate limiter.
///
/// Every call tries the shared store first. When it is missing, reports
/// itself unavailable, or fails during the call, that single call is served
/// by the in-process [`MemoryStore`] instead. Nothing is switched for later
/// calls.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct RateLimiter {
    window: SlidingWindow,
    shared: Option<SharedStore>,
    local: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter on the system clock.
    pub fn new(window: SlidingWindow, shared: Option<SharedStore>) -> Self {
        Self::with_clock(window, shared, Arc::new(SystemClock))
    }

    /// Create a limiter that only uses process memory.
    pub fn local_only(window: SlidingWindow) -> Self {
        Self::new(window, None)
    }

    pub fn with_clock(
        window: SlidingWindow,
        shared: Option<SharedStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            window,
            shared,
            local: Arc::new(MemoryStore::new()),
            clock,
        }
    }

    /// Build a limiter from configuration.
    ///
    /// A configured Redis URL is only parsed here; the connection is made on
    /// the first call, so startup does not depend on Redis being up.
    pub fn from_config(config: &FormguardConfig) -> Result<Self> {
        config.validate()?;

        let window = SlidingWindow::new(config.rate_limiting.limit, config.rate_limiting.window());
        let shared: Option<SharedStore> = match config.store.url.as_deref() {
            Some(url) => {
                let store = RedisStore::open(url, &config.store)?;
                info!(
                    prefix = %config.store.key_prefix,
                    timeout = ?config.store.operation_timeout(),
                    "Using Redis for shared rate limit state"
                );
                Some(Arc::new(store))
            }
            None => {
                warn!("No Redis URL configured, rate limits are enforced per process");
                None
            }
        };

        info!(
            limit = window.limit(),
            window = ?window.window(),
            "Rate limiter initialized"
        );
        Ok(Self::new(window, shared))
    }

    pub fn window(&self) -> SlidingWindow {
        self.window
    }

    /// The in-process fallback store.
    pub fn local_store(&self) -> &Arc<MemoryStore> {
        &self.local
    }

    pub fn has_shared_store(&self) -> bool {
        self.shared.is_some()
    }

    /// The shared store, if it is configured and worth trying.
    fn shared_store(&self) -> Option<&SharedStore> {
        let store = self.shared.as_ref()?;
        if store.is_available() {
            Some(store)
        } else {
            debug!("Shared store not ready, skipping it");
            None
        }
    }

    /// Record a submission attempt for `key` and decide whether it is admitted.
    pub async fn check_rate_limit(&self, key: &str) -> RateLimitResult {
        let now = self.clock.now_millis();

        let result = match self.shared_store() {
            Some(store) => match self.window.check(store.as_ref(), key, now).await {
                Ok(result) => result,
                Err(e) => {
                    log_fallback("check", key, &e);
                    self.check_local(key, now).await
                }
            },
            None => self.check_local(key, now).await,
        };

        if result.limited {
            warn!(
                key = %key,
                reset_time = result.reset_time,
                "Rate limit exceeded"
            );
        }
        result
    }

    /// Report the quota for `key` without recording an attempt.
    pub async fn get_rate_limit_status(&self, key: &str) -> RateLimitResult {
        let now = self.clock.now_millis();

        match self.shared_store() {
            Some(store) => match self.window.status(store.as_ref(), key, now).await {
                Ok(result) => result,
                Err(e) => {
                    log_fallback("status", key, &e);
                    self.status_local(key, now).await
                }
            },
            None => self.status_local(key, now).await,
        }
    }

    /// Forget every attempt recorded for `key`.
    ///
    /// The local store is always cleared. Returns `false` only when the
    /// shared store answered the clear with an error.
    pub async fn reset_rate_limit(&self, key: &str) -> bool {
        self.window
            .reset(self.local.as_ref(), key)
            .await
            .unwrap_or_else(|never| match never {});

        let Some(store) = self.shared_store() else {
            info!(key = %key, "Rate limit reset locally");
            return true;
        };

        match self.window.reset(store.as_ref(), key).await {
            Ok(()) => {
                info!(key = %key, "Rate limit reset");
                true
            }
            Err(e) if e.is_unavailable() => {
                log_fallback("reset", key, &e);
                true
            }
            Err(e) => {
                error!(key = %key, error = %e, "Failed to reset rate limit");
                false
            }
        }
    }

    /// Periodically drop keys with no live entries from the local store.
    ///
    /// The task runs until the returned handle is aborted or the runtime
    /// shuts down.
    ///
    /// ```rust,ignore
    /// let limiter = Arc::new(RateLimiter::from_config(&config)?);
    /// let sweeper = limiter.spawn_sweeper(config.rate_limiting.sweep_interval());
    /// ```
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let local = Arc::clone(&self.local);
        let clock = Arc::clone(&self.clock);
        let window_ms = self.window.window().as_millis() as u64;
        let interval = interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let removed = local.sweep(clock.now_millis().saturating_sub(window_ms));
                if removed > 0 {
                    debug!(removed, tracked = local.len(), "Dropped idle keys from local store");
                }
            }
        })
    }

    async fn check_local(&self, key: &str, now: u64) -> RateLimitResult {
        self.window
            .check(self.local.as_ref(), key, now)
            .await
            .unwrap_or_else(|never| match never {})
    }

    async fn status_local(&self, key: &str, now: u64) -> RateLimitResult {
        self.window
            .status(self.local.as_ref(), key, now)
            .await
            .unwrap_or_else(|never| match never {})
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::local_only(SlidingWindow::default())
    }
}

fn log_fallback(operation: &str, key: &str, error: &StoreError) {
    if error.is_unavailable() {
        warn!(
            operation,
            key = %key,
            error = %error,
            "Shared store unavailable, using local fallback"
        );
    } else {
        error!(
            operation,
            key = %key,
            error = %error,
            "Shared store rejected command, using local fallback"
        );
    }
}
