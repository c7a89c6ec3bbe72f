//! Redis-backed timestamp store.
//!
//! Each key is a sorted set whose members are request ids scored by their
//! timestamp in milliseconds. State is shared by every instance pointing at
//! the same Redis, which makes the limit hold across a horizontally scaled
//! deployment.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ErrorKind, RedisResult};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use super::backend::TimestampStore;
use crate::config::StoreConfig;
use crate::error::{FormguardError, StoreError};

/// A [`TimestampStore`] on Redis sorted sets.
///
/// The connection is opened on first use and kept afterwards; the
/// connection manager reconnects on its own. After an availability failure
/// the store reports itself unavailable for `retry_interval` so callers can
/// skip the network during an outage.
pub struct RedisStore {
    client: redis::Client,
    connection: tokio::sync::Mutex<Option<ConnectionManager>>,
    key_prefix: String,
    operation_timeout: Duration,
    retry_interval: Duration,
    last_failure: Mutex<Option<Instant>>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("key_prefix", &self.key_prefix)
            .field("operation_timeout", &self.operation_timeout)
            .field("retry_interval", &self.retry_interval)
            .finish()
    }
}

impl RedisStore {
    /// Create a store for `url`. No connection is made until the first operation.
    pub fn open(url: &str, config: &StoreConfig) -> crate::error::Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| FormguardError::Config(format!("Invalid Redis URL: {}", e)))?;

        Ok(Self {
            client,
            connection: tokio::sync::Mutex::new(None),
            key_prefix: config.key_prefix.clone(),
            operation_timeout: config.operation_timeout(),
            retry_interval: config.retry_interval(),
            last_failure: Mutex::new(None),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    /// The shared connection, opened on first use.
    ///
    /// Callers queue on the lock while one of them connects. Availability is
    /// checked again once the lock is held, so queued callers give up as soon
    /// as the connecting one has marked the store failed.
    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        if !self.is_available() {
            return Err(StoreError::NotReady);
        }

        let conn = ConnectionManager::new(self.client.clone()).await?;

        info!(prefix = %self.key_prefix, "Connected to Redis");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Run one command, tracking availability.
    ///
    /// A single `operation_timeout` bounds the whole call: waiting for the
    /// connection lock, connecting and the command itself.
    async fn run<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        if !self.is_available() {
            return Err(StoreError::NotReady);
        }

        let attempt = async {
            let conn = self.connection().await?;
            op(conn).await.map_err(StoreError::from)
        };
        let outcome = match timeout(self.operation_timeout, attempt).await {
            Ok(outcome) => outcome,
            Err(_) => Err(StoreError::Timeout(self.operation_timeout)),
        };

        match &outcome {
            Ok(_) => self.mark_ready(),
            Err(StoreError::NotReady) => {}
            Err(e) if e.is_unavailable() => self.mark_failed(e),
            Err(_) => {}
        }
        outcome
    }

    fn mark_ready(&self) {
        let mut last_failure = self.last_failure.lock();
        if last_failure.take().is_some() {
            info!("Redis is reachable again");
        }
    }

    fn mark_failed(&self, error: &StoreError) {
        warn!(
            error = %error,
            retry_in = ?self.retry_interval,
            "Redis unavailable"
        );
        *self.last_failure.lock() = Some(Instant::now());
    }
}

#[async_trait]
impl TimestampStore for RedisStore {
    type Error = StoreError;

    async fn record(&self, key: &str, timestamp: u64, id: &str) -> Result<(), StoreError> {
        let key = self.key(key);
        self.run(move |mut conn| async move {
            conn.zadd::<_, _, _, ()>(&key, id, timestamp).await
        })
        .await
    }

    async fn prune(&self, key: &str, min_timestamp: u64) -> Result<(), StoreError> {
        let key = self.key(key);
        self.run(move |mut conn| async move {
            conn.zrembyscore::<_, _, _, ()>(&key, "-inf", min_timestamp).await
        })
        .await
    }

    async fn count(&self, key: &str) -> Result<u64, StoreError> {
        let key = self.key(key);
        self.run(move |mut conn| async move { conn.zcard::<_, u64>(&key).await })
            .await
    }

    async fn oldest(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let key = self.key(key);
        let lowest = self
            .run(move |mut conn| async move {
                conn.zrange_withscores::<_, Vec<(String, f64)>>(&key, 0, 0).await
            })
            .await;

        oldest_from_reply(lowest)
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let key = self.key(key);
        let seconds = ttl.as_millis().div_ceil(1000).max(1) as i64;
        self.run(move |mut conn| async move { conn.expire::<_, ()>(&key, seconds).await })
            .await
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        let key = self.key(key);
        self.run(move |mut conn| async move { conn.del::<_, ()>(&key).await })
            .await
    }

    fn is_available(&self) -> bool {
        match *self.last_failure.lock() {
            Some(failed_at) => failed_at.elapsed() >= self.retry_interval,
            None => true,
        }
    }
}

/// Read the lowest entry of a `ZRANGE ... WITHSCORES` reply.
///
/// A reply that cannot be parsed counts as "no oldest entry".
fn oldest_from_reply(reply: Result<Vec<(String, f64)>, StoreError>) -> Result<Option<u64>, StoreError> {
    match reply {
        Ok(entries) => Ok(entries
            .into_iter()
            .next()
            .and_then(|(_, score)| score_to_timestamp(score))),
        Err(StoreError::Command(e)) if e.kind() == ErrorKind::TypeError => {
            debug!(error = %e, "Unreadable oldest entry, treating as unknown");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Convert a sorted-set score to a millisecond timestamp.
fn score_to_timestamp(score: f64) -> Option<u64> {
    if score.is_finite() && score >= 0.0 {
        Some(score as u64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_store(retry_interval_ms: u64) -> RedisStore {
        let config = StoreConfig {
            operation_timeout_ms: 500,
            retry_interval_ms,
            ..StoreConfig::default()
        };
        // Nothing listens on port 1.
        RedisStore::open("redis://127.0.0.1:1", &config).unwrap()
    }

    fn live_store(prefix: &str) -> RedisStore {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let config = StoreConfig {
            key_prefix: prefix.to_string(),
            ..StoreConfig::default()
        };
        RedisStore::open(&url, &config).unwrap()
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        let err = RedisStore::open("not a url", &StoreConfig::default()).unwrap_err();
        assert!(matches!(err, FormguardError::Config(_)));
    }

    #[test]
    fn test_keys_are_prefixed() {
        let store = RedisStore::open("redis://127.0.0.1:6379", &StoreConfig::default()).unwrap();
        assert_eq!(store.key("192.168.1.100"), "formguard:ratelimit:192.168.1.100");
        assert_eq!(store.key(""), "formguard:ratelimit:");
    }

    #[test]
    fn test_score_to_timestamp() {
        assert_eq!(score_to_timestamp(1_700_000_000_000.0), Some(1_700_000_000_000));
        assert_eq!(score_to_timestamp(0.0), Some(0));
        assert_eq!(score_to_timestamp(-1.0), None);
        assert_eq!(score_to_timestamp(f64::NAN), None);
        assert_eq!(score_to_timestamp(f64::INFINITY), None);
        assert_eq!(score_to_timestamp(f64::NEG_INFINITY), None);
    }

    #[test]
    fn test_oldest_from_reply() {
        let entries = vec![("a-1".to_string(), 2_000.0), ("b-2".to_string(), 3_000.0)];
        assert_eq!(oldest_from_reply(Ok(entries)).unwrap(), Some(2_000));
        assert_eq!(oldest_from_reply(Ok(Vec::new())).unwrap(), None);

        let bad_score = vec![("a-1".to_string(), f64::NAN)];
        assert_eq!(oldest_from_reply(Ok(bad_score)).unwrap(), None);
    }

    #[test]
    fn test_unparseable_oldest_is_unknown() {
        let parse_error = redis::RedisError::from((ErrorKind::TypeError, "Response was of incompatible type"));
        let reply = Err(StoreError::Command(parse_error));

        assert_eq!(oldest_from_reply(reply).unwrap(), None);
    }

    #[test]
    fn test_oldest_keeps_other_errors() {
        let server_error = redis::RedisError::from((ErrorKind::ResponseError, "ERR"));

        assert!(oldest_from_reply(Err(StoreError::Command(server_error))).is_err());
        assert!(matches!(
            oldest_from_reply(Err(StoreError::NotReady)),
            Err(StoreError::NotReady)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_store_reports_unavailable() {
        let store = unreachable_store(60_000);
        assert!(store.is_available());

        let err = store.count("k").await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(!store.is_available());

        // Skipped without touching the network.
        let err = store.count("k").await.unwrap_err();
        assert!(matches!(err, StoreError::NotReady));
    }

    #[tokio::test]
    async fn test_unreachable_store_is_retried_after_interval() {
        let store = unreachable_store(0);

        assert!(store.record("k", 1, "1").await.is_err());
        assert!(store.is_available());
    }

    #[tokio::test]
    #[ignore] // Requires running Redis
    async fn test_sorted_set_operations() {
        let store = live_store("formguard:test:ops");
        store.clear("ip").await.unwrap();

        store.record("ip", 1_000, "a").await.unwrap();
        store.record("ip", 2_000, "b").await.unwrap();
        store.record("ip", 2_000, "c").await.unwrap();
        assert_eq!(store.count("ip").await.unwrap(), 3);
        assert_eq!(store.oldest("ip").await.unwrap(), Some(1_000));

        store.prune("ip", 1_000).await.unwrap();
        assert_eq!(store.count("ip").await.unwrap(), 2);
        assert_eq!(store.oldest("ip").await.unwrap(), Some(2_000));

        store.set_expiry("ip", Duration::from_secs(60)).await.unwrap();
        store.clear("ip").await.unwrap();
        assert_eq!(store.count("ip").await.unwrap(), 0);
        assert_eq!(store.oldest("ip").await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore] // Requires running Redis
    async fn test_clear_missing_key() {
        let store = live_store("formguard:test:missing");
        assert!(store.clear("never-seen").await.is_ok());
    }
}
