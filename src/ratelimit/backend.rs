//! Timestamp store trait for abstracting the shared and local stores.

use std::time::Duration;

use async_trait::async_trait;

/// A per-key ordered collection of request timestamps.
///
/// Timestamps are milliseconds since the Unix epoch. Operations are
/// independent: a sliding-window check is several calls, not one
/// transaction.
#[async_trait]
pub trait TimestampStore: Send + Sync {
    /// Error raised when the store cannot serve an operation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Record one request at `timestamp` under a unique `id`.
    async fn record(&self, key: &str, timestamp: u64, id: &str) -> Result<(), Self::Error>;

    /// Remove entries at or before `min_timestamp`.
    async fn prune(&self, key: &str, min_timestamp: u64) -> Result<(), Self::Error>;

    /// Number of entries currently stored for `key`.
    async fn count(&self, key: &str) -> Result<u64, Self::Error>;

    /// The lowest stored timestamp, if one is known.
    async fn oldest(&self, key: &str) -> Result<Option<u64>, Self::Error>;

    /// Let the whole key expire after `ttl` without further writes.
    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), Self::Error>;

    /// Drop every entry for `key`. A missing key is not an error.
    async fn clear(&self, key: &str) -> Result<(), Self::Error>;

    /// Whether the store is worth trying right now.
    fn is_available(&self) -> bool {
        true
    }
}
