//! In-process timestamp store used when the shared store is unavailable.
//!
//! State lives only as long as the process, so under horizontal scaling each
//! instance enforces the limit on its own. This is best-effort enforcement
//! during a shared-store outage, not a cross-instance guarantee.

use std::convert::Infallible;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use super::backend::TimestampStore;

/// Timestamps per key, held in process memory.
///
/// Keys whose sequences decay to empty are dropped, either when `prune`
/// empties them or by a periodic [`MemoryStore::sweep`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Vec<u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired timestamps from every key and forget keys left empty.
    ///
    /// Returns the number of keys removed.
    pub fn sweep(&self, min_timestamp: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, timestamps| {
            timestamps.retain(|&ts| ts > min_timestamp);
            !timestamps.is_empty()
        });
        let removed = before.saturating_sub(self.entries.len());
        trace!(removed, remaining = self.entries.len(), "Swept local rate limit store");
        removed
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl TimestampStore for MemoryStore {
    type Error = Infallible;

    async fn record(&self, key: &str, timestamp: u64, _id: &str) -> Result<(), Infallible> {
        self.entries
            .entry(key.to_string())
            .or_default()
            .push(timestamp);
        Ok(())
    }

    async fn prune(&self, key: &str, min_timestamp: u64) -> Result<(), Infallible> {
        let emptied = match self.entries.get_mut(key) {
            Some(mut timestamps) => {
                timestamps.retain(|&ts| ts > min_timestamp);
                timestamps.is_empty()
            }
            None => false,
        };
        if emptied {
            // Another task may have recorded in between.
            self.entries.remove_if(key, |_, timestamps| timestamps.is_empty());
        }
        Ok(())
    }

    async fn count(&self, key: &str) -> Result<u64, Infallible> {
        Ok(self
            .entries
            .get(key)
            .map(|timestamps| timestamps.len() as u64)
            .unwrap_or(0))
    }

    async fn oldest(&self, key: &str) -> Result<Option<u64>, Infallible> {
        Ok(self
            .entries
            .get(key)
            .and_then(|timestamps| timestamps.iter().min().copied()))
    }

    async fn set_expiry(&self, _key: &str, _ttl: Duration) -> Result<(), Infallible> {
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), Infallible> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::block_on;

    #[test]
    fn test_record_and_count() {
        let store = MemoryStore::new();

        block_on(async {
            store.record("a", 100, "1").await.unwrap();
            store.record("a", 200, "2").await.unwrap();
            store.record("b", 300, "3").await.unwrap();

            assert_eq!(store.count("a").await.unwrap(), 2);
            assert_eq!(store.count("b").await.unwrap(), 1);
            assert_eq!(store.count("missing").await.unwrap(), 0);
        });
    }

    #[test]
    fn test_prune_removes_entries_at_or_before_bound() {
        let store = MemoryStore::new();

        block_on(async {
            for ts in [100, 200, 300] {
                store.record("a", ts, "").await.unwrap();
            }
            store.prune("a", 200).await.unwrap();

            assert_eq!(store.count("a").await.unwrap(), 1);
            assert_eq!(store.oldest("a").await.unwrap(), Some(300));
        });
    }

    #[test]
    fn test_prune_to_empty_forgets_key() {
        let store = MemoryStore::new();

        block_on(async {
            store.record("a", 100, "").await.unwrap();
            store.prune("a", 100).await.unwrap();
        });

        assert!(store.is_empty());
    }

    #[test]
    fn test_oldest_is_minimum() {
        let store = MemoryStore::new();

        block_on(async {
            store.record("a", 500, "").await.unwrap();
            store.record("a", 200, "").await.unwrap();
            store.record("a", 900, "").await.unwrap();

            assert_eq!(store.oldest("a").await.unwrap(), Some(200));
            assert_eq!(store.oldest("missing").await.unwrap(), None);
        });
    }

    #[test]
    fn test_clear_missing_key_is_ok() {
        let store = MemoryStore::new();
        assert!(block_on(store.clear("missing")).is_ok());
    }

    #[test]
    fn test_sweep_drops_only_expired_keys() {
        let store = MemoryStore::new();

        block_on(async {
            store.record("stale", 100, "").await.unwrap();
            store.record("mixed", 100, "").await.unwrap();
            store.record("mixed", 1_000, "").await.unwrap();
            store.record("fresh", 2_000, "").await.unwrap();
        });

        let removed = store.sweep(500);

        assert_eq!(removed, 1);
        assert_eq!(store.len(), 2);
        assert_eq!(block_on(store.count("mixed")).unwrap(), 1);
        assert_eq!(block_on(store.count("fresh")).unwrap(), 1);
    }
}
