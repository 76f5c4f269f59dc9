use crate::models::LinkAnalyticsSnapshot;
use crate::storage::{SnapshotSource, StorageResult};
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Read-through TTL cache in front of a snapshot source.
///
/// Only present snapshots are cached; a missing snapshot is looked up again
/// on the next call. The sync job should call [`invalidate`](Self::invalidate)
/// after storing fresh data for a link.
pub struct CachedSnapshotSource {
    inner: Arc<dyn SnapshotSource>,
    cache: Cache<String, Arc<LinkAnalyticsSnapshot>>,
}

impl CachedSnapshotSource {
    pub fn new(inner: Arc<dyn SnapshotSource>, max_entries: u64, ttl_secs: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self { inner, cache }
    }

    pub async fn invalidate(&self, link_id: &str) {
        self.cache.invalidate(link_id).await;
    }
}

#[async_trait]
impl SnapshotSource for CachedSnapshotSource {
    async fn fetch_snapshot(&self, link_id: &str) -> StorageResult<Option<LinkAnalyticsSnapshot>> {
        if let Some(cached) = self.cache.get(link_id).await {
            return Ok(Some(cached.as_ref().clone()));
        }

        let snapshot = self.inner.fetch_snapshot(link_id).await?;
        if let Some(ref snapshot) = snapshot {
            self.cache
                .insert(link_id.to_string(), Arc::new(snapshot.clone()))
                .await;
        }

        Ok(snapshot)
    }
}
