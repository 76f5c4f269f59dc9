//! Keeps a link's association windows and cached metrics consistent
//!
//! Any change to the set of events sharing a link moves everyone's
//! boundaries, so every trigger recomputes the whole link and writes the
//! result back in one batch. Links are independent of each other and are
//! processed on a bounded pool of tasks.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::attribution::aggregator::{aggregate_batch, AggregationRequest};
use crate::attribution::error::{AttributionError, AttributionResult};
use crate::attribution::ranges::compute_ordered_ranges;
use crate::models::{
    AssociationState, AssociationUpdate, EventWindow, LinkAnalyticsSnapshot, LinkEventAssociation,
};
use crate::storage::{AssociationStore, EventStore, SnapshotSource, StorageError};

/// Links processed concurrently when none is configured
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Outcome of a fleet-wide metrics refresh
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub links_refreshed: usize,
    pub links_failed: usize,
    pub associations_refreshed: usize,
    /// Last link of the last fully processed chunk. Pass it back as the
    /// cursor to resume an interrupted refresh.
    pub resume_after: Option<String>,
    pub interrupted: bool,
}

#[derive(Clone)]
pub struct RecalculationOrchestrator {
    associations: Arc<dyn AssociationStore>,
    events: Arc<dyn EventStore>,
    snapshots: Arc<dyn SnapshotSource>,
    concurrency: usize,
}

impl RecalculationOrchestrator {
    pub fn new(
        associations: Arc<dyn AssociationStore>,
        events: Arc<dyn EventStore>,
        snapshots: Arc<dyn SnapshotSource>,
    ) -> Self {
        Self {
            associations,
            events,
            snapshots,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn list_associations(
        &self,
        link_id: &str,
    ) -> AttributionResult<Vec<LinkEventAssociation>> {
        Ok(self.associations.list_for_link(link_id).await?)
    }

    /// Associate a link with an event and recompute every window of the link.
    ///
    /// An existing association is returned unchanged.
    pub async fn create_association(
        &self,
        link_id: &str,
        event_id: &str,
    ) -> AttributionResult<LinkEventAssociation> {
        if let Some(existing) = self.associations.get_association(link_id, event_id).await? {
            debug!("Association ({}, {}) already exists", link_id, event_id);
            return Ok(existing);
        }

        if self.load_event(event_id).await?.is_none() {
            return Err(AttributionError::not_found("event", event_id));
        }

        let placeholder = LinkEventAssociation::placeholder(link_id, event_id, Utc::now());
        match self.associations.insert_association(&placeholder).await {
            Ok(()) => {
                info!("Linked event {} to link {}", event_id, link_id);
                debug!(
                    "Association ({}, {}) {:?} -> {:?}",
                    link_id,
                    event_id,
                    AssociationState::Unlinked,
                    placeholder.state()
                );
            }
            Err(StorageError::Conflict) => {
                // Lost a race with a concurrent create for the same pair
                return self
                    .associations
                    .get_association(link_id, event_id)
                    .await?
                    .ok_or_else(|| AttributionError::not_found("association", event_id));
            }
            Err(e) => return Err(e.into()),
        }

        let rows = match self.recompute_link(link_id).await {
            Ok(rows) => rows,
            Err(e) => {
                // An unranged placeholder would overlap every sibling window
                warn!(
                    "Recompute of link {} failed, dropping new association with event {}: {}",
                    link_id, event_id, e
                );
                if let Err(rollback) =
                    self.associations.delete_association(link_id, event_id).await
                {
                    error!(
                        "Failed to drop placeholder ({}, {}): {}",
                        link_id, event_id, rollback
                    );
                }
                return Err(e);
            }
        };

        rows.into_iter()
            .find(|row| row.event_id == event_id)
            .ok_or_else(|| AttributionError::not_found("association", event_id))
    }

    /// Remove one association and redistribute the remaining windows of its link.
    pub async fn remove_association(
        &self,
        link_id: &str,
        event_id: &str,
    ) -> AttributionResult<Vec<LinkEventAssociation>> {
        if !self.associations.delete_association(link_id, event_id).await? {
            return Err(AttributionError::not_found("association", event_id));
        }
        info!("Unlinked event {} from link {}", event_id, link_id);
        debug!(
            "Association ({}, {}) -> {:?}",
            link_id,
            event_id,
            AssociationState::Deleted
        );

        self.recompute_link(link_id).await
    }

    /// Recompute windows and metrics for every association of a link.
    ///
    /// Associations whose event no longer exists are skipped and left as they
    /// are. On error nothing is written, so the link keeps its previous state.
    pub async fn recompute_link(
        &self,
        link_id: &str,
    ) -> AttributionResult<Vec<LinkEventAssociation>> {
        let rows = self.associations.list_for_link(link_id).await?;
        if rows.is_empty() {
            debug!("Link {} has no associations, nothing to recompute", link_id);
            return Ok(rows);
        }

        let windows = self.load_windows(link_id, &rows).await?;
        let ranges = compute_ordered_ranges(&windows);

        let snapshot = match self.snapshots.fetch_snapshot(link_id).await? {
            Some(snapshot) => snapshot,
            None => {
                warn!("No snapshot for link {}, metrics will be zero", link_id);
                LinkAnalyticsSnapshot::empty(link_id)
            }
        };
        let snapshot = Arc::new(snapshot);

        let requests = ranges
            .iter()
            .map(|(_, range)| AggregationRequest::new(Arc::clone(&snapshot), *range))
            .collect();
        let metrics = aggregate_batch(requests).await?;

        let synced_at = Utc::now();
        let updates: Vec<AssociationUpdate> = ranges
            .into_iter()
            .zip(metrics)
            .map(|((event_id, range), metrics)| {
                debug!(
                    "Association ({}, {}) {:?} -> {:?} {}",
                    link_id,
                    event_id,
                    AssociationState::PendingRange,
                    AssociationState::Ranged,
                    range
                );
                AssociationUpdate {
                    event_id,
                    range: Some(range),
                    metrics,
                    synced_at,
                }
            })
            .collect();

        let written = self.associations.replace_link(link_id, &updates).await?;
        info!(
            "Recomputed {} of {} windows for link {}",
            updates.len(),
            written.len(),
            link_id
        );

        Ok(written)
    }

    /// Recompute every link the event is associated with.
    ///
    /// Returns the number of links recomputed successfully.
    pub async fn recompute_for_event(&self, event_id: &str) -> AttributionResult<usize> {
        let link_ids = self.links_for_event(event_id).await?;
        Ok(self.recompute_links(&link_ids).await)
    }

    /// Drop an event's associations and redistribute the windows of every
    /// link it touched, as if the event never existed.
    pub async fn handle_event_deleted(&self, event_id: &str) -> AttributionResult<usize> {
        let link_ids = self.links_for_event(event_id).await?;
        let removed = self.associations.delete_for_event(event_id).await?;
        info!(
            "Deleted {} associations of event {} across {} links",
            removed,
            event_id,
            link_ids.len()
        );

        Ok(self.recompute_links(&link_ids).await)
    }

    /// Recompute windows and metrics of every link. Returns the number of
    /// links recomputed successfully.
    pub async fn recompute_all(&self) -> AttributionResult<usize> {
        let link_ids = self.associations.list_link_ids().await?;
        info!("Recomputing {} links", link_ids.len());
        Ok(self.recompute_links(&link_ids).await)
    }

    /// Re-aggregate a link's metrics against its current snapshot, keeping
    /// the stored windows.
    ///
    /// Associations whose event no longer exists keep their previous metrics.
    pub async fn refresh_link_metrics(&self, link_id: &str) -> AttributionResult<usize> {
        let mut rows = Vec::new();
        for row in self.associations.list_for_link(link_id).await? {
            if self.load_event(&row.event_id).await?.is_some() {
                rows.push(row);
            } else {
                warn!(
                    "Link {} references missing event {}, skipping its metrics refresh",
                    link_id, row.event_id
                );
            }
        }
        if rows.is_empty() {
            return Ok(0);
        }

        let snapshot = self
            .snapshots
            .fetch_snapshot(link_id)
            .await?
            .ok_or_else(|| AttributionError::not_found("snapshot", link_id))?;
        let snapshot = Arc::new(snapshot);

        let requests = rows
            .iter()
            .map(|row| AggregationRequest::new(Arc::clone(&snapshot), row.range))
            .collect();
        let metrics = aggregate_batch(requests).await?;

        let synced_at = Utc::now();
        let updates: Vec<AssociationUpdate> = rows
            .into_iter()
            .zip(metrics)
            .map(|(row, metrics)| AssociationUpdate {
                event_id: row.event_id,
                range: None,
                metrics,
                synced_at,
            })
            .collect();

        self.associations.replace_link(link_id, &updates).await?;
        debug!(
            "Refreshed metrics of {} associations for link {}",
            updates.len(),
            link_id
        );

        Ok(updates.len())
    }

    /// Refresh metrics of every link. Returns the number of associations refreshed.
    pub async fn refresh_metrics(&self) -> AttributionResult<usize> {
        let report = self.refresh_metrics_after(None, None).await?;
        Ok(report.associations_refreshed)
    }

    /// Checkpointable fleet refresh.
    ///
    /// Links are visited in ascending order, starting after `cursor`. The
    /// shutdown flag is checked between chunks; every completed link is
    /// fully written, so stopping early never leaves a link half updated.
    pub async fn refresh_metrics_after(
        &self,
        cursor: Option<&str>,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> AttributionResult<RefreshReport> {
        let mut link_ids = self.associations.list_link_ids().await?;
        if let Some(cursor) = cursor {
            link_ids.retain(|id| id.as_str() > cursor);
        }

        let mut report = RefreshReport {
            resume_after: cursor.map(str::to_string),
            ..RefreshReport::default()
        };

        for chunk in link_ids.chunks(self.concurrency) {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                info!("Metrics refresh interrupted, resume after {:?}", report.resume_after);
                report.interrupted = true;
                break;
            }

            let results = self
                .run_chunk(chunk, |this, link_id| async move {
                    this.refresh_link_metrics(&link_id).await
                })
                .await;

            for (link_id, result) in chunk.iter().zip(results) {
                match result {
                    Ok(count) => {
                        report.links_refreshed += 1;
                        report.associations_refreshed += count;
                    }
                    Err(e) => {
                        error!("Failed to refresh metrics for link {}: {}", link_id, e);
                        report.links_failed += 1;
                    }
                }
            }

            report.resume_after = chunk.last().cloned();
        }

        info!(
            "Metrics refresh finished: {} links ok, {} failed, {} associations",
            report.links_refreshed, report.links_failed, report.associations_refreshed
        );

        Ok(report)
    }

    async fn load_event(&self, event_id: &str) -> AttributionResult<Option<EventWindow>> {
        match self.events.get_event(event_id).await {
            Ok(event) => Ok(event),
            Err(StorageError::Invalid(reason)) => Err(AttributionError::Validation {
                event_id: event_id.to_string(),
                reason,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_windows(
        &self,
        link_id: &str,
        rows: &[LinkEventAssociation],
    ) -> AttributionResult<Vec<EventWindow>> {
        let mut windows = Vec::with_capacity(rows.len());
        for row in rows {
            match self.load_event(&row.event_id).await? {
                Some(window) => windows.push(window),
                None => warn!(
                    "Link {} references missing event {}, excluding it from windows",
                    link_id, row.event_id
                ),
            }
        }
        Ok(windows)
    }

    async fn links_for_event(&self, event_id: &str) -> AttributionResult<Vec<String>> {
        let link_ids: BTreeSet<String> = self
            .associations
            .list_for_event(event_id)
            .await?
            .into_iter()
            .map(|row| row.link_id)
            .collect();
        Ok(link_ids.into_iter().collect())
    }

    async fn recompute_links(&self, link_ids: &[String]) -> usize {
        let mut recomputed = 0;
        for chunk in link_ids.chunks(self.concurrency) {
            let results = self
                .run_chunk(chunk, |this, link_id| async move {
                    this.recompute_link(&link_id).await.map(|rows| rows.len())
                })
                .await;

            for (link_id, result) in chunk.iter().zip(results) {
                match result {
                    Ok(_) => recomputed += 1,
                    Err(e) => error!("Failed to recompute link {}: {}", link_id, e),
                }
            }
        }
        recomputed
    }

    /// Run `op` for every link of the chunk on its own task. Results follow
    /// the chunk order.
    async fn run_chunk<T, F, Fut>(&self, link_ids: &[String], op: F) -> Vec<AttributionResult<T>>
    where
        F: Fn(Self, String) -> Fut,
        Fut: Future<Output = AttributionResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let handles: Vec<_> = link_ids
            .iter()
            .map(|link_id| tokio::spawn(op(self.clone(), link_id.clone())))
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (link_id, handle) in link_ids.iter().zip(handles) {
            results.push(handle.await.unwrap_or_else(|e| {
                Err(AttributionError::Worker {
                    link_id: link_id.clone(),
                    reason: e.to_string(),
                })
            }));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DailyClicks, DateRange, RangeBound};
    use crate::storage::MemoryStorage;
    use chrono::{DateTime, NaiveDate, TimeZone};

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn created(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap()
    }

    fn setup() -> (Arc<MemoryStorage>, RecalculationOrchestrator) {
        let storage = Arc::new(MemoryStorage::new());
        let orchestrator =
            RecalculationOrchestrator::new(storage.clone(), storage.clone(), storage.clone())
                .with_concurrency(2);
        (storage, orchestrator)
    }

    fn snapshot(link_id: &str, days: &[(&str, u64)]) -> LinkAnalyticsSnapshot {
        let daily_clicks: Vec<DailyClicks> = days
            .iter()
            .map(|(d, clicks)| DailyClicks {
                date: date(d),
                clicks: *clicks,
            })
            .collect();
        let total = daily_clicks.iter().map(|d| d.clicks).sum();
        LinkAnalyticsSnapshot {
            link_id: link_id.to_string(),
            total_clicks_all_time: total,
            total_unique_clicks_all_time: total / 2,
            daily_clicks,
            ..Default::default()
        }
    }

    fn range_of(rows: &[LinkEventAssociation], event_id: &str) -> DateRange {
        rows.iter()
            .find(|row| row.event_id == event_id)
            .map(|row| row.range)
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_association_owns_all_time() {
        let (storage, orchestrator) = setup();
        storage.upsert_event("game1", Some(date("2025-07-01")), created(10));
        storage.store_snapshot(snapshot("qr", &[("2025-06-20", 5), ("2025-07-01", 20)]));

        let row = orchestrator.create_association("qr", "game1").await.unwrap();

        assert_eq!(row.range, DateRange::UNBOUNDED);
        assert_eq!(row.cached_metrics.clicks, 25);
        assert_eq!(row.state(), AssociationState::Synced);
    }

    #[tokio::test]
    async fn test_adding_event_recomputes_siblings() {
        let (storage, orchestrator) = setup();
        storage.upsert_event("game1", Some(date("2025-07-01")), created(10));
        storage.upsert_event("game2", Some(date("2025-07-05")), created(10));
        storage.store_snapshot(snapshot(
            "qr",
            &[("2025-07-01", 10), ("2025-07-03", 4), ("2025-07-05", 30)],
        ));

        orchestrator.create_association("qr", "game1").await.unwrap();
        orchestrator.create_association("qr", "game2").await.unwrap();

        let rows = orchestrator.list_associations("qr").await.unwrap();
        let boundary = RangeBound::Bounded(date("2025-07-03"));
        assert_eq!(range_of(&rows, "game1"), DateRange::new(RangeBound::Unbounded, boundary));
        assert_eq!(range_of(&rows, "game2"), DateRange::new(boundary, RangeBound::Unbounded));

        let game1 = rows.iter().find(|r| r.event_id == "game1").unwrap();
        assert_eq!(game1.cached_metrics.clicks, 14);
    }

    #[tokio::test]
    async fn test_existing_association_is_returned_unchanged() {
        let (storage, orchestrator) = setup();
        storage.upsert_event("game1", Some(date("2025-07-01")), created(10));

        let first = orchestrator.create_association("qr", "game1").await.unwrap();
        let second = orchestrator.create_association("qr", "game1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(orchestrator.list_associations("qr").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_event_is_rejected() {
        let (_storage, orchestrator) = setup();

        let err = orchestrator.create_association("qr", "ghost").await.unwrap_err();
        assert!(matches!(err, AttributionError::NotFound { kind: "event", .. }));
        assert!(orchestrator.list_associations("qr").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recompute_is_idempotent() {
        let (storage, orchestrator) = setup();
        for (id, day) in [("a", "2025-07-01"), ("b", "2025-07-02"), ("c", "2025-07-20")] {
            storage.upsert_event(id, Some(date(day)), created(10));
        }
        storage.store_snapshot(snapshot("qr", &[("2025-07-01", 3), ("2025-07-19", 8)]));
        for id in ["a", "b", "c"] {
            orchestrator.create_association("qr", id).await.unwrap();
        }

        let first = orchestrator.recompute_link("qr").await.unwrap();
        let second = orchestrator.recompute_link("qr").await.unwrap();

        for (before, after) in first.iter().zip(&second) {
            assert_eq!(before.event_id, after.event_id);
            assert_eq!(before.range, after.range);
            assert_eq!(before.cached_metrics, after.cached_metrics);
        }
    }

    #[tokio::test]
    async fn test_event_deletion_redistributes_windows() {
        let (storage, orchestrator) = setup();
        for (id, day) in [("a", "2025-07-01"), ("b", "2025-07-05"), ("c", "2025-07-20")] {
            storage.upsert_event(id, Some(date(day)), created(10));
            orchestrator.create_association("qr", id).await.unwrap();
        }

        storage.delete_event("b");
        let recomputed = orchestrator.handle_event_deleted("b").await.unwrap();
        assert_eq!(recomputed, 1);

        let rows = orchestrator.list_associations("qr").await.unwrap();
        assert_eq!(rows.len(), 2);
        let boundary = RangeBound::Bounded(date("2025-07-03"));
        assert_eq!(range_of(&rows, "a"), DateRange::new(RangeBound::Unbounded, boundary));
        assert_eq!(range_of(&rows, "c"), DateRange::new(boundary, RangeBound::Unbounded));
    }

    #[tokio::test]
    async fn test_recompute_for_event_touches_every_link() {
        let (storage, orchestrator) = setup();
        storage.upsert_event("game1", Some(date("2025-07-01")), created(10));
        for link in ["qr", "flyer", "email"] {
            orchestrator.create_association(link, "game1").await.unwrap();
        }

        storage.upsert_event("game1", Some(date("2025-08-01")), created(10));
        assert_eq!(orchestrator.recompute_for_event("game1").await.unwrap(), 3);
        assert_eq!(orchestrator.recompute_for_event("unlinked").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_event_is_excluded_and_left_alone() {
        let (storage, orchestrator) = setup();
        for (id, day) in [("a", "2025-07-01"), ("b", "2025-07-10")] {
            storage.upsert_event(id, Some(date(day)), created(10));
            orchestrator.create_association("qr", id).await.unwrap();
        }
        let stale_b = storage.get_association("qr", "b").await.unwrap().unwrap();

        storage.delete_event("b");
        let rows = orchestrator.recompute_link("qr").await.unwrap();

        assert_eq!(range_of(&rows, "a"), DateRange::UNBOUNDED);
        let b = rows.iter().find(|r| r.event_id == "b").unwrap();
        assert_eq!(b, &stale_b);
    }

    #[tokio::test]
    async fn test_refresh_skips_missing_event() {
        let (storage, orchestrator) = setup();
        storage.store_snapshot(snapshot("qr", &[("2025-07-01", 10), ("2025-07-12", 6)]));
        for (id, day) in [("a", "2025-07-01"), ("b", "2025-07-10")] {
            storage.upsert_event(id, Some(date(day)), created(10));
            orchestrator.create_association("qr", id).await.unwrap();
        }
        let stale_b = storage.get_association("qr", "b").await.unwrap().unwrap();

        storage.delete_event("b");
        orchestrator.recompute_link("qr").await.unwrap();
        storage.store_snapshot(snapshot(
            "qr",
            &[("2025-07-01", 10), ("2025-07-12", 6), ("2025-07-13", 4)],
        ));

        assert_eq!(orchestrator.refresh_link_metrics("qr").await.unwrap(), 1);

        let b = storage.get_association("qr", "b").await.unwrap().unwrap();
        assert_eq!(b.cached_metrics, stale_b.cached_metrics);
        assert_eq!(b.last_synced_at, stale_b.last_synced_at);

        let a = storage.get_association("qr", "a").await.unwrap().unwrap();
        assert_eq!(a.cached_metrics.clicks, 20);
    }

    #[tokio::test]
    async fn test_failed_create_rolls_back_placeholder() {
        let (storage, orchestrator) = setup();
        for (id, day) in [("a", "2025-07-01"), ("b", "2025-07-05"), ("c", "2025-07-20")] {
            storage.upsert_event(id, Some(date(day)), created(10));
        }
        orchestrator.create_association("qr", "a").await.unwrap();
        orchestrator.create_association("qr", "b").await.unwrap();

        storage.upsert_event("b", None, created(10));
        let err = orchestrator.create_association("qr", "c").await.unwrap_err();
        assert!(matches!(err, AttributionError::Validation { .. }));
        assert!(storage.get_association("qr", "c").await.unwrap().is_none());

        // Once b is dated again a retry recomputes the whole link
        storage.upsert_event("b", Some(date("2025-07-05")), created(10));
        let c = orchestrator.create_association("qr", "c").await.unwrap();
        assert_eq!(c.state(), AssociationState::Synced);
        assert_eq!(
            c.range,
            DateRange::new(RangeBound::Bounded(date("2025-07-07")), RangeBound::Unbounded)
        );

        let rows = orchestrator.list_associations("qr").await.unwrap();
        assert_eq!(range_of(&rows, "b").end, RangeBound::Bounded(date("2025-07-07")));
    }

    #[tokio::test]
    async fn test_invalid_event_keeps_last_known_good() {
        let (storage, orchestrator) = setup();
        for (id, day) in [("a", "2025-07-01"), ("b", "2025-07-10")] {
            storage.upsert_event(id, Some(date(day)), created(10));
            orchestrator.create_association("qr", id).await.unwrap();
        }
        let before = orchestrator.list_associations("qr").await.unwrap();

        storage.upsert_event("b", None, created(10));
        let err = orchestrator.recompute_link("qr").await.unwrap_err();
        assert!(matches!(err, AttributionError::Validation { .. }));

        assert_eq!(orchestrator.list_associations("qr").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_missing_snapshot_still_assigns_ranges() {
        let (storage, orchestrator) = setup();
        storage.upsert_event("a", Some(date("2025-07-01")), created(10));
        storage.upsert_event("b", Some(date("2025-07-02")), created(10));
        orchestrator.create_association("qr", "a").await.unwrap();
        orchestrator.create_association("qr", "b").await.unwrap();

        let rows = orchestrator.list_associations("qr").await.unwrap();
        let boundary = RangeBound::Bounded(date("2025-07-01"));
        assert_eq!(range_of(&rows, "a").end, boundary);
        assert_eq!(range_of(&rows, "b").start, boundary);
        assert!(rows.iter().all(|r| r.cached_metrics.clicks == 0));
    }

    #[tokio::test]
    async fn test_refresh_keeps_ranges_and_uses_new_snapshot() {
        let (storage, orchestrator) = setup();
        storage.upsert_event("a", Some(date("2025-07-01")), created(10));
        storage.upsert_event("b", Some(date("2025-07-10")), created(10));
        storage.store_snapshot(snapshot("qr", &[("2025-07-01", 10)]));
        orchestrator.create_association("qr", "a").await.unwrap();
        orchestrator.create_association("qr", "b").await.unwrap();
        let before = orchestrator.list_associations("qr").await.unwrap();

        // Reschedule without a recompute: refresh must not move windows
        storage.upsert_event("b", Some(date("2025-07-02")), created(10));
        storage.store_snapshot(snapshot("qr", &[("2025-07-01", 10), ("2025-07-11", 7)]));

        assert_eq!(orchestrator.refresh_link_metrics("qr").await.unwrap(), 2);

        let after = orchestrator.list_associations("qr").await.unwrap();
        assert_eq!(range_of(&after, "b"), range_of(&before, "b"));
        let b = after.iter().find(|r| r.event_id == "b").unwrap();
        assert_eq!(b.cached_metrics.clicks, 7);
    }

    #[tokio::test]
    async fn test_fleet_refresh_skips_failed_links() {
        let (storage, orchestrator) = setup();
        storage.upsert_event("a", Some(date("2025-07-01")), created(10));
        storage.store_snapshot(snapshot("with-data", &[("2025-07-01", 4)]));
        orchestrator.create_association("with-data", "a").await.unwrap();
        orchestrator.create_association("no-data", "a").await.unwrap();
        let stale = storage.get_association("no-data", "a").await.unwrap().unwrap();

        let report = orchestrator.refresh_metrics_after(None, None).await.unwrap();

        assert_eq!(report.links_refreshed, 1);
        assert_eq!(report.links_failed, 1);
        assert_eq!(report.associations_refreshed, 1);
        assert!(!report.interrupted);
        assert_eq!(
            storage.get_association("no-data", "a").await.unwrap().unwrap(),
            stale
        );
        assert_eq!(orchestrator.refresh_metrics().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_refresh_stops_on_shutdown_and_resumes() {
        let (storage, orchestrator) = setup();
        storage.upsert_event("a", Some(date("2025-07-01")), created(10));
        for link in ["l1", "l2", "l3"] {
            storage.store_snapshot(snapshot(link, &[("2025-07-01", 1)]));
            orchestrator.create_association(link, "a").await.unwrap();
        }

        let (tx, rx) = watch::channel(true);
        let report = orchestrator.refresh_metrics_after(None, Some(&rx)).await.unwrap();
        assert!(report.interrupted);
        assert_eq!(report.links_refreshed, 0);
        assert_eq!(report.resume_after, None);

        tx.send(false).unwrap();
        let report = orchestrator
            .refresh_metrics_after(Some("l1"), Some(&rx))
            .await
            .unwrap();
        assert_eq!(report.links_refreshed, 2);
        assert_eq!(report.resume_after.as_deref(), Some("l3"));
    }

    #[tokio::test]
    async fn test_remove_association_redistributes() {
        let (storage, orchestrator) = setup();
        storage.upsert_event("a", Some(date("2025-07-01")), created(10));
        storage.upsert_event("b", Some(date("2025-07-05")), created(10));
        orchestrator.create_association("qr", "a").await.unwrap();
        orchestrator.create_association("qr", "b").await.unwrap();

        let rows = orchestrator.remove_association("qr", "b").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].range, DateRange::UNBOUNDED);

        let err = orchestrator.remove_association("qr", "b").await.unwrap_err();
        assert!(matches!(err, AttributionError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_recompute_all_counts_links() {
        let (storage, orchestrator) = setup();
        storage.upsert_event("a", Some(date("2025-07-01")), created(10));
        for link in ["l1", "l2", "l3"] {
            orchestrator.create_association(link, "a").await.unwrap();
        }

        assert_eq!(orchestrator.recompute_all().await.unwrap(), 3);
    }
}
