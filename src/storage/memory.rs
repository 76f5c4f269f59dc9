//! In-process store backed by concurrent maps
//!
//! Used by tests and by deployments that keep associations in memory. Rows
//! of one link live under a single map entry, so a per-link replacement is
//! atomic with respect to readers of that link.

use crate::models::{AssociationUpdate, EventWindow, LinkAnalyticsSnapshot, LinkEventAssociation};
use crate::storage::{AssociationStore, EventStore, SnapshotSource, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone)]
struct StoredEvent {
    event_date: Option<NaiveDate>,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryStorage {
    associations: DashMap<String, Vec<LinkEventAssociation>>,
    events: DashMap<String, StoredEvent>,
    snapshots: DashMap<String, LinkAnalyticsSnapshot>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_event(
        &self,
        event_id: &str,
        event_date: Option<NaiveDate>,
        created_at: DateTime<Utc>,
    ) {
        self.events
            .entry(event_id.to_string())
            .and_modify(|e| e.event_date = event_date)
            .or_insert(StoredEvent {
                event_date,
                created_at,
            });
    }

    pub fn delete_event(&self, event_id: &str) -> bool {
        self.events.remove(event_id).is_some()
    }

    pub fn store_snapshot(&self, snapshot: LinkAnalyticsSnapshot) {
        self.snapshots.insert(snapshot.link_id.clone(), snapshot);
    }
}

#[async_trait]
impl AssociationStore for MemoryStorage {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn get_association(
        &self,
        link_id: &str,
        event_id: &str,
    ) -> StorageResult<Option<LinkEventAssociation>> {
        Ok(self.associations.get(link_id).and_then(|rows| {
            rows.iter().find(|row| row.event_id == event_id).cloned()
        }))
    }

    async fn insert_association(&self, association: &LinkEventAssociation) -> StorageResult<()> {
        let mut rows = self
            .associations
            .entry(association.link_id.clone())
            .or_default();

        if rows.iter().any(|row| row.event_id == association.event_id) {
            return Err(StorageError::Conflict);
        }

        rows.push(association.clone());
        Ok(())
    }

    async fn list_for_link(&self, link_id: &str) -> StorageResult<Vec<LinkEventAssociation>> {
        Ok(self
            .associations
            .get(link_id)
            .map(|rows| rows.value().clone())
            .unwrap_or_default())
    }

    async fn list_for_event(&self, event_id: &str) -> StorageResult<Vec<LinkEventAssociation>> {
        let mut found: Vec<LinkEventAssociation> = self
            .associations
            .iter()
            .filter_map(|entry| entry.value().iter().find(|row| row.event_id == event_id).cloned())
            .collect();
        found.sort_by(|a, b| a.link_id.cmp(&b.link_id));
        Ok(found)
    }

    async fn list_link_ids(&self) -> StorageResult<Vec<String>> {
        let mut ids: Vec<String> = self
            .associations
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn replace_link(
        &self,
        link_id: &str,
        updates: &[AssociationUpdate],
    ) -> StorageResult<Vec<LinkEventAssociation>> {
        let Some(mut rows) = self.associations.get_mut(link_id) else {
            return Ok(Vec::new());
        };

        for update in updates {
            if let Some(row) = rows.iter_mut().find(|row| row.event_id == update.event_id) {
                row.apply(update);
            }
        }

        Ok(rows.value().clone())
    }

    async fn delete_association(&self, link_id: &str, event_id: &str) -> StorageResult<bool> {
        let removed = match self.associations.get_mut(link_id) {
            Some(mut rows) => {
                let before = rows.len();
                rows.retain(|row| row.event_id != event_id);
                rows.len() < before
            }
            None => false,
        };
        self.associations.remove_if(link_id, |_, rows| rows.is_empty());
        Ok(removed)
    }

    async fn delete_for_event(&self, event_id: &str) -> StorageResult<u64> {
        let mut removed = 0u64;
        for mut entry in self.associations.iter_mut() {
            let before = entry.value().len();
            entry.value_mut().retain(|row| row.event_id != event_id);
            removed += (before - entry.value().len()) as u64;
        }
        self.associations.retain(|_, rows| !rows.is_empty());
        Ok(removed)
    }
}

#[async_trait]
impl EventStore for MemoryStorage {
    async fn get_event(&self, event_id: &str) -> StorageResult<Option<EventWindow>> {
        let Some(stored) = self.events.get(event_id).map(|e| e.value().clone()) else {
            return Ok(None);
        };

        match stored.event_date {
            Some(event_date) => Ok(Some(EventWindow::new(event_id, event_date, stored.created_at))),
            None => Err(StorageError::Invalid(format!(
                "event '{}' has no event date",
                event_id
            ))),
        }
    }
}

#[async_trait]
impl SnapshotSource for MemoryStorage {
    async fn fetch_snapshot(&self, link_id: &str) -> StorageResult<Option<LinkAnalyticsSnapshot>> {
        Ok(self.snapshots.get(link_id).map(|s| s.value().clone()))
    }
}
