use crate::models::{AssociationUpdate, EventWindow, LinkAnalyticsSnapshot, LinkEventAssociation};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("association already exists")]
    Conflict,
    /// A stored record failed validation at the store boundary
    #[error("invalid record: {0}")]
    Invalid(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Persistent link/event junction records
#[async_trait]
pub trait AssociationStore: Send + Sync {
    /// Initialize the storage (run migrations, etc.)
    async fn init(&self) -> Result<()>;

    async fn get_association(
        &self,
        link_id: &str,
        event_id: &str,
    ) -> StorageResult<Option<LinkEventAssociation>>;

    /// Insert a placeholder row. Fails with [`StorageError::Conflict`] if the
    /// `(link_id, event_id)` pair already exists.
    async fn insert_association(&self, association: &LinkEventAssociation) -> StorageResult<()>;

    async fn list_for_link(&self, link_id: &str) -> StorageResult<Vec<LinkEventAssociation>>;

    async fn list_for_event(&self, event_id: &str) -> StorageResult<Vec<LinkEventAssociation>>;

    /// Every link id that has at least one association, ascending
    async fn list_link_ids(&self) -> StorageResult<Vec<String>>;

    /// Apply all updates for one link as a single atomic write.
    ///
    /// Updates naming an event that is no longer associated with the link
    /// are ignored. Returns the link's rows after the write.
    async fn replace_link(
        &self,
        link_id: &str,
        updates: &[AssociationUpdate],
    ) -> StorageResult<Vec<LinkEventAssociation>>;

    async fn delete_association(&self, link_id: &str, event_id: &str) -> StorageResult<bool>;

    /// Delete every association of an event, returning the number of rows removed
    async fn delete_for_event(&self, event_id: &str) -> StorageResult<u64>;
}

/// Read access to scheduled events
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Returns [`StorageError::Invalid`] when the stored event has no date
    async fn get_event(&self, event_id: &str) -> StorageResult<Option<EventWindow>>;
}

/// Cached raw analytics written by the upstream sync job
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self, link_id: &str) -> StorageResult<Option<LinkAnalyticsSnapshot>>;
}
