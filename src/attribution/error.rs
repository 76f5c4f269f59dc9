use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum AttributionError {
    /// Structurally invalid input, surfaced as-is
    #[error("invalid event {event_id}: {reason}")]
    Validation { event_id: String, reason: String },
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    #[error("aggregation task failed: {0}")]
    Aggregation(String),
    #[error("worker task for link '{link_id}' failed: {reason}")]
    Worker { link_id: String, reason: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AttributionError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type AttributionResult<T> = Result<T, AttributionError>;
