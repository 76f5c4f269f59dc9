use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metrics::AggregatedMetrics;
use super::range::DateRange;

/// Lifecycle of a link/event association.
///
/// `Unlinked` and `Deleted` describe rows that do not exist. `Ranged` only
/// exists inside a recompute, between range calculation and the batch write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationState {
    Unlinked,
    PendingRange,
    Ranged,
    Synced,
    Deleted,
}

/// Persisted junction record between a shortlink and an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEventAssociation {
    pub link_id: String,
    pub event_id: String,
    pub range: DateRange,
    pub auto_calculated: bool,
    pub cached_metrics: AggregatedMetrics,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LinkEventAssociation {
    /// New row awaiting its first recompute
    pub fn placeholder(link_id: &str, event_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            link_id: link_id.to_string(),
            event_id: event_id.to_string(),
            range: DateRange::UNBOUNDED,
            auto_calculated: true,
            cached_metrics: AggregatedMetrics::default(),
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> AssociationState {
        if self.last_synced_at.is_some() {
            AssociationState::Synced
        } else {
            AssociationState::PendingRange
        }
    }

    /// Apply a recompute result in place
    pub fn apply(&mut self, update: &AssociationUpdate) {
        if let Some(range) = update.range {
            self.range = range;
        }
        self.cached_metrics = update.metrics.clone();
        self.auto_calculated = true;
        self.last_synced_at = Some(update.synced_at);
        self.updated_at = update.synced_at;
    }
}

/// One row of a per-link batch write.
///
/// `range` is `None` when only metrics are refreshed and the stored window
/// must be kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationUpdate {
    pub event_id: String,
    pub range: Option<DateRange>,
    pub metrics: AggregatedMetrics,
    pub synced_at: DateTime<Utc>,
}
