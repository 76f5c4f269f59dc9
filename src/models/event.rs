use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A scheduled event as seen by the attribution engine.
///
/// Owned by the event store. `created_at` breaks ties between events that
/// share the same `event_date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventWindow {
    pub event_id: String,
    pub event_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl EventWindow {
    pub fn new(
        event_id: impl Into<String>,
        event_date: NaiveDate,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_date,
            created_at,
        }
    }
}
