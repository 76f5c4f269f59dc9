//! Cumulative link analytics as reported by the upstream provider

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metrics::DailyClicks;

/// All-time country total
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryClicks {
    pub code: String,
    pub clicks: u64,
}

/// All-time referrer total
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferrerClicks {
    pub domain: String,
    pub clicks: u64,
}

/// Raw, link-scoped analytics snapshot.
///
/// Only `daily_clicks` has historical resolution. Countries and referrers
/// are cumulative-to-date.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinkAnalyticsSnapshot {
    pub link_id: String,
    pub total_clicks_all_time: u64,
    pub total_unique_clicks_all_time: u64,
    #[serde(default)]
    pub daily_clicks: Vec<DailyClicks>,
    #[serde(default)]
    pub countries: Vec<CountryClicks>,
    #[serde(default)]
    pub referrers: Vec<ReferrerClicks>,
    #[serde(default)]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl LinkAnalyticsSnapshot {
    /// Snapshot with no recorded clicks, used when a link has not been synced yet
    pub fn empty(link_id: impl Into<String>) -> Self {
        Self {
            link_id: link_id.into(),
            ..Self::default()
        }
    }
}
