//! Per-window metrics derived from a cumulative snapshot

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Clicks recorded on a single day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyClicks {
    pub date: NaiveDate,
    pub clicks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopCountry {
    pub code: String,
    pub clicks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopReferrer {
    pub domain: String,
    pub clicks: u64,
}

/// Device split. The upstream provider has no per-day history for this
/// dimension, so it is always zero-filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceBreakdown {
    pub desktop: u64,
    pub mobile: u64,
    pub tablet: u64,
    pub other: u64,
}

/// Browser split. Zero-filled for the same reason as [`DeviceBreakdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BrowserBreakdown {
    pub chrome: u64,
    pub safari: u64,
    pub firefox: u64,
    pub edge: u64,
    pub other: u64,
}

/// Estimated metrics for one event window
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    /// Exact sum of the daily series inside the window
    pub clicks: u64,
    /// Proportional estimate from the all-time unique total
    pub unique_clicks: u64,
    pub top_countries: Vec<TopCountry>,
    pub top_referrers: Vec<TopReferrer>,
    pub device_clicks: DeviceBreakdown,
    pub browser_clicks: BrowserBreakdown,
    pub daily_clicks: Vec<DailyClicks>,
}
