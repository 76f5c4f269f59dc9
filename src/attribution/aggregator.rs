//! Per-window metric estimation from cumulative link snapshots
//!
//! The daily click series is the only dimension with real history, so the
//! click total for a window is exact. Unique clicks, countries and
//! referrers are scaled from their all-time totals by the share of clicks
//! that fell inside the window. Device and browser splits cannot be derived
//! at all and are returned zero-filled.

use std::sync::Arc;
use tracing::error;

use crate::attribution::error::{AttributionError, AttributionResult};
use crate::models::{
    AggregatedMetrics, BrowserBreakdown, DailyClicks, DateRange, DeviceBreakdown,
    LinkAnalyticsSnapshot, TopCountry, TopReferrer,
};

/// Maximum number of countries and referrers kept per window
pub const TOP_N: usize = 10;

/// One unit of work for [`aggregate_batch`]
#[derive(Debug, Clone)]
pub struct AggregationRequest {
    pub snapshot: Arc<LinkAnalyticsSnapshot>,
    pub range: DateRange,
}

impl AggregationRequest {
    pub fn new(snapshot: Arc<LinkAnalyticsSnapshot>, range: DateRange) -> Self {
        Self { snapshot, range }
    }
}

/// Estimate the metrics of `snapshot` that belong to `range`.
///
/// Pure: the same inputs always produce the same output.
pub fn aggregate(snapshot: &LinkAnalyticsSnapshot, range: &DateRange) -> AggregatedMetrics {
    let daily_clicks: Vec<DailyClicks> = snapshot
        .daily_clicks
        .iter()
        .filter(|day| range.contains(day.date))
        .copied()
        .collect();

    let clicks: u64 = daily_clicks.iter().map(|day| day.clicks).sum();

    let ratio = if snapshot.total_clicks_all_time == 0 {
        0.0
    } else {
        clicks as f64 / snapshot.total_clicks_all_time as f64
    };

    let unique_clicks = scale(snapshot.total_unique_clicks_all_time, ratio);

    let top_countries = top_estimates(
        snapshot.countries.iter().map(|c| (c.code.as_str(), c.clicks)),
        ratio,
    )
    .into_iter()
    .map(|(code, clicks)| TopCountry {
        code: code.to_string(),
        clicks,
    })
    .collect();

    let top_referrers = top_estimates(
        snapshot.referrers.iter().map(|r| (r.domain.as_str(), r.clicks)),
        ratio,
    )
    .into_iter()
    .map(|(domain, clicks)| TopReferrer {
        domain: domain.to_string(),
        clicks,
    })
    .collect();

    AggregatedMetrics {
        clicks,
        unique_clicks,
        top_countries,
        top_referrers,
        device_clicks: DeviceBreakdown::default(),
        browser_clicks: BrowserBreakdown::default(),
        daily_clicks,
    }
}

/// Aggregate many requests concurrently.
///
/// Results are returned in request order. A failed task fails the whole
/// batch so callers never persist a partial set.
pub async fn aggregate_batch(
    requests: Vec<AggregationRequest>,
) -> AttributionResult<Vec<AggregatedMetrics>> {
    let handles: Vec<_> = requests
        .into_iter()
        .map(|request| {
            tokio::spawn(async move { aggregate(&request.snapshot, &request.range) })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (index, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(metrics) => results.push(metrics),
            Err(e) => {
                error!("Aggregation request {} failed: {}", index, e);
                return Err(AttributionError::Aggregation(e.to_string()));
            }
        }
    }

    Ok(results)
}

fn scale(value: u64, ratio: f64) -> u64 {
    (value as f64 * ratio).round() as u64
}

/// Scale every entry, drop the ones that round to zero, keep the largest `TOP_N`.
///
/// Ties keep their upstream order.
fn top_estimates<'a>(
    entries: impl Iterator<Item = (&'a str, u64)>,
    ratio: f64,
) -> Vec<(&'a str, u64)> {
    let mut estimated: Vec<(&str, u64)> = entries
        .map(|(key, clicks)| (key, scale(clicks, ratio)))
        .filter(|(_, clicks)| *clicks > 0)
        .collect();

    estimated.sort_by(|a, b| b.1.cmp(&a.1));
    estimated.truncate(TOP_N);
    estimated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CountryClicks, RangeBound, ReferrerClicks};
    use chrono::NaiveDate;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn day(s: &str, clicks: u64) -> DailyClicks {
        DailyClicks {
            date: date(s),
            clicks,
        }
    }

    fn snapshot() -> LinkAnalyticsSnapshot {
        LinkAnalyticsSnapshot {
            link_id: "qr-home".to_string(),
            total_clicks_all_time: 200,
            total_unique_clicks_all_time: 150,
            daily_clicks: vec![
                day("2025-07-01", 40),
                day("2025-07-02", 10),
                day("2025-07-03", 50),
                day("2025-07-06", 60),
                day("2025-07-21", 40),
            ],
            countries: vec![
                CountryClicks {
                    code: "US".to_string(),
                    clicks: 120,
                },
                CountryClicks {
                    code: "CA".to_string(),
                    clicks: 60,
                },
                CountryClicks {
                    code: "MX".to_string(),
                    clicks: 19,
                },
                CountryClicks {
                    code: "FR".to_string(),
                    clicks: 1,
                },
            ],
            referrers: vec![
                ReferrerClicks {
                    domain: "direct".to_string(),
                    clicks: 150,
                },
                ReferrerClicks {
                    domain: "instagram.com".to_string(),
                    clicks: 50,
                },
            ],
            fetched_at: None,
        }
    }

    #[test]
    fn test_filters_daily_series_inclusively() {
        let range = DateRange::new(date("2025-07-02"), date("2025-07-06"));
        let metrics = aggregate(&snapshot(), &range);

        assert_eq!(metrics.clicks, 120);
        assert_eq!(
            metrics.daily_clicks,
            vec![day("2025-07-02", 10), day("2025-07-03", 50), day("2025-07-06", 60)]
        );
    }

    #[test]
    fn test_unbounded_range_covers_whole_series() {
        let metrics = aggregate(&snapshot(), &DateRange::UNBOUNDED);

        assert_eq!(metrics.clicks, 200);
        assert_eq!(metrics.unique_clicks, 150);
        assert_eq!(metrics.top_countries.len(), 4);
    }

    #[test]
    fn test_dimensions_scale_proportionally() {
        // 50 of 200 clicks -> ratio 0.25
        let range = DateRange::new(RangeBound::Unbounded, date("2025-07-02"));
        let metrics = aggregate(&snapshot(), &range);

        assert_eq!(metrics.clicks, 50);
        assert_eq!(metrics.unique_clicks, 38); // 37.5 rounds up
        assert_eq!(
            metrics.top_countries,
            vec![
                TopCountry { code: "US".to_string(), clicks: 30 },
                TopCountry { code: "CA".to_string(), clicks: 15 },
                TopCountry { code: "MX".to_string(), clicks: 5 },
            ]
        );
        assert_eq!(
            metrics.top_referrers,
            vec![
                TopReferrer { domain: "direct".to_string(), clicks: 38 },
                TopReferrer { domain: "instagram.com".to_string(), clicks: 13 },
            ]
        );
    }

    #[test]
    fn test_keeps_at_most_ten_sorted_descending() {
        let mut snap = snapshot();
        snap.countries = (1..=15)
            .map(|i| CountryClicks {
                code: format!("C{}", i),
                clicks: i * 10,
            })
            .collect();

        let metrics = aggregate(&snap, &DateRange::UNBOUNDED);

        assert_eq!(metrics.top_countries.len(), TOP_N);
        assert_eq!(metrics.top_countries[0].code, "C15");
        assert!(metrics
            .top_countries
            .windows(2)
            .all(|pair| pair[0].clicks >= pair[1].clicks));
    }

    #[test]
    fn test_zero_total_yields_zero_metrics() {
        let snap = LinkAnalyticsSnapshot {
            total_clicks_all_time: 0,
            total_unique_clicks_all_time: 0,
            daily_clicks: Vec::new(),
            ..snapshot()
        };

        let metrics = aggregate(&snap, &DateRange::UNBOUNDED);

        assert_eq!(metrics.clicks, 0);
        assert_eq!(metrics.unique_clicks, 0);
        assert!(metrics.top_countries.is_empty());
        assert!(metrics.top_referrers.is_empty());
    }

    #[test]
    fn test_device_and_browser_are_zero_filled() {
        let metrics = aggregate(&snapshot(), &DateRange::UNBOUNDED);

        assert_eq!(metrics.device_clicks, DeviceBreakdown::default());
        assert_eq!(metrics.browser_clicks, BrowserBreakdown::default());
    }

    #[test]
    fn test_aggregate_is_pure() {
        let snap = snapshot();
        let range = DateRange::new(date("2025-07-03"), RangeBound::Unbounded);

        assert_eq!(aggregate(&snap, &range), aggregate(&snap, &range));
    }

    #[tokio::test]
    async fn test_batch_preserves_request_order() {
        let snap = Arc::new(snapshot());
        let ranges = vec![
            DateRange::new(RangeBound::Unbounded, date("2025-07-01")),
            DateRange::new(date("2025-07-01"), date("2025-07-03")),
            DateRange::new(date("2025-07-03"), RangeBound::Unbounded),
        ];

        let requests = ranges
            .iter()
            .map(|range| AggregationRequest::new(Arc::clone(&snap), *range))
            .collect();
        let results = aggregate_batch(requests).await.unwrap();

        assert_eq!(results.len(), 3);
        for (range, metrics) in ranges.iter().zip(&results) {
            assert_eq!(metrics, &aggregate(&snap, range));
        }
        assert_eq!(results[0].clicks, 40);
        assert_eq!(results[1].clicks, 100);
        assert_eq!(results[2].clicks, 150);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        assert!(aggregate_batch(Vec::new()).await.unwrap().is_empty());
    }
}
