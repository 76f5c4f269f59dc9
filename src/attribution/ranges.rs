//! Partitioning of time between events that share one link
//!
//! Every event gets a `[start, end)` window. The first window reaches into
//! the unbounded past, the last one into the unbounded future, and every
//! interior boundary is copied from the previous window's end so the
//! windows never overlap and never leave a hole.

use chrono::{Days, NaiveDate};
use std::collections::HashMap;

use crate::models::{DateRange, EventWindow, RangeBound};

/// Trailing days an event keeps after its date when the next event is far enough away
pub const BUFFER_DAYS: u64 = 2;

/// Events closer than this collapse the earlier window onto its own event date
pub const MIN_GAP_DAYS: i64 = 3;

/// Compute the window for every event, keyed by event id.
///
/// The result does not depend on the order of `events`.
pub fn compute_ranges(events: &[EventWindow]) -> HashMap<String, DateRange> {
    compute_ordered_ranges(events).into_iter().collect()
}

/// Same as [`compute_ranges`] but returns the windows in chronological event order.
pub fn compute_ordered_ranges(events: &[EventWindow]) -> Vec<(String, DateRange)> {
    match events {
        [] => return Vec::new(),
        [only] => return vec![(only.event_id.clone(), DateRange::UNBOUNDED)],
        _ => {}
    }

    let mut sorted: Vec<&EventWindow> = events.iter().collect();
    // event_id only matters for fully identical (date, created_at) pairs
    sorted.sort_by(|a, b| {
        (a.event_date, a.created_at, &a.event_id).cmp(&(b.event_date, b.created_at, &b.event_id))
    });

    let mut ranges: Vec<(String, DateRange)> = Vec::with_capacity(sorted.len());

    for (i, current) in sorted.iter().enumerate() {
        let start = match i.checked_sub(1) {
            None => RangeBound::Unbounded,
            Some(prev) if sorted[prev].event_date == current.event_date => {
                RangeBound::Bounded(add_days(current.event_date, 1))
            }
            Some(prev) => ranges[prev].1.end,
        };

        let end = match sorted.get(i + 1) {
            None => RangeBound::Unbounded,
            Some(next) => {
                let gap = (next.event_date - current.event_date).num_days();
                if gap < MIN_GAP_DAYS {
                    RangeBound::Bounded(current.event_date)
                } else {
                    RangeBound::Bounded(add_days(current.event_date, BUFFER_DAYS))
                }
            }
        };

        ranges.push((current.event_id.clone(), DateRange { start, end }));
    }

    ranges
}

fn add_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_add_days(Days::new(days)).unwrap_or(NaiveDate::MAX)
}
