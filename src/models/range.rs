//! Date windows assigned to events sharing a link

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One end of a [`DateRange`].
///
/// Serialized as `null` (unbounded) or `"YYYY-MM-DD"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Option<NaiveDate>", into = "Option<NaiveDate>")]
pub enum RangeBound {
    #[default]
    Unbounded,
    Bounded(NaiveDate),
}

impl RangeBound {
    pub fn date(self) -> Option<NaiveDate> {
        match self {
            RangeBound::Unbounded => None,
            RangeBound::Bounded(date) => Some(date),
        }
    }
}

impl From<Option<NaiveDate>> for RangeBound {
    fn from(value: Option<NaiveDate>) -> Self {
        value.map_or(RangeBound::Unbounded, RangeBound::Bounded)
    }
}

impl From<RangeBound> for Option<NaiveDate> {
    fn from(value: RangeBound) -> Self {
        value.date()
    }
}

impl From<NaiveDate> for RangeBound {
    fn from(value: NaiveDate) -> Self {
        RangeBound::Bounded(value)
    }
}

impl fmt::Display for RangeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeBound::Unbounded => f.write_str("∞"),
            RangeBound::Bounded(date) => write!(f, "{}", date),
        }
    }
}

/// Attribution window for one event. An unbounded `start` reaches into the
/// unbounded past, an unbounded `end` covers all future (ongoing) data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DateRange {
    pub start: RangeBound,
    pub end: RangeBound,
}

impl DateRange {
    /// The window covering all of time
    pub const UNBOUNDED: DateRange = DateRange {
        start: RangeBound::Unbounded,
        end: RangeBound::Unbounded,
    };

    pub fn new(start: impl Into<RangeBound>, end: impl Into<RangeBound>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Inclusive containment check used when filtering the daily series.
    pub fn contains(&self, date: NaiveDate) -> bool {
        let after_start = match self.start {
            RangeBound::Unbounded => true,
            RangeBound::Bounded(start) => date >= start,
        };
        let before_end = match self.end {
            RangeBound::Unbounded => true,
            RangeBound::Bounded(end) => date <= end,
        };
        after_start && before_end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
