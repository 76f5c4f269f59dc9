//! Temporal attribution of cumulative link analytics to events
//!
//! A shortlink reused across several events only has one cumulative click
//! stream. [`ranges`] splits time into one window per event, [`aggregator`]
//! estimates each window's metrics from the link's snapshot, and
//! [`orchestrator`] keeps the persisted windows and metrics consistent as
//! events come and go.

pub mod aggregator;
pub mod error;
pub mod orchestrator;
pub mod ranges;

pub use aggregator::{aggregate, aggregate_batch, AggregationRequest};
pub use error::{AttributionError, AttributionResult};
pub use orchestrator::{RecalculationOrchestrator, RefreshReport};
pub use ranges::{compute_ordered_ranges, compute_ranges};
