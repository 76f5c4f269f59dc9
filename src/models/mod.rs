pub mod association;
pub mod event;
pub mod metrics;
pub mod range;
pub mod snapshot;

pub use association::{AssociationState, AssociationUpdate, LinkEventAssociation};
pub use event::EventWindow;
pub use metrics::{
    AggregatedMetrics, BrowserBreakdown, DailyClicks, DeviceBreakdown, TopCountry, TopReferrer,
};
pub use range::{DateRange, RangeBound};
pub use snapshot::{CountryClicks, LinkAnalyticsSnapshot, ReferrerClicks};
