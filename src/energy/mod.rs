//! Energy and cost aggregation over power samples.
//!
//! All computations are pure and synchronous: callers fetch a snapshot of
//! readings from the store and hand it over. Timestamps are UTC throughout,
//! including bucket boundaries.
//!
//! Power is treated as a step function per device: the wattage of a sample is
//! held until the next sample of the same device (left Riemann sum).

mod estimate;
mod intervals;
mod summary;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::models::Reading;

pub use estimate::{daily_average, estimate_forward, observed_days, Estimate};
pub use intervals::{compute_energy, EnergyIntervals, IntervalEnergy};
pub use summary::{summarize, BucketSummary, Granularity, Summary};

/// Input to the engine. Either field may be missing, in which case the sample
/// is counted as skipped rather than rejected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerSample {
    pub device_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub power_watts: Option<f64>,
}

impl PowerSample {
    pub fn new(device_id: impl Into<String>, timestamp: DateTime<Utc>, power_watts: f64) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp: Some(timestamp),
            power_watts: Some(power_watts),
        }
    }
}

impl From<&Reading> for PowerSample {
    fn from(r: &Reading) -> Self {
        Self {
            device_id: r.device_id.clone(),
            timestamp: Some(r.recorded_at),
            power_watts: r.power_watts,
        }
    }
}
