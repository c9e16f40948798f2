use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::PowerSample;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Linear projection of an observed daily average. Not a forecast model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Estimate {
    pub energy_kwh: f64,
    pub cost: f64,
}

/// Span between the earliest and the latest usable sample, in fractional days.
pub fn observed_days(samples: &[PowerSample]) -> f64 {
    let mut stamps = samples
        .iter()
        .filter(|s| s.power_watts.is_some_and(f64::is_finite))
        .filter_map(|s| s.timestamp);

    let Some(first) = stamps.next() else {
        return 0.0;
    };
    let (min, max) = stamps.fold((first, first), |(lo, hi), ts| (lo.min(ts), hi.max(ts)));
    (max - min).num_milliseconds() as f64 / MILLIS_PER_DAY
}

/// Average energy per day, counting at least one day so that windows shorter
/// than a day never divide by zero.
pub fn daily_average(total_energy_kwh: f64, days_observed: f64) -> f64 {
    let days = if days_observed.is_finite() { days_observed.max(1.0) } else { 1.0 };
    (total_energy_kwh / days).max(0.0)
}

pub fn estimate_forward(daily_average_kwh: f64, target_period_days: f64, tariff: f64) -> Estimate {
    let energy_kwh = (daily_average_kwh * target_period_days).max(0.0);
    Estimate {
        energy_kwh,
        cost: (energy_kwh * tariff).max(0.0),
    }
}
