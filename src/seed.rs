//! Synthetic readings for demos and local development.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::{
    config::DeviceCatalog,
    db::models::{ActuatorState, NewReading, ReadingSource},
    store::{Store, StoreError},
};

const DUMMY_NODE: &str = "dummy";

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// One reading per configured device at `at`, with a random relay state.
///
/// A device that is on draws its nominal wattage with up to 10% jitter. The
/// first device also carries illuminance, temperature and humidity values in
/// the ranges a living room sensor node reports.
pub fn dummy_readings<R: Rng>(rng: &mut R, catalog: &DeviceCatalog, at: DateTime<Utc>) -> Vec<NewReading> {
    catalog
        .devices()
        .iter()
        .enumerate()
        .map(|(i, device)| {
            let state = ActuatorState::from_bool(rng.gen_bool(0.5));
            let power_watts = if state.is_on() {
                round_to(device.nominal_watts * rng.gen_range(0.9..=1.1), 2)
            } else {
                0.0
            };
            let with_env = i == 0;

            NewReading {
                device_id: device.id.clone(),
                recorded_at: at,
                received_at: at,
                power_watts: Some(power_watts),
                actuator_state: Some(state),
                illuminance_lux: with_env.then(|| round_to(rng.gen_range(50.0..300.0), 2)),
                temperature_c: with_env.then(|| round_to(rng.gen_range(25.0..35.0), 1)),
                humidity_pct: with_env.then(|| round_to(rng.gen_range(40.0..70.0), 1)),
                node_id: Some(DUMMY_NODE.to_owned()),
                source: ReadingSource::Dummy,
            }
        })
        .collect()
}

/// A historical series covering `[end - hours, end]` at `step` spacing, oldest first.
pub fn backfill<R: Rng>(
    rng: &mut R,
    catalog: &DeviceCatalog,
    end: DateTime<Utc>,
    hours: i64,
    step: Duration,
) -> Vec<NewReading> {
    if hours <= 0 || step <= Duration::zero() {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut at = end - Duration::hours(hours);
    while at <= end {
        out.extend(dummy_readings(rng, catalog, at));
        at += step;
    }
    out
}

/// Inserts readings one by one; returns how many were written.
pub async fn insert_all(store: &Store, readings: Vec<NewReading>) -> Result<usize, StoreError> {
    let mut written = 0;
    for reading in readings {
        store.insert_reading(reading).await?;
        written += 1;
    }
    Ok(written)
}
