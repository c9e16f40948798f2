use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::PowerSample;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Energy drawn by one device between two consecutive samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntervalEnergy {
    pub device_id: String,
    pub start_timestamp: DateTime<Utc>,
    pub energy_kwh: f64,
}

/// Result of [`compute_energy`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnergyIntervals {
    /// Ordered by `(start_timestamp, device_id)`.
    pub intervals: Vec<IntervalEnergy>,
    /// Samples excluded because their timestamp or power was missing or not finite.
    pub skipped: usize,
}

/// Converts samples into per-interval energy.
///
/// Samples are grouped by device and sorted by timestamp within each group, so
/// an interleaved multi-device stream yields exactly the intervals each device
/// would yield on its own. Interval `i` spans `t[i-1]..t[i]` and draws the power
/// of sample `i-1`; the first sample of a device opens no interval. Durations
/// below zero are clamped to zero.
pub fn compute_energy(samples: &[PowerSample]) -> EnergyIntervals {
    let mut skipped = 0;
    let mut by_device: BTreeMap<&str, Vec<(DateTime<Utc>, f64)>> = BTreeMap::new();

    for s in samples {
        match (s.timestamp, s.power_watts) {
            (Some(ts), Some(watts)) if watts.is_finite() => {
                by_device.entry(s.device_id.as_str()).or_default().push((ts, watts));
            }
            _ => skipped += 1,
        }
    }

    let mut intervals = Vec::new();
    for (device_id, mut series) in by_device {
        // Stable, so equal timestamps keep arrival order.
        series.sort_by_key(|(ts, _)| *ts);

        for pair in series.windows(2) {
            let (start, watts) = pair[0];
            let (end, _) = pair[1];
            let hours = ((end - start).num_milliseconds() as f64 / MILLIS_PER_HOUR).max(0.0);
            intervals.push(IntervalEnergy {
                device_id: device_id.to_owned(),
                start_timestamp: start,
                energy_kwh: watts * hours / 1000.0,
            });
        }
    }

    intervals.sort_by(|a, b| {
        a.start_timestamp
            .cmp(&b.start_timestamp)
            .then_with(|| a.device_id.cmp(&b.device_id))
    });

    EnergyIntervals { intervals, skipped }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 8, 0, 0).unwrap()
    }

    fn sample(device: &str, minutes: i64, watts: f64) -> PowerSample {
        PowerSample::new(device, t0() + Duration::minutes(minutes), watts)
    }

    fn device_total(result: &EnergyIntervals, device: &str) -> f64 {
        result
            .intervals
            .iter()
            .filter(|i| i.device_id == device)
            .map(|i| i.energy_kwh)
            .sum()
    }

    #[test]
    fn empty_input_yields_nothing() {
        let r = compute_energy(&[]);
        assert!(r.intervals.is_empty());
        assert_eq!(r.skipped, 0);
    }

    #[test]
    fn single_sample_opens_no_interval() {
        let r = compute_energy(&[sample("lampu", 0, 100.0)]);
        assert!(r.intervals.is_empty());
    }

    #[test]
    fn one_hour_at_100_watts_is_a_tenth_kwh() {
        let r = compute_energy(&[sample("lampu", 0, 100.0), sample("lampu", 60, 0.0)]);
        assert_eq!(r.intervals.len(), 1);
        assert_eq!(r.intervals[0].device_id, "lampu");
        assert_eq!(r.intervals[0].start_timestamp, t0());
        assert!((r.intervals[0].energy_kwh - 0.1).abs() < 1e-12);
    }

    #[test]
    fn power_of_earlier_sample_is_held() {
        // 0 W for the first hour, then 200 W for 30 minutes.
        let r = compute_energy(&[
            sample("kipas", 0, 0.0),
            sample("kipas", 60, 200.0),
            sample("kipas", 90, 50.0),
        ]);
        assert_eq!(r.intervals.len(), 2);
        assert_eq!(r.intervals[0].energy_kwh, 0.0);
        assert!((r.intervals[1].energy_kwh - 0.1).abs() < 1e-12);
    }

    #[test]
    fn unsorted_input_is_sorted_first() {
        let sorted = compute_energy(&[
            sample("lampu", 0, 100.0),
            sample("lampu", 30, 40.0),
            sample("lampu", 90, 0.0),
        ]);
        let shuffled = compute_energy(&[
            sample("lampu", 90, 0.0),
            sample("lampu", 0, 100.0),
            sample("lampu", 30, 40.0),
        ]);
        assert_eq!(sorted, shuffled);
        assert!(shuffled.intervals.iter().all(|i| i.energy_kwh >= 0.0));
    }

    #[test]
    fn interleaved_devices_match_isolated_series() {
        let a = [sample("a", 0, 100.0), sample("a", 60, 100.0), sample("a", 120, 0.0)];
        let b = [sample("b", 10, 40.0), sample("b", 40, 10.0), sample("b", 100, 0.0)];
        let interleaved = [a[0].clone(), b[0].clone(), b[1].clone(), a[1].clone(), b[2].clone(), a[2].clone()];

        let mixed = compute_energy(&interleaved);
        let only_a = compute_energy(&a);
        let only_b = compute_energy(&b);

        assert_eq!(device_total(&mixed, "a"), device_total(&only_a, "a"));
        assert_eq!(device_total(&mixed, "b"), device_total(&only_b, "b"));
        assert!((device_total(&mixed, "a") - 0.2).abs() < 1e-12);
        // 40 W * 0.5 h + 10 W * 1 h = 30 Wh
        assert!((device_total(&mixed, "b") - 0.03).abs() < 1e-12);
        assert_eq!(mixed.intervals.len(), 4);
    }

    #[test]
    fn duplicate_timestamp_contributes_zero() {
        let r = compute_energy(&[
            sample("lampu", 0, 100.0),
            sample("lampu", 0, 250.0),
            sample("lampu", 60, 0.0),
        ]);
        assert_eq!(r.intervals.len(), 2);
        assert_eq!(r.intervals[0].energy_kwh, 0.0);
        assert!(r.intervals.iter().all(|i| i.energy_kwh.is_finite() && i.energy_kwh >= 0.0));
        // The later of the duplicates carries into the next interval.
        assert!((r.intervals[1].energy_kwh - 0.25).abs() < 1e-12);
    }

    #[test]
    fn incomplete_samples_are_skipped_not_fatal() {
        let samples = vec![
            sample("lampu", 0, 100.0),
            PowerSample { device_id: "lampu".into(), timestamp: None, power_watts: Some(500.0) },
            PowerSample {
                device_id: "lampu".into(),
                timestamp: Some(t0() + Duration::minutes(10)),
                power_watts: None,
            },
            PowerSample {
                device_id: "lampu".into(),
                timestamp: Some(t0() + Duration::minutes(20)),
                power_watts: Some(f64::NAN),
            },
            sample("lampu", 60, 0.0),
        ];
        let r = compute_energy(&samples);
        assert_eq!(r.skipped, 3);
        assert_eq!(r.intervals.len(), 1);
        assert!((r.intervals[0].energy_kwh - 0.1).abs() < 1e-12);
    }

    #[test]
    fn output_is_chronological_across_devices() {
        let r = compute_energy(&[
            sample("b", 5, 10.0),
            sample("a", 0, 10.0),
            sample("b", 65, 10.0),
            sample("a", 60, 10.0),
        ]);
        let starts: Vec<_> = r.intervals.iter().map(|i| i.start_timestamp).collect();
        assert_eq!(starts, vec![t0(), t0() + Duration::minutes(5)]);
    }
}
