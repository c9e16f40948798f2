use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::IntervalEnergy;

/// Calendar bucket used for rollups. Boundaries are UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Day,
    /// ISO week, starting on Monday.
    Week,
    Month,
    Year,
}

impl Granularity {
    /// First calendar day of the bucket containing `date`.
    pub fn bucket_start(self, date: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Day => date,
            Granularity::Week => date - Duration::days(date.weekday().num_days_from_monday() as i64),
            Granularity::Month => date.with_day(1).unwrap_or(date),
            Granularity::Year => date.with_ordinal(1).unwrap_or(date),
        }
    }

    /// Human-readable bucket key, e.g. `2025-06-10`, `2025-W24`, `2025-06`, `2025`.
    pub fn label(self, start: NaiveDate) -> String {
        match self {
            Granularity::Day => start.format("%Y-%m-%d").to_string(),
            Granularity::Week => {
                let week = start.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Granularity::Month => start.format("%Y-%m").to_string(),
            Granularity::Year => start.format("%Y").to_string(),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::Year => "year",
        })
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" | "daily" => Ok(Granularity::Day),
            "week" | "weekly" => Ok(Granularity::Week),
            "month" | "monthly" => Ok(Granularity::Month),
            "year" | "yearly" => Ok(Granularity::Year),
            other => Err(format!("unknown granularity {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BucketSummary {
    pub bucket: String,
    pub start: NaiveDate,
    pub energy_kwh: f64,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Summary {
    pub total_energy_kwh: f64,
    pub total_cost: f64,
    /// Ordered by bucket start.
    pub buckets: Vec<BucketSummary>,
}

/// Rolls intervals up into calendar buckets.
///
/// Each interval lands wholly in the bucket of its start timestamp. Bucket
/// energy and cost are floored at zero before the totals are taken, and the
/// totals are the sums of the bucket values.
pub fn summarize(intervals: &[IntervalEnergy], tariff: f64, granularity: Granularity) -> Summary {
    let mut sums: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for i in intervals {
        let start = granularity.bucket_start(i.start_timestamp.date_naive());
        *sums.entry(start).or_default() += i.energy_kwh;
    }

    let buckets: Vec<BucketSummary> = sums
        .into_iter()
        .map(|(start, energy)| {
            let energy_kwh = if energy.is_finite() { energy.max(0.0) } else { 0.0 };
            let cost = (energy_kwh * tariff).max(0.0);
            BucketSummary {
                bucket: granularity.label(start),
                start,
                energy_kwh,
                cost: if cost.is_finite() { cost } else { 0.0 },
            }
        })
        .collect();

    Summary {
        total_energy_kwh: buckets.iter().map(|b| b.energy_kwh).sum(),
        total_cost: buckets.iter().map(|b| b.cost).sum(),
        buckets,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;

    use super::*;
    use crate::energy::{compute_energy, PowerSample};

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn interval(ts: DateTime<Utc>, kwh: f64) -> IntervalEnergy {
        IntervalEnergy { device_id: "lampu".into(), start_timestamp: ts, energy_kwh: kwh }
    }

    #[test]
    fn empty_intervals_give_zero_summary() {
        let s = summarize(&[], 1500.0, Granularity::Day);
        assert_eq!(s.total_energy_kwh, 0.0);
        assert_eq!(s.total_cost, 0.0);
        assert!(s.buckets.is_empty());
    }

    #[test]
    fn daily_buckets_split_on_utc_midnight() {
        let s = summarize(
            &[
                interval(at(2025, 6, 10, 23), 0.5),
                interval(at(2025, 6, 11, 0), 0.25),
                interval(at(2025, 6, 11, 12), 0.25),
            ],
            1000.0,
            Granularity::Day,
        );
        assert_eq!(s.buckets.len(), 2);
        assert_eq!(s.buckets[0].bucket, "2025-06-10");
        assert_eq!(s.buckets[0].energy_kwh, 0.5);
        assert_eq!(s.buckets[0].cost, 500.0);
        assert_eq!(s.buckets[1].bucket, "2025-06-11");
        assert_eq!(s.buckets[1].energy_kwh, 0.5);
        assert_eq!(s.total_energy_kwh, 1.0);
        assert_eq!(s.total_cost, 1000.0);
    }

    #[test]
    fn weekly_buckets_start_on_monday() {
        // 2025-06-08 is a Sunday, 2025-06-09 a Monday.
        let s = summarize(
            &[interval(at(2025, 6, 8, 12), 1.0), interval(at(2025, 6, 9, 1), 2.0), interval(at(2025, 6, 15, 22), 3.0)],
            1.0,
            Granularity::Week,
        );
        assert_eq!(s.buckets.len(), 2);
        assert_eq!(s.buckets[0].start, NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
        assert_eq!(s.buckets[0].bucket, "2025-W23");
        assert_eq!(s.buckets[1].start, NaiveDate::from_ymd_opt(2025, 6, 9).unwrap());
        assert_eq!(s.buckets[1].bucket, "2025-W24");
        assert_eq!(s.buckets[1].energy_kwh, 5.0);
    }

    #[test]
    fn monthly_and_yearly_labels() {
        let intervals = [interval(at(2024, 12, 31, 23), 1.0), interval(at(2025, 1, 1, 0), 1.0)];

        let months = summarize(&intervals, 1.0, Granularity::Month);
        let labels: Vec<_> = months.buckets.iter().map(|b| b.bucket.as_str()).collect();
        assert_eq!(labels, vec!["2024-12", "2025-01"]);

        let years = summarize(&intervals, 1.0, Granularity::Year);
        let labels: Vec<_> = years.buckets.iter().map(|b| b.bucket.as_str()).collect();
        assert_eq!(labels, vec!["2024", "2025"]);
        assert_eq!(years.buckets[1].start, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    }

    #[test]
    fn negative_bucket_is_floored_to_zero() {
        let s = summarize(
            &[interval(at(2025, 6, 10, 1), -2.0), interval(at(2025, 6, 10, 2), 0.5), interval(at(2025, 6, 11, 2), 1.0)],
            100.0,
            Granularity::Day,
        );
        assert_eq!(s.buckets[0].energy_kwh, 0.0);
        assert_eq!(s.buckets[0].cost, 0.0);
        assert_eq!(s.total_energy_kwh, 1.0);
        assert_eq!(s.total_cost, 100.0);
    }

    #[test]
    fn negative_tariff_never_yields_negative_cost() {
        let s = summarize(&[interval(at(2025, 6, 10, 1), 2.0)], -5.0, Granularity::Day);
        assert_eq!(s.total_energy_kwh, 2.0);
        assert_eq!(s.total_cost, 0.0);
    }

    #[test]
    fn granularity_parses_period_aliases() {
        assert_eq!("weekly".parse::<Granularity>().unwrap(), Granularity::Week);
        assert_eq!("month".parse::<Granularity>().unwrap(), Granularity::Month);
        assert!("hourly".parse::<Granularity>().is_err());
    }

    proptest! {
        #[test]
        fn totals_equal_sum_of_buckets(
            steps in prop::collection::vec((0i64..20_000, 0.0f64..3_000.0), 0..60),
            tariff in 0.0f64..5_000.0,
            granularity in prop_oneof![
                Just(Granularity::Day),
                Just(Granularity::Week),
                Just(Granularity::Month),
                Just(Granularity::Year),
            ],
        ) {
            let mut ts = at(2024, 12, 20, 0);
            let mut samples = Vec::new();
            for (gap_minutes, watts) in steps {
                ts += Duration::minutes(gap_minutes);
                samples.push(PowerSample::new("lampu", ts, watts));
            }
            let computed = compute_energy(&samples);
            let s = summarize(&computed.intervals, tariff, granularity);

            let bucket_energy: f64 = s.buckets.iter().map(|b| b.energy_kwh).sum();
            let bucket_cost: f64 = s.buckets.iter().map(|b| b.cost).sum();
            let interval_energy: f64 = computed.intervals.iter().map(|i| i.energy_kwh).sum();

            prop_assert_eq!(s.total_energy_kwh, bucket_energy);
            prop_assert_eq!(s.total_cost, bucket_cost);
            prop_assert!((s.total_energy_kwh - interval_energy).abs() <= 1e-9 * interval_energy.max(1.0));
            prop_assert!(s.total_energy_kwh >= 0.0 && s.total_cost >= 0.0);
        }
    }
}
