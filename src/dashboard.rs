//! Plain-text rendering for the terminal dashboard.
//!
//! Polling lives in the `dashboard` binary; this module only turns fetched
//! responses into frames. Each section keeps its last good response, so a
//! failed `/cost_summary` does not hide a fresh `/data` and the other way
//! round.

use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::{
    api::dto::{CostSummaryResponse, DataResponse, ReadingDto},
    client::DashboardClient,
};

const MAX_READING_ROWS: usize = 10;

/// Outcome of one poll; the two endpoints fail independently.
#[derive(Debug)]
pub struct Poll {
    pub data: Result<DataResponse>,
    pub cost: Result<CostSummaryResponse>,
    pub at: DateTime<Utc>,
}

/// Fetches `/data` and `/cost_summary` concurrently.
pub async fn poll(client: &DashboardClient, limit: i64, period: &str, tariff: Option<f64>) -> Poll {
    let (data, cost) = tokio::join!(client.fetch_data(limit), client.cost_summary(period, tariff));
    Poll { data, cost, at: Utc::now() }
}

/// A response together with when it was fetched.
#[derive(Debug, Clone)]
pub struct Kept<T> {
    pub value: T,
    pub fetched_at: DateTime<Utc>,
}

/// Keeps the last successful response of each endpoint between polls.
#[derive(Debug, Default)]
pub struct DashboardView {
    data: Option<Kept<DataResponse>>,
    cost: Option<Kept<CostSummaryResponse>>,
}

impl DashboardView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of a poll and returns the frame to display.
    pub fn update(&mut self, poll: Poll, now: DateTime<Utc>) -> String {
        let data = section(&mut self.data, poll.data, poll.at, now);
        let cost = section(&mut self.cost, poll.cost, poll.at, now);
        Frame { data, cost, now }.to_string()
    }

    pub fn data(&self) -> Option<&Kept<DataResponse>> {
        self.data.as_ref()
    }

    pub fn cost(&self) -> Option<&Kept<CostSummaryResponse>> {
        self.cost.as_ref()
    }
}

struct Stale {
    age_secs: i64,
    error: String,
}

enum Section<'a, T> {
    Fresh(&'a Kept<T>),
    Stale(&'a Kept<T>, Stale),
    Missing(String),
}

fn section<'a, T>(
    slot: &'a mut Option<Kept<T>>,
    outcome: Result<T>,
    at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Section<'a, T> {
    match outcome {
        Ok(value) => Section::Fresh(slot.insert(Kept { value, fetched_at: at })),
        Err(e) => {
            let error = format!("{e:#}");
            match slot {
                Some(kept) => {
                    let age_secs = (now - kept.fetched_at).num_seconds().max(0);
                    Section::Stale(kept, Stale { age_secs, error })
                }
                None => Section::Missing(error),
            }
        }
    }
}

struct Frame<'a> {
    data: Section<'a, DataResponse>,
    cost: Section<'a, CostSummaryResponse>,
    now: DateTime<Utc>,
}

fn opt(value: Option<f64>, unit: &str) -> String {
    value.map_or_else(|| "-".to_owned(), |v| format!("{v:.1}{unit}"))
}

fn reading_row(r: &ReadingDto) -> String {
    format!(
        "  {}  {:<10} {:>9}  {:<3}",
        r.recorded_at.format("%Y-%m-%d %H:%M:%S"),
        r.device_id,
        opt(r.power_watts, " W"),
        r.actuator_state.map_or_else(|| "-".to_owned(), |s| s.to_string()),
    )
}

fn write_data(f: &mut fmt::Formatter<'_>, data: &DataResponse) -> fmt::Result {
    let status = &data.status;
    if status.degraded {
        writeln!(
            f,
            "[DEGRADED] store unavailable: {}",
            status.message.as_deref().unwrap_or("unknown error")
        )?;
    }

    writeln!(f, "\nDevices")?;
    for d in &status.devices {
        let state = d.state.map_or_else(|| "unknown".to_owned(), |s| s.to_string());
        let origin = d.origin.map_or_else(String::new, |o| format!(" ({o:?})").to_lowercase());
        writeln!(f, "  {:<10} {state}{origin}", d.device_id)?;
    }

    writeln!(
        f,
        "\nEnvironment  lux {}  temp {}  humidity {}",
        opt(status.illuminance_lux, ""),
        opt(status.temperature_c, " C"),
        opt(status.humidity_pct, " %"),
    )?;

    writeln!(f, "\nRecent readings")?;
    if data.readings.is_empty() {
        writeln!(f, "  (none)")?;
    }
    for r in data.readings.iter().take(MAX_READING_ROWS) {
        writeln!(f, "{}", reading_row(r))?;
    }
    Ok(())
}

fn write_cost(f: &mut fmt::Formatter<'_>, cost: &CostSummaryResponse) -> fmt::Result {
    writeln!(
        f,
        "  Total: {:.3} kWh  cost {:.2}",
        cost.total_energy_kwh, cost.total_cost
    )?;
    for day in &cost.daily_summary {
        writeln!(f, "  {}  {:>9.3} kWh  {:>12.2}", day.date, day.energy_kwh, day.cost)?;
    }
    if cost.skipped_readings > 0 {
        writeln!(f, "  ({} readings skipped)", cost.skipped_readings)?;
    }

    let est = &cost.estimate;
    writeln!(
        f,
        "\nEstimate for {} days (moving average over {:.1} observed days, not a forecast)",
        est.target_period_days, est.days_observed
    )?;
    writeln!(
        f,
        "  {:.3} kWh/day  ->  {:.3} kWh  cost {:.2}",
        est.daily_average_energy_kwh, est.estimated_energy_kwh, est.estimated_cost
    )
}

fn write_stale(f: &mut fmt::Formatter<'_>, stale: &Stale) -> fmt::Result {
    writeln!(
        f,
        "[STALE] showing data from {}s ago; last poll failed: {}",
        stale.age_secs, stale.error
    )
}

impl fmt::Display for Frame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Energy Monitor  (updated {} UTC)", self.now.format("%Y-%m-%d %H:%M:%S"))?;

        match &self.data {
            Section::Fresh(kept) => write_data(f, &kept.value)?,
            Section::Stale(kept, stale) => {
                write_stale(f, stale)?;
                write_data(f, &kept.value)?;
            }
            Section::Missing(error) => writeln!(f, "\nWaiting for service: {error}")?,
        }

        match &self.cost {
            Section::Fresh(kept) | Section::Stale(kept, _) => {
                let cost = &kept.value;
                writeln!(f, "\nCost summary ({:?}, tariff {:.2}/kWh)", cost.period, cost.tariff)?;
                if let Section::Stale(_, stale) = &self.cost {
                    write_stale(f, stale)?;
                }
                write_cost(f, cost)
            }
            Section::Missing(error) => writeln!(f, "\nCost summary unavailable: {error}"),
        }
    }
}
