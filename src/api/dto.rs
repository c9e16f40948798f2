use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::models::{ActuatorState, Reading, ReadingSource, StateOrigin},
    energy::{BucketSummary, Granularity},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ReadingDto {
    pub id: Uuid,
    pub device_id: String,
    pub recorded_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    /// Watts.
    pub power_watts: Option<f64>,
    pub actuator_state: Option<ActuatorState>,
    /// Lux.
    pub illuminance_lux: Option<f64>,
    /// Degrees Celsius.
    pub temperature_c: Option<f64>,
    /// Relative humidity percentage.
    pub humidity_pct: Option<f64>,
    pub node_id: Option<String>,
    pub source: ReadingSource,
}

impl From<Reading> for ReadingDto {
    fn from(r: Reading) -> Self {
        Self {
            id: r.id,
            device_id: r.device_id,
            recorded_at: r.recorded_at,
            received_at: r.received_at,
            power_watts: r.power_watts,
            actuator_state: r.actuator_state,
            illuminance_lux: r.illuminance_lux,
            temperature_c: r.temperature_c,
            humidity_pct: r.humidity_pct,
            node_id: r.node_id,
            source: r.source,
        }
    }
}

/// State of one actuator. All fields but `device_id` are `null` when the
/// store could not be read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeviceStateDto {
    pub device_id: String,
    pub state: Option<ActuatorState>,
    pub origin: Option<StateOrigin>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CurrentStatusDto {
    /// Time the latest environmental reading was taken, or the response time
    /// when there is none.
    pub timestamp: DateTime<Utc>,
    pub devices: Vec<DeviceStateDto>,
    pub illuminance_lux: Option<f64>,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    /// `true` when the store was unreachable and placeholders are returned.
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Response for `GET /data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DataResponse {
    pub status: CurrentStatusDto,
    /// Newest first.
    pub readings: Vec<ReadingDto>,
}

// ---------------------------------------------------------------------------
// Cost reports
// ---------------------------------------------------------------------------

/// Reporting window ending now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Weekly,
    Monthly,
    Yearly,
}

impl Period {
    pub fn days(self) -> i64 {
        match self {
            Period::Weekly => 7,
            Period::Monthly => 30,
            Period::Yearly => 365,
        }
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weekly" => Ok(Period::Weekly),
            "monthly" => Ok(Period::Monthly),
            "yearly" => Ok(Period::Yearly),
            other => Err(format!("period must be weekly, monthly or yearly, got {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DailyCostDto {
    pub date: NaiveDate,
    pub energy_kwh: f64,
    pub cost: f64,
}

/// Moving-average projection of the observed consumption over the period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EstimateDto {
    /// Always `"moving_average"`.
    pub method: String,
    pub days_observed: f64,
    pub daily_average_energy_kwh: f64,
    pub target_period_days: i64,
    pub estimated_energy_kwh: f64,
    pub estimated_cost: f64,
}

/// Response for `GET /cost_summary`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CostSummaryResponse {
    pub period: Period,
    pub tariff: f64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_energy_kwh: f64,
    pub total_cost: f64,
    pub daily_summary: Vec<DailyCostDto>,
    /// Readings without usable power or timestamp.
    pub skipped_readings: usize,
    pub estimate: EstimateDto,
}

/// Response for `GET /energy_summary`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EnergySummaryResponse {
    pub granularity: Granularity,
    pub tariff: f64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub total_energy_kwh: f64,
    pub total_cost: f64,
    pub buckets: Vec<BucketSummary>,
    pub skipped_readings: usize,
}

// ---------------------------------------------------------------------------
// Control
// ---------------------------------------------------------------------------

/// Request body for `POST /control`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ControlRequest {
    pub device: String,
    /// `ON` or `OFF`, case-insensitive.
    pub state: String,
    pub target_node_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ControlResponse {
    /// Always `"sent"`.
    pub status: String,
    pub device: String,
    pub current_state: ActuatorState,
}
