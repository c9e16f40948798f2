use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::warn;
use utoipa::OpenApi;

use super::{
    dto::{
        ControlRequest, ControlResponse, CostSummaryResponse, CurrentStatusDto, DailyCostDto,
        DataResponse, DeviceStateDto, EnergySummaryResponse, EstimateDto, Period, ReadingDto,
    },
    errors::AppError,
    AppState,
};
use crate::{
    db::models::{ActuatorState, Reading, ReadingSource, StateOrigin},
    energy::{
        compute_energy, daily_average, estimate_forward, observed_days, summarize, BucketSummary,
        Granularity, PowerSample, Summary,
    },
    store::StoreError,
};

const DEFAULT_DATA_LIMIT: i64 = 200;
const MAX_DATA_LIMIT: i64 = 1000;
const DEFAULT_SUMMARY_DAYS: i64 = 30;

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DataParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CostSummaryParams {
    pub period: Option<String>,
    pub tariff: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct EnergySummaryParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub granularity: Option<String>,
    pub tariff: Option<f64>,
    pub device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TimeRangeParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn resolve_tariff(requested: Option<f64>, default: f64) -> Result<f64, AppError> {
    let tariff = requested.unwrap_or(default);
    if !tariff.is_finite() || tariff < 0.0 {
        return Err(AppError::BadRequest(format!(
            "tariff must be a non-negative number, got {tariff}"
        )));
    }
    Ok(tariff)
}

struct Report {
    summary: Summary,
    skipped: usize,
    observed_days: f64,
}

fn build_report(readings: &[Reading], tariff: f64, granularity: Granularity) -> Report {
    let samples: Vec<PowerSample> = readings.iter().map(PowerSample::from).collect();
    let energy = compute_energy(&samples);
    Report {
        summary: summarize(&energy.intervals, tariff, granularity),
        skipped: energy.skipped,
        observed_days: observed_days(&samples),
    }
}

async fn load_current(state: &AppState, limit: i64) -> Result<DataResponse, StoreError> {
    let statuses = state.store.device_statuses().await?;
    let environment = state.store.latest_environment().await?;
    let readings = state.store.recent_readings(limit).await?;

    // Catalog order; status rows for anything else are ignored.
    let devices: Vec<DeviceStateDto> = state
        .catalog
        .ids()
        .map(|id| match statuses.iter().find(|s| s.device_id == id) {
            Some(s) => DeviceStateDto {
                device_id: s.device_id.clone(),
                state: Some(s.state),
                origin: Some(s.origin),
                updated_at: Some(s.updated_at),
            },
            None => unknown_state(id),
        })
        .collect();

    let status = CurrentStatusDto {
        timestamp: environment.as_ref().map_or_else(Utc::now, |r| r.recorded_at),
        devices,
        illuminance_lux: environment.as_ref().and_then(|r| r.illuminance_lux),
        temperature_c: environment.as_ref().and_then(|r| r.temperature_c),
        humidity_pct: environment.as_ref().and_then(|r| r.humidity_pct),
        degraded: false,
        message: None,
    };

    Ok(DataResponse {
        status,
        readings: readings.into_iter().map(Into::into).collect(),
    })
}

fn unknown_state(device_id: &str) -> DeviceStateDto {
    DeviceStateDto {
        device_id: device_id.to_owned(),
        state: None,
        origin: None,
        updated_at: None,
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Most recent readings plus the current status of every device.
///
/// Never fails because of the store: when it cannot be read, a degraded view
/// with unknown device states and no readings is returned instead.
#[utoipa::path(
    get,
    path = "/data",
    params(
        ("limit" = Option<i64>, Query, description = "Number of readings to return (1-1000, default 200)"),
    ),
    responses(
        (status = 200, description = "Current status and recent readings", body = DataResponse),
    ),
    tag = "readings"
)]
pub async fn get_data(State(state): State<AppState>, Query(params): Query<DataParams>) -> Json<DataResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_DATA_LIMIT).clamp(1, MAX_DATA_LIMIT);

    match load_current(&state, limit).await {
        Ok(data) => Json(data),
        Err(e) => {
            warn!(error = %e, "Store unavailable; serving degraded status");
            Json(DataResponse {
                status: CurrentStatusDto {
                    timestamp: Utc::now(),
                    devices: state.catalog.ids().map(unknown_state).collect(),
                    illuminance_lux: None,
                    temperature_c: None,
                    humidity_pct: None,
                    degraded: true,
                    message: Some(e.to_string()),
                },
                readings: Vec::new(),
            })
        }
    }
}

/// Energy and cost over the last 7, 30 or 365 days with a per-day breakdown
/// and a moving-average projection over the same period length.
#[utoipa::path(
    get,
    path = "/cost_summary",
    params(
        ("period" = Option<Period>, Query, description = "weekly (default), monthly or yearly"),
        ("tariff" = Option<f64>, Query, description = "Cost per kWh; defaults to the configured tariff"),
    ),
    responses(
        (status = 200, description = "Cost summary", body = CostSummaryResponse),
        (status = 400, description = "Invalid period or tariff"),
        (status = 503, description = "Store unavailable"),
    ),
    tag = "energy"
)]
pub async fn get_cost_summary(
    State(state): State<AppState>,
    Query(params): Query<CostSummaryParams>,
) -> Result<Json<CostSummaryResponse>, AppError> {
    let period = match params.period.as_deref() {
        Some(p) => p.parse::<Period>().map_err(AppError::BadRequest)?,
        None => Period::Weekly,
    };
    let tariff = resolve_tariff(params.tariff, state.default_tariff)?;

    let window_end = Utc::now();
    let window_start = window_end - Duration::days(period.days());
    let readings = state.store.readings_between(window_start, window_end, None).await?;
    let report = build_report(&readings, tariff, Granularity::Day);

    let daily_avg = daily_average(report.summary.total_energy_kwh, report.observed_days);
    let projected = estimate_forward(daily_avg, period.days() as f64, tariff);

    Ok(Json(CostSummaryResponse {
        period,
        tariff,
        window_start,
        window_end,
        total_energy_kwh: report.summary.total_energy_kwh,
        total_cost: report.summary.total_cost,
        daily_summary: report
            .summary
            .buckets
            .into_iter()
            .map(|b| DailyCostDto {
                date: b.start,
                energy_kwh: b.energy_kwh,
                cost: b.cost,
            })
            .collect(),
        skipped_readings: report.skipped,
        estimate: EstimateDto {
            method: "moving_average".to_owned(),
            days_observed: report.observed_days,
            daily_average_energy_kwh: daily_avg,
            target_period_days: period.days(),
            estimated_energy_kwh: projected.energy_kwh,
            estimated_cost: projected.cost,
        },
    }))
}

/// Energy and cost over an arbitrary window rolled up per day, week, month or year.
#[utoipa::path(
    get,
    path = "/energy_summary",
    params(
        ("from" = Option<DateTime<Utc>>, Query, description = "Start of window (RFC3339); defaults to 30 days before `to`"),
        ("to" = Option<DateTime<Utc>>, Query, description = "End of window (RFC3339); defaults to now"),
        ("granularity" = Option<Granularity>, Query, description = "day (default), week, month or year"),
        ("tariff" = Option<f64>, Query, description = "Cost per kWh; defaults to the configured tariff"),
        ("device_id" = Option<String>, Query, description = "Restrict to one device"),
    ),
    responses(
        (status = 200, description = "Bucketed energy summary", body = EnergySummaryResponse),
        (status = 400, description = "Invalid window, granularity or tariff"),
        (status = 503, description = "Store unavailable"),
    ),
    tag = "energy"
)]
pub async fn get_energy_summary(
    State(state): State<AppState>,
    Query(params): Query<EnergySummaryParams>,
) -> Result<Json<EnergySummaryResponse>, AppError> {
    let granularity = match params.granularity.as_deref() {
        Some(g) => g.parse::<Granularity>().map_err(AppError::BadRequest)?,
        None => Granularity::Day,
    };
    let tariff = resolve_tariff(params.tariff, state.default_tariff)?;

    let window_end = params.to.unwrap_or_else(Utc::now);
    let window_start = params
        .from
        .unwrap_or(window_end - Duration::days(DEFAULT_SUMMARY_DAYS));
    if window_start > window_end {
        return Err(AppError::BadRequest(format!(
            "from ({window_start}) is after to ({window_end})"
        )));
    }

    let readings = state
        .store
        .readings_between(window_start, window_end, params.device_id.as_deref())
        .await?;
    let report = build_report(&readings, tariff, granularity);

    Ok(Json(EnergySummaryResponse {
        granularity,
        tariff,
        window_start,
        window_end,
        device_id: params.device_id,
        total_energy_kwh: report.summary.total_energy_kwh,
        total_cost: report.summary.total_cost,
        buckets: report.summary.buckets,
        skipped_readings: report.skipped,
    }))
}

/// Time series for one device, oldest first. Defaults to the last 24 hours.
#[utoipa::path(
    get,
    path = "/readings/{device_id}",
    params(
        ("device_id" = String, Path, description = "Device identifier"),
        ("from" = Option<DateTime<Utc>>, Query, description = "Start of time range (RFC3339)"),
        ("to"   = Option<DateTime<Utc>>, Query, description = "End of time range (RFC3339)"),
    ),
    responses(
        (status = 200, description = "Device readings", body = Vec<ReadingDto>),
        (status = 400, description = "Invalid time range"),
        (status = 503, description = "Store unavailable"),
    ),
    tag = "readings"
)]
pub async fn get_device_readings(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<TimeRangeParams>,
) -> Result<Json<Vec<ReadingDto>>, AppError> {
    let to = params.to.unwrap_or_else(Utc::now);
    let from = params.from.unwrap_or(to - Duration::days(1));
    if from > to {
        return Err(AppError::BadRequest(format!("from ({from}) is after to ({to})")));
    }

    let rows = state.store.readings_between(from, to, Some(&device_id)).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

async fn relay_command(
    state: &AppState,
    device: &str,
    requested: &str,
    target_node_id: Option<String>,
) -> Result<ControlResponse, AppError> {
    let command = state.relay.validate(device, requested, target_node_id)?;
    let status = state.relay.set_actuator_state(command).await?;
    Ok(ControlResponse {
        status: "sent".to_owned(),
        device: status.device_id,
        current_state: status.state,
    })
}

/// Publishes an actuator command and records the requested state.
///
/// The returned state is optimistic: the device does not acknowledge
/// commands, so it is confirmed only once telemetry reports it.
#[utoipa::path(
    post,
    path = "/control",
    request_body = ControlRequest,
    responses(
        (status = 200, description = "Command sent", body = ControlResponse),
        (status = 400, description = "Malformed body, unknown device or invalid state"),
        (status = 503, description = "Broker or store unavailable"),
    ),
    tag = "control"
)]
pub async fn post_control(
    State(state): State<AppState>,
    payload: Result<Json<ControlRequest>, JsonRejection>,
) -> Result<Json<ControlResponse>, AppError> {
    let Json(req) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    relay_command(&state, &req.device, &req.state, req.target_node_id)
        .await
        .map(Json)
}

/// Same as `POST /control`, addressed by path.
#[utoipa::path(
    get,
    path = "/control/{device}/{state}",
    params(
        ("device" = String, Path, description = "Device identifier"),
        ("state" = ActuatorState, Path, description = "ON or OFF"),
    ),
    responses(
        (status = 200, description = "Command sent", body = ControlResponse),
        (status = 400, description = "Unknown device or invalid state"),
        (status = 503, description = "Broker or store unavailable"),
    ),
    tag = "control"
)]
pub async fn get_control(
    State(state): State<AppState>,
    Path((device, requested)): Path<(String, String)>,
) -> Result<Json<ControlResponse>, AppError> {
    relay_command(&state, &device, &requested, None).await.map(Json)
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI spec
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        get_data,
        get_cost_summary,
        get_energy_summary,
        get_device_readings,
        post_control,
        get_control,
        health
    ),
    components(schemas(
        ReadingDto,
        DataResponse,
        CurrentStatusDto,
        DeviceStateDto,
        CostSummaryResponse,
        DailyCostDto,
        EstimateDto,
        EnergySummaryResponse,
        BucketSummary,
        ControlRequest,
        ControlResponse,
        Period,
        Granularity,
        ActuatorState,
        ReadingSource,
        StateOrigin
    )),
    tags(
        (name = "readings", description = "Raw readings and current status"),
        (name = "energy",   description = "Energy and cost aggregation"),
        (name = "control",  description = "Actuator commands"),
        (name = "system",   description = "System endpoints"),
    ),
    info(
        title = "Energy Monitor API",
        version = "0.1.0",
        description = "REST API for household power telemetry, energy cost reports and relay control"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
