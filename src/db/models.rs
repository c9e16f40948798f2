use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Mirrors the `actuator_state` Postgres enum.
///
/// Parsing is case-insensitive (`"on"`, `"ON"`); the wire and database form is
/// always upper-case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "actuator_state", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ActuatorState {
    On,
    Off,
}

impl ActuatorState {
    pub fn is_on(self) -> bool {
        self == ActuatorState::On
    }

    pub fn from_bool(on: bool) -> Self {
        if on {
            ActuatorState::On
        } else {
            ActuatorState::Off
        }
    }
}

impl fmt::Display for ActuatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActuatorState::On => "ON",
            ActuatorState::Off => "OFF",
        })
    }
}

impl FromStr for ActuatorState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ON" => Ok(ActuatorState::On),
            "OFF" => Ok(ActuatorState::Off),
            _ => Err(format!("state must be ON or OFF, got {s:?}")),
        }
    }
}

/// Mirrors the `reading_source` Postgres enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "reading_source", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReadingSource {
    /// Published by a physical node.
    #[default]
    Sensor,
    /// Inserted by the dummy seeder.
    Dummy,
}

/// Mirrors the `state_origin` Postgres enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "state_origin", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StateOrigin {
    /// Optimistic state recorded when a command was relayed.
    Command,
    /// State reported by the device itself.
    Telemetry,
}

/// One timestamped sample from one device.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Reading {
    pub id: Uuid,
    pub device_id: String,
    /// Point in time the sample pertains to.
    pub recorded_at: DateTime<Utc>,
    /// Server-side receipt time.
    pub received_at: DateTime<Utc>,
    pub power_watts: Option<f64>,
    pub actuator_state: Option<ActuatorState>,
    pub illuminance_lux: Option<f64>,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub node_id: Option<String>,
    pub source: ReadingSource,
}

impl Reading {
    /// Whether the reading carries any environmental field.
    pub fn has_environment(&self) -> bool {
        self.illuminance_lux.is_some() || self.temperature_c.is_some() || self.humidity_pct.is_some()
    }
}

/// A reading that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub device_id: String,
    pub recorded_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub power_watts: Option<f64>,
    pub actuator_state: Option<ActuatorState>,
    pub illuminance_lux: Option<f64>,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub node_id: Option<String>,
    pub source: ReadingSource,
}

impl NewReading {
    pub fn into_reading(self, id: Uuid) -> Reading {
        Reading {
            id,
            device_id: self.device_id,
            recorded_at: self.recorded_at,
            received_at: self.received_at,
            power_watts: self.power_watts,
            actuator_state: self.actuator_state,
            illuminance_lux: self.illuminance_lux,
            temperature_c: self.temperature_c,
            humidity_pct: self.humidity_pct,
            node_id: self.node_id,
            source: self.source,
        }
    }
}

/// Last known state of an actuator.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct DeviceStatus {
    pub device_id: String,
    pub state: ActuatorState,
    pub origin: StateOrigin,
    pub updated_at: DateTime<Utc>,
}
