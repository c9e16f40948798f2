//! Decoding of broker payloads.
//!
//! Nodes in the field publish loosely shaped JSON: the device may be called
//! `device_id`, `device` or `node`, power `power_watts`, `watt` or `daya`, and
//! timestamps are either epoch milliseconds or date strings. Everything is
//! normalised into a [`NewReading`] here so nothing downstream branches on
//! field names.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use super::IngestError;
use crate::{
    config::DeviceCatalog,
    control::ControlCommand,
    db::models::{ActuatorState, NewReading, ReadingSource},
};

const DEVICE_KEYS: &[&str] = &["device_id", "device", "node"];
const TIMESTAMP_KEYS: &[&str] = &["timestamp", "ts"];
const POWER_KEYS: &[&str] = &["power_watts", "watt", "daya"];
const STATE_KEYS: &[&str] = &["actuator_state", "relay", "state"];
const LUX_KEYS: &[&str] = &["lux", "illuminance"];
const TEMPERATURE_KEYS: &[&str] = &["temperature", "suhu", "temp"];
const HUMIDITY_KEYS: &[&str] = &["humidity", "kelembaban"];
const NODE_KEYS: &[&str] = &["target_node_id", "node_id"];

/// Decodes a data-plane payload.
///
/// A missing or unparseable timestamp falls back to `received_at`. When only
/// one of power and actuator state is present, the other is derived: power
/// from the catalog's nominal wattage, state from `power > 0`.
pub fn parse_reading(
    payload: &[u8],
    received_at: DateTime<Utc>,
    catalog: &DeviceCatalog,
) -> Result<NewReading, IngestError> {
    let obj = parse_object(payload)?;

    let device_id = device_id(&obj)?;

    let recorded_at = match first(&obj, TIMESTAMP_KEYS) {
        Some((key, v)) => parse_timestamp(v).unwrap_or_else(|| {
            debug!(device_id = %device_id, field = key, value = %v, "Unparseable timestamp; using receipt time");
            received_at
        }),
        None => received_at,
    };

    let mut power_watts = optional_number(&obj, POWER_KEYS)?;
    if let Some(watts) = power_watts {
        if watts < 0.0 {
            return Err(IngestError::InvalidField {
                field: "power_watts",
                reason: format!("negative power {watts}"),
            });
        }
    }

    let mut actuator_state = match first(&obj, STATE_KEYS) {
        Some((key, v)) => Some(parse_state(v).ok_or_else(|| IngestError::InvalidField {
            field: key,
            reason: format!("not an actuator state: {v}"),
        })?),
        None => None,
    };

    match (power_watts, actuator_state) {
        (None, Some(state)) => {
            power_watts = catalog
                .get(&device_id)
                .map(|d| if state.is_on() { d.nominal_watts } else { 0.0 });
        }
        (Some(watts), None) => actuator_state = Some(ActuatorState::from_bool(watts > 0.0)),
        _ => {}
    }

    Ok(NewReading {
        device_id,
        recorded_at,
        received_at,
        power_watts,
        actuator_state,
        illuminance_lux: optional_number(&obj, LUX_KEYS)?,
        temperature_c: optional_number(&obj, TEMPERATURE_KEYS)?,
        humidity_pct: optional_number(&obj, HUMIDITY_KEYS)?,
        node_id: first(&obj, NODE_KEYS).map(|(_, v)| scalar_string(v)),
        source: ReadingSource::Sensor,
    })
}

/// Decodes a control-plane payload such as `{"device":"kipas","state":"off"}`.
pub fn parse_control(payload: &[u8]) -> Result<ControlCommand, IngestError> {
    let obj = parse_object(payload)?;
    let device = device_id(&obj)?;
    let state = match obj.get("state") {
        Some(v) => parse_state(v).ok_or_else(|| IngestError::InvalidField {
            field: "state",
            reason: format!("not an actuator state: {v}"),
        })?,
        None => return Err(IngestError::MissingField("state")),
    };
    Ok(ControlCommand {
        device,
        state,
        target_node_id: first(&obj, NODE_KEYS).map(|(_, v)| scalar_string(v)),
    })
}

fn parse_object(payload: &[u8]) -> Result<Map<String, Value>, IngestError> {
    match serde_json::from_slice::<Value>(payload)? {
        Value::Object(obj) => Ok(obj),
        _ => Err(IngestError::NotAnObject),
    }
}

fn device_id(obj: &Map<String, Value>) -> Result<String, IngestError> {
    first(obj, DEVICE_KEYS)
        .map(|(_, v)| scalar_string(v))
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .ok_or(IngestError::MissingField("device_id"))
}

/// First non-null value among `keys`, with the key it was found under.
fn first<'a>(obj: &'a Map<String, Value>, keys: &[&'static str]) -> Option<(&'static str, &'a Value)> {
    keys.iter()
        .find_map(|k| obj.get(*k).filter(|v| !v.is_null()).map(|v| (*k, v)))
}

fn optional_number(obj: &Map<String, Value>, keys: &[&'static str]) -> Result<Option<f64>, IngestError> {
    let Some((key, v)) = first(obj, keys) else {
        return Ok(None);
    };
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match n {
        Some(n) if n.is_finite() => Ok(Some(n)),
        _ => Err(IngestError::InvalidField {
            field: key,
            reason: format!("not a number: {v}"),
        }),
    }
}

fn scalar_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_state(v: &Value) -> Option<ActuatorState> {
    match v {
        Value::Bool(b) => Some(ActuatorState::from_bool(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(ActuatorState::Off),
            Some(1) => Some(ActuatorState::On),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(ActuatorState::On),
            "false" | "0" => Some(ActuatorState::Off),
            other => other.parse().ok(),
        },
        _ => None,
    }
}

/// Epoch milliseconds (number or numeric string), RFC 3339, or a naive
/// `YYYY-MM-DD HH:MM:SS` taken as UTC.
fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(DateTime::from_timestamp_millis),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ms) = s.parse::<i64>() {
                return DateTime::from_timestamp_millis(ms);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| naive.and_utc())
        }
        _ => None,
    }
}
