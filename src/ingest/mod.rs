mod listener;
mod payload;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    config::DeviceCatalog,
    control::ControlCommand,
    db::models::{DeviceStatus, Reading, StateOrigin},
    store::{Store, StoreError},
};

pub use listener::run_listener;
pub use payload::{parse_control, parse_reading};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("missing required field {0:?}")]
    MissingField(&'static str),
    #[error("invalid field {field:?}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("unknown device {0:?}")]
    UnknownDevice(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Turns broker messages into persisted readings and device states.
#[derive(Clone)]
pub struct IngestService {
    store: Store,
    catalog: Arc<DeviceCatalog>,
}

impl IngestService {
    pub fn new(store: Store, catalog: Arc<DeviceCatalog>) -> Self {
        Self { store, catalog }
    }

    /// Persists a data-plane reading. A reported actuator state also becomes
    /// the device's current state, for catalog devices only.
    pub async fn handle_data(&self, payload: &[u8], received_at: DateTime<Utc>) -> Result<Reading, IngestError> {
        let new = parse_reading(payload, received_at, &self.catalog)?;
        let reading = self.store.insert_reading(new).await?;

        let tracked = self.catalog.contains(&reading.device_id);
        if let Some(state) = reading.actuator_state.filter(|_| tracked) {
            self.store
                .record_device_state(&DeviceStatus {
                    device_id: reading.device_id.clone(),
                    state,
                    origin: StateOrigin::Telemetry,
                    updated_at: received_at,
                })
                .await?;
        }

        debug!(
            device_id = %reading.device_id,
            power_watts = ?reading.power_watts,
            recorded_at = %reading.recorded_at,
            "Reading stored"
        );
        Ok(reading)
    }

    /// Mirrors a command seen on the control topic into the device state, so
    /// commands sent by other publishers are reflected too.
    pub async fn handle_control(
        &self,
        payload: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<ControlCommand, IngestError> {
        let command = parse_control(payload)?;
        if !self.catalog.contains(&command.device) {
            return Err(IngestError::UnknownDevice(command.device));
        }

        self.store
            .record_device_state(&DeviceStatus {
                device_id: command.device.clone(),
                state: command.state,
                origin: StateOrigin::Command,
                updated_at: received_at,
            })
            .await?;

        info!(device_id = %command.device, state = %command.state, "Control command observed");
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::db::models::ActuatorState;

    fn service() -> (IngestService, Store) {
        let store = Store::in_memory();
        let catalog = Arc::new("lampu:10,kipas:5".parse().unwrap());
        (IngestService::new(store.clone(), catalog), store)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn data_message_is_stored_with_receipt_time() {
        let (svc, store) = service();
        let reading = svc
            .handle_data(br#"{"device": "lampu", "watt": 9.5, "lux": 300}"#, now())
            .await
            .unwrap();

        assert_eq!(reading.received_at, now());
        assert_eq!(reading.recorded_at, now());
        assert_eq!(store.recent_readings(10).await.unwrap(), vec![reading]);
    }

    #[tokio::test]
    async fn reported_state_updates_device_status() {
        let (svc, store) = service();
        svc.handle_data(br#"{"device": "kipas", "relay": "ON"}"#, now()).await.unwrap();

        let statuses = store.device_statuses().await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].state, ActuatorState::On);
        assert_eq!(statuses[0].origin, StateOrigin::Telemetry);
    }

    #[tokio::test]
    async fn environment_only_reading_leaves_status_alone() {
        let (svc, store) = service();
        svc.handle_data(br#"{"device": "sensor-1", "suhu": 27}"#, now()).await.unwrap();
        assert!(store.device_statuses().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn state_from_device_outside_catalog_is_not_tracked() {
        let (svc, store) = service();
        let reading = svc
            .handle_data(br#"{"device": "ESP32", "relay": "ON"}"#, now())
            .await
            .unwrap();

        assert_eq!(reading.actuator_state, Some(ActuatorState::On));
        assert_eq!(store.recent_readings(10).await.unwrap().len(), 1);
        assert!(store.device_statuses().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_data_is_rejected_without_writes() {
        let (svc, store) = service();
        assert!(svc.handle_data(b"{oops", now()).await.is_err());
        assert!(store.recent_readings(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn control_message_records_commanded_state() {
        let (svc, store) = service();
        svc.handle_data(br#"{"device": "lampu", "relay": "OFF"}"#, now()).await.unwrap();
        svc.handle_control(br#"{"device": "lampu", "state": "ON"}"#, now() + Duration::seconds(1))
            .await
            .unwrap();

        let statuses = store.device_statuses().await.unwrap();
        assert_eq!(statuses[0].state, ActuatorState::On);
        assert_eq!(statuses[0].origin, StateOrigin::Command);
    }

    #[tokio::test]
    async fn control_message_for_unknown_device_is_rejected() {
        let (svc, store) = service();
        let err = svc
            .handle_control(br#"{"device": "pompa", "state": "ON"}"#, now())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::UnknownDevice(d) if d == "pompa"));
        assert!(store.device_statuses().await.unwrap().is_empty());
    }
}
