use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    config::DeviceCatalog,
    db::models::{ActuatorState, DeviceStatus, StateOrigin},
    mqtt::{CommandPublisher, PublishError},
    store::{Store, StoreError},
};

/// Control-plane message: `{"device": "lampu", "state": "ON"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub device: String,
    pub state: ActuatorState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_node_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("unknown device {0:?}")]
    UnknownDevice(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("command not published: {0}")]
    Publish(#[from] PublishError),
    #[error("command published but state not recorded: {0}")]
    Store(#[from] StoreError),
}

/// Relays actuator commands to the broker and records the commanded state.
///
/// The device is not asked for an acknowledgment: once the broker client has
/// accepted the command, the requested state is persisted with origin
/// `command` and returned as the current state until telemetry says otherwise.
pub struct CommandRelay {
    publisher: Arc<dyn CommandPublisher>,
    store: Store,
    catalog: Arc<DeviceCatalog>,
}

impl CommandRelay {
    pub fn new(publisher: Arc<dyn CommandPublisher>, store: Store, catalog: Arc<DeviceCatalog>) -> Self {
        Self { publisher, store, catalog }
    }

    /// Validates a raw `(device, state)` pair before any side effect.
    pub fn validate(
        &self,
        device: &str,
        state: &str,
        target_node_id: Option<String>,
    ) -> Result<ControlCommand, ControlError> {
        if !self.catalog.contains(device) {
            return Err(ControlError::UnknownDevice(device.to_owned()));
        }
        let state = state.parse::<ActuatorState>().map_err(ControlError::InvalidState)?;
        Ok(ControlCommand {
            device: device.to_owned(),
            state,
            target_node_id,
        })
    }

    pub async fn set_actuator_state(&self, command: ControlCommand) -> Result<DeviceStatus, ControlError> {
        if !self.catalog.contains(&command.device) {
            return Err(ControlError::UnknownDevice(command.device));
        }

        self.publisher.publish(&command).await.map_err(|e| {
            warn!(device_id = %command.device, error = %e, "Failed to publish command");
            e
        })?;
        info!(device_id = %command.device, state = %command.state, "Command published");

        let status = DeviceStatus {
            device_id: command.device,
            state: command.state,
            origin: StateOrigin::Command,
            updated_at: Utc::now(),
        };
        self.store.record_device_state(&status).await?;
        Ok(status)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;

    /// Records published commands instead of talking to a broker.
    #[derive(Default)]
    pub struct RecordingPublisher {
        pub sent: Mutex<Vec<ControlCommand>>,
        pub fail: bool,
    }

    impl RecordingPublisher {
        pub fn failing() -> Self {
            Self { sent: Mutex::default(), fail: true }
        }
    }

    #[async_trait]
    impl CommandPublisher for RecordingPublisher {
        async fn publish(&self, command: &ControlCommand) -> Result<(), PublishError> {
            if self.fail {
                return Err(PublishError::Timeout(Duration::from_secs(5)));
            }
            self.sent.lock().await.push(command.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::RecordingPublisher, *};

    fn catalog() -> Arc<DeviceCatalog> {
        Arc::new("lampu:10,kipas:5".parse().unwrap())
    }

    fn relay(publisher: Arc<RecordingPublisher>, store: Store) -> CommandRelay {
        CommandRelay::new(publisher, store, catalog())
    }

    #[test]
    fn command_serializes_without_empty_target() {
        let cmd = ControlCommand { device: "lampu".into(), state: ActuatorState::On, target_node_id: None };
        assert_eq!(serde_json::to_string(&cmd).unwrap(), r#"{"device":"lampu","state":"ON"}"#);

        let cmd = ControlCommand { target_node_id: Some("Node1".into()), ..cmd };
        assert_eq!(
            serde_json::to_string(&cmd).unwrap(),
            r#"{"device":"lampu","state":"ON","target_node_id":"Node1"}"#
        );
    }

    #[test]
    fn validate_rejects_unknown_device_and_state() {
        let r = relay(Arc::default(), Store::in_memory());
        assert!(matches!(r.validate("pompa", "ON", None), Err(ControlError::UnknownDevice(_))));
        assert!(matches!(r.validate("lampu", "DIM", None), Err(ControlError::InvalidState(_))));

        let cmd = r.validate("kipas", "off", None).unwrap();
        assert_eq!(cmd.state, ActuatorState::Off);
    }

    #[tokio::test]
    async fn publishes_and_records_optimistic_state() {
        let publisher = Arc::new(RecordingPublisher::default());
        let store = Store::in_memory();
        let r = relay(publisher.clone(), store.clone());

        let cmd = r.validate("lampu", "ON", None).unwrap();
        let status = r.set_actuator_state(cmd.clone()).await.unwrap();

        assert_eq!(status.state, ActuatorState::On);
        assert_eq!(status.origin, StateOrigin::Command);
        assert_eq!(*publisher.sent.lock().await, vec![cmd]);

        let stored = store.device_statuses().await.unwrap();
        assert_eq!(stored, vec![status]);
    }

    #[tokio::test]
    async fn publish_failure_leaves_state_untouched() {
        let store = Store::in_memory();
        let r = relay(Arc::new(RecordingPublisher::failing()), store.clone());

        let cmd = r.validate("lampu", "ON", None).unwrap();
        let err = r.set_actuator_state(cmd).await.unwrap_err();

        assert!(matches!(err, ControlError::Publish(PublishError::Timeout(_))));
        assert!(store.device_statuses().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_failure_after_publish_is_reported() {
        let publisher = Arc::new(RecordingPublisher::default());
        let r = relay(publisher.clone(), crate::store::testing::failing());

        let cmd = r.validate("kipas", "OFF", None).unwrap();
        let err = r.set_actuator_state(cmd.clone()).await.unwrap_err();

        assert!(matches!(err, ControlError::Store(_)), "{err}");
        assert_eq!(*publisher.sent.lock().await, vec![cmd]);
    }
}
