use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS, Transport};
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle, time};
use tracing::{info, warn};

use crate::{config::MqttSettings, control::ControlCommand};

/// Builds connection options for one client of this service.
///
/// `role` is appended to the configured client id so that the listener and the
/// relay never kick each other off the broker.
pub fn mqtt_options(settings: &MqttSettings, role: &str) -> MqttOptions {
    let client_id = format!("{}-{role}", settings.client_id);
    let mut options = MqttOptions::new(client_id, settings.host.clone(), settings.port);
    options.set_keep_alive(settings.keep_alive);
    if let Some(username) = &settings.username {
        options.set_credentials(username.clone(), settings.password.clone().unwrap_or_default());
    }
    if settings.use_tls {
        options.set_transport(Transport::tls_with_default_config());
    }
    options
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Exponential reconnect delay, doubling from `min` and capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self { min, max, current: min }
    }

    /// Returns the delay to wait now and advances to the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

// ---------------------------------------------------------------------------
// Command publishing
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("broker rejected publish: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
    #[error("not connected to the broker")]
    Disconnected,
}

/// Sink for actuator commands. The relay only depends on this seam.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish(&self, command: &ControlCommand) -> Result<(), PublishError>;
}

/// Publishes commands as JSON on the control topic.
///
/// Commands are refused while the broker connection is down rather than
/// queued, so a command is never delivered long after it was requested.
pub struct MqttCommandPublisher {
    client: AsyncClient,
    topic: String,
    timeout: Duration,
    connected: watch::Receiver<bool>,
}

impl MqttCommandPublisher {
    /// Creates the publisher and spawns the task driving its connection.
    pub fn spawn(settings: &MqttSettings) -> (Self, JoinHandle<()>) {
        let (client, mut eventloop) = AsyncClient::new(mqtt_options(settings, "relay"), 16);
        let mut backoff = Backoff::new(settings.reconnect_min, settings.reconnect_max);
        let host = settings.host.clone();
        let (connected_tx, connected) = watch::channel(false);

        let handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!(host = %host, "Command relay connected to broker");
                        connected_tx.send_replace(true);
                        backoff.reset();
                    }
                    Ok(_) => {}
                    Err(err) => {
                        connected_tx.send_replace(false);
                        let delay = backoff.next_delay();
                        warn!(error = %err, retry_in_ms = delay.as_millis() as u64, "Command relay connection error");
                        time::sleep(delay).await;
                    }
                }
            }
        });

        let publisher = Self {
            client,
            topic: settings.control_topic.clone(),
            timeout: settings.publish_timeout,
            connected,
        };
        (publisher, handle)
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }
}

#[async_trait]
impl CommandPublisher for MqttCommandPublisher {
    async fn publish(&self, command: &ControlCommand) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::Disconnected);
        }
        let payload = serde_json::to_vec(command)?;
        time::timeout(
            self.timeout,
            self.client.publish(&self.topic, QoS::AtLeastOnce, false, payload),
        )
        .await
        .map_err(|_| PublishError::Timeout(self.timeout))??;
        Ok(())
    }
}
