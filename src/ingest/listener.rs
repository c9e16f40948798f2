use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, Event, Incoming, QoS};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::IngestService;
use crate::{
    config::MqttSettings,
    mqtt::{mqtt_options, Backoff},
};

/// Subscribes to the data and control topics and feeds every message to the
/// ingest service. Runs forever; spawn it via `tokio::spawn`.
///
/// Connection failures rebuild the client after an exponential delay bounded
/// by the configured reconnect window. Bad messages are logged and dropped.
pub async fn run_listener(settings: MqttSettings, service: IngestService) {
    let mut backoff = Backoff::new(settings.reconnect_min, settings.reconnect_max);

    loop {
        let (client, mut eventloop) = AsyncClient::new(mqtt_options(&settings, "ingest"), 32);

        let subscribed = async {
            client.subscribe(settings.data_topic.clone(), QoS::AtLeastOnce).await?;
            client.subscribe(settings.control_topic.clone(), QoS::AtLeastOnce).await
        }
        .await;
        if let Err(err) = subscribed {
            let delay = backoff.next_delay();
            warn!(error = %err, retry_in_ms = delay.as_millis() as u64, "Failed to queue MQTT subscriptions");
            sleep(delay).await;
            continue;
        }

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!(
                        host = %settings.host,
                        data_topic = %settings.data_topic,
                        control_topic = %settings.control_topic,
                        "Ingest listener connected"
                    );
                    backoff.reset();
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    dispatch(&service, &settings, &publish.topic, &publish.payload, Utc::now()).await;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "MQTT connection dropped; reconnecting");
                    break;
                }
            }
        }

        sleep(backoff.next_delay()).await;
    }
}

/// Routes one broker message by exact topic. Returns `false` when the message
/// was dropped; the listener carries on either way.
pub(crate) async fn dispatch(
    service: &IngestService,
    settings: &MqttSettings,
    topic: &str,
    payload: &[u8],
    received_at: DateTime<Utc>,
) -> bool {
    if topic == settings.data_topic {
        match service.handle_data(payload, received_at).await {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, topic, "Dropped data message");
                false
            }
        }
    } else if topic == settings.control_topic {
        match service.handle_control(payload, received_at).await {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, topic, "Dropped control message");
                false
            }
        }
    } else {
        debug!(topic, "Ignoring message on unexpected topic");
        false
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use chrono::TimeZone;

    use super::*;
    use crate::{db::models::ActuatorState, mqtt::testing, store::Store};

    fn service() -> (IngestService, Store) {
        let store = Store::in_memory();
        let catalog = Arc::new("lampu:10,kipas:5".parse().unwrap());
        (IngestService::new(store.clone(), catalog), store)
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn bad_message_is_dropped_and_next_one_stored() {
        let (svc, store) = service();
        let settings = testing::settings("127.0.0.1", 1);

        assert!(!dispatch(&svc, &settings, "rumah/status", b"{not json", at()).await);
        assert!(!dispatch(&svc, &settings, "rumah/status", br#"{"device": "lampu", "watt": "lots"}"#, at()).await);
        assert!(dispatch(&svc, &settings, "rumah/status", br#"{"device": "lampu", "watt": 9.5}"#, at()).await);

        let stored = store.recent_readings(10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].power_watts, Some(9.5));
    }

    #[tokio::test]
    async fn control_topic_updates_state_and_other_topics_are_ignored() {
        let (svc, store) = service();
        let settings = testing::settings("127.0.0.1", 1);

        assert!(!dispatch(&svc, &settings, "rumah/other", br#"{"device": "lampu", "watt": 1}"#, at()).await);
        assert!(dispatch(&svc, &settings, "rumah/control", br#"{"device": "kipas", "state": "ON"}"#, at()).await);

        assert!(store.recent_readings(10).await.unwrap().is_empty());
        assert_eq!(store.device_statuses().await.unwrap()[0].state, ActuatorState::On);
    }

    #[tokio::test]
    async fn listener_keeps_retrying_an_unreachable_broker() {
        let (svc, _) = service();
        let mut settings = testing::settings("127.0.0.1", 1);
        settings.reconnect_min = Duration::from_millis(10);
        settings.reconnect_max = Duration::from_millis(20);

        let outcome = tokio::time::timeout(Duration::from_millis(300), run_listener(settings, svc)).await;
        assert!(outcome.is_err(), "listener returned instead of retrying");
    }
}
