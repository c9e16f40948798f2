use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{
    api::dto::{ControlRequest, ControlResponse, CostSummaryResponse, DataResponse},
    db::models::ActuatorState,
};

/// HTTP client for the query and control endpoints of a running service.
///
/// Cheap to clone; all clones share the same connection pool.
#[derive(Clone)]
pub struct DashboardClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: Client,
    base_url: String,
}

impl DashboardClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: base_url.trim_end_matches('/').to_owned(),
            }),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T> {
        let url = format!("{}{}", self.inner.base_url, path_and_query);
        debug!(url = %url, "GET");

        let bytes = self
            .inner
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {path_and_query} failed"))?
            .error_for_status()
            .with_context(|| format!("GET {path_and_query} returned error status"))?
            .bytes()
            .await
            .with_context(|| format!("Failed to read {path_and_query} response body"))?;

        serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to deserialize {path_and_query} response"))
    }

    /// Current status plus the `limit` most recent readings.
    pub async fn fetch_data(&self, limit: i64) -> Result<DataResponse> {
        self.get_json(&format!("/data?limit={limit}")).await
    }

    pub async fn cost_summary(&self, period: &str, tariff: Option<f64>) -> Result<CostSummaryResponse> {
        let mut path = format!("/cost_summary?period={period}");
        if let Some(tariff) = tariff {
            path.push_str(&format!("&tariff={tariff}"));
        }
        self.get_json(&path).await
    }

    /// Asks the service to switch a relay. The server's error message is
    /// surfaced when the command is refused.
    pub async fn set_state(&self, device: &str, state: ActuatorState) -> Result<ControlResponse> {
        let url = format!("{}/control", self.inner.base_url);
        let body = ControlRequest {
            device: device.to_owned(),
            state: state.to_string(),
            target_node_id: None,
        };

        let resp = self
            .inner
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("POST /control failed")?;

        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .context("Failed to read /control response body")?;

        if !status.is_success() {
            let message = serde_json::from_slice::<serde_json::Value>(&bytes)
                .ok()
                .and_then(|v| v["message"].as_str().map(str::to_owned))
                .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());
            anyhow::bail!("control request rejected ({status}): {message}");
        }

        serde_json::from_slice(&bytes).context("Failed to deserialize /control response")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        api::testing::{serve, state},
        control::testing::RecordingPublisher,
        store::Store,
    };

    async fn spawn_service() -> (DashboardClient, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::default());
        let addr = serve(state(Store::in_memory(), publisher.clone())).await;
        let client = DashboardClient::new(&format!("http://{addr}/"), Duration::from_secs(5)).unwrap();
        (client, publisher)
    }

    #[tokio::test]
    async fn fetches_data_and_cost_summary() {
        let (client, _) = spawn_service().await;

        let data = client.fetch_data(10).await.unwrap();
        assert!(!data.status.degraded);
        assert_eq!(data.status.devices.len(), 2);

        let summary = client.cost_summary("monthly", Some(2000.0)).await.unwrap();
        assert_eq!(summary.tariff, 2000.0);
        assert_eq!(summary.estimate.target_period_days, 30);
    }

    #[tokio::test]
    async fn toggles_device_through_relay() {
        let (client, publisher) = spawn_service().await;

        let resp = client.set_state("kipas", ActuatorState::On).await.unwrap();
        assert_eq!(resp.current_state, ActuatorState::On);
        assert_eq!(publisher.sent.lock().await[0].device, "kipas");
    }

    #[tokio::test]
    async fn surfaces_server_error_message() {
        let (client, _) = spawn_service().await;

        let err = client.set_state("pompa", ActuatorState::On).await.unwrap_err();
        assert!(err.to_string().contains("unknown device"), "{err}");

        let err = client.cost_summary("hourly", None).await.unwrap_err();
        assert!(format!("{err:#}").contains("error status"), "{err:#}");
    }
}
