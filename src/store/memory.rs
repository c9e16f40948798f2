use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ReadingStore, StoreError};
use crate::db::models::{ActuatorState, DeviceStatus, NewReading, Reading, StateOrigin};

/// Process-local store used when no database is configured, and in tests.
///
/// Wrapped in `Arc` so it can be cheaply cloned and shared across tasks.
/// Uses `tokio::sync::RwLock` so concurrent readers never block each other.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    /// Kept in insertion order.
    readings: Vec<Reading>,
    statuses: BTreeMap<String, DeviceStatus>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn insert_reading(&self, reading: NewReading) -> Result<Reading, StoreError> {
        let reading = reading.into_reading(Uuid::new_v4());
        self.inner.write().await.readings.push(reading.clone());
        Ok(reading)
    }

    async fn recent_readings(&self, limit: i64) -> Result<Vec<Reading>, StoreError> {
        let mut rows = self.inner.read().await.readings.clone();
        rows.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn readings_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        device_id: Option<&str>,
    ) -> Result<Vec<Reading>, StoreError> {
        let mut rows: Vec<Reading> = self
            .inner
            .read()
            .await
            .readings
            .iter()
            .filter(|r| r.recorded_at >= from && r.recorded_at <= to)
            .filter(|r| device_id.map_or(true, |id| r.device_id == id))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.recorded_at);
        Ok(rows)
    }

    async fn latest_environment(&self) -> Result<Option<Reading>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .readings
            .iter()
            .filter(|r| r.has_environment())
            .max_by_key(|r| r.recorded_at)
            .cloned())
    }

    async fn device_statuses(&self) -> Result<Vec<DeviceStatus>, StoreError> {
        Ok(self.inner.read().await.statuses.values().cloned().collect())
    }

    async fn record_device_state(&self, status: &DeviceStatus) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let stale = inner
            .statuses
            .get(&status.device_id)
            .is_some_and(|current| current.updated_at > status.updated_at);
        if !stale {
            inner.statuses.insert(status.device_id.clone(), status.clone());
        }
        Ok(())
    }

    async fn ensure_device_statuses(
        &self,
        device_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        for id in device_ids {
            inner.statuses.entry(id.clone()).or_insert_with(|| DeviceStatus {
                device_id: id.clone(),
                state: ActuatorState::Off,
                origin: StateOrigin::Command,
                updated_at: at,
            });
        }
        Ok(())
    }

    async fn clear_readings(&self) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let removed = inner.readings.len() as u64;
        inner.readings.clear();
        Ok(removed)
    }
}
