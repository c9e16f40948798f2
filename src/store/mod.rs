//! The shared store between the ingest listener and request handlers.
//!
//! The listener is the only writer of raw readings; handlers read a fresh
//! snapshot on every request. No state is shared in-process besides the store.

mod memory;
mod postgres;

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::models::{DeviceStatus, NewReading, Reading};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn insert_reading(&self, reading: NewReading) -> Result<Reading, StoreError>;

    /// The `limit` most recent readings, newest first.
    async fn recent_readings(&self, limit: i64) -> Result<Vec<Reading>, StoreError>;

    /// Readings with `from <= recorded_at <= to`, oldest first, optionally for one device.
    async fn readings_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        device_id: Option<&str>,
    ) -> Result<Vec<Reading>, StoreError>;

    /// Most recent reading carrying illuminance, temperature or humidity.
    async fn latest_environment(&self) -> Result<Option<Reading>, StoreError>;

    /// All known device states, ordered by device id.
    async fn device_statuses(&self) -> Result<Vec<DeviceStatus>, StoreError>;

    /// Upserts a device state unless the stored one is newer.
    async fn record_device_state(&self, status: &DeviceStatus) -> Result<(), StoreError>;

    /// Inserts an `OFF` state for each device that has none yet.
    async fn ensure_device_statuses(
        &self,
        device_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Deletes every reading; returns the number removed.
    async fn clear_readings(&self) -> Result<u64, StoreError>;
}

/// Cheaply clonable handle that bounds every store call with a timeout.
#[derive(Clone)]
pub struct Store {
    inner: Arc<dyn ReadingStore>,
    timeout: Duration,
}

impl Store {
    pub fn new(inner: impl ReadingStore + 'static, timeout: Duration) -> Self {
        Self { inner: Arc::new(inner), timeout }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new(), Duration::from_secs(5))
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }

    pub async fn insert_reading(&self, reading: NewReading) -> Result<Reading, StoreError> {
        self.bounded(self.inner.insert_reading(reading)).await
    }

    pub async fn recent_readings(&self, limit: i64) -> Result<Vec<Reading>, StoreError> {
        self.bounded(self.inner.recent_readings(limit)).await
    }

    pub async fn readings_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        device_id: Option<&str>,
    ) -> Result<Vec<Reading>, StoreError> {
        self.bounded(self.inner.readings_between(from, to, device_id)).await
    }

    pub async fn latest_environment(&self) -> Result<Option<Reading>, StoreError> {
        self.bounded(self.inner.latest_environment()).await
    }

    pub async fn device_statuses(&self) -> Result<Vec<DeviceStatus>, StoreError> {
        self.bounded(self.inner.device_statuses()).await
    }

    pub async fn record_device_state(&self, status: &DeviceStatus) -> Result<(), StoreError> {
        self.bounded(self.inner.record_device_state(status)).await
    }

    pub async fn ensure_device_statuses(
        &self,
        device_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.bounded(self.inner.ensure_device_statuses(device_ids, at)).await
    }

    pub async fn clear_readings(&self) -> Result<u64, StoreError> {
        self.bounded(self.inner.clear_readings()).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A store whose calls never complete, for exercising timeouts.
    pub struct StalledStore;

    #[async_trait]
    impl ReadingStore for StalledStore {
        async fn insert_reading(&self, _: NewReading) -> Result<Reading, StoreError> {
            std::future::pending().await
        }
        async fn recent_readings(&self, _: i64) -> Result<Vec<Reading>, StoreError> {
            std::future::pending().await
        }
        async fn readings_between(
            &self,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
            _: Option<&str>,
        ) -> Result<Vec<Reading>, StoreError> {
            std::future::pending().await
        }
        async fn latest_environment(&self) -> Result<Option<Reading>, StoreError> {
            std::future::pending().await
        }
        async fn device_statuses(&self) -> Result<Vec<DeviceStatus>, StoreError> {
            std::future::pending().await
        }
        async fn record_device_state(&self, _: &DeviceStatus) -> Result<(), StoreError> {
            std::future::pending().await
        }
        async fn ensure_device_statuses(&self, _: &[String], _: DateTime<Utc>) -> Result<(), StoreError> {
            std::future::pending().await
        }
        async fn clear_readings(&self) -> Result<u64, StoreError> {
            std::future::pending().await
        }
    }

    pub fn stalled(timeout: Duration) -> Store {
        Store::new(StalledStore, timeout)
    }

    /// A store whose pool has been closed: every call fails at once.
    pub struct FailingStore;

    fn closed<T>() -> Result<T, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolClosed))
    }

    #[async_trait]
    impl ReadingStore for FailingStore {
        async fn insert_reading(&self, _: NewReading) -> Result<Reading, StoreError> {
            closed()
        }
        async fn recent_readings(&self, _: i64) -> Result<Vec<Reading>, StoreError> {
            closed()
        }
        async fn readings_between(
            &self,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
            _: Option<&str>,
        ) -> Result<Vec<Reading>, StoreError> {
            closed()
        }
        async fn latest_environment(&self) -> Result<Option<Reading>, StoreError> {
            closed()
        }
        async fn device_statuses(&self) -> Result<Vec<DeviceStatus>, StoreError> {
            closed()
        }
        async fn record_device_state(&self, _: &DeviceStatus) -> Result<(), StoreError> {
            closed()
        }
        async fn ensure_device_statuses(&self, _: &[String], _: DateTime<Utc>) -> Result<(), StoreError> {
            closed()
        }
        async fn clear_readings(&self) -> Result<u64, StoreError> {
            closed()
        }
    }

    pub fn failing() -> Store {
        Store::new(FailingStore, Duration::from_secs(1))
    }
}
