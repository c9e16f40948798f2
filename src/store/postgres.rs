use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{ReadingStore, StoreError};
use crate::db::models::{DeviceStatus, NewReading, Reading};

const READING_COLUMNS: &str = "id, device_id, recorded_at, received_at, power_watts, \
     actuator_state, illuminance_lux, temperature_c, humidity_pct, node_id, source";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadingStore for PgStore {
    async fn insert_reading(&self, r: NewReading) -> Result<Reading, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO readings (device_id, recorded_at, received_at, power_watts, actuator_state,
                                  illuminance_lux, temperature_c, humidity_pct, node_id, source)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {READING_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, Reading>(&sql)
            .bind(r.device_id)
            .bind(r.recorded_at)
            .bind(r.received_at)
            .bind(r.power_watts)
            .bind(r.actuator_state)
            .bind(r.illuminance_lux)
            .bind(r.temperature_c)
            .bind(r.humidity_pct)
            .bind(r.node_id)
            .bind(r.source)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    async fn recent_readings(&self, limit: i64) -> Result<Vec<Reading>, StoreError> {
        let sql = format!(
            "SELECT {READING_COLUMNS} FROM readings ORDER BY recorded_at DESC LIMIT $1"
        );
        let rows = sqlx::query_as::<_, Reading>(&sql)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn readings_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        device_id: Option<&str>,
    ) -> Result<Vec<Reading>, StoreError> {
        let sql = format!(
            r#"
            SELECT {READING_COLUMNS}
            FROM readings
            WHERE recorded_at >= $1
              AND recorded_at <= $2
              AND ($3::text IS NULL OR device_id = $3)
            ORDER BY recorded_at ASC
            "#
        );
        let rows = sqlx::query_as::<_, Reading>(&sql)
            .bind(from)
            .bind(to)
            .bind(device_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn latest_environment(&self) -> Result<Option<Reading>, StoreError> {
        let sql = format!(
            r#"
            SELECT {READING_COLUMNS}
            FROM readings
            WHERE illuminance_lux IS NOT NULL
               OR temperature_c IS NOT NULL
               OR humidity_pct IS NOT NULL
            ORDER BY recorded_at DESC
            LIMIT 1
            "#
        );
        let row = sqlx::query_as::<_, Reading>(&sql)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn device_statuses(&self) -> Result<Vec<DeviceStatus>, StoreError> {
        let rows = sqlx::query_as::<_, DeviceStatus>(
            "SELECT device_id, state, origin, updated_at FROM device_status ORDER BY device_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn record_device_state(&self, status: &DeviceStatus) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO device_status (device_id, state, origin, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (device_id) DO UPDATE
               SET state = EXCLUDED.state,
                   origin = EXCLUDED.origin,
                   updated_at = EXCLUDED.updated_at
             WHERE device_status.updated_at <= EXCLUDED.updated_at
            "#,
        )
        .bind(&status.device_id)
        .bind(status.state)
        .bind(status.origin)
        .bind(status.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_device_statuses(
        &self,
        device_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO device_status (device_id, state, origin, updated_at)
            SELECT id, 'OFF', 'command', $2
            FROM unnest($1::text[]) AS id
            ON CONFLICT (device_id) DO NOTHING
            "#,
        )
        .bind(device_ids)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_readings(&self) -> Result<u64, StoreError> {
        let done = sqlx::query("DELETE FROM readings").execute(&self.pool).await?;
        Ok(done.rows_affected())
    }
}
