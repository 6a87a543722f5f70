use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::models::{
    generate_device_id, DeviceRecord, DeviceRegistration, DeviceStatus, NewReading, Reading,
    DEFAULT_DEVICE_KIND, DEFAULT_DEVICE_PORT,
};
use crate::{
    error::Result,
    store::{bounded, DeviceRegistry, ReadingStore},
};

const READING_COLUMNS: &str = "seq, device_key, device_id, recorded_at, moisture, temperature, \
                               humidity, ph, light, command_status";

const DEVICE_COLUMNS: &str = "device_key, id, port, kind, registered_at, last_seen, status, \
                              last_alert_sent_at";

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgReadingStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgReadingStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl ReadingStore for PgReadingStore {
    async fn append(&self, r: NewReading) -> Result<Reading> {
        let sql = format!(
            "INSERT INTO sensor_readings \
                 (device_key, device_id, recorded_at, moisture, temperature, humidity, ph, light, command_status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {READING_COLUMNS}"
        );
        let query = sqlx::query_as::<_, Reading>(&sql)
            .bind(&r.device_key)
            .bind(&r.device_id)
            .bind(r.recorded_at)
            .bind(r.moisture)
            .bind(r.temperature)
            .bind(r.humidity)
            .bind(r.ph)
            .bind(r.light)
            .bind(&r.command_status);
        bounded(self.timeout, "append", query.fetch_one(&self.pool)).await
    }

    async fn query(&self, device_key: Option<&str>, since: Option<DateTime<Utc>>) -> Result<Vec<Reading>> {
        let sql = format!(
            "SELECT {READING_COLUMNS} FROM sensor_readings \
             WHERE ($1::text IS NULL OR device_key = $1) \
               AND ($2::timestamptz IS NULL OR recorded_at >= $2)"
        );
        let query = sqlx::query_as::<_, Reading>(&sql)
            .bind(device_key)
            .bind(since);
        bounded(self.timeout, "query", query.fetch_all(&self.pool)).await
    }
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

/// Postgres-backed registry. Each write is a single statement, so per-key
/// serialization comes from row locking rather than an application lock.
#[derive(Clone)]
pub struct PgDeviceRegistry {
    pool: PgPool,
    timeout: Duration,
}

impl PgDeviceRegistry {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl DeviceRegistry for PgDeviceRegistry {
    async fn get(&self, device_key: &str) -> Result<Option<DeviceRecord>> {
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE device_key = $1");
        let query = sqlx::query_as::<_, DeviceRecord>(&sql)
            .bind(device_key);
        bounded(self.timeout, "get device", query.fetch_optional(&self.pool)).await
    }

    async fn upsert(&self, reg: DeviceRegistration, now: DateTime<Utc>) -> Result<DeviceRecord> {
        // registered_at is only written by the INSERT arm.
        let sql = format!(
            "INSERT INTO devices (device_key, id, port, kind, registered_at, last_seen, status) \
             VALUES ($1, COALESCE($2, $6), COALESCE($3, $7), COALESCE($4, $8), $5, $5, 'active') \
             ON CONFLICT (device_key) DO UPDATE SET \
                 id        = COALESCE($2, devices.id), \
                 port      = COALESCE($3, devices.port), \
                 kind      = COALESCE($4, devices.kind), \
                 last_seen = GREATEST($5, devices.last_seen), \
                 status    = 'active' \
             RETURNING {DEVICE_COLUMNS}"
        );
        let query = sqlx::query_as::<_, DeviceRecord>(&sql)
            .bind(&reg.device_key)
            .bind(&reg.id)
            .bind(reg.port)
            .bind(&reg.kind)
            .bind(now)
            .bind(generate_device_id())
            .bind(DEFAULT_DEVICE_PORT)
            .bind(DEFAULT_DEVICE_KIND);
        bounded(self.timeout, "upsert device", query.fetch_one(&self.pool)).await
    }

    async fn list_active(&self) -> Result<Vec<DeviceRecord>> {
        let sql = format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE status = 'active' ORDER BY device_key"
        );
        let query = sqlx::query_as::<_, DeviceRecord>(&sql);
        bounded(self.timeout, "list active devices", query.fetch_all(&self.pool)).await
    }

    async fn record_alert(
        &self,
        device_key: &str,
        expected: Option<DateTime<Utc>>,
        new: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let query = sqlx::query(
            "UPDATE devices SET last_alert_sent_at = $3 \
             WHERE device_key = $1 AND last_alert_sent_at IS NOT DISTINCT FROM $2",
        )
        .bind(device_key)
        .bind(expected)
        .bind(new);
        let done = bounded(self.timeout, "record alert", query.execute(&self.pool)).await?;
        Ok(done.rows_affected() == 1)
    }

    async fn set_status(&self, device_key: &str, status: DeviceStatus) -> Result<Option<DeviceRecord>> {
        let sql = format!(
            "UPDATE devices SET status = $2 WHERE device_key = $1 RETURNING {DEVICE_COLUMNS}"
        );
        let query = sqlx::query_as::<_, DeviceRecord>(&sql)
            .bind(device_key)
            .bind(status);
        bounded(self.timeout, "set device status", query.fetch_optional(&self.pool)).await
    }
}

// ---------------------------------------------------------------------------
// Tests (need a live Postgres via DATABASE_URL)
// ---------------------------------------------------------------------------
