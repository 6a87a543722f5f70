//! Storage seams for readings and device records.
//!
//! The query and liveness logic only ever talks to these traits, so the
//! backing medium (in-memory maps, Postgres) is picked at startup.

pub mod memory;

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    db::models::{DeviceRecord, DeviceRegistration, DeviceStatus, NewReading, Reading},
    error::{Error, Result},
};

pub use memory::{MemoryDeviceRegistry, MemoryReadingStore};

/// Append-only time series of readings, partitioned by device key.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Persist `reading` and return it with its insertion sequence number.
    /// Never retries internally.
    async fn append(&self, reading: NewReading) -> Result<Reading>;

    /// All readings matching the optional device filter whose timestamp is
    /// `>= since`. Order is unspecified; callers sort.
    async fn query(&self, device_key: Option<&str>, since: Option<DateTime<Utc>>) -> Result<Vec<Reading>>;
}

/// One mutable record per device key. Implementations serialize writes per
/// key so concurrent readings from one device never lose an update.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn get(&self, device_key: &str) -> Result<Option<DeviceRecord>>;

    /// Create or refresh the record for `reg.device_key` as seen at `now`.
    /// An existing `registered_at` is preserved.
    async fn upsert(&self, reg: DeviceRegistration, now: DateTime<Utc>) -> Result<DeviceRecord>;

    async fn list_active(&self) -> Result<Vec<DeviceRecord>>;

    /// Replace the alert marker with `new` only if it still equals
    /// `expected`. Returns `false` when the record changed underneath (or is
    /// missing) and nothing was written.
    async fn record_alert(
        &self,
        device_key: &str,
        expected: Option<DateTime<Utc>>,
        new: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    /// Soft status change. Returns the updated record, `None` if unknown.
    async fn set_status(&self, device_key: &str, status: DeviceStatus) -> Result<Option<DeviceRecord>>;
}

/// Run a store call with an upper bound on its duration.
pub async fn bounded<T, E, F>(timeout: Duration, op: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<Error>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res.map_err(Into::into),
        Err(_) => Err(Error::StoreUnavailable(format!(
            "{op} timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_passes_through_results() {
        let v = bounded(Duration::from_secs(1), "query", async { Ok::<_, Error>(7) }).await.unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test]
    async fn bounded_maps_timeout_to_store_unavailable() {
        let err = bounded(Duration::from_millis(10), "append", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, Error>(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::StoreUnavailable(ref m) if m.contains("append timed out")));
    }
}
