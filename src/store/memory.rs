use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use super::{DeviceRegistry, ReadingStore};
use crate::{
    db::models::{DeviceRecord, DeviceRegistration, DeviceStatus, NewReading, Reading},
    error::Result,
};

/// Process-local reading store, one append-only vector per device key.
///
/// Wrapped in `Arc` so clones share state. Contents live until the process
/// exits.
#[derive(Clone, Default)]
pub struct MemoryReadingStore {
    inner: Arc<RwLock<HashMap<String, Vec<Reading>>>>,
    seq: Arc<AtomicI64>,
}

impl MemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReadingStore for MemoryReadingStore {
    async fn append(&self, reading: NewReading) -> Result<Reading> {
        let mut guard = self.inner.write().await;
        // Taken under the write lock so per-device vectors stay in seq order.
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let reading = Reading::from_new(seq, reading);
        guard
            .entry(reading.device_key.clone())
            .or_default()
            .push(reading.clone());
        Ok(reading)
    }

    async fn query(&self, device_key: Option<&str>, since: Option<DateTime<Utc>>) -> Result<Vec<Reading>> {
        let guard = self.inner.read().await;
        let in_window = |r: &&Reading| since.map_or(true, |s| r.recorded_at >= s);

        let rows: Vec<Reading> = match device_key {
            Some(key) => guard
                .get(key)
                .map(|rs| rs.iter().filter(in_window).cloned().collect())
                .unwrap_or_default(),
            None => guard
                .values()
                .flat_map(|rs| rs.iter().filter(in_window).cloned())
                .collect(),
        };
        Ok(rows)
    }
}

/// Process-local device registry. Every operation runs under one mutex, which
/// serializes read-modify-write cycles on any given key.
#[derive(Clone, Default)]
pub struct MemoryDeviceRegistry {
    inner: Arc<Mutex<HashMap<String, DeviceRecord>>>,
}

impl MemoryDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `record` as-is, bypassing merge rules. Used to seed state.
    pub async fn insert_raw(&self, record: DeviceRecord) {
        self.inner
            .lock()
            .await
            .insert(record.device_key.clone(), record);
    }
}

#[async_trait]
impl DeviceRegistry for MemoryDeviceRegistry {
    async fn get(&self, device_key: &str) -> Result<Option<DeviceRecord>> {
        Ok(self.inner.lock().await.get(device_key).cloned())
    }

    async fn upsert(&self, reg: DeviceRegistration, now: DateTime<Utc>) -> Result<DeviceRecord> {
        let mut guard = self.inner.lock().await;
        let record = DeviceRecord::merged(guard.get(&reg.device_key), reg, now);
        guard.insert(record.device_key.clone(), record.clone());
        Ok(record)
    }

    async fn list_active(&self) -> Result<Vec<DeviceRecord>> {
        let mut active: Vec<_> = self
            .inner
            .lock()
            .await
            .values()
            .filter(|r| r.status == DeviceStatus::Active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.device_key.cmp(&b.device_key));
        Ok(active)
    }

    async fn record_alert(
        &self,
        device_key: &str,
        expected: Option<DateTime<Utc>>,
        new: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let mut guard = self.inner.lock().await;
        match guard.get_mut(device_key) {
            Some(rec) if rec.last_alert_sent_at == expected => {
                rec.last_alert_sent_at = new;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_status(&self, device_key: &str, status: DeviceStatus) -> Result<Option<DeviceRecord>> {
        let mut guard = self.inner.lock().await;
        Ok(guard.get_mut(device_key).map(|rec| {
            rec.status = status;
            rec.clone()
        }))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::monitor::{AlertAction, AlertState, LivenessPolicy};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    fn reading(key: &str, at: DateTime<Utc>) -> NewReading {
        NewReading {
            device_key: key.to_owned(),
            recorded_at: at,
            moisture: Some(40.0),
            ..NewReading::default()
        }
    }

    #[tokio::test]
    async fn empty_store_returns_nothing() {
        let store = MemoryReadingStore::new();
        assert!(store.query(None, None).await.unwrap().is_empty());
        assert!(store.query(Some("dev1"), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_assigns_increasing_seq() {
        let store = MemoryReadingStore::new();
        let a = store.append(reading("dev1", t0())).await.unwrap();
        let b = store.append(reading("dev1", t0())).await.unwrap();
        assert!(a.seq < b.seq);
        assert_eq!(store.query(Some("dev1"), None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn absent_fields_stay_absent() {
        let store = MemoryReadingStore::new();
        store
            .append(NewReading {
                device_key: "dev1".into(),
                recorded_at: t0(),
                temperature: Some(22.5),
                ..NewReading::default()
            })
            .await
            .unwrap();

        let got = &store.query(Some("dev1"), None).await.unwrap()[0];
        assert_eq!(got.temperature, Some(22.5));
        assert_eq!(got.moisture, None);
        assert_eq!(got.humidity, None);
        assert_eq!(got.ph, None);
        assert_eq!(got.light, None);
    }

    #[tokio::test]
    async fn query_filters_by_device_and_since() {
        let store = MemoryReadingStore::new();
        store.append(reading("dev1", t0())).await.unwrap();
        store.append(reading("dev1", t0() + Duration::hours(2))).await.unwrap();
        store.append(reading("dev2", t0() + Duration::hours(2))).await.unwrap();

        let since = t0() + Duration::hours(1);
        assert_eq!(store.query(Some("dev1"), Some(since)).await.unwrap().len(), 1);
        assert_eq!(store.query(None, Some(since)).await.unwrap().len(), 2);
        assert_eq!(store.query(None, None).await.unwrap().len(), 3);
        // Lower bound is inclusive.
        assert_eq!(store.query(Some("dev1"), Some(t0())).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let store = MemoryReadingStore::new();
        let clone = store.clone();
        store.append(reading("dev1", t0())).await.unwrap();
        assert_eq!(clone.query(None, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upsert_preserves_registered_at() {
        let reg = MemoryDeviceRegistry::new();
        let first = reg.upsert(DeviceRegistration::heartbeat("dev1"), t0()).await.unwrap();
        let later = t0() + Duration::minutes(10);
        let second = reg.upsert(DeviceRegistration::heartbeat("dev1"), later).await.unwrap();

        assert_eq!(second.registered_at, first.registered_at);
        assert_eq!(second.last_seen, later);
        assert_eq!(second.id, first.id);
    }

    #[tokio::test]
    async fn record_alert_is_conditional() {
        let reg = MemoryDeviceRegistry::new();
        reg.upsert(DeviceRegistration::heartbeat("dev1"), t0()).await.unwrap();

        assert!(reg.record_alert("dev1", None, Some(t0())).await.unwrap());
        // Stale expectation: somebody already wrote a marker.
        assert!(!reg.record_alert("dev1", None, Some(t0())).await.unwrap());
        assert!(reg.record_alert("dev1", Some(t0()), None).await.unwrap());
        assert!(!reg.record_alert("missing", None, Some(t0())).await.unwrap());
    }

    #[tokio::test]
    async fn list_active_skips_inactive() {
        let reg = MemoryDeviceRegistry::new();
        reg.upsert(DeviceRegistration::heartbeat("a"), t0()).await.unwrap();
        reg.upsert(DeviceRegistration::heartbeat("b"), t0()).await.unwrap();
        let updated = reg.set_status("b", DeviceStatus::Inactive).await.unwrap().unwrap();
        assert_eq!(updated.status, DeviceStatus::Inactive);
        assert!(reg.set_status("zzz", DeviceStatus::Inactive).await.unwrap().is_none());

        let active = reg.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].device_key, "a");
    }

    #[tokio::test]
    async fn out_of_order_upserts_keep_newest_last_seen() {
        let reg = MemoryDeviceRegistry::new();
        let newer = t0() + Duration::seconds(900);
        reg.upsert(DeviceRegistration::heartbeat("dev1"), t0()).await.unwrap();
        reg.upsert(DeviceRegistration::heartbeat("dev1"), newer).await.unwrap();
        reg.upsert(DeviceRegistration::heartbeat("dev1"), t0() + Duration::seconds(5))
            .await
            .unwrap();

        let stored = reg.get("dev1").await.unwrap().unwrap();
        assert_eq!(stored.last_seen, newer);

        // Still live 100s after the newest report.
        let a = LivenessPolicy::default()
            .assess(&stored, t0() + Duration::seconds(1000))
            .unwrap();
        assert_eq!(a.state, AlertState::Live);
        assert_eq!(a.action, AlertAction::None);
    }

    #[tokio::test]
    async fn concurrent_upserts_for_one_key_keep_first_registration() {
        let reg = MemoryDeviceRegistry::new();
        let mut handles = Vec::new();
        for i in 0..20 {
            let reg = reg.clone();
            handles.push(tokio::spawn(async move {
                reg.upsert(DeviceRegistration::heartbeat("dev1"), t0() + Duration::seconds(i))
                    .await
                    .unwrap()
            }));
        }
        let mut registered = Vec::new();
        for h in handles {
            registered.push(h.await.unwrap().registered_at);
        }
        let stored = reg.get("dev1").await.unwrap().unwrap();
        assert!(registered.iter().all(|r| *r == stored.registered_at));
        assert_eq!(stored.last_seen, t0() + Duration::seconds(19));
    }
}
