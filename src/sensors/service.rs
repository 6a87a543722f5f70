use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::{
    db::models::{DeviceRecord, DeviceRegistration, DeviceStatus, NewReading, Reading},
    error::{Error, Result},
    store::{DeviceRegistry, ReadingStore},
};

/// One telemetry report as sent by a device. Any subset of the measurements
/// may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorSample {
    pub device_key: String,
    pub device_id: Option<String>,
    pub port: Option<i32>,
    pub device_type: Option<String>,
    pub moisture: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub ph: Option<f64>,
    pub light: Option<i64>,
    pub command_status: Option<String>,
}

/// Write side: readings, registrations, heartbeats and status changes.
#[derive(Clone)]
pub struct SensorService {
    readings: Arc<dyn ReadingStore>,
    devices: Arc<dyn DeviceRegistry>,
}

impl SensorService {
    pub fn new(readings: Arc<dyn ReadingStore>, devices: Arc<dyn DeviceRegistry>) -> Self {
        Self { readings, devices }
    }

    /// Validate and append `sample` stamped with server time `now`, then
    /// refresh the device's registry record.
    ///
    /// A failed append is returned to the caller, who may drop the reading.
    /// A failed registry refresh after a successful append is only logged:
    /// the reading is already durable.
    pub async fn ingest(&self, sample: SensorSample, now: DateTime<Utc>) -> Result<Reading> {
        let device_key = required_key(&sample.device_key)?;
        for (name, v) in [
            ("moisture", sample.moisture),
            ("temperature", sample.temperature),
            ("humidity", sample.humidity),
            ("ph", sample.ph),
        ] {
            if v.is_some_and(|v| !v.is_finite()) {
                return Err(Error::validation(format!("{name} must be a finite number")));
            }
        }

        let reading = self
            .readings
            .append(NewReading {
                device_key: device_key.clone(),
                device_id: sample.device_id.clone(),
                recorded_at: now,
                moisture: sample.moisture,
                temperature: sample.temperature,
                humidity: sample.humidity,
                ph: sample.ph,
                light: sample.light,
                command_status: sample.command_status,
            })
            .await?;

        let reg = DeviceRegistration {
            device_key: device_key.clone(),
            id: sample.device_id,
            port: sample.port,
            kind: sample.device_type,
        };
        if let Err(e) = self.devices.upsert(reg, now).await {
            error!(device_key = %device_key, error = %e, "Failed to refresh device record after reading");
        }

        info!(device_key = %device_key, seq = reading.seq, "Sensor reading recorded");
        Ok(reading)
    }

    /// Explicit registration. Unlike readings, a registration must name a
    /// usable port.
    pub async fn register(&self, reg: DeviceRegistration, now: DateTime<Utc>) -> Result<DeviceRecord> {
        let device_key = required_key(&reg.device_key)?;
        match reg.port {
            Some(p) if (1..=65_535).contains(&p) => {}
            Some(p) => return Err(Error::validation(format!("port {p} is out of range"))),
            None => return Err(Error::validation("ip and port are required")),
        }

        let record = self
            .devices
            .upsert(DeviceRegistration { device_key, ..reg }, now)
            .await?;
        info!(device_key = %record.device_key, device_id = %record.id, "Device registered");
        Ok(record)
    }

    /// Liveness ping without a reading.
    pub async fn heartbeat(&self, device_key: &str, now: DateTime<Utc>) -> Result<DeviceRecord> {
        let device_key = required_key(device_key)?;
        self.devices
            .upsert(DeviceRegistration::heartbeat(device_key), now)
            .await
    }

    pub async fn set_status(&self, device_key: &str, status: DeviceStatus) -> Result<Option<DeviceRecord>> {
        let record = self.devices.set_status(device_key, status).await?;
        if record.is_some() {
            info!(device_key = %device_key, %status, "Device status changed");
        }
        Ok(record)
    }

    pub async fn device(&self, device_key: &str) -> Result<Option<DeviceRecord>> {
        self.devices.get(device_key).await
    }
}

fn required_key(raw: &str) -> Result<String> {
    let key = raw.trim();
    if key.is_empty() {
        return Err(Error::validation("device key is required"));
    }
    Ok(key.to_owned())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::store::{MemoryDeviceRegistry, MemoryReadingStore};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn setup() -> (MemoryReadingStore, MemoryDeviceRegistry, SensorService) {
        let store = MemoryReadingStore::new();
        let registry = MemoryDeviceRegistry::new();
        let svc = SensorService::new(Arc::new(store.clone()), Arc::new(registry.clone()));
        (store, registry, svc)
    }

    #[tokio::test]
    async fn ingest_appends_and_creates_device() {
        let (store, registry, svc) = setup();
        let sample = SensorSample {
            device_key: " 192.168.1.40 ".into(),
            device_id: Some("AA:BB:CC".into()),
            temperature: Some(22.5),
            ..SensorSample::default()
        };
        let reading = svc.ingest(sample, t0()).await.unwrap();

        assert_eq!(reading.device_key, "192.168.1.40");
        assert_eq!(reading.recorded_at, t0());
        assert_eq!(reading.moisture, None);
        assert_eq!(store.query(Some("192.168.1.40"), None).await.unwrap().len(), 1);

        let dev = registry.get("192.168.1.40").await.unwrap().unwrap();
        assert_eq!(dev.id, "AA:BB:CC");
        assert_eq!(dev.last_seen, t0());
    }

    #[tokio::test]
    async fn blank_key_is_rejected() {
        let (store, _, svc) = setup();
        let err = svc.ingest(SensorSample::default(), t0()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(store.query(None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_finite_values_are_rejected() {
        let (_, _, svc) = setup();
        let sample = SensorSample {
            device_key: "k".into(),
            ph: Some(f64::NAN),
            ..SensorSample::default()
        };
        let err = svc.ingest(sample, t0()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("ph")));
    }

    #[tokio::test]
    async fn reregistration_keeps_registered_at() {
        let (_, _, svc) = setup();
        let reg = DeviceRegistration {
            device_key: "10.0.0.5".into(),
            port: Some(80),
            ..DeviceRegistration::default()
        };
        let first = svc.register(reg.clone(), t0()).await.unwrap();
        let later = t0() + Duration::hours(3);
        let second = svc.register(reg, later).await.unwrap();

        assert_eq!(second.registered_at, first.registered_at);
        assert_eq!(second.last_seen, later);
    }

    #[tokio::test]
    async fn registration_requires_valid_port() {
        let (_, _, svc) = setup();
        let mut reg = DeviceRegistration::heartbeat("10.0.0.5");
        assert!(matches!(svc.register(reg.clone(), t0()).await, Err(Error::Validation(_))));
        reg.port = Some(70_000);
        assert!(matches!(svc.register(reg, t0()).await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn heartbeat_bumps_last_seen() {
        let (_, registry, svc) = setup();
        svc.heartbeat("k", t0()).await.unwrap();
        svc.heartbeat("k", t0() + Duration::minutes(1)).await.unwrap();
        let dev = registry.get("k").await.unwrap().unwrap();
        assert_eq!(dev.registered_at, t0());
        assert_eq!(dev.last_seen, t0() + Duration::minutes(1));
    }
}
