use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Default TCP port assumed for devices that never registered explicitly.
pub const DEFAULT_DEVICE_PORT: i32 = 80;
/// Device type assumed for devices that never registered explicitly.
pub const DEFAULT_DEVICE_KIND: &str = "soil_sensor";

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// A reading as handed to `ReadingStore::append`, before the store assigns its
/// insertion sequence number.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewReading {
    pub device_key: String,
    pub device_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
    /// Soil moisture percentage, 0–100
    pub moisture: Option<f64>,
    /// Degrees Celsius
    pub temperature: Option<f64>,
    /// Relative humidity percentage, 0–100
    pub humidity: Option<f64>,
    /// Soil pH, 0–14
    pub ph: Option<f64>,
    /// Raw light level in device units
    pub light: Option<i64>,
    /// Status string the firmware reports for its last executed command.
    pub command_status: Option<String>,
}

/// Immutable stored reading.
///
/// `(device_key, recorded_at, seq)` identifies a reading. `seq` grows
/// monotonically per store, so two readings sharing an instant keep their
/// arrival order. A `None` field was not sampled that cycle; it is never
/// read back as zero.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Reading {
    pub seq: i64,
    pub device_key: String,
    pub device_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub moisture: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub ph: Option<f64>,
    pub light: Option<i64>,
    pub command_status: Option<String>,
}

impl Reading {
    pub fn from_new(seq: i64, new: NewReading) -> Self {
        Self {
            seq,
            device_key: new.device_key,
            device_id: new.device_id,
            recorded_at: new.recorded_at,
            moisture: new.moisture,
            temperature: new.temperature,
            humidity: new.humidity,
            ph: new.ph,
            light: new.light,
            command_status: new.command_status,
        }
    }

    /// Chronological sort key. Ties on the instant fall back to arrival order.
    pub fn ordering_key(&self) -> (DateTime<Utc>, i64) {
        (self.recorded_at, self.seq)
    }
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

/// Mirrors the `device_status` Postgres enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "device_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Active,
    Inactive,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceStatus::Active => "active",
            DeviceStatus::Inactive => "inactive",
        })
    }
}

/// One row per device key. Records are never deleted; retirement is a status
/// change.
///
/// Invariants: `registered_at <= last_seen`, `registered_at` never changes
/// after the first write, and `last_alert_sent_at` is `Some` only while the
/// device is considered offline and has been alerted on.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct DeviceRecord {
    pub id: String,
    pub device_key: String,
    pub port: i32,
    pub kind: String,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub status: DeviceStatus,
    pub last_alert_sent_at: Option<DateTime<Utc>>,
}

/// Fields a registration, reading or heartbeat may carry about a device.
/// `None` keeps whatever the existing record has (or the default for a new
/// record).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceRegistration {
    pub device_key: String,
    pub id: Option<String>,
    pub port: Option<i32>,
    pub kind: Option<String>,
}

impl DeviceRegistration {
    /// A bare liveness signal for `device_key`.
    pub fn heartbeat(device_key: impl Into<String>) -> Self {
        Self {
            device_key: device_key.into(),
            ..Self::default()
        }
    }
}

impl DeviceRecord {
    /// Apply `reg` observed at `now` on top of `existing`.
    ///
    /// Keeps `registered_at` and any field `reg` leaves out, moves `last_seen`
    /// forward (never back, so a late write cannot undo a newer one) and
    /// reactivates the device. The alert marker is left alone; clearing it
    /// is the liveness monitor's job.
    pub fn merged(existing: Option<&DeviceRecord>, reg: DeviceRegistration, now: DateTime<Utc>) -> Self {
        match existing {
            Some(prev) => Self {
                id: reg.id.unwrap_or_else(|| prev.id.clone()),
                device_key: prev.device_key.clone(),
                port: reg.port.unwrap_or(prev.port),
                kind: reg.kind.unwrap_or_else(|| prev.kind.clone()),
                registered_at: prev.registered_at,
                last_seen: now.max(prev.last_seen),
                status: DeviceStatus::Active,
                last_alert_sent_at: prev.last_alert_sent_at,
            },
            None => Self {
                id: reg.id.unwrap_or_else(generate_device_id),
                device_key: reg.device_key,
                port: reg.port.unwrap_or(DEFAULT_DEVICE_PORT),
                kind: reg.kind.unwrap_or_else(|| DEFAULT_DEVICE_KIND.to_owned()),
                registered_at: now,
                last_seen: now,
                status: DeviceStatus::Active,
                last_alert_sent_at: None,
            },
        }
    }
}

/// `dev_` followed by 16 random hex characters.
pub fn generate_device_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("dev_{}", &hex[..16])
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn new_record_uses_defaults() {
        let rec = DeviceRecord::merged(None, DeviceRegistration::heartbeat("10.0.0.5"), t0());
        assert_eq!(rec.device_key, "10.0.0.5");
        assert_eq!(rec.port, DEFAULT_DEVICE_PORT);
        assert_eq!(rec.kind, DEFAULT_DEVICE_KIND);
        assert_eq!(rec.registered_at, t0());
        assert_eq!(rec.last_seen, t0());
        assert_eq!(rec.status, DeviceStatus::Active);
        assert!(rec.id.starts_with("dev_"));
        assert_eq!(rec.id.len(), 20);
    }

    #[test]
    fn merge_preserves_registered_at_and_unset_fields() {
        let reg = DeviceRegistration {
            device_key: "10.0.0.5".into(),
            id: Some("dev_a".into()),
            port: Some(8080),
            kind: Some("probe".into()),
        };
        let first = DeviceRecord::merged(None, reg, t0());

        let later = t0() + Duration::minutes(5);
        let second = DeviceRecord::merged(Some(&first), DeviceRegistration::heartbeat("10.0.0.5"), later);

        assert_eq!(second.registered_at, t0());
        assert_eq!(second.last_seen, later);
        assert_eq!(second.id, "dev_a");
        assert_eq!(second.port, 8080);
        assert_eq!(second.kind, "probe");
    }

    #[test]
    fn late_write_does_not_move_last_seen_back() {
        let first = DeviceRecord::merged(None, DeviceRegistration::heartbeat("k"), t0());
        let newer = t0() + Duration::seconds(900);
        let second = DeviceRecord::merged(Some(&first), DeviceRegistration::heartbeat("k"), newer);
        let stale = DeviceRecord::merged(
            Some(&second),
            DeviceRegistration::heartbeat("k"),
            t0() + Duration::seconds(5),
        );
        assert_eq!(stale.last_seen, newer);
        assert_eq!(stale.registered_at, t0());
    }

    #[test]
    fn merge_reactivates_and_keeps_alert_marker() {
        let mut rec = DeviceRecord::merged(None, DeviceRegistration::heartbeat("k"), t0());
        rec.status = DeviceStatus::Inactive;
        rec.last_alert_sent_at = Some(t0());

        let next = DeviceRecord::merged(Some(&rec), DeviceRegistration::heartbeat("k"), t0() + Duration::hours(1));
        assert_eq!(next.status, DeviceStatus::Active);
        assert_eq!(next.last_alert_sent_at, Some(t0()));
    }

    #[test]
    fn device_status_wire_form() {
        assert_eq!(DeviceStatus::Inactive.to_string(), "inactive");
        let parsed: DeviceStatus = serde_json::from_str(r#""active""#).unwrap();
        assert_eq!(parsed, DeviceStatus::Active);
        assert!(serde_json::from_str::<DeviceStatus>(r#""gone""#).is_err());
    }

    #[test]
    fn ordering_key_breaks_ties_by_seq() {
        let new = NewReading {
            device_key: "k".into(),
            recorded_at: t0(),
            ..NewReading::default()
        };
        let a = Reading::from_new(1, new.clone());
        let b = Reading::from_new(2, new);
        assert!(a.ordering_key() < b.ordering_key());
    }
}
