use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

use crate::{
    control::ControlCommand,
    db::models::{DeviceRecord, DeviceStatus, Reading},
    monitor::ScanReport,
    query::{AggregatedPoint, History, HistoryPoint, LatestReading},
    sensors::SensorSample,
    timefmt,
};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Body of `POST /sensor-data`. Every measurement is optional.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SensorDataRequest {
    /// Device identity, usually its IP address.
    #[serde(alias = "deviceIp")]
    pub device_key: Option<String>,
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

impl From<SensorDataRequest> for SensorSample {
    fn from(r: SensorDataRequest) -> Self {
        Self {
            device_key: r.device_key.unwrap_or_default(),
            device_id: r.device_id,
            port: r.port,
            device_type: r.device_type,
            moisture: r.moisture,
            temperature: r.temperature,
            humidity: r.humidity,
            ph: r.ph,
            light: r.light,
            command_status: r.command_status,
        }
    }
}

/// Query string of `GET /sensor-data`.
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct SensorDataQuery {
    /// Restrict to one device. Omit for all devices.
    #[serde(alias = "deviceIp")]
    pub device_key: Option<String>,
    /// `1`, `true` or `yes` selects history instead of the latest reading.
    pub history: Option<String>,
    /// `1h` (default), `1d`, `1m`, `1y` or `all`.
    pub timescale: Option<String>,
    /// Positive integer, default 100. Only trims `all` history.
    pub limit: Option<i64>,
}

/// Body of `POST /devices`.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequest {
    #[serde(alias = "deviceIp", alias = "deviceKey")]
    pub ip: Option<String>,
    pub port: Option<i64>,
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub device_type: Option<String>,
}

/// Body of `PUT /devices/{device_key}/status`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DeviceStatusRequest {
    pub status: DeviceStatus,
}

/// Body of `POST /control`.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest {
    #[serde(alias = "deviceIp")]
    pub device_key: Option<String>,
    pub command: Option<String>,
    pub payload: Option<Value>,
}

/// Query string of `GET /control`.
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ControlQuery {
    #[serde(alias = "deviceIp")]
    pub device_key: Option<String>,
    /// Remove the command once returned. Defaults to true.
    pub consume: Option<String>,
}

/// `1`, `true`, `yes` (any case) are true; anything else is false; absent
/// gives `default`.
pub fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value {
        None => default,
        Some(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// A stored reading. Unsampled measurements are `null`, never `0`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadingDto {
    pub seq: i64,
    pub device_key: String,
    pub device_id: Option<String>,
    /// `YYYY-MM-DDTHH:MM:SSZ`
    #[serde(with = "timefmt")]
    #[schema(value_type = String)]
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub moisture: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub ph: Option<f64>,
    pub light: Option<i64>,
    pub command_status: Option<String>,
}

impl From<Reading> for ReadingDto {
    fn from(r: Reading) -> Self {
        Self {
            seq: r.seq,
            device_key: r.device_key,
            device_id: r.device_id,
            timestamp: r.recorded_at,
            moisture: r.moisture,
            temperature: r.temperature,
            humidity: r.humidity,
            ph: r.ph,
            light: r.light,
            command_status: r.command_status,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDto {
    pub id: String,
    /// Device key (network address).
    pub ip: String,
    pub port: i32,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(with = "timefmt")]
    #[schema(value_type = String)]
    pub registered_at: chrono::DateTime<chrono::Utc>,
    #[serde(with = "timefmt")]
    #[schema(value_type = String)]
    pub last_seen: chrono::DateTime<chrono::Utc>,
    pub status: DeviceStatus,
    #[serde(with = "timefmt::option")]
    #[schema(value_type = Option<String>)]
    pub last_alert_sent_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<DeviceRecord> for DeviceDto {
    fn from(d: DeviceRecord) -> Self {
        Self {
            id: d.id,
            ip: d.device_key,
            port: d.port,
            device_type: d.kind,
            registered_at: d.registered_at,
            last_seen: d.last_seen,
            status: d.status,
            last_alert_sent_at: d.last_alert_sent_at,
        }
    }
}

/// Latest reading with its device record embedded (`null` if unknown).
#[derive(Debug, Serialize, ToSchema)]
pub struct LatestReadingDto {
    #[serde(flatten)]
    pub reading: ReadingDto,
    pub device: Option<DeviceDto>,
}

impl From<LatestReading> for LatestReadingDto {
    fn from(l: LatestReading) -> Self {
        Self {
            reading: l.reading.into(),
            device: l.device.map(Into::into),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedPointDto {
    /// Timestamp of the last reading in the bucket.
    #[serde(with = "timefmt")]
    #[schema(value_type = String)]
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Key of the first reading in the bucket.
    pub device_key: String,
    pub moisture: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub ph: Option<f64>,
    pub light: Option<f64>,
    /// Always `true`.
    pub is_aggregated: bool,
}

impl From<AggregatedPoint> for AggregatedPointDto {
    fn from(p: AggregatedPoint) -> Self {
        Self {
            timestamp: p.recorded_at,
            device_key: p.device_key,
            moisture: p.moisture,
            temperature: p.temperature,
            humidity: p.humidity,
            ph: p.ph,
            light: p.light,
            is_aggregated: true,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum HistoryPointDto {
    Raw(ReadingDto),
    Aggregated(AggregatedPointDto),
}

impl From<HistoryPoint> for HistoryPointDto {
    fn from(p: HistoryPoint) -> Self {
        match p {
            HistoryPoint::Raw(r) => Self::Raw(r.into()),
            HistoryPoint::Aggregated(a) => Self::Aggregated(a.into()),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryResponse {
    pub count: usize,
    pub history: Vec<HistoryPointDto>,
    pub timescale: String,
}

impl From<History> for HistoryResponse {
    fn from(h: History) -> Self {
        Self {
            count: h.count(),
            timescale: h.timescale.to_string(),
            history: h.points.into_iter().map(Into::into).collect(),
        }
    }
}

/// Response of `POST /sensor-data`.
#[derive(Debug, Serialize, ToSchema)]
pub struct IngestResponse {
    pub message: String,
    pub data: ReadingDto,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlCommandDto {
    pub device_key: String,
    pub command: String,
    pub payload: Option<Value>,
    #[serde(with = "timefmt")]
    #[schema(value_type = String)]
    pub issued_at: chrono::DateTime<chrono::Utc>,
}

impl From<ControlCommand> for ControlCommandDto {
    fn from(c: ControlCommand) -> Self {
        Self {
            device_key: c.device_key,
            command: c.command,
            payload: c.payload,
            issued_at: c.issued_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ControlQueuedResponse {
    pub message: String,
    pub command: ControlCommandDto,
}

/// What a polling device receives: its pending command, or an idle marker.
#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum ControlPollResponse {
    Pending(ControlCommandDto),
    Idle {
        #[serde(rename = "deviceKey")]
        device_key: String,
        command: Option<String>,
        status: String,
    },
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ScanReportDto {
    pub checked: usize,
    pub alerted: usize,
    pub recovered: usize,
    pub failed: usize,
}

impl From<ScanReport> for ScanReportDto {
    fn from(r: ScanReport) -> Self {
        Self {
            checked: r.checked,
            alerted: r.alerted,
            recovered: r.recovered,
            failed: r.failed,
        }
    }
}
