use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::{
    db::models::{DeviceRecord, Reading},
    error::Result,
    store::{DeviceRegistry, ReadingStore},
};

/// Windows tried in order. A device silent for longer than the last one
/// reports no data even if older readings exist.
const SEARCH_WINDOWS_HOURS: [i64; 2] = [1, 24];

/// The newest reading for a device together with its registry record.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestReading {
    pub reading: Reading,
    /// `None` when the registry has never heard of the reading's device.
    pub device: Option<DeviceRecord>,
}

/// Finds the most recent reading without ever issuing an unbounded query.
#[derive(Clone)]
pub struct LatestResolver {
    readings: Arc<dyn ReadingStore>,
    devices: Arc<dyn DeviceRegistry>,
}

impl LatestResolver {
    pub fn new(readings: Arc<dyn ReadingStore>, devices: Arc<dyn DeviceRegistry>) -> Self {
        Self { readings, devices }
    }

    /// Latest reading for `device_key`, or across all devices when `None`.
    pub async fn latest(&self, device_key: Option<&str>, now: DateTime<Utc>) -> Result<Option<LatestReading>> {
        for hours in SEARCH_WINDOWS_HOURS {
            let since = now - Duration::hours(hours);
            let rows = self.readings.query(device_key, Some(since)).await?;
            debug!(device_key = ?device_key, window_hours = hours, rows = rows.len(), "latest lookup");

            if let Some(reading) = newest(rows) {
                let device = self.devices.get(&reading.device_key).await?;
                return Ok(Some(LatestReading { reading, device }));
            }
        }
        Ok(None)
    }
}

/// Max by `(recorded_at, seq)`: on equal instants the later insert wins.
fn newest(rows: Vec<Reading>) -> Option<Reading> {
    rows.into_iter().max_by_key(Reading::ordering_key)
}
