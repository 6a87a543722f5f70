use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{
    sync::{watch, Mutex},
    time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use super::state::{AlertAction, LivenessPolicy};
use crate::{
    db::models::DeviceRecord,
    error::Result,
    notify::Notifier,
    store::DeviceRegistry,
    timefmt,
};

/// Upper bound on one `Notifier::notify` call.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Tally of one liveness scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub checked: usize,
    pub alerted: usize,
    pub recovered: usize,
    pub failed: usize,
}

enum Outcome {
    Unchanged,
    Alerted,
    Recovered,
}

pub struct LivenessMonitor {
    devices: Arc<dyn DeviceRegistry>,
    notifier: Arc<dyn Notifier>,
    policy: LivenessPolicy,
    interval: Duration,
    notify_timeout: Duration,
    /// Held for the duration of a scan; a second scan never waits on it.
    scan_guard: Mutex<()>,
}

impl LivenessMonitor {
    pub fn new(
        devices: Arc<dyn DeviceRegistry>,
        notifier: Arc<dyn Notifier>,
        policy: LivenessPolicy,
        interval: Duration,
    ) -> Self {
        Self {
            devices,
            notifier,
            policy,
            interval,
            notify_timeout: NOTIFY_TIMEOUT,
            scan_guard: Mutex::new(()),
        }
    }

    pub fn with_notify_timeout(mut self, notify_timeout: Duration) -> Self {
        self.notify_timeout = notify_timeout;
        self
    }

    /// Runs the scan loop until `shutdown` flips (or its sender is dropped).
    /// Spawn this via `tokio::spawn`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Liveness monitor started");
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    info!("Liveness monitor stopping");
                    return;
                }
            }

            match self.try_scan(Utc::now()).await {
                Some(Ok(report)) => info!(
                    checked = report.checked,
                    alerted = report.alerted,
                    recovered = report.recovered,
                    failed = report.failed,
                    "Liveness scan finished"
                ),
                Some(Err(e)) => error!(error = %e, "Liveness scan failed"),
                None => warn!("Previous liveness scan still running; skipping tick"),
            }
        }
    }

    /// Scan unless another scan holds the guard, in which case return `None`
    /// immediately.
    pub async fn try_scan(&self, now: DateTime<Utc>) -> Option<Result<ScanReport>> {
        let _guard = self.scan_guard.try_lock().ok()?;
        Some(self.scan_unguarded(now).await)
    }

    /// Check every active device once. Only failing to list devices aborts
    /// the scan; per-device failures are logged and counted.
    async fn scan_unguarded(&self, now: DateTime<Utc>) -> Result<ScanReport> {
        let devices = self.devices.list_active().await?;
        let mut report = ScanReport::default();

        for rec in &devices {
            report.checked += 1;
            match self.check_device(rec, now).await {
                Ok(Outcome::Unchanged) => {}
                Ok(Outcome::Alerted) => report.alerted += 1,
                Ok(Outcome::Recovered) => report.recovered += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(device_key = %rec.device_key, error = %e, "Liveness check failed");
                }
            }
        }

        Ok(report)
    }

    async fn check_device(&self, rec: &DeviceRecord, now: DateTime<Utc>) -> Result<Outcome> {
        let assessment = self.policy.assess(rec, now)?;
        debug!(
            device_key = %rec.device_key,
            state = ?assessment.state,
            action = ?assessment.action,
            next = ?assessment.next_state(),
            "Assessed device"
        );

        match assessment.action {
            AlertAction::None => Ok(Outcome::Unchanged),

            AlertAction::ClearMarker => {
                let cleared = self
                    .devices
                    .record_alert(&rec.device_key, rec.last_alert_sent_at, None)
                    .await?;
                if !cleared {
                    debug!(device_key = %rec.device_key, "Alert marker changed during scan; left as is");
                    return Ok(Outcome::Unchanged);
                }
                info!(device_key = %rec.device_key, "Device back online");
                Ok(Outcome::Recovered)
            }

            AlertAction::Notify => {
                warn!(
                    device_key = %rec.device_key,
                    last_seen = %timefmt::format(&rec.last_seen),
                    "Device offline; sending alert"
                );
                // Marker is written whether or not delivery succeeded.
                match time::timeout(self.notify_timeout, self.notifier.notify(&rec.id, rec.last_seen)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(device_key = %rec.device_key, error = %e, "Offline alert delivery failed");
                    }
                    Err(_) => error!(
                        device_key = %rec.device_key,
                        timeout_ms = self.notify_timeout.as_millis() as u64,
                        "Offline alert delivery timed out"
                    ),
                }
                let recorded = self
                    .devices
                    .record_alert(&rec.device_key, rec.last_alert_sent_at, Some(now))
                    .await?;
                if !recorded {
                    debug!(device_key = %rec.device_key, "Alert marker changed during scan; left as is");
                    return Ok(Outcome::Unchanged);
                }
                Ok(Outcome::Alerted)
            }
        }
    }
}
