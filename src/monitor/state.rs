use chrono::{DateTime, Duration, Utc};

use crate::{
    db::models::DeviceRecord,
    error::{Error, Result},
};

/// Per-device alert state, derived from `last_seen` and `last_alert_sent_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    /// Reported within the stale threshold.
    Live,
    /// Stale and due an alert: either never alerted or the cooldown lapsed.
    OfflineUnacked,
    /// Stale and alerted within the cooldown.
    OfflineAcked,
}

/// What the monitor must do to leave the assessed state consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertAction {
    None,
    /// Device is live again: clear the alert marker.
    ClearMarker,
    /// Send an alert and set the marker to now.
    Notify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assessment {
    pub state: AlertState,
    pub action: AlertAction,
}

impl Assessment {
    /// State once `action` has been carried out.
    pub fn next_state(&self) -> AlertState {
        match self.action {
            AlertAction::Notify => AlertState::OfflineAcked,
            AlertAction::ClearMarker => AlertState::Live,
            AlertAction::None => self.state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    pub stale_threshold: Duration,
    pub alert_cooldown: Duration,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            stale_threshold: Duration::seconds(600),
            alert_cooldown: Duration::hours(24),
        }
    }
}

impl LivenessPolicy {
    pub fn new(stale_threshold: std::time::Duration, alert_cooldown: std::time::Duration) -> Result<Self> {
        let conv = |d: std::time::Duration, what: &str| {
            Duration::from_std(d).map_err(|e| Error::validation(format!("{what} out of range: {e}")))
        };
        Ok(Self {
            stale_threshold: conv(stale_threshold, "stale threshold")?,
            alert_cooldown: conv(alert_cooldown, "alert cooldown")?,
        })
    }

    /// Classify `rec` at `now` and pick the transition.
    ///
    /// Fails with `InvalidRecord` when the stored timestamps contradict each
    /// other; the caller skips that device.
    pub fn assess(&self, rec: &DeviceRecord, now: DateTime<Utc>) -> Result<Assessment> {
        if rec.registered_at > rec.last_seen {
            return Err(Error::InvalidRecord {
                device_key: rec.device_key.clone(),
                reason: format!(
                    "registered_at {} is after last_seen {}",
                    rec.registered_at, rec.last_seen
                ),
            });
        }

        let elapsed = now - rec.last_seen;
        if elapsed <= self.stale_threshold {
            let action = match rec.last_alert_sent_at {
                Some(_) => AlertAction::ClearMarker,
                None => AlertAction::None,
            };
            return Ok(Assessment { state: AlertState::Live, action });
        }

        let due = match rec.last_alert_sent_at {
            None => true,
            Some(sent) => now - sent >= self.alert_cooldown,
        };
        Ok(if due {
            Assessment { state: AlertState::OfflineUnacked, action: AlertAction::Notify }
        } else {
            Assessment { state: AlertState::OfflineAcked, action: AlertAction::None }
        })
    }
}
