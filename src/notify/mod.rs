pub mod webhook;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::timefmt;

pub use webhook::WebhookNotifier;

/// Outbound channel for offline alerts.
///
/// The monitor records an alert as sent whatever this returns, so an
/// implementation that fails is not retried until the cooldown expires.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, device_id: &str, last_seen: DateTime<Utc>) -> anyhow::Result<()>;
}

/// Writes alerts to the log only. Used when no webhook is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, device_id: &str, last_seen: DateTime<Utc>) -> anyhow::Result<()> {
        warn!(
            device_id = %device_id,
            last_seen = %timefmt::format(&last_seen),
            "Device offline"
        );
        Ok(())
    }
}
