use std::{str::FromStr, time::Duration};

use anyhow::{Context, Result};

// ---------------------------------------------------------------------------
// StorageBackend
// ---------------------------------------------------------------------------

/// Where readings and device records live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Process-local maps; everything is lost on restart.
    Memory,
    /// Postgres at `DATABASE_URL`.
    Postgres { database_url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackendKind {
    Memory,
    Postgres,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(Self::Memory),
            "postgres" => Ok(Self::Postgres),
            other => Err(anyhow::anyhow!("unknown storage backend: {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageBackend,
    pub server_host: String,
    pub server_port: u16,
    /// Liveness scan cadence.
    pub monitor_interval: Duration,
    /// A device silent for longer than this is offline.
    pub stale_threshold: Duration,
    /// Minimum gap between two offline alerts for the same device.
    pub alert_cooldown: Duration,
    /// Upper bound on any single store call.
    pub store_timeout: Duration,
    /// Offline alerts are POSTed here when set; otherwise only logged.
    pub alert_webhook_url: Option<String>,
    /// HMAC key for signing webhook bodies.
    pub alert_webhook_secret: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup so parsing can be tested without
    /// touching the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            lookup(key).with_context(|| format!("missing required env var: {key}"))
        };
        let optional = |key: &str, default: &str| -> String {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_owned())
        };

        let storage = match optional("STORAGE_BACKEND", "memory")
            .trim()
            .parse::<BackendKind>()?
        {
            BackendKind::Memory => StorageBackend::Memory,
            BackendKind::Postgres => StorageBackend::Postgres {
                database_url: required("DATABASE_URL")?,
            },
        };

        Ok(Self {
            storage,
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            monitor_interval: secs(&optional("MONITOR_INTERVAL_SECS", "60"), "MONITOR_INTERVAL_SECS")?,
            stale_threshold: secs(&optional("STALE_THRESHOLD_SECS", "600"), "STALE_THRESHOLD_SECS")?,
            alert_cooldown: secs(&optional("ALERT_COOLDOWN_SECS", "86400"), "ALERT_COOLDOWN_SECS")?,
            store_timeout: secs(&optional("STORE_TIMEOUT_SECS", "5"), "STORE_TIMEOUT_SECS")?,
            alert_webhook_url: lookup("ALERT_WEBHOOK_URL").filter(|v| !v.trim().is_empty()),
            alert_webhook_secret: lookup("ALERT_WEBHOOK_SECRET").filter(|v| !v.is_empty()),
        })
    }
}

/// Parse a strictly positive number of seconds.
fn secs(raw: &str, key: &str) -> Result<Duration> {
    let n: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a positive integer"))?;
    anyhow::ensure!(n > 0, "{key} must be a positive integer");
    Ok(Duration::from_secs(n))
}
