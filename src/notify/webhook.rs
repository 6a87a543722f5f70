use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::Notifier;
use crate::timefmt;

type HmacSha256 = Hmac<Sha256>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OfflineAlert<'a> {
    device_id: &'a str,
    last_seen: String,
    alerted_at: String,
}

/// POSTs offline alerts as JSON, optionally signed with a shared secret.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    url: String,
    secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, secret: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                url: url.into(),
                secret,
            }),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, device_id: &str, last_seen: DateTime<Utc>) -> Result<()> {
        let now = Utc::now();
        let body = serde_json::to_vec(&OfflineAlert {
            device_id,
            last_seen: timefmt::format(&last_seen),
            alerted_at: timefmt::format(&now),
        })
        .context("Failed to serialize offline alert")?;

        let mut req = self
            .inner
            .http
            .post(&self.inner.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if let Some(secret) = &self.inner.secret {
            let t = now.timestamp_millis().to_string();
            req = req.headers(to_header_map(build_signed_headers(secret, &t, &body))?);
        }

        debug!(device_id = %device_id, url = %self.inner.url, "Sending offline alert");
        req.body(body)
            .send()
            .await
            .context("Offline alert request failed")?
            .error_for_status()
            .context("Alert webhook returned error status")?;

        info!(device_id = %device_id, "Offline alert delivered");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Signing helpers
// ---------------------------------------------------------------------------

/// Signature headers for a webhook body.
///
/// `X-Signature` is the uppercase hex HMAC-SHA256 of
/// `t + "\n" + hex(sha256(body))`, keyed with the shared secret. Receivers
/// recompute it and reject stale `X-Timestamp` values.
pub(crate) fn build_signed_headers(secret: &str, t: &str, body: &[u8]) -> HashMap<String, String> {
    let content_sha256 = {
        let mut hasher = Sha256::new();
        hasher.update(body);
        hex::encode(hasher.finalize())
    };

    let string_to_sign = format!("{t}\n{content_sha256}");

    let sign = {
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(string_to_sign.as_bytes());
        hex::encode(mac.finalize().into_bytes()).to_uppercase()
    };

    let mut headers = HashMap::new();
    headers.insert("x-timestamp".to_owned(), t.to_owned());
    headers.insert("x-signature-method".to_owned(), "HMAC-SHA256".to_owned());
    headers.insert("x-signature".to_owned(), sign);
    headers
}

/// Convert our string `HashMap` into a `reqwest::header::HeaderMap`.
fn to_header_map(map: HashMap<String, String>) -> Result<reqwest::header::HeaderMap> {
    let mut header_map = reqwest::header::HeaderMap::new();
    for (k, v) in map {
        let name = reqwest::header::HeaderName::from_bytes(k.as_bytes())
            .with_context(|| format!("invalid header name: {k}"))?;
        let value = reqwest::header::HeaderValue::from_str(&v)
            .with_context(|| format!("invalid header value for {k}"))?;
        header_map.insert(name, value);
    }
    Ok(header_map)
}
