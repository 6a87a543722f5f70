use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

/// A command waiting for a device to pick it up on its next poll.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlCommand {
    pub device_key: String,
    pub command: String,
    pub payload: Option<Value>,
    pub issued_at: DateTime<Utc>,
}

/// At most one pending command per device key; a newer command replaces an
/// unread one.
///
/// Process-scoped: populated by operators, drained by device polls, and
/// empty again after a restart.
#[derive(Clone, Default)]
pub struct CommandQueue {
    inner: Arc<RwLock<HashMap<String, ControlCommand>>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `command` for `device_key`, overwriting any pending one.
    pub async fn push(
        &self,
        device_key: &str,
        command: &str,
        payload: Option<Value>,
        now: DateTime<Utc>,
    ) -> ControlCommand {
        let cmd = ControlCommand {
            device_key: device_key.to_owned(),
            command: command.to_owned(),
            payload,
            issued_at: now,
        };
        self.inner
            .write()
            .await
            .insert(device_key.to_owned(), cmd.clone());
        cmd
    }

    /// Remove and return the pending command, if any.
    pub async fn take(&self, device_key: &str) -> Option<ControlCommand> {
        self.inner.write().await.remove(device_key)
    }

    /// Return the pending command without consuming it.
    pub async fn peek(&self, device_key: &str) -> Option<ControlCommand> {
        self.inner.read().await.get(device_key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn empty_queue_returns_nothing() {
        let q = CommandQueue::new();
        assert!(q.peek("dev1").await.is_none());
        assert!(q.take("dev1").await.is_none());
    }

    #[tokio::test]
    async fn take_consumes_and_peek_does_not() {
        let q = CommandQueue::new();
        q.push("dev1", "water", Some(json!({"seconds": 5})), t0()).await;

        let peeked = q.peek("dev1").await.unwrap();
        assert_eq!(peeked.command, "water");
        assert_eq!(peeked.payload, Some(json!({"seconds": 5})));

        assert!(q.take("dev1").await.is_some());
        assert!(q.take("dev1").await.is_none());
    }

    #[tokio::test]
    async fn newer_command_replaces_pending() {
        let q = CommandQueue::new();
        q.push("dev1", "water", None, t0()).await;
        q.push("dev1", "stop", None, t0()).await;
        assert_eq!(q.take("dev1").await.unwrap().command, "stop");
    }

    #[tokio::test]
    async fn devices_are_separate() {
        let q = CommandQueue::new();
        q.push("dev1", "water", None, t0()).await;
        assert!(q.peek("dev2").await.is_none());
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let q = CommandQueue::new();
        let clone = q.clone();
        q.push("dev1", "water", None, t0()).await;
        assert!(clone.peek("dev1").await.is_some());
    }
}
