//! Best-effort delivery of reward decisions to applicants.

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::models::UserId;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum Notification {
    ApplicationApproved {
        application_id: Uuid,
        user_id: UserId,
        code: String,
        percent_off: i32,
    },
    ApplicationRejected {
        application_id: Uuid,
        user_id: UserId,
    },
}

/// Fire-and-forget. Errors are reported back only so the caller can log them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Writes each notification to the log instead of delivering it.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        info!(notification = %serde_json::to_string(notification)?, "notification dispatched");
        Ok(())
    }
}
