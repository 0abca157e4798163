//! Outbound notification port (Slack or equivalent transport).

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::BacklogTask;

/// Pluggable transport for human-facing messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Post a message; returns the transport's message id.
    async fn send_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> DomainResult<String>;

    /// Post an approval request for a task; returns the message id.
    async fn send_approval_request(
        &self,
        task: &BacklogTask,
        message: &str,
    ) -> DomainResult<String>;
}

/// Notifier that logs instead of sending; used when no transport is
/// configured and in tests.
#[derive(Debug, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send_message(
        &self,
        channel: &str,
        text: &str,
        _thread_ts: Option<&str>,
    ) -> DomainResult<String> {
        tracing::info!(channel = %channel, "notification (no transport): {}", text);
        Ok(format!("null-{}", uuid::Uuid::new_v4()))
    }

    async fn send_approval_request(
        &self,
        task: &BacklogTask,
        message: &str,
    ) -> DomainResult<String> {
        tracing::info!(task_id = %task.id, "approval request (no transport): {}", message);
        Ok(format!("null-{}", uuid::Uuid::new_v4()))
    }
}
