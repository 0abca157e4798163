//! Retrospective trigger port.

use async_trait::async_trait;
use uuid::Uuid;

/// Consulted after agent errors when the task's project can be resolved.
/// Implementations decide whether a failure pattern warrants a
/// retrospective; the kernel treats the whole call as best-effort.
#[async_trait]
pub trait RetrospectiveTrigger: Send + Sync {
    async fn task_failed(&self, project_id: Uuid, task_id: Uuid, error: &str);
}
