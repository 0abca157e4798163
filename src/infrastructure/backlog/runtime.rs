//! Placeholder agent runtime used when none is wired in.
//!
//! The real runtime is an external collaborator; this one refuses to
//! spawn so the kernel's monitors and surfaces run without dispatching
//! work.

use async_trait::async_trait;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::BacklogTask;
use crate::domain::ports::{AgentRuntime, SessionInfo};

#[derive(Debug, Default)]
pub struct NullAgentRuntime;

#[async_trait]
impl AgentRuntime for NullAgentRuntime {
    async fn spawn(&self, task: &BacklogTask, model: &str) -> DomainResult<String> {
        tracing::warn!(task_id = %task.id, model = %model, "no agent runtime configured");
        Err(DomainError::AgentRuntime("no agent runtime configured".to_string()))
    }

    async fn lookup_session(&self, _session_id: &str) -> Option<SessionInfo> {
        None
    }

    async fn pause_session(&self, session_id: &str) -> DomainResult<()> {
        tracing::warn!(session_id = %session_id, "no agent runtime configured");
        Ok(())
    }
}
