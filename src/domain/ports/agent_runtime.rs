//! Agent runtime port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::BacklogTask;

/// A session the runtime knows about.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub model: String,
}

/// The runtime that actually executes a task.
///
/// Lifecycle events flow back through the kernel's agent-event channel;
/// this port only covers spawning and lookups.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Start an agent for the task on the given model tier and return
    /// the new session id.
    async fn spawn(&self, task: &BacklogTask, model: &str) -> DomainResult<String>;

    /// Look up a session by id. Returns None when the runtime lost it.
    async fn lookup_session(&self, session_id: &str) -> Option<SessionInfo>;

    /// Ask the runtime to pause a session (productivity auto-pause).
    async fn pause_session(&self, session_id: &str) -> DomainResult<()>;
}
