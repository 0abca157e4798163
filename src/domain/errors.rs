//! Domain errors for the TrafficControl orchestrator.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur in the TrafficControl system.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Project not found: {0}")]
    ProjectNotFound(Uuid),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Capacity exhausted for model {model} (limit {limit})")]
    CapacityExhausted { model: String, limit: usize },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Backlog store error: {0}")]
    BacklogStore(String),

    #[error("Notification transport error: {0}")]
    Transport(String),

    #[error("Agent runtime error: {0}")]
    AgentRuntime(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Startup aborted: {0}")]
    StartupAborted(String),

    #[error("Operation denied: {0}")]
    Denied(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}

/// Coarse classification of an error for retry and propagation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network, rate-limit, DB connection: retried or tolerated.
    TransientExternal,
    /// Auth, missing scope, channel-not-found: surfaced, never retried.
    PersistentExternal,
    /// Reserve without release, duplicate session: logged, state healed.
    InvariantViolation,
    /// Bad CLI args, invalid config: fatal at startup only.
    User,
}

impl DomainError {
    /// Classify this error for the retry policy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BacklogStore(_) | Self::Transport(_) | Self::AgentRuntime(_) => {
                ErrorKind::TransientExternal
            }
            Self::Denied(_) => ErrorKind::PersistentExternal,
            Self::CapacityExhausted { .. } | Self::InvalidStateTransition { .. } => {
                ErrorKind::InvariantViolation
            }
            Self::ValidationFailed(_) | Self::StartupAborted(_) => ErrorKind::User,
            _ => ErrorKind::TransientExternal,
        }
    }
}
