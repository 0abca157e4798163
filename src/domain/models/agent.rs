//! Agent session records and the lifecycle event stream from the runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a tracked agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Running,
    Blocked,
    Completing,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Running => write!(f, "running"),
            AgentStatus::Blocked => write!(f, "blocked"),
            AgentStatus::Completing => write!(f, "completing"),
        }
    }
}

/// One live agent session bound to a backlog task.
///
/// The set of `AgentRecord`s is kept in bijection with reserved capacity
/// slots: a record exists iff a slot is reserved for its session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub session_id: String,
    pub task_id: Uuid,
    pub model: String,
    pub status: AgentStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocker_reason: Option<String>,
}

impl AgentRecord {
    pub fn new(session_id: impl Into<String>, task_id: Uuid, model: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            task_id,
            model: model.into(),
            status: AgentStatus::Running,
            started_at: Utc::now(),
            blocker_reason: None,
        }
    }
}

/// Token accounting attached to completion and error events.
///
/// Runtimes report either an aggregate `tokens_used` or a precise
/// input/output split; `cost_usd` is present when the runtime bills
/// directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

impl TokenUsage {
    pub fn from_total(tokens: u64) -> Self {
        Self { tokens_used: Some(tokens), ..Self::default() }
    }

    pub fn from_split(input: u64, output: u64) -> Self {
        Self {
            input_tokens: Some(input),
            output_tokens: Some(output),
            ..Self::default()
        }
    }

    /// Resolve to an (input, output) pair.
    ///
    /// When only an aggregate count is known, it is split 30/70
    /// input/output, matching typical coding-agent traffic shape.
    pub fn split(&self) -> (u64, u64) {
        match (self.input_tokens, self.output_tokens) {
            (Some(i), Some(o)) => (i, o),
            _ => {
                let total = self.tokens_used.unwrap_or(0);
                let input = (total as f64 * 0.3).round() as u64;
                (input, total - input)
            }
        }
    }

    pub fn total(&self) -> u64 {
        let (i, o) = self.split();
        i + o
    }
}

/// Lifecycle events emitted by the agent runtime, in arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Question {
        session_id: String,
        question: String,
    },
    Blocker {
        session_id: String,
        reason: String,
    },
    Completion {
        session_id: String,
        #[serde(default)]
        usage: TokenUsage,
    },
    Error {
        session_id: String,
        message: String,
        #[serde(default)]
        usage: TokenUsage,
    },
    SubagentSpawn {
        parent_session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
}

impl AgentEvent {
    /// Session the event refers to (the parent for subagent spawns).
    pub fn session_id(&self) -> &str {
        match self {
            Self::Question { session_id, .. }
            | Self::Blocker { session_id, .. }
            | Self::Completion { session_id, .. }
            | Self::Error { session_id, .. } => session_id,
            Self::SubagentSpawn { parent_session_id, .. } => parent_session_id,
        }
    }
}
