//! Backlog task model and scheduler assignment types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a backlog task as the kernel sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Ready => write!(f, "ready"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "ready" => Ok(Self::Ready),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// The slice of the backlog schema the kernel reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacklogTask {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub project_id: Option<Uuid>,
    /// Requested model tier ("opus", "sonnet", "haiku").
    pub model: String,
    /// Base priority (0-10, higher = more urgent).
    pub priority: u8,
    /// Whether a human has confirmed the priority of this task.
    pub priority_confirmed: bool,
    /// Rough token estimate for pre-flight cost projection.
    pub estimated_tokens: Option<u64>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BacklogTask {
    /// Create a ready task with defaults suitable for `tc task add`.
    pub fn new(title: impl Into<String>, description: impl Into<String>, model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            project_id: None,
            model: model.into(),
            priority: 5,
            priority_confirmed: false,
            estimated_tokens: None,
            status: TaskStatus::Ready,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_project(mut self, project_id: Uuid) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn with_priority(mut self, priority: u8, confirmed: bool) -> Self {
        self.priority = priority;
        self.priority_confirmed = confirmed;
        self
    }

    pub fn with_estimate(mut self, tokens: u64) -> Self {
        self.estimated_tokens = Some(tokens);
        self
    }
}

/// Produced by the scheduler on each successful reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: Uuid,
    pub session_id: String,
    pub model: String,
}

/// A project grouping of backlog tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub paused: bool,
    pub created_at: DateTime<Utc>,
}

/// Aggregate counts over the backlog, for `tc backlog summary` and pre-flight.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacklogSummary {
    pub total: usize,
    pub pending: usize,
    pub ready: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub unconfirmed_priority: usize,
    pub missing_estimates: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_round_trip() {
        for s in ["pending", "ready", "running", "completed", "failed", "cancelled"] {
            let status: TaskStatus = s.parse().unwrap();
            assert_eq!(status.to_string(), s);
        }
    }

    #[test]
    fn test_task_status_accepts_us_spelling() {
        let status: TaskStatus = "canceled".parse().unwrap();
        assert_eq!(status, TaskStatus::Cancelled);
    }

    #[test]
    fn test_backlog_task_builders() {
        let project = Uuid::new_v4();
        let task = BacklogTask::new("title", "desc", "sonnet")
            .with_project(project)
            .with_priority(8, true)
            .with_estimate(40_000);
        assert_eq!(task.project_id, Some(project));
        assert_eq!(task.priority, 8);
        assert!(task.priority_confirmed);
        assert_eq!(task.estimated_tokens, Some(40_000));
        assert_eq!(task.status, TaskStatus::Ready);
    }
}
