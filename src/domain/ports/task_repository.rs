//! Backlog repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    ApprovalEntry, ApprovalResponse, BacklogSummary, BacklogTask, Project, TaskStatus,
};

/// Filter criteria for listing backlog tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub project_id: Option<Uuid>,
    pub model: Option<String>,
    pub limit: Option<usize>,
}

/// Persistence interface for the task backlog.
///
/// The backing store (Supabase REST, in-memory) is an external
/// collaborator; the kernel only depends on this contract.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Create a new backlog task.
    async fn add_task(&self, task: &BacklogTask) -> DomainResult<()>;

    /// Get a task by ID.
    async fn get_task(&self, id: Uuid) -> DomainResult<Option<BacklogTask>>;

    /// Update an existing task in place.
    async fn update_task(&self, task: &BacklogTask) -> DomainResult<()>;

    /// Cancel a task by ID.
    async fn cancel_task(&self, id: Uuid) -> DomainResult<()>;

    /// List tasks with optional filters.
    async fn list_tasks(&self, filter: TaskFilter) -> DomainResult<Vec<BacklogTask>>;

    /// Ready tasks in dispatch order (priority descending, oldest first),
    /// excluding tasks belonging to paused projects.
    async fn fetch_ready(&self, limit: usize) -> DomainResult<Vec<BacklogTask>>;

    /// List known projects.
    async fn list_projects(&self) -> DomainResult<Vec<Project>>;

    /// Pause or resume dispatch for a project.
    async fn set_project_paused(&self, project_id: Uuid, paused: bool) -> DomainResult<()>;

    /// Aggregate counts over the backlog.
    async fn backlog_summary(&self) -> DomainResult<BacklogSummary>;

    /// Record a newly requested approval so out-of-band surfaces can list it.
    async fn record_pending_approval(&self, entry: &ApprovalEntry) -> DomainResult<()>;

    /// All approval entries, newest first.
    async fn list_approvals(&self) -> DomainResult<Vec<ApprovalEntry>>;

    /// Submit a human decision for a pending approval.
    async fn submit_approval_response(&self, response: &ApprovalResponse) -> DomainResult<()>;

    /// Drain decisions submitted since the last call. The kernel feeds
    /// these into the approval gate each tick.
    async fn take_approval_responses(&self) -> DomainResult<Vec<ApprovalResponse>>;

    /// Lightweight connectivity probe used by the DB health monitor.
    async fn health_probe(&self) -> DomainResult<()>;
}
