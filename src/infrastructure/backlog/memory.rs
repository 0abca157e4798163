//! In-memory backlog repository.
//!
//! Used by tests and by `tc` when no backlog endpoint is configured.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ApprovalEntry, ApprovalResponse, ApprovalStatus, BacklogSummary, BacklogTask, Project,
    TaskStatus,
};
use crate::domain::ports::{TaskFilter, TaskRepository};

#[derive(Default)]
struct Inner {
    tasks: HashMap<Uuid, BacklogTask>,
    projects: HashMap<Uuid, Project>,
    approvals: HashMap<Uuid, ApprovalEntry>,
    responses: Vec<ApprovalResponse>,
}

/// Repository over process-local state.
#[derive(Default)]
pub struct InMemoryTaskRepository {
    inner: Mutex<Inner>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a project (test helper).
    pub fn insert_project(&self, project: Project) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.projects.insert(project.id, project);
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn add_task(&self, task: &BacklogTask) -> DomainResult<()> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> DomainResult<Option<BacklogTask>> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(inner.tasks.get(&id).cloned())
    }

    async fn update_task(&self, task: &BacklogTask) -> DomainResult<()> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if !inner.tasks.contains_key(&task.id) {
            return Err(DomainError::TaskNotFound(task.id));
        }
        inner.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn cancel_task(&self, id: Uuid) -> DomainResult<()> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match inner.tasks.get_mut(&id) {
            Some(task) => {
                task.status = TaskStatus::Cancelled;
                task.updated_at = chrono::Utc::now();
                Ok(())
            }
            None => Err(DomainError::TaskNotFound(id)),
        }
    }

    async fn list_tasks(&self, filter: TaskFilter) -> DomainResult<Vec<BacklogTask>> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut tasks: Vec<BacklogTask> = inner
            .tasks
            .values()
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .filter(|t| filter.project_id.is_none() || t.project_id == filter.project_id)
            .filter(|t| filter.model.as_ref().is_none_or(|m| &t.model == m))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        if let Some(limit) = filter.limit {
            tasks.truncate(limit);
        }
        Ok(tasks)
    }

    async fn fetch_ready(&self, limit: usize) -> DomainResult<Vec<BacklogTask>> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let paused: Vec<Uuid> = inner
            .projects
            .values()
            .filter(|p| p.paused)
            .map(|p| p.id)
            .collect();
        let mut tasks: Vec<BacklogTask> = inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Ready)
            .filter(|t| t.project_id.is_none_or(|p| !paused.contains(&p)))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        tasks.truncate(limit);
        Ok(tasks)
    }

    async fn list_projects(&self) -> DomainResult<Vec<Project>> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut projects: Vec<Project> = inner.projects.values().cloned().collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    async fn set_project_paused(&self, project_id: Uuid, paused: bool) -> DomainResult<()> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match inner.projects.get_mut(&project_id) {
            Some(project) => {
                project.paused = paused;
                Ok(())
            }
            None => Err(DomainError::ProjectNotFound(project_id)),
        }
    }

    async fn backlog_summary(&self) -> DomainResult<BacklogSummary> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut summary = BacklogSummary { total: inner.tasks.len(), ..BacklogSummary::default() };
        for task in inner.tasks.values() {
            match task.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::Ready => summary.ready += 1,
                TaskStatus::Running => summary.running += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::Cancelled => summary.cancelled += 1,
            }
            if matches!(task.status, TaskStatus::Pending | TaskStatus::Ready) {
                if !task.priority_confirmed {
                    summary.unconfirmed_priority += 1;
                }
                if task.estimated_tokens.is_none() {
                    summary.missing_estimates += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn record_pending_approval(&self, entry: &ApprovalEntry) -> DomainResult<()> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.approvals.entry(entry.task_id).or_insert_with(|| entry.clone());
        Ok(())
    }

    async fn list_approvals(&self) -> DomainResult<Vec<ApprovalEntry>> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut entries: Vec<ApprovalEntry> = inner.approvals.values().cloned().collect();
        entries.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(entries)
    }

    async fn submit_approval_response(&self, response: &ApprovalResponse) -> DomainResult<()> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(entry) = inner.approvals.get_mut(&response.task_id) {
            entry.status = if response.approved {
                ApprovalStatus::Approved
            } else {
                ApprovalStatus::Rejected
            };
            entry.responded_by = Some(response.responded_by.clone());
            entry.reason = response.reason.clone();
        }
        inner.responses.push(response.clone());
        Ok(())
    }

    async fn take_approval_responses(&self) -> DomainResult<Vec<ApprovalResponse>> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(std::mem::take(&mut inner.responses))
    }

    async fn health_probe(&self) -> DomainResult<()> {
        Ok(())
    }
}
