//! Human approval gate for backlog tasks.
//!
//! The kernel asks the gate whether each candidate task is admissible.
//! Tasks that need approval get a pending registry entry and a one-shot
//! out-of-band approval request; external confirmation arrives through
//! [`TaskApprovalGate::handle_response`] and the task becomes admissible
//! on a later tick.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::config::ApprovalConfig;
use crate::domain::models::{ApprovalEntry, ApprovalStatus, BacklogTask};
use crate::domain::ports::{Notifier, TaskRepository};
use crate::services::event_bus::EventBus;

/// Scheduler-facing answer for one candidate task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admissibility {
    Admit,
    Deny,
    Pending,
}

pub type ApprovalCallback = Arc<dyn Fn(&ApprovalEntry) + Send + Sync>;

/// The approval gate service.
pub struct TaskApprovalGate {
    config: ApprovalConfig,
    inner: Mutex<HashMap<Uuid, ApprovalEntry>>,
    notifier: Arc<dyn Notifier>,
    repo: Option<Arc<dyn TaskRepository>>,
    bus: Option<Arc<EventBus>>,
    on_approval: Option<ApprovalCallback>,
}

impl TaskApprovalGate {
    pub fn new(config: ApprovalConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            config,
            inner: Mutex::new(HashMap::new()),
            notifier,
            repo: None,
            bus: None,
            on_approval: None,
        }
    }

    /// Persist pending entries best-effort so out-of-band surfaces
    /// (`tc proposal list`) can see them.
    pub fn with_repository(mut self, repo: Arc<dyn TaskRepository>) -> Self {
        self.repo = Some(repo);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_on_approval(mut self, callback: ApprovalCallback) -> Self {
        self.on_approval = Some(callback);
        self
    }

    pub fn enabled(&self) -> bool {
        self.config.enable_task_approval
    }

    /// Whether this task must be approved before dispatch.
    pub fn requires_approval(&self, task: &BacklogTask) -> bool {
        if !self.config.enable_task_approval {
            return false;
        }
        self.config.require_approval_for_all
            || (!self.config.auto_approve_confirmed && !task.priority_confirmed)
    }

    /// Admissibility for the scheduler filter. First sight of a task that
    /// needs approval registers a pending entry and fires the approval
    /// request out-of-band.
    pub fn admissibility(&self, task: &BacklogTask) -> Admissibility {
        if !self.requires_approval(task) {
            return Admissibility::Admit;
        }

        let new_entry = {
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            match inner.get(&task.id) {
                Some(entry) => match entry.status {
                    ApprovalStatus::Approved => return Admissibility::Admit,
                    ApprovalStatus::Rejected => return Admissibility::Deny,
                    ApprovalStatus::Pending => return Admissibility::Pending,
                },
                None => {
                    let entry = ApprovalEntry::pending(task.id);
                    inner.insert(task.id, entry.clone());
                    entry
                }
            }
        };

        self.dispatch_request(task.clone(), new_entry);
        Admissibility::Pending
    }

    fn dispatch_request(&self, task: BacklogTask, entry: ApprovalEntry) {
        tracing::info!(task_id = %task.id, title = %task.title, "task awaiting approval");
        let notifier = self.notifier.clone();
        let repo = self.repo.clone();
        let message = format!(
            "Task `{}` ({}, priority {}) needs approval before dispatch.",
            task.title, task.model, task.priority,
        );
        let send = async move {
            if let Some(repo) = repo {
                if let Err(err) = repo.record_pending_approval(&entry).await {
                    tracing::debug!(error = %err, "could not persist pending approval");
                }
            }
            notifier
                .send_approval_request(&task, &message)
                .await
                .map(|_| ())
                .map_err(anyhow::Error::from)
        };

        if let Some(ref bus) = self.bus {
            bus.spawn_guarded("approval-gate", None, send);
        } else if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = send.await {
                    tracing::warn!(error = %err, "approval request failed");
                }
            });
        }
    }

    /// Deliver an external human decision for a task.
    pub fn handle_response(
        &self,
        task_id: Uuid,
        approved: bool,
        responded_by: &str,
        reason: Option<String>,
    ) -> DomainResult<ApprovalEntry> {
        let entry = {
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let entry = inner.entry(task_id).or_insert_with(|| ApprovalEntry::pending(task_id));
            entry.status = if approved { ApprovalStatus::Approved } else { ApprovalStatus::Rejected };
            entry.responded_by = Some(responded_by.to_string());
            entry.reason = reason;
            entry.clone()
        };

        tracing::info!(
            task_id = %task_id,
            approved,
            responded_by = %responded_by,
            "approval response received"
        );
        if let Some(ref callback) = self.on_approval {
            callback(&entry);
        }
        Ok(entry)
    }

    /// All registry entries, newest request first.
    pub fn entries(&self) -> Vec<ApprovalEntry> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut entries: Vec<ApprovalEntry> = inner.values().cloned().collect();
        entries.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        entries
    }

    /// Entries still waiting on a decision.
    pub fn pending(&self) -> Vec<ApprovalEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.status == ApprovalStatus::Pending)
            .collect()
    }
}
