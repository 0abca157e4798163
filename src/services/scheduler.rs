//! Scheduler contract and the backlog-backed implementation.
//!
//! The kernel only depends on the [`Scheduler`] trait: a capacity-aware
//! source of task assignments, filtered by the approval gate's
//! admissibility answers. Selection policy is deliberately simple
//! (priority order from the repository); capacity and reservation
//! discipline are the contract.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AgentRecord, BacklogTask, TaskAssignment, TaskStatus};
use crate::domain::ports::{AgentRuntime, TaskRepository};
use crate::services::approval_gate::Admissibility;
use crate::services::capacity::{CapacityTracker, TierCapacity};
use crate::services::event_bus::{EventBus, EventPayload};

/// Admissibility filter injected by the kernel.
pub type AdmissibleFilter = Arc<dyn Fn(&BacklogTask) -> Admissibility + Send + Sync>;

/// Outcome classification for one scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    /// At least one assignment was produced.
    Scheduled,
    /// Nothing ready in the backlog.
    NoTasks,
    /// Ready tasks exist but no tier had a free slot for them.
    NoCapacity,
    /// Every candidate is waiting on approval.
    AwaitingApproval,
}

/// Result of one `schedule_next` call.
#[derive(Debug, Clone)]
pub struct ScheduleOutcome {
    pub status: ScheduleStatus,
    pub tasks: Vec<TaskAssignment>,
}

/// Deep-copied scheduler statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub ready_backlog: usize,
    pub scheduled_total: u64,
    pub capacity: Vec<(String, TierCapacity)>,
}

/// The capacity/reservation contract the kernel drives every tick.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Cheap pre-check: is there any free capacity at all?
    async fn can_schedule(&self) -> bool;

    /// Produce assignments for admissible ready tasks, reserving
    /// capacity for each.
    async fn schedule_next(
        &self,
        project_hint: Option<Uuid>,
        filter: Option<AdmissibleFilter>,
    ) -> DomainResult<ScheduleOutcome>;

    async fn get_stats(&self) -> SchedulerStats;

    /// Reconcile capacity reservations against the live agent set.
    async fn sync_capacity(&self, active: &[AgentRecord]);

    /// Reserve a slot directly (subagent spawns observed by the kernel).
    fn reserve(&self, model: &str, session_id: &str) -> bool;

    /// Release the reservation for a finished session.
    fn release(&self, model: &str, session_id: &str);
}

/// Scheduler over the backlog repository and agent runtime.
pub struct BacklogScheduler {
    repo: Arc<dyn TaskRepository>,
    runtime: Arc<dyn AgentRuntime>,
    capacity: Arc<CapacityTracker>,
    bus: Option<Arc<EventBus>>,
    fetch_batch: usize,
    scheduled_total: AtomicU64,
}

impl BacklogScheduler {
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        runtime: Arc<dyn AgentRuntime>,
        capacity: Arc<CapacityTracker>,
    ) -> Self {
        Self {
            repo,
            runtime,
            capacity,
            bus: None,
            fetch_batch: 16,
            scheduled_total: AtomicU64::new(0),
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_fetch_batch(mut self, batch: usize) -> Self {
        self.fetch_batch = batch;
        self
    }

    async fn assign(&self, task: &BacklogTask) -> Option<TaskAssignment> {
        if self.capacity.available(&task.model) == 0 {
            return None;
        }

        let session_id = match self.runtime.spawn(task, &task.model).await {
            Ok(session_id) => session_id,
            Err(err) => {
                tracing::warn!(task_id = %task.id, error = %err, "agent spawn failed");
                return None;
            }
        };

        if !self.capacity.try_reserve(&task.model, &session_id) {
            // The free-slot check above makes this unreachable on the
            // kernel actor; heal by not tracking the assignment.
            tracing::error!(
                task_id = %task.id,
                session_id = %session_id,
                model = %task.model,
                "reservation lost between capacity check and reserve"
            );
            return None;
        }

        let mut running = task.clone();
        running.status = TaskStatus::Running;
        running.updated_at = chrono::Utc::now();
        if let Err(err) = self.repo.update_task(&running).await {
            tracing::warn!(task_id = %task.id, error = %err, "could not mark task running");
        }

        if let Some(ref bus) = self.bus {
            bus.publish(EventPayload::TaskAssigned {
                task_id: task.id,
                session_id: session_id.clone(),
                model: task.model.clone(),
            });
        }

        self.scheduled_total.fetch_add(1, Ordering::Relaxed);
        Some(TaskAssignment {
            task_id: task.id,
            session_id,
            model: task.model.clone(),
        })
    }
}

#[async_trait]
impl Scheduler for BacklogScheduler {
    async fn can_schedule(&self) -> bool {
        self.capacity.any_available()
    }

    async fn schedule_next(
        &self,
        project_hint: Option<Uuid>,
        filter: Option<AdmissibleFilter>,
    ) -> DomainResult<ScheduleOutcome> {
        let ready = self.repo.fetch_ready(self.fetch_batch).await?;
        let candidates: Vec<&BacklogTask> = ready
            .iter()
            .filter(|t| project_hint.is_none() || t.project_id == project_hint)
            .collect();

        if candidates.is_empty() {
            return Ok(ScheduleOutcome { status: ScheduleStatus::NoTasks, tasks: Vec::new() });
        }

        let mut assignments = Vec::new();
        let mut pending_approval = 0usize;
        for &task in &candidates {
            match filter.as_ref().map_or(Admissibility::Admit, |f| (f.as_ref())(task)) {
                Admissibility::Admit => {
                    if let Some(assignment) = self.assign(task).await {
                        assignments.push(assignment);
                    }
                }
                Admissibility::Pending => pending_approval += 1,
                Admissibility::Deny => {
                    tracing::debug!(task_id = %task.id, "task denied by admissibility filter");
                }
            }
        }

        let status = if !assignments.is_empty() {
            ScheduleStatus::Scheduled
        } else if pending_approval == candidates.len() {
            ScheduleStatus::AwaitingApproval
        } else {
            ScheduleStatus::NoCapacity
        };
        Ok(ScheduleOutcome { status, tasks: assignments })
    }

    async fn get_stats(&self) -> SchedulerStats {
        let ready_backlog = self
            .repo
            .fetch_ready(self.fetch_batch)
            .await
            .map(|tasks| tasks.len())
            .unwrap_or(0);
        SchedulerStats {
            ready_backlog,
            scheduled_total: self.scheduled_total.load(Ordering::Relaxed),
            capacity: self.capacity.snapshot(),
        }
    }

    async fn sync_capacity(&self, active: &[AgentRecord]) {
        self.capacity.sync(active);
    }

    fn reserve(&self, model: &str, session_id: &str) -> bool {
        self.capacity.try_reserve(model, session_id)
    }

    fn release(&self, model: &str, session_id: &str) {
        self.capacity.release(model, session_id);
    }
}
