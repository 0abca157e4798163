//! Agent lifecycle event routing.
//!
//! Every event from the runtime flows through the kernel's dispatcher
//! (bus emission), the registered global handlers (isolated), and the
//! state transition table: completions and errors release capacity,
//! bill spend, and feed the monitors; blockers and questions mark the
//! agent blocked; subagent spawns insert new records.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::models::{
    AgentEvent, AgentRecord, AgentStatus, TaskStatus, TokenUsage, UsageEntry,
};
use crate::services::event_bus::EventPayload;
use crate::services::pricing;
use crate::services::productivity::OutputKind;

use super::Orchestrator;

impl Orchestrator {
    /// Route one agent event. Never raises: failures inside handlers or
    /// best-effort side effects are logged or re-enter as `system:error`.
    pub async fn handle_agent_event(self: &Arc<Self>, event: AgentEvent) {
        self.run_global_handlers(&event).await;

        match event {
            AgentEvent::Completion { session_id, usage } => {
                self.on_terminal(&session_id, usage, None).await;
            }
            AgentEvent::Error { session_id, message, usage } => {
                self.on_terminal(&session_id, usage, Some(message)).await;
            }
            AgentEvent::Blocker { session_id, reason } => {
                self.on_blocked(&session_id, Some(reason)).await;
            }
            AgentEvent::Question { session_id, question } => {
                self.bus.publish(EventPayload::AgentQuestion {
                    session_id: session_id.clone(),
                    question,
                });
                self.on_blocked(&session_id, None).await;
            }
            AgentEvent::SubagentSpawn { parent_session_id, session_id, model } => {
                self.on_subagent_spawn(&parent_session_id, session_id, model).await;
            }
        }
    }

    async fn run_global_handlers(&self, event: &AgentEvent) {
        let handlers = self.global_handlers.read().await.clone();
        for handler in handlers {
            if let Err(err) = handler(event) {
                tracing::warn!(error = %err, "global agent handler failed");
            }
        }
    }

    /// Completion and error share the terminal path: release capacity,
    /// remove the record, bill the work, update the monitors.
    async fn on_terminal(self: &Arc<Self>, session_id: &str, usage: TokenUsage, error: Option<String>) {
        let Some(record) = self.agents.write().await.remove(session_id) else {
            tracing::warn!(session_id = %session_id, "terminal event for untracked session");
            return;
        };
        self.scheduler.release(&record.model, session_id);

        let success = error.is_none();
        let (input_tokens, output_tokens) = usage.split();
        let cost_usd = usage.cost_usd.or_else(|| {
            pricing::estimate_cost(&record.model, input_tokens, output_tokens)
        });
        let cost_usd = cost_usd.unwrap_or(0.0);

        // Partial work still bills on error.
        let entry = self.spend.record_agent_cost(
            session_id,
            record.task_id,
            &record.model,
            input_tokens,
            output_tokens,
            cost_usd,
        );
        self.breaker.record_cost(cost_usd);
        self.persist_usage(entry);

        let duration_ms = (Utc::now() - record.started_at).num_milliseconds().max(0) as u64;
        self.productivity.record_agent_completion(
            session_id,
            record.task_id,
            &record.model,
            success,
            duration_ms,
            error.as_deref(),
        );

        if success {
            self.productivity.record_output(session_id, OutputKind::TaskCompleted);
            self.breaker.record_agent_success(session_id);
            self.bus.publish(EventPayload::AgentCompleted {
                session_id: session_id.to_string(),
                task_id: record.task_id,
                tokens_used: usage.total(),
                cost_usd,
            });
        } else {
            let message = error.clone().unwrap_or_default();
            self.breaker.record_agent_error(session_id, &message);
            self.bus.publish(EventPayload::AgentFailed {
                session_id: session_id.to_string(),
                task_id: record.task_id,
                error: message.clone(),
            });
            self.consult_retrospective(record.task_id, &message).await;
        }
        self.bus.publish(EventPayload::TaskCompleted {
            task_id: record.task_id,
            success,
        });
        self.mark_task_terminal(record.task_id, success);
        self.persist_state().await;
    }

    async fn on_blocked(&self, session_id: &str, reason: Option<String>) {
        let mut agents = self.agents.write().await;
        let Some(record) = agents.get_mut(session_id) else {
            tracing::warn!(session_id = %session_id, "blocker for untracked session");
            return;
        };
        record.status = AgentStatus::Blocked;
        if let Some(reason) = reason {
            record.blocker_reason = Some(reason.clone());
            self.bus.publish(EventPayload::AgentBlocked {
                session_id: session_id.to_string(),
                reason,
            });
        }
    }

    async fn on_subagent_spawn(
        self: &Arc<Self>,
        parent_session_id: &str,
        session_id: Option<String>,
        model: Option<String>,
    ) {
        let (Some(session_id), Some(model)) = (session_id, model) else {
            tracing::warn!(
                parent_session_id = %parent_session_id,
                "subagent spawn payload missing session_id or model, ignoring"
            );
            return;
        };

        let parent_task = {
            let agents = self.agents.read().await;
            agents.get(parent_session_id).map(|r| r.task_id)
        };
        let Some(task_id) = parent_task else {
            tracing::warn!(
                parent_session_id = %parent_session_id,
                "subagent spawn from untracked parent, ignoring"
            );
            return;
        };

        if !self.scheduler.reserve(&model, &session_id) {
            tracing::warn!(
                session_id = %session_id,
                model = %model,
                "no capacity for subagent, not tracking it"
            );
            return;
        }
        let record = AgentRecord::new(session_id.clone(), task_id, model.clone());
        self.agents.write().await.insert(session_id.clone(), record);
        self.bus.publish(EventPayload::AgentSpawned {
            session_id,
            task_id,
            model,
            parent_session_id: Some(parent_session_id.to_string()),
        });
        self.persist_state().await;
    }

    /// Record runtime-reported token burn for a session and propagate
    /// the watermark to the circuit breaker. Critical alerts may pause
    /// the session via the runtime; outbound messaging is the alert
    /// callback's concern.
    pub async fn record_agent_tokens(self: &Arc<Self>, session_id: &str, tokens: u64) {
        let alert = self.productivity.record_tokens(session_id, tokens);
        self.breaker
            .record_tokens_without_output(self.productivity.max_tokens_without_output());

        if alert.is_some_and(|alert| alert.pause_requested) {
            if let Err(err) = self.runtime.pause_session(session_id).await {
                tracing::warn!(session_id = %session_id, error = %err, "could not pause session");
            }
        }
    }

    /// Record an agent-reported artifact.
    pub fn record_agent_output(&self, session_id: &str, kind: OutputKind) {
        self.productivity.record_output(session_id, kind);
    }

    fn persist_usage(self: &Arc<Self>, entry: UsageEntry) {
        let usage_log = self.usage_log.clone();
        self.bus.spawn_guarded("usage-log", None, async move {
            usage_log.append(&entry).await.map_err(anyhow::Error::from)
        });
    }

    fn mark_task_terminal(self: &Arc<Self>, task_id: Uuid, success: bool) {
        let repo = self.repo.clone();
        self.bus.spawn_guarded("backlog", None, async move {
            let Some(mut task) = repo.get_task(task_id).await? else {
                return Ok(());
            };
            task.status = if success { TaskStatus::Completed } else { TaskStatus::Failed };
            task.updated_at = Utc::now();
            repo.update_task(&task).await.map_err(anyhow::Error::from)
        });
    }

    /// Best-effort retrospective consultation: a missing repository row
    /// or failed lookup skips the check.
    async fn consult_retrospective(self: &Arc<Self>, task_id: Uuid, error: &str) {
        let Some(ref trigger) = self.retrospective else {
            return;
        };
        let project_id = match self.repo.get_task(task_id).await {
            Ok(Some(task)) => task.project_id,
            Ok(None) => None,
            Err(err) => {
                tracing::debug!(task_id = %task_id, error = %err, "retrospective lookup failed");
                None
            }
        };
        let Some(project_id) = project_id else {
            tracing::debug!(task_id = %task_id, "no project resolved, skipping retrospective");
            return;
        };
        trigger.task_failed(project_id, task_id, error).await;
        self.bus.publish(EventPayload::RetrospectiveTriggered {
            project_id,
            task_id,
            reason: error.to_string(),
        });
    }
}
