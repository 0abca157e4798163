//! One iteration of the control loop.
//!
//! The admission chain short-circuits in a fixed order: lifecycle phase,
//! circuit breaker, spend monitor, degraded mode, then the scheduling
//! pass. A thrown tick never kills the loop; DB-shaped errors feed the
//! health monitor instead.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::models::AgentRecord;
use crate::services::approval_gate::Admissibility;
use crate::services::scheduler::AdmissibleFilter;

use super::types::KernelPhase;
use super::Orchestrator;

impl Orchestrator {
    /// Execute one tick. Errors are classified: DB-shaped errors count
    /// toward degraded mode, everything else is logged only.
    pub async fn tick(self: &Arc<Self>) {
        self.tick_count.fetch_add(1, Ordering::Relaxed);
        match self.tick_inner().await {
            Ok(()) => self.db_health.reset_failure_counter(),
            Err(err) => {
                let message = err.to_string();
                if self.db_health.is_db_error(&message) {
                    tracing::warn!(error = %message, "tick failed with database error");
                    self.db_health.on_db_failure(&message);
                } else {
                    tracing::error!(error = %message, "tick failed");
                }
            }
        }
    }

    async fn tick_inner(self: &Arc<Self>) -> DomainResult<()> {
        // 1. Lifecycle short-circuits.
        let phase = self.phase().await;
        if !matches!(phase, KernelPhase::Running | KernelPhase::Paused)
            || self.is_shutting_down()
        {
            return Ok(());
        }

        // 2. Circuit breaker.
        if !self.breaker.allows_operation() {
            tracing::debug!("tick skipped: circuit breaker open");
            return Ok(());
        }

        // 3. Spend monitor: hard stop pauses the kernel once; dropping
        // back inside the limits (a new window) resumes it once.
        if self.spend.should_stop() {
            if phase == KernelPhase::Running
                && !self.spend_paused.swap(true, Ordering::SeqCst)
            {
                *self.phase.write().await = KernelPhase::Paused;
                self.persist_state().await;
                let snapshot = self.spend.snapshot();
                self.notify(&format!(
                    ":no_entry: Budget Exceeded, pausing. Daily ${:.2}/${:.2}, weekly ${:.2}/${:.2}.",
                    snapshot.daily_spend_usd,
                    snapshot.daily_budget_usd,
                    snapshot.weekly_spend_usd,
                    snapshot.weekly_budget_usd,
                ))
                .await;
            }
            return Ok(());
        }
        let was_spend_paused = self.spend_paused.swap(false, Ordering::SeqCst);
        if was_spend_paused && self.phase().await == KernelPhase::Paused {
            *self.phase.write().await = KernelPhase::Running;
            self.persist_state().await;
            self.notify(":white_check_mark: Spend back within limits, resuming.").await;
        } else if !was_spend_paused && phase == KernelPhase::Paused {
            // Manual pause: scheduling is a no-op.
            return Ok(());
        }

        // 4. Degraded mode: probe, and only continue once recovered.
        if self.db_health.is_degraded() {
            if self.db_health.attempt_recovery().await {
                tracing::info!("database recovered, resuming scheduling");
            } else {
                return Ok(());
            }
        }

        // Feed externally submitted approval decisions into the gate.
        for response in self.repo.take_approval_responses().await? {
            let _ = self.approval.handle_response(
                response.task_id,
                response.approved,
                &response.responded_by,
                response.reason,
            );
        }

        // 5. Scheduling pass.
        if !self.scheduler.can_schedule().await {
            return Ok(());
        }
        let filter = self.approval_filter();
        let outcome = self
            .scheduler
            .schedule_next(self.config.project_hint, Some(filter))
            .await?;

        if outcome.tasks.is_empty() {
            return Ok(());
        }
        for assignment in outcome.tasks {
            match self.runtime.lookup_session(&assignment.session_id).await {
                Some(_) => {
                    let record = AgentRecord::new(
                        assignment.session_id.clone(),
                        assignment.task_id,
                        assignment.model.clone(),
                    );
                    self.agents.write().await.insert(assignment.session_id.clone(), record);
                    tracing::info!(
                        session_id = %assignment.session_id,
                        task_id = %assignment.task_id,
                        model = %assignment.model,
                        "agent assigned"
                    );
                }
                None => {
                    // The runtime lost the session before we could track
                    // it; heal the ledger by dropping the reservation.
                    tracing::warn!(
                        session_id = %assignment.session_id,
                        "session missing after assignment, reservation released"
                    );
                    self.scheduler.release(&assignment.model, &assignment.session_id);
                }
            }
        }
        self.persist_state().await;
        Ok(())
    }

    fn approval_filter(self: &Arc<Self>) -> AdmissibleFilter {
        let gate = self.approval.clone();
        Arc::new(move |task| {
            if gate.enabled() {
                gate.admissibility(task)
            } else {
                Admissibility::Admit
            }
        })
    }
}
