//! Kernel lifecycle: start sequence, run loop, graceful stop,
//! pause/resume, and OS signal handling.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::AgentRecord;
use crate::services::event_bus::EventPayload;
use crate::services::retry::RetryPolicy;

use super::types::KernelPhase;
use super::Orchestrator;

/// Await SIGTERM when the handler installed; otherwise never resolves.
async fn recv_terminate(signal: &mut Option<tokio::signal::unix::Signal>) {
    match signal {
        Some(signal) => {
            signal.recv().await;
        }
        None => futures::future::pending::<()>().await,
    }
}

impl Orchestrator {
    /// Run the full start sequence and then the control loop until a
    /// stop is requested. Any startup failure leaves the kernel stopped.
    pub async fn run(self: Arc<Self>) -> DomainResult<()> {
        self.start().await?;
        self.run_loop().await;
        Ok(())
    }

    /// Start sequence, strict order: DB probe, pre-flight, state load,
    /// capacity reconciliation, pid/state bookkeeping. Timers and signal
    /// handlers are armed by the run loop immediately after.
    pub async fn start(self: &Arc<Self>) -> DomainResult<()> {
        {
            let mut phase = self.phase.write().await;
            if *phase != KernelPhase::Stopped {
                return Err(DomainError::InvalidStateTransition {
                    from: phase.to_string(),
                    to: KernelPhase::Starting.to_string(),
                });
            }
            *phase = KernelPhase::Starting;
        }

        if let Err(err) = self.startup_sequence().await {
            *self.phase.write().await = KernelPhase::Stopped;
            return Err(err);
        }
        Ok(())
    }

    async fn startup_sequence(self: &Arc<Self>) -> DomainResult<()> {
        // 1. Database probe with retry; permanent failure aborts.
        if self.config.probe_db_on_startup {
            let repo = self.repo.clone();
            let policy = RetryPolicy::default();
            let started = Instant::now();
            policy
                .execute(|| {
                    let repo = repo.clone();
                    async move { repo.health_probe().await.map_err(anyhow::Error::from) }
                })
                .await
                .map_err(|err| {
                    DomainError::StartupAborted(format!("database unreachable: {err}"))
                })?;
            self.db_health
                .record_startup_healthy(started.elapsed().as_millis() as u64);
        }

        // 2. Pre-flight validation and optional human confirmation.
        if let Some((ref checker, ref confirmer)) = self.preflight {
            let (result, approved) = checker.run_with_confirmation(confirmer.as_ref()).await?;
            for warning in &result.warnings {
                tracing::warn!("pre-flight: {}", warning);
            }
            if !approved {
                return Err(DomainError::StartupAborted(
                    "pre-flight confirmation rejected or timed out".to_string(),
                ));
            }
        }

        // 3. Recover persisted state.
        let recovered = self.state_store.load();
        let resume_paused = recovered.as_ref().is_some_and(|s| s.is_paused);
        let recovered_agents: Vec<AgentRecord> =
            recovered.map(|s| s.active_agents).unwrap_or_default();
        if !recovered_agents.is_empty() {
            tracing::info!(count = recovered_agents.len(), "recovered active agents from state");
            let mut agents = self.agents.write().await;
            for record in &recovered_agents {
                agents.insert(record.session_id.clone(), record.clone());
            }
        }

        // 4. Reconcile capacity reservations against the recovered set.
        self.scheduler.sync_capacity(&recovered_agents).await;

        // 5. Bookkeeping; the run loop arms timers and signal handlers.
        self.state_store.write_pid()?;
        *self.phase.write().await = if resume_paused {
            KernelPhase::Paused
        } else {
            KernelPhase::Running
        };
        self.persist_state().await;
        self.bus.publish(EventPayload::SystemStarted);
        tracing::info!(
            poll_interval_ms = self.config.poll_interval_ms,
            paused = resume_paused,
            "orchestrator started"
        );
        Ok(())
    }

    /// The control loop. Ticks, agent events, the optional check-in
    /// timer, and OS signals are serialized through one `select!`.
    pub async fn run_loop(self: &Arc<Self>) {
        let Some(mut agent_rx) = self.agent_rx.lock().await.take() else {
            tracing::error!("run loop already consumed the agent event channel");
            return;
        };

        let mut poll = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it.
        poll.tick().await;

        let check_in_every = self.config.check_in_interval_ms;
        let mut check_in = tokio::time::interval(Duration::from_millis(
            check_in_every.unwrap_or(86_400_000),
        ));
        check_in.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        check_in.tick().await;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(stream) => Some(stream),
            Err(err) => {
                tracing::warn!(error = %err, "could not install SIGTERM handler");
                None
            }
        };

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    self.tick().await;
                }
                maybe_event = agent_rx.recv() => {
                    match maybe_event {
                        Some(event) => self.handle_agent_event(event).await,
                        None => {
                            tracing::warn!("agent event channel closed");
                        }
                    }
                }
                _ = check_in.tick(), if check_in_every.is_some() => {
                    self.check_in().await;
                }
                _ = tokio::signal::ctrl_c() => {
                    self.on_signal("SIGINT");
                }
                _ = recv_terminate(&mut sigterm) => {
                    self.on_signal("SIGTERM");
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        self.finish_stop(&mut agent_rx).await;
    }

    /// Idempotent signal handling: the first signal requests a graceful
    /// stop, the second forces exit.
    fn on_signal(&self, name: &str) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::error!(signal = name, "second signal received, forcing exit");
            std::process::exit(1);
        }
        tracing::info!(signal = name, "signal received, stopping gracefully");
        let _ = self.shutdown_tx.send(true);
    }

    /// Request a graceful stop from outside the loop.
    pub fn request_stop(&self) {
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(true);
        }
    }

    /// Drain active agents within the graceful window, then persist and
    /// tear down.
    async fn finish_stop(self: &Arc<Self>, agent_rx: &mut tokio::sync::mpsc::Receiver<crate::domain::models::AgentEvent>) {
        *self.phase.write().await = KernelPhase::Stopping;
        let deadline = Instant::now()
            + Duration::from_millis(self.config.graceful_shutdown_timeout_ms);

        // Lifecycle events keep flowing during the drain so completions
        // still release capacity.
        loop {
            if self.agents.read().await.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                let remaining = self.agents.read().await.len();
                tracing::warn!(remaining, "graceful shutdown window elapsed with agents active");
                break;
            }
            tokio::select! {
                maybe_event = agent_rx.recv() => {
                    if let Some(event) = maybe_event {
                        self.handle_agent_event(event).await;
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }

        *self.phase.write().await = KernelPhase::Stopped;
        self.persist_state().await;
        self.state_store.clear_pid();
        self.bus.publish(EventPayload::SystemStopped {
            reason: "stop requested".to_string(),
        });
        self.notify("TrafficControl stopped.").await;
        tracing::info!("orchestrator stopped");
    }

    /// Pause scheduling; agent lifecycle events continue to be processed.
    pub async fn pause(&self) -> DomainResult<()> {
        let mut phase = self.phase.write().await;
        match *phase {
            KernelPhase::Running => {
                *phase = KernelPhase::Paused;
                drop(phase);
                self.persist_state().await;
                tracing::info!("orchestrator paused");
                Ok(())
            }
            other => Err(DomainError::InvalidStateTransition {
                from: other.to_string(),
                to: KernelPhase::Paused.to_string(),
            }),
        }
    }

    /// Resume scheduling after a manual pause.
    pub async fn resume(&self) -> DomainResult<()> {
        let mut phase = self.phase.write().await;
        match *phase {
            KernelPhase::Paused => {
                *phase = KernelPhase::Running;
                self.spend_paused.store(false, Ordering::SeqCst);
                drop(phase);
                self.persist_state().await;
                tracing::info!("orchestrator resumed");
                Ok(())
            }
            other => Err(DomainError::InvalidStateTransition {
                from: other.to_string(),
                to: KernelPhase::Running.to_string(),
            }),
        }
    }

    /// Periodic status check-in sent to the notification channel.
    pub(super) async fn check_in(&self) {
        let stats = self.stats().await;
        let text = format!(
            "TrafficControl check-in: {} agent(s) active, {} tick(s), phase {}\n{}\n{}",
            stats.active_agents,
            stats.ticks,
            stats.phase,
            self.spend.format_for_slack(),
            self.productivity.format_for_slack(),
        );
        self.notify(&text).await;
        self.persist_state().await;
    }
}
