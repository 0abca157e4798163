//! `tc start`: wire every subsystem and run the kernel until signalled.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;

use crate::domain::models::Config;
use crate::domain::ports::{AgentRuntime, Notifier, NullNotifier, UsageLogStore};
use crate::infrastructure::backlog::{JsonlUsageLogStore, NullAgentRuntime};
use crate::infrastructure::slack::{format as slack_format, SlackNotifier};
use crate::services::approval_gate::TaskApprovalGate;
use crate::services::capacity::CapacityTracker;
use crate::services::circuit_breaker::CircuitBreaker;
use crate::services::db_health::{DbHealthMonitor, HealthProbe};
use crate::services::event_bus::{EventBus, EventKind, EventPayload};
use crate::services::orchestrator::{KernelConfig, Orchestrator};
use crate::services::preflight::{AutoConfirmer, Confirmer, PreFlightChecker};
use crate::services::productivity::ProductivityMonitor;
use crate::services::scheduler::BacklogScheduler;
use crate::services::spend_monitor::{SpendMonitor, AlertCallback};
use crate::services::state_store::StateStore;

use super::build_repository;

/// Confirmer reading an explicit y/N from the terminal.
struct StdinConfirmer;

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, summary: &str) -> bool {
        println!("{summary}");
        println!("Proceed? [y/N]");
        let mut line = String::new();
        let mut reader = tokio::io::BufReader::new(tokio::io::stdin());
        match reader.read_line(&mut line).await {
            Ok(_) => matches!(line.trim().to_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}

pub async fn handle_start(config: Config) -> Result<()> {
    let bus = Arc::new(EventBus::with_defaults());
    let runtime_dir = config.orchestrator.runtime_dir.clone();
    let channel = config.slack.channel_id.clone();

    let capacity = Arc::new(
        CapacityTracker::new(config.orchestrator.model_limits.clone())
            .with_total_limit(config.orchestrator.max_concurrent_agents)
            .with_event_bus(bus.clone()),
    );
    let repo = build_repository(&config);
    let runtime: Arc<dyn AgentRuntime> = Arc::new(NullAgentRuntime);
    let notifier: Arc<dyn Notifier> = match (&config.slack.bot_token, &channel) {
        (Some(token), Some(chan)) => Arc::new(SlackNotifier::new(token.clone(), chan.clone())),
        _ => Arc::new(NullNotifier),
    };
    let usage_log: Arc<dyn UsageLogStore> =
        Arc::new(JsonlUsageLogStore::new(runtime_dir.join("usage.jsonl")));

    // Circuit breaker: the trip lands on the bus as `system:error`; the
    // subscription below turns it into a rich channel notice.
    let breaker = Arc::new(
        CircuitBreaker::new(config.breaker.clone()).with_event_bus(bus.clone()),
    );
    if let Some(ref trip_channel) = channel {
        let trip_bus = bus.clone();
        let trip_notifier = notifier.clone();
        let trip_breaker = breaker.clone();
        let trip_channel = trip_channel.clone();
        bus.subscribe(EventKind::SystemError, move |event| {
            let EventPayload::SystemError { ref component, .. } = event.payload else {
                return Ok(());
            };
            if component != "circuit-breaker" {
                return Ok(());
            }
            let text = slack_format::breaker_tripped(&trip_breaker.snapshot());
            let notifier = trip_notifier.clone();
            let channel = trip_channel.clone();
            trip_bus.spawn_guarded("notifier", event.correlation_id, async move {
                notifier
                    .send_message(&channel, &text, None)
                    .await
                    .map(|_| ())
                    .map_err(anyhow::Error::from)
            });
            Ok(())
        });
    }

    // Spend monitor: threshold alerts go out through the notifier.
    let alert_bus = bus.clone();
    let alert_notifier = notifier.clone();
    let alert_channel = channel.clone();
    let on_alert: AlertCallback = Arc::new(move |alert| {
        let Some(channel) = alert_channel.clone() else { return };
        let notifier = alert_notifier.clone();
        let text = slack_format::budget_alert(&alert);
        alert_bus.spawn_guarded("notifier", None, async move {
            notifier
                .send_message(&channel, &text, None)
                .await
                .map(|_| ())
                .map_err(anyhow::Error::from)
        });
    });
    let spend = Arc::new(SpendMonitor::new(config.budget.clone()).with_on_alert(on_alert));

    // Productivity alerts share the same outbound path.
    let productivity_bus = bus.clone();
    let productivity_notifier = notifier.clone();
    let productivity_channel = channel.clone();
    let productivity = Arc::new(ProductivityMonitor::new(config.productivity.clone()).with_on_alert(
        Arc::new(move |alert| {
            let Some(channel) = productivity_channel.clone() else { return };
            let notifier = productivity_notifier.clone();
            let text = slack_format::productivity_alert(&alert);
            productivity_bus.spawn_guarded("notifier", None, async move {
                notifier
                    .send_message(&channel, &text, None)
                    .await
                    .map(|_| ())
                    .map_err(anyhow::Error::from)
            });
        }),
    ));

    // DB health: probe through the backlog repository.
    let probe_repo = repo.clone();
    let probe: HealthProbe = Arc::new(move || {
        let repo = probe_repo.clone();
        Box::pin(async move { repo.health_probe().await.map_err(anyhow::Error::from) })
    });
    let db_health = Arc::new(
        DbHealthMonitor::new(config.database.max_consecutive_failures)
            .with_probe(probe)
            .with_event_bus(bus.clone()),
    );

    // Degraded-mode transitions go out through the notifier too.
    wire_db_notifications(&bus, notifier.clone(), channel.clone());

    let approval = Arc::new(
        TaskApprovalGate::new(config.approval.clone(), notifier.clone())
            .with_repository(repo.clone())
            .with_event_bus(bus.clone()),
    );

    let scheduler = Arc::new(
        BacklogScheduler::new(repo.clone(), runtime.clone(), capacity).with_event_bus(bus.clone()),
    );

    let kernel_config = KernelConfig {
        poll_interval_ms: config.orchestrator.poll_interval_ms,
        graceful_shutdown_timeout_ms: config.orchestrator.graceful_shutdown_timeout_ms,
        check_in_interval_ms: config.orchestrator.check_in_interval_ms,
        probe_db_on_startup: config.database.probe_on_startup,
        channel: channel.clone(),
        project_hint: None,
    };

    let mut orchestrator = Orchestrator::new(
        kernel_config,
        bus.clone(),
        scheduler,
        runtime,
        repo.clone(),
        notifier,
        usage_log,
        breaker,
        spend,
        productivity,
        db_health,
        approval,
        StateStore::new(runtime_dir),
    );
    if config.preflight.enabled {
        let checker = PreFlightChecker::new(
            config.preflight.clone(),
            config.orchestrator.model_limits.clone(),
            repo,
        );
        let confirmer: Arc<dyn Confirmer> = if config.preflight.require_confirmation {
            Arc::new(StdinConfirmer)
        } else {
            Arc::new(AutoConfirmer)
        };
        orchestrator = orchestrator.with_preflight(checker, confirmer);
    }

    println!(
        "TrafficControl starting (poll every {}ms, limits: {:?})",
        config.orchestrator.poll_interval_ms, config.orchestrator.model_limits,
    );
    Arc::new(orchestrator).run().await?;
    Ok(())
}

/// Forward `database:degraded` / `database:recovered` to the channel.
fn wire_db_notifications(
    bus: &Arc<EventBus>,
    notifier: Arc<dyn Notifier>,
    channel: Option<String>,
) {
    let Some(channel) = channel else { return };

    let degraded_bus = bus.clone();
    let degraded_notifier = notifier.clone();
    let degraded_channel = channel.clone();
    bus.subscribe(EventKind::DatabaseDegraded, move |event| {
        if let EventPayload::DatabaseDegraded { consecutive_failures, ref last_error } =
            event.payload
        {
            let text = slack_format::database_degraded(consecutive_failures, last_error);
            let notifier = degraded_notifier.clone();
            let channel = degraded_channel.clone();
            degraded_bus.spawn_guarded("notifier", event.correlation_id, async move {
                notifier
                    .send_message(&channel, &text, None)
                    .await
                    .map(|_| ())
                    .map_err(anyhow::Error::from)
            });
        }
        Ok(())
    });

    let recovered_bus = bus.clone();
    bus.subscribe(EventKind::DatabaseRecovered, move |event| {
        if let EventPayload::DatabaseRecovered { downtime_ms } = event.payload {
            let text = slack_format::database_recovered(downtime_ms);
            let notifier = notifier.clone();
            let channel = channel.clone();
            recovered_bus.spawn_guarded("notifier", event.correlation_id, async move {
                notifier
                    .send_message(&channel, &text, None)
                    .await
                    .map(|_| ())
                    .map_err(anyhow::Error::from)
            });
        }
        Ok(())
    });
}
