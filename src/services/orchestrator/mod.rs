//! The orchestration kernel: a single long-lived control loop over the
//! scheduler, the agent runtime, and the safety subsystems.
//!
//! The kernel runs as one logical actor. Ticks and agent-event ingestion
//! are serialized on the same `select!` loop, so monitor ledgers and the
//! capacity ledger are only ever mutated from one task at a time.
//!
//! - **types**: Public configuration, phase, and statistics types
//! - **lifecycle**: Start sequence, run loop, graceful stop, pause/resume
//! - **tick**: The per-interval admission chain and scheduling pass
//! - **event_handling**: Agent lifecycle routing and monitor feeds

pub mod types;
mod event_handling;
mod lifecycle;
mod tick;

pub use types::{KernelConfig, KernelPhase, KernelStats};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};

use crate::domain::models::{AgentEvent, AgentRecord, OrchestrationState};
use crate::domain::ports::{
    AgentRuntime, Notifier, RetrospectiveTrigger, TaskRepository, UsageLogStore,
};
use crate::services::approval_gate::TaskApprovalGate;
use crate::services::circuit_breaker::CircuitBreaker;
use crate::services::db_health::DbHealthMonitor;
use crate::services::event_bus::EventBus;
use crate::services::preflight::{Confirmer, PreFlightChecker};
use crate::services::productivity::ProductivityMonitor;
use crate::services::scheduler::Scheduler;
use crate::services::spend_monitor::SpendMonitor;
use crate::services::state_store::StateStore;

/// Global agent-event handler; errors are isolated per handler.
pub type GlobalAgentHandler = Arc<dyn Fn(&AgentEvent) -> Result<(), anyhow::Error> + Send + Sync>;

const AGENT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// The orchestration kernel.
pub struct Orchestrator {
    pub(super) config: KernelConfig,
    pub(super) bus: Arc<EventBus>,
    pub(super) scheduler: Arc<dyn Scheduler>,
    pub(super) runtime: Arc<dyn AgentRuntime>,
    pub(super) repo: Arc<dyn TaskRepository>,
    pub(super) notifier: Arc<dyn Notifier>,
    pub(super) usage_log: Arc<dyn UsageLogStore>,
    pub(super) retrospective: Option<Arc<dyn RetrospectiveTrigger>>,

    pub(super) breaker: Arc<CircuitBreaker>,
    pub(super) spend: Arc<SpendMonitor>,
    pub(super) productivity: Arc<ProductivityMonitor>,
    pub(super) db_health: Arc<DbHealthMonitor>,
    pub(super) approval: Arc<TaskApprovalGate>,
    pub(super) state_store: StateStore,
    pub(super) preflight: Option<(PreFlightChecker, Arc<dyn Confirmer>)>,

    pub(super) phase: RwLock<KernelPhase>,
    pub(super) shutting_down: AtomicBool,
    /// Whether the current pause was forced by the spend monitor.
    pub(super) spend_paused: AtomicBool,
    pub(super) agents: RwLock<HashMap<String, AgentRecord>>,
    pub(super) tick_count: AtomicU64,
    pub(super) global_handlers: RwLock<Vec<GlobalAgentHandler>>,

    pub(super) agent_tx: mpsc::Sender<AgentEvent>,
    pub(super) agent_rx: Mutex<Option<mpsc::Receiver<AgentEvent>>>,
    pub(super) shutdown_tx: watch::Sender<bool>,
}

#[allow(clippy::too_many_arguments)]
impl Orchestrator {
    pub fn new(
        config: KernelConfig,
        bus: Arc<EventBus>,
        scheduler: Arc<dyn Scheduler>,
        runtime: Arc<dyn AgentRuntime>,
        repo: Arc<dyn TaskRepository>,
        notifier: Arc<dyn Notifier>,
        usage_log: Arc<dyn UsageLogStore>,
        breaker: Arc<CircuitBreaker>,
        spend: Arc<SpendMonitor>,
        productivity: Arc<ProductivityMonitor>,
        db_health: Arc<DbHealthMonitor>,
        approval: Arc<TaskApprovalGate>,
        state_store: StateStore,
    ) -> Self {
        let (agent_tx, agent_rx) = mpsc::channel(AGENT_EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            bus,
            scheduler,
            runtime,
            repo,
            notifier,
            usage_log,
            retrospective: None,
            breaker,
            spend,
            productivity,
            db_health,
            approval,
            state_store,
            preflight: None,
            phase: RwLock::new(KernelPhase::Stopped),
            shutting_down: AtomicBool::new(false),
            spend_paused: AtomicBool::new(false),
            agents: RwLock::new(HashMap::new()),
            tick_count: AtomicU64::new(0),
            global_handlers: RwLock::new(Vec::new()),
            agent_tx,
            agent_rx: Mutex::new(Some(agent_rx)),
            shutdown_tx,
        }
    }

    pub fn with_retrospective(mut self, trigger: Arc<dyn RetrospectiveTrigger>) -> Self {
        self.retrospective = Some(trigger);
        self
    }

    pub fn with_preflight(
        mut self,
        checker: PreFlightChecker,
        confirmer: Arc<dyn Confirmer>,
    ) -> Self {
        self.preflight = Some((checker, confirmer));
        self
    }

    /// Sender handed to the agent runtime for lifecycle events.
    pub fn agent_event_sender(&self) -> mpsc::Sender<AgentEvent> {
        self.agent_tx.clone()
    }

    /// The bus this kernel publishes on.
    pub fn event_bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub async fn phase(&self) -> KernelPhase {
        *self.phase.read().await
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Number of ticks executed so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::Relaxed)
    }

    /// Snapshot of the tracked agent set.
    pub async fn active_agents(&self) -> Vec<AgentRecord> {
        let agents = self.agents.read().await;
        let mut records: Vec<AgentRecord> = agents.values().cloned().collect();
        records.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        records
    }

    /// Aggregate statistics across the kernel and every monitor.
    pub async fn stats(&self) -> KernelStats {
        let scheduler_stats = self.scheduler.get_stats().await;
        KernelStats {
            phase: self.phase().await,
            degraded: self.db_health.is_degraded(),
            active_agents: self.agents.read().await.len(),
            ticks: self.tick_count(),
            capacity: scheduler_stats.capacity,
            spend: self.spend.snapshot(),
            breaker: self.breaker.snapshot(),
            productivity: self.productivity.snapshot(),
            db_health: self.db_health.snapshot(),
        }
    }

    /// Register a global handler invoked for every agent event. A
    /// failing handler is logged and never affects the others.
    pub async fn add_global_handler(&self, handler: GlobalAgentHandler) {
        self.global_handlers.write().await.push(handler);
    }

    pub(super) async fn persist_state(&self) {
        let phase = self.phase().await;
        let state = OrchestrationState {
            is_running: matches!(phase, KernelPhase::Running | KernelPhase::Paused),
            is_paused: phase == KernelPhase::Paused,
            active_agents: self.active_agents().await,
            last_checkpoint: chrono::Utc::now(),
        };
        if let Err(err) = self.state_store.save(&state) {
            tracing::warn!(error = %err, "could not persist orchestration state");
        }
    }

    pub(super) async fn notify(&self, text: &str) {
        let Some(ref channel) = self.config.channel else {
            tracing::info!("{}", text);
            return;
        };
        let notifier = self.notifier.clone();
        let bus = self.bus.clone();
        let channel = channel.clone();
        let text = text.to_string();
        self.bus.spawn_guarded("notifier", None, async move {
            let message_id = notifier.send_message(&channel, &text, None).await?;
            bus.publish(crate::services::event_bus::EventPayload::SlackResponseSent {
                channel,
                message_id,
            });
            Ok(())
        });
    }
}
