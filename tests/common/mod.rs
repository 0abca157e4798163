//! Shared fakes and wiring helpers for integration tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use trafficcontrol::domain::errors::{DomainError, DomainResult};
use trafficcontrol::domain::models::config::{
    ApprovalConfig, BreakerConfig, BudgetConfig, ProductivityConfig,
};
use trafficcontrol::domain::models::{ApprovalEntry, ApprovalResponse, BacklogTask};
use trafficcontrol::domain::ports::{
    AgentRuntime, Notifier, SessionInfo, TaskFilter, TaskRepository,
};
use trafficcontrol::infrastructure::backlog::{InMemoryTaskRepository, MemoryUsageLogStore};
use trafficcontrol::services::approval_gate::TaskApprovalGate;
use trafficcontrol::services::capacity::CapacityTracker;
use trafficcontrol::services::circuit_breaker::CircuitBreaker;
use trafficcontrol::services::db_health::{DbHealthMonitor, HealthProbe};
use trafficcontrol::services::event_bus::EventBus;
use trafficcontrol::services::orchestrator::{KernelConfig, Orchestrator};
use trafficcontrol::services::scheduler::BacklogScheduler;
use trafficcontrol::services::spend_monitor::SpendMonitor;
use trafficcontrol::services::productivity::ProductivityMonitor;
use trafficcontrol::services::state_store::StateStore;

/// Scripted agent runtime: spawns deterministic session ids and lets
/// tests drop sessions or fail spawns.
#[derive(Default)]
pub struct MockAgentRuntime {
    sessions: Mutex<HashMap<String, SessionInfo>>,
    paused: Mutex<Vec<String>>,
    spawn_count: AtomicU32,
    fail_spawns: AtomicBool,
    forget_next_session: AtomicBool,
}

impl MockAgentRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn_count(&self) -> u32 {
        self.spawn_count.load(Ordering::SeqCst)
    }

    pub fn fail_spawns(&self, fail: bool) {
        self.fail_spawns.store(fail, Ordering::SeqCst);
    }

    /// The next spawned session will be unknown to lookups.
    pub fn forget_next_session(&self) {
        self.forget_next_session.store(true, Ordering::SeqCst);
    }

    pub fn paused_sessions(&self) -> Vec<String> {
        self.paused.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentRuntime for MockAgentRuntime {
    async fn spawn(&self, _task: &BacklogTask, model: &str) -> DomainResult<String> {
        if self.fail_spawns.load(Ordering::SeqCst) {
            return Err(DomainError::AgentRuntime("spawn refused by test".to_string()));
        }
        let n = self.spawn_count.fetch_add(1, Ordering::SeqCst);
        let session_id = format!("sess-{n}");
        if !self.forget_next_session.swap(false, Ordering::SeqCst) {
            self.sessions.lock().unwrap().insert(
                session_id.clone(),
                SessionInfo { session_id: session_id.clone(), model: model.to_string() },
            );
        }
        Ok(session_id)
    }

    async fn lookup_session(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    async fn pause_session(&self, session_id: &str) -> DomainResult<()> {
        self.paused.lock().unwrap().push(session_id.to_string());
        Ok(())
    }
}

/// Notifier that records everything it is asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, String)>>,
    approval_requests: Mutex<Vec<Uuid>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn messages_containing(&self, needle: &str) -> usize {
        self.messages.lock().unwrap().iter().filter(|(_, text)| text.contains(needle)).count()
    }

    pub fn approval_requests(&self) -> Vec<Uuid> {
        self.approval_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_message(
        &self,
        channel: &str,
        text: &str,
        _thread_ts: Option<&str>,
    ) -> DomainResult<String> {
        self.messages.lock().unwrap().push((channel.to_string(), text.to_string()));
        Ok(format!("msg-{}", Uuid::new_v4()))
    }

    async fn send_approval_request(
        &self,
        task: &BacklogTask,
        _message: &str,
    ) -> DomainResult<String> {
        self.approval_requests.lock().unwrap().push(task.id);
        Ok(format!("msg-{}", Uuid::new_v4()))
    }
}

/// Repository decorator that can be switched into a failing mode to
/// simulate backlog outages.
pub struct FlakyRepository {
    inner: Arc<InMemoryTaskRepository>,
    failing: AtomicBool,
}

impl FlakyRepository {
    pub fn new(inner: Arc<InMemoryTaskRepository>) -> Self {
        Self { inner, failing: AtomicBool::new(false) }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> DomainResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(DomainError::BacklogStore("ECONNREFUSED: backlog unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TaskRepository for FlakyRepository {
    async fn add_task(&self, task: &BacklogTask) -> DomainResult<()> {
        self.check()?;
        self.inner.add_task(task).await
    }

    async fn get_task(&self, id: Uuid) -> DomainResult<Option<BacklogTask>> {
        self.check()?;
        self.inner.get_task(id).await
    }

    async fn update_task(&self, task: &BacklogTask) -> DomainResult<()> {
        self.check()?;
        self.inner.update_task(task).await
    }

    async fn cancel_task(&self, id: Uuid) -> DomainResult<()> {
        self.check()?;
        self.inner.cancel_task(id).await
    }

    async fn list_tasks(&self, filter: TaskFilter) -> DomainResult<Vec<BacklogTask>> {
        self.check()?;
        self.inner.list_tasks(filter).await
    }

    async fn fetch_ready(&self, limit: usize) -> DomainResult<Vec<BacklogTask>> {
        self.check()?;
        self.inner.fetch_ready(limit).await
    }

    async fn list_projects(&self) -> DomainResult<Vec<trafficcontrol::domain::models::Project>> {
        self.check()?;
        self.inner.list_projects().await
    }

    async fn set_project_paused(&self, project_id: Uuid, paused: bool) -> DomainResult<()> {
        self.check()?;
        self.inner.set_project_paused(project_id, paused).await
    }

    async fn backlog_summary(
        &self,
    ) -> DomainResult<trafficcontrol::domain::models::BacklogSummary> {
        self.check()?;
        self.inner.backlog_summary().await
    }

    async fn record_pending_approval(&self, entry: &ApprovalEntry) -> DomainResult<()> {
        self.check()?;
        self.inner.record_pending_approval(entry).await
    }

    async fn list_approvals(&self) -> DomainResult<Vec<ApprovalEntry>> {
        self.check()?;
        self.inner.list_approvals().await
    }

    async fn submit_approval_response(&self, response: &ApprovalResponse) -> DomainResult<()> {
        self.check()?;
        self.inner.submit_approval_response(response).await
    }

    async fn take_approval_responses(&self) -> DomainResult<Vec<ApprovalResponse>> {
        self.check()?;
        self.inner.take_approval_responses().await
    }

    async fn health_probe(&self) -> DomainResult<()> {
        self.check()?;
        self.inner.health_probe().await
    }
}

/// Knobs for [`build_kernel`].
pub struct KernelOptions {
    pub budget: BudgetConfig,
    pub breaker: BreakerConfig,
    pub approval: ApprovalConfig,
    pub productivity: ProductivityConfig,
    pub model_limits: HashMap<String, usize>,
    pub max_consecutive_db_failures: u32,
    pub poll_interval_ms: u64,
    pub graceful_shutdown_timeout_ms: u64,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            budget: BudgetConfig::default(),
            breaker: BreakerConfig::default(),
            approval: ApprovalConfig::default(),
            productivity: ProductivityConfig::default(),
            model_limits: HashMap::from([
                ("opus".to_string(), 1),
                ("sonnet".to_string(), 3),
                ("haiku".to_string(), 5),
            ]),
            max_consecutive_db_failures: 3,
            poll_interval_ms: 25,
            graceful_shutdown_timeout_ms: 2_000,
        }
    }
}

/// A fully wired kernel over in-memory fakes.
pub struct TestKernel {
    pub orchestrator: Arc<Orchestrator>,
    pub backing: Arc<InMemoryTaskRepository>,
    pub repo: Arc<FlakyRepository>,
    pub runtime: Arc<MockAgentRuntime>,
    pub notifier: Arc<RecordingNotifier>,
    pub bus: Arc<EventBus>,
    pub usage_log: Arc<MemoryUsageLogStore>,
    pub breaker: Arc<CircuitBreaker>,
    pub spend: Arc<SpendMonitor>,
    pub productivity: Arc<ProductivityMonitor>,
    _dir: tempfile::TempDir,
}

pub async fn build_kernel(configure: impl FnOnce(&mut KernelOptions)) -> TestKernel {
    let mut options = KernelOptions::default();
    configure(&mut options);

    let dir = tempfile::tempdir().expect("tempdir");
    let bus = Arc::new(EventBus::with_defaults());
    let backing = Arc::new(InMemoryTaskRepository::new());
    let repo = Arc::new(FlakyRepository::new(backing.clone()));
    let repo_dyn: Arc<dyn TaskRepository> = repo.clone();
    let runtime = Arc::new(MockAgentRuntime::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let usage_log = Arc::new(MemoryUsageLogStore::new());

    let capacity =
        Arc::new(CapacityTracker::new(options.model_limits.clone()).with_event_bus(bus.clone()));
    let scheduler = Arc::new(
        BacklogScheduler::new(repo_dyn.clone(), runtime.clone(), capacity)
            .with_event_bus(bus.clone()),
    );

    let probe_repo = repo_dyn.clone();
    let probe: HealthProbe = Arc::new(move || {
        let repo = probe_repo.clone();
        Box::pin(async move { repo.health_probe().await.map_err(anyhow::Error::from) })
    });
    let db_health = Arc::new(
        DbHealthMonitor::new(options.max_consecutive_db_failures)
            .with_probe(probe)
            .with_event_bus(bus.clone()),
    );

    let approval = Arc::new(
        TaskApprovalGate::new(options.approval.clone(), notifier.clone())
            .with_repository(repo_dyn.clone())
            .with_event_bus(bus.clone()),
    );

    let kernel_config = KernelConfig {
        poll_interval_ms: options.poll_interval_ms,
        graceful_shutdown_timeout_ms: options.graceful_shutdown_timeout_ms,
        check_in_interval_ms: None,
        probe_db_on_startup: true,
        channel: Some("C0TEST".to_string()),
        project_hint: None,
    };

    let breaker = Arc::new(CircuitBreaker::new(options.breaker.clone()).with_event_bus(bus.clone()));
    let spend = Arc::new(SpendMonitor::new(options.budget.clone()));
    let productivity = Arc::new(ProductivityMonitor::new(options.productivity.clone()));

    let orchestrator = Arc::new(Orchestrator::new(
        kernel_config,
        bus.clone(),
        scheduler,
        runtime.clone(),
        repo_dyn,
        notifier.clone(),
        usage_log.clone(),
        breaker.clone(),
        spend.clone(),
        productivity.clone(),
        db_health,
        approval,
        StateStore::new(dir.path()),
    ));

    TestKernel {
        orchestrator,
        backing,
        repo,
        runtime,
        notifier,
        bus,
        usage_log,
        breaker,
        spend,
        productivity,
        _dir: dir,
    }
}

/// Poll until `predicate` holds or the timeout elapses.
pub async fn wait_until(timeout_ms: u64, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
    while std::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    predicate()
}
