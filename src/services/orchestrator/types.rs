//! Public configuration, phase, and statistics types for the kernel.

use serde::Serialize;
use uuid::Uuid;

use crate::services::capacity::TierCapacity;
use crate::services::circuit_breaker::BreakerSnapshot;
use crate::services::db_health::DbHealthSnapshot;
use crate::services::productivity::ProductivitySnapshot;
use crate::services::spend_monitor::SpendSnapshot;

/// Kernel loop configuration, derived from the loaded [`Config`]
/// (`crate::domain::models::Config`) by the CLI wiring.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub poll_interval_ms: u64,
    pub graceful_shutdown_timeout_ms: u64,
    /// Optional periodic status check-in; disabled when None.
    pub check_in_interval_ms: Option<u64>,
    /// Probe the backlog database during startup and abort on permanent
    /// failure.
    pub probe_db_on_startup: bool,
    /// Notification channel for pause/resume/check-in messages.
    pub channel: Option<String>,
    /// Restrict scheduling to one project.
    pub project_hint: Option<Uuid>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 15_000,
            graceful_shutdown_timeout_ms: 60_000,
            check_in_interval_ms: None,
            probe_db_on_startup: true,
            channel: None,
            project_hint: None,
        }
    }
}

/// Kernel state machine phase.
///
/// `stopped → starting → running ⇄ paused → stopping → stopped`; the
/// degraded sub-state lives in the DB health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelPhase {
    Stopped,
    Starting,
    Running,
    Paused,
    Stopping,
}

impl KernelPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for KernelPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Deep-copied aggregate view of the kernel and its monitors.
#[derive(Debug, Clone, Serialize)]
pub struct KernelStats {
    pub phase: KernelPhase,
    pub degraded: bool,
    pub active_agents: usize,
    pub ticks: u64,
    pub capacity: Vec<(String, TierCapacity)>,
    pub spend: SpendSnapshot,
    pub breaker: BreakerSnapshot,
    pub productivity: ProductivitySnapshot,
    pub db_health: DbHealthSnapshot,
}
