//! Configuration tree for the orchestrator, loaded via figment.
//!
//! Every field has a serde default so partial YAML files and env
//! overrides merge cleanly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub productivity: ProductivityConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub preflight: PreFlightConfig,
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Kernel loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Total concurrent agents across all tiers.
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: usize,

    /// Control loop tick interval.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Grace window for draining active agents on stop.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub graceful_shutdown_timeout_ms: u64,

    /// Optional periodic status check-in interval (disabled when None).
    #[serde(default)]
    pub check_in_interval_ms: Option<u64>,

    /// Per-model session limits ("opus" / "sonnet" / "haiku").
    #[serde(default = "default_model_limits")]
    pub model_limits: HashMap<String, usize>,

    /// Directory for the state file and pid file.
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,

    /// Path to the learnings archive consumed by the learning provider.
    #[serde(default)]
    pub learnings_path: Option<PathBuf>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_agents: default_max_concurrent_agents(),
            poll_interval_ms: default_poll_interval_ms(),
            graceful_shutdown_timeout_ms: default_shutdown_timeout_ms(),
            check_in_interval_ms: None,
            model_limits: default_model_limits(),
            runtime_dir: default_runtime_dir(),
            learnings_path: None,
        }
    }
}

/// Spend monitor thresholds and hard-stop behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_daily_budget")]
    pub daily_budget_usd: f64,

    #[serde(default = "default_weekly_budget")]
    pub weekly_budget_usd: f64,

    /// Pause the kernel when a window budget is reached.
    #[serde(default = "default_true")]
    pub hard_stop_at_limit: bool,

    /// Fractions of budget at which alerts fire, ascending.
    #[serde(default = "default_alert_thresholds")]
    pub alert_thresholds: Vec<f64>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_budget_usd: default_daily_budget(),
            weekly_budget_usd: default_weekly_budget(),
            hard_stop_at_limit: true,
            alert_thresholds: default_alert_thresholds(),
        }
    }
}

/// Circuit breaker trip conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_max_consecutive_agent_errors")]
    pub max_consecutive_agent_errors: u32,

    /// Error rate over the rolling window that trips the breaker.
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,

    /// Rolling outcome window size; the rate check only applies once full.
    #[serde(default = "default_outcome_window")]
    pub outcome_window: usize,

    /// Absolute spend at which the breaker trips regardless of windows.
    #[serde(default = "default_hard_budget_limit")]
    pub hard_budget_limit_usd: f64,

    /// Tokens consumed without meaningful output that trip the breaker.
    #[serde(default = "default_token_limit_without_output")]
    pub token_limit_without_output: u64,

    /// Cooldown before an open breaker allows a half-open probe.
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_agent_errors: default_max_consecutive_agent_errors(),
            error_rate_threshold: default_error_rate_threshold(),
            outcome_window: default_outcome_window(),
            hard_budget_limit_usd: default_hard_budget_limit(),
            token_limit_without_output: default_token_limit_without_output(),
            open_timeout_ms: default_open_timeout_ms(),
        }
    }
}

/// Productivity monitor thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductivityConfig {
    /// Tokens without meaningful output before a warning.
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold_tokens: u64,

    /// Tokens without meaningful output before critical; defaults to
    /// twice the warning threshold when absent.
    #[serde(default)]
    pub critical_threshold_tokens: Option<u64>,

    /// Minimum interval between repeated alerts for the same agent.
    #[serde(default = "default_alert_cooldown_ms")]
    pub alert_cooldown_ms: u64,

    /// Pause an agent when it crosses the critical threshold.
    #[serde(default = "default_true")]
    pub auto_pause_on_critical: bool,
}

impl ProductivityConfig {
    pub fn critical_threshold(&self) -> u64 {
        self.critical_threshold_tokens
            .unwrap_or(self.warning_threshold_tokens * 2)
    }
}

impl Default for ProductivityConfig {
    fn default() -> Self {
        Self {
            warning_threshold_tokens: default_warning_threshold(),
            critical_threshold_tokens: None,
            alert_cooldown_ms: default_alert_cooldown_ms(),
            auto_pause_on_critical: true,
        }
    }
}

/// Backlog database connection and health settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    /// Backlog REST endpoint; in-memory store is used when absent.
    #[serde(default)]
    pub url: Option<String>,

    /// Service key for the backlog endpoint.
    #[serde(default)]
    pub service_key: Option<String>,

    /// Probe the database during startup and abort on permanent failure.
    #[serde(default = "default_true")]
    pub probe_on_startup: bool,

    /// Consecutive DB failures before entering degraded mode.
    #[serde(default = "default_max_db_failures")]
    pub max_consecutive_failures: u32,
}

/// Task approval gate policy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApprovalConfig {
    /// Master switch for the gate.
    #[serde(default)]
    pub enable_task_approval: bool,

    /// Require approval for every task, confirmed or not.
    #[serde(default)]
    pub require_approval_for_all: bool,

    /// Blanket exemption: when set, tasks are dispatched without
    /// approval whether or not their priority was confirmed.
    #[serde(default)]
    pub auto_approve_confirmed: bool,
}

/// Pre-flight checker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreFlightConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Require an explicit human go/no-go before the loop starts.
    #[serde(default)]
    pub require_confirmation: bool,

    /// How long to wait for the confirmation; timeout counts as rejection.
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,

    /// Queue depth above which a warning is raised.
    #[serde(default = "default_queue_depth_warning")]
    pub queue_depth_warning: usize,
}

impl Default for PreFlightConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            require_confirmation: false,
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            queue_depth_warning: default_queue_depth_warning(),
        }
    }
}

/// Slack transport settings; notifier falls back to logging when unset.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SlackConfig {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub signing_secret: Option<String>,
    #[serde(default)]
    pub app_token: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty).
    #[serde(default = "default_log_format")]
    pub format: LogFormat,

    /// Directory for log files; stdout only when None.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub enable_stdout: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            enable_stdout: true,
        }
    }
}

fn default_max_concurrent_agents() -> usize {
    5
}

fn default_poll_interval_ms() -> u64 {
    15_000
}

fn default_shutdown_timeout_ms() -> u64 {
    60_000
}

fn default_model_limits() -> HashMap<String, usize> {
    HashMap::from([
        ("opus".to_string(), 1),
        ("sonnet".to_string(), 3),
        ("haiku".to_string(), 5),
    ])
}

fn default_runtime_dir() -> PathBuf {
    PathBuf::from(".trafficcontrol")
}

fn default_daily_budget() -> f64 {
    50.0
}

fn default_weekly_budget() -> f64 {
    250.0
}

fn default_alert_thresholds() -> Vec<f64> {
    vec![0.5, 0.8, 1.0]
}

fn default_max_consecutive_agent_errors() -> u32 {
    3
}

fn default_error_rate_threshold() -> f64 {
    0.5
}

fn default_outcome_window() -> usize {
    10
}

fn default_hard_budget_limit() -> f64 {
    500.0
}

fn default_token_limit_without_output() -> u64 {
    500_000
}

fn default_open_timeout_ms() -> u64 {
    300_000
}

fn default_warning_threshold() -> u64 {
    50_000
}

fn default_alert_cooldown_ms() -> u64 {
    600_000
}

fn default_max_db_failures() -> u32 {
    3
}

fn default_confirmation_timeout_secs() -> u64 {
    120
}

fn default_queue_depth_warning() -> usize {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_true() -> bool {
    true
}
