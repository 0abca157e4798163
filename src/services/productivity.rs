//! Productivity monitoring: token burn without meaningful output, and
//! per-task outcome statistics.
//!
//! Meaningful output is an agent-reported artifact (file modified,
//! passing test, commit, completed task). Failing test runs and bare
//! tool calls do not count; they are tallied but do not reset the
//! tokens-without-output counter.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::domain::models::config::ProductivityConfig;

/// Artifact classes reported by agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    FileModified,
    TestRun { passed: bool },
    CommitCreated,
    TaskCompleted,
    ToolCall,
}

impl OutputKind {
    /// Whether this artifact resets the tokens-without-output counter.
    fn is_meaningful(&self) -> bool {
        match self {
            Self::FileModified | Self::CommitCreated | Self::TaskCompleted => true,
            Self::TestRun { passed } => *passed,
            Self::ToolCall => false,
        }
    }
}

/// Per-agent artifact tallies.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct OutputCounts {
    pub files_modified: u64,
    pub tests_run: u64,
    pub tests_passed: u64,
    pub commits_created: u64,
    pub tasks_completed: u64,
    pub tool_calls: u64,
}

/// Alert severity for an unproductive agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Critical,
}

/// Raised when an agent burns tokens without producing output.
#[derive(Debug, Clone, Serialize)]
pub struct ProductivityAlert {
    pub session_id: String,
    pub level: AlertLevel,
    pub tokens_without_output: u64,
    /// Whether the monitor wants the agent paused.
    pub pause_requested: bool,
}

pub type ProductivityAlertCallback = Arc<dyn Fn(ProductivityAlert) + Send + Sync>;

/// Terminal outcome of one task execution.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task_id: Uuid,
    pub model: String,
    pub success: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default)]
struct AgentProductivity {
    tokens_consumed: u64,
    tokens_without_output: u64,
    output_counts: OutputCounts,
    last_output_at: Option<DateTime<Utc>>,
    warning_issued_at: Option<DateTime<Utc>>,
    critical_issued_at: Option<DateTime<Utc>>,
    last_alert_at: Option<DateTime<Utc>>,
    paused: bool,
}

/// Deep-copied per-agent view.
#[derive(Debug, Clone, Serialize)]
pub struct AgentProductivitySnapshot {
    pub session_id: String,
    pub tokens_consumed: u64,
    pub tokens_without_output: u64,
    pub output_counts: OutputCounts,
    pub last_output_at: Option<DateTime<Utc>>,
    pub paused: bool,
}

/// Deep-copied aggregate view.
#[derive(Debug, Clone, Serialize)]
pub struct ProductivitySnapshot {
    pub agents: Vec<AgentProductivitySnapshot>,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub healthy_streak: u32,
    pub success_rate: f64,
}

struct Inner {
    agents: HashMap<String, AgentProductivity>,
    outcomes: Vec<TaskOutcome>,
    successes: u64,
    failures: u64,
    consecutive_failures: u32,
    healthy_streak: u32,
}

/// The productivity monitor service.
pub struct ProductivityMonitor {
    config: ProductivityConfig,
    inner: Mutex<Inner>,
    on_alert: Option<ProductivityAlertCallback>,
}

impl ProductivityMonitor {
    pub fn new(config: ProductivityConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                agents: HashMap::new(),
                outcomes: Vec::new(),
                successes: 0,
                failures: 0,
                consecutive_failures: 0,
                healthy_streak: 0,
            }),
            on_alert: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ProductivityConfig::default())
    }

    pub fn with_on_alert(mut self, callback: ProductivityAlertCallback) -> Self {
        self.on_alert = Some(callback);
        self
    }

    /// Record tokens consumed by an agent; may raise a warning or
    /// critical alert (debounced by the configured cooldown).
    pub fn record_tokens(&self, session_id: &str, tokens: u64) -> Option<ProductivityAlert> {
        self.record_tokens_at(Utc::now(), session_id, tokens)
    }

    pub(crate) fn record_tokens_at(
        &self,
        now: DateTime<Utc>,
        session_id: &str,
        tokens: u64,
    ) -> Option<ProductivityAlert> {
        let alert = {
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let agent = inner.agents.entry(session_id.to_string()).or_default();
            agent.tokens_consumed += tokens;
            agent.tokens_without_output += tokens;

            let cooldown = Duration::milliseconds(self.config.alert_cooldown_ms as i64);
            let cooled = agent
                .last_alert_at
                .is_none_or(|at| now - at >= cooldown);

            let critical = self.config.critical_threshold();
            if agent.tokens_without_output >= critical
                && agent.critical_issued_at.is_none()
                && cooled
            {
                agent.critical_issued_at = Some(now);
                agent.last_alert_at = Some(now);
                if self.config.auto_pause_on_critical {
                    agent.paused = true;
                }
                Some(ProductivityAlert {
                    session_id: session_id.to_string(),
                    level: AlertLevel::Critical,
                    tokens_without_output: agent.tokens_without_output,
                    pause_requested: self.config.auto_pause_on_critical,
                })
            } else if agent.tokens_without_output >= self.config.warning_threshold_tokens
                && agent.warning_issued_at.is_none()
                && cooled
            {
                agent.warning_issued_at = Some(now);
                agent.last_alert_at = Some(now);
                Some(ProductivityAlert {
                    session_id: session_id.to_string(),
                    level: AlertLevel::Warning,
                    tokens_without_output: agent.tokens_without_output,
                    pause_requested: false,
                })
            } else {
                None
            }
        };

        if let Some(ref alert) = alert {
            tracing::warn!(
                session_id = %alert.session_id,
                tokens = alert.tokens_without_output,
                level = ?alert.level,
                "agent burning tokens without output"
            );
            if let Some(ref callback) = self.on_alert {
                callback(alert.clone());
            }
        }
        alert
    }

    /// Record an agent-reported artifact. Meaningful output resets the
    /// tokens-without-output counter and clears warning/critical state.
    pub fn record_output(&self, session_id: &str, kind: OutputKind) {
        self.record_output_at(Utc::now(), session_id, kind);
    }

    pub(crate) fn record_output_at(&self, now: DateTime<Utc>, session_id: &str, kind: OutputKind) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let agent = inner.agents.entry(session_id.to_string()).or_default();
        match kind {
            OutputKind::FileModified => agent.output_counts.files_modified += 1,
            OutputKind::TestRun { passed } => {
                agent.output_counts.tests_run += 1;
                if passed {
                    agent.output_counts.tests_passed += 1;
                }
            }
            OutputKind::CommitCreated => agent.output_counts.commits_created += 1,
            OutputKind::TaskCompleted => agent.output_counts.tasks_completed += 1,
            OutputKind::ToolCall => agent.output_counts.tool_calls += 1,
        }
        if kind.is_meaningful() {
            agent.tokens_without_output = 0;
            agent.last_output_at = Some(now);
            agent.warning_issued_at = None;
            agent.critical_issued_at = None;
        }
    }

    /// Record the terminal outcome of an agent's task and retire the
    /// per-agent counters.
    pub fn record_agent_completion(
        &self,
        session_id: &str,
        task_id: Uuid,
        model: &str,
        success: bool,
        duration_ms: u64,
        error_message: Option<&str>,
    ) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.outcomes.push(TaskOutcome {
            task_id,
            model: model.to_string(),
            success,
            duration_ms,
        });
        if success {
            inner.successes += 1;
            inner.healthy_streak += 1;
            inner.consecutive_failures = 0;
        } else {
            inner.failures += 1;
            inner.healthy_streak = 0;
            inner.consecutive_failures += 1;
            if let Some(message) = error_message {
                tracing::warn!(session_id = %session_id, task_id = %task_id, "task failed: {}", message);
            }
        }
        inner.agents.remove(session_id);
    }

    /// Consecutive failures across all agents, for the kernel's breaker.
    pub fn consecutive_failures(&self) -> u32 {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.consecutive_failures
    }

    /// The highest tokens-without-output watermark among live agents.
    pub fn max_tokens_without_output(&self) -> u64 {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner
            .agents
            .values()
            .map(|a| a.tokens_without_output)
            .max()
            .unwrap_or(0)
    }

    /// Deep-copied snapshot of all counters.
    pub fn snapshot(&self) -> ProductivitySnapshot {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut agents: Vec<AgentProductivitySnapshot> = inner
            .agents
            .iter()
            .map(|(session_id, a)| AgentProductivitySnapshot {
                session_id: session_id.clone(),
                tokens_consumed: a.tokens_consumed,
                tokens_without_output: a.tokens_without_output,
                output_counts: a.output_counts,
                last_output_at: a.last_output_at,
                paused: a.paused,
            })
            .collect();
        agents.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        let total = inner.successes + inner.failures;
        ProductivitySnapshot {
            agents,
            successes: inner.successes,
            failures: inner.failures,
            consecutive_failures: inner.consecutive_failures,
            healthy_streak: inner.healthy_streak,
            success_rate: if total == 0 {
                1.0
            } else {
                inner.successes as f64 / total as f64
            },
        }
    }

    /// Multi-line summary for Slack check-ins.
    pub fn format_for_slack(&self) -> String {
        let s = self.snapshot();
        let mut out = format!(
            "*Productivity*\nCompleted: {} ok / {} failed ({:.0}% success)\nHealthy streak: {}, consecutive failures: {}",
            s.successes,
            s.failures,
            s.success_rate * 100.0,
            s.healthy_streak,
            s.consecutive_failures,
        );
        for agent in &s.agents {
            if agent.tokens_without_output > 0 {
                out.push_str(&format!(
                    "\n  {}: {} tokens since last output{}",
                    agent.session_id,
                    agent.tokens_without_output,
                    if agent.paused { " (paused)" } else { "" },
                ));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(warning: u64) -> ProductivityConfig {
        ProductivityConfig {
            warning_threshold_tokens: warning,
            critical_threshold_tokens: None,
            alert_cooldown_ms: 0,
            auto_pause_on_critical: true,
        }
    }

    #[test]
    fn test_warning_then_critical() {
        let m = ProductivityMonitor::new(config(100));
        assert!(m.record_tokens("s1", 50).is_none());
        let warning = m.record_tokens("s1", 60).unwrap();
        assert_eq!(warning.level, AlertLevel::Warning);
        assert!(!warning.pause_requested);

        let critical = m.record_tokens("s1", 100).unwrap();
        assert_eq!(critical.level, AlertLevel::Critical);
        assert!(critical.pause_requested);
        assert!(m.snapshot().agents[0].paused);
    }

    #[test]
    fn test_meaningful_output_resets_counter_and_state() {
        let m = ProductivityMonitor::new(config(100));
        m.record_tokens("s1", 150);
        m.record_output("s1", OutputKind::FileModified);

        let snapshot = m.snapshot();
        assert_eq!(snapshot.agents[0].tokens_without_output, 0);
        assert_eq!(snapshot.agents[0].output_counts.files_modified, 1);

        // Warning state cleared: the next crossing alerts again.
        let alert = m.record_tokens("s1", 150).unwrap();
        assert_eq!(alert.level, AlertLevel::Warning);
    }

    #[test]
    fn test_failing_tests_do_not_reset_counter() {
        let m = ProductivityMonitor::new(config(100));
        m.record_tokens("s1", 80);
        m.record_output("s1", OutputKind::TestRun { passed: false });
        m.record_output("s1", OutputKind::ToolCall);

        let snapshot = m.snapshot();
        assert_eq!(snapshot.agents[0].tokens_without_output, 80);
        assert_eq!(snapshot.agents[0].output_counts.tests_run, 1);
        assert_eq!(snapshot.agents[0].output_counts.tests_passed, 0);

        m.record_output("s1", OutputKind::TestRun { passed: true });
        assert_eq!(m.snapshot().agents[0].tokens_without_output, 0);
    }

    #[test]
    fn test_alert_cooldown_debounces() {
        let m = ProductivityMonitor::new(ProductivityConfig {
            alert_cooldown_ms: 60_000,
            ..config(100)
        });
        let t0 = Utc::now();
        assert!(m.record_tokens_at(t0, "s1", 150).is_some());
        // Critical threshold reached, but the cooldown holds it back.
        assert!(m.record_tokens_at(t0 + Duration::seconds(1), "s1", 100).is_none());
        // After the cooldown the critical alert fires.
        assert!(m.record_tokens_at(t0 + Duration::seconds(61), "s1", 1).is_some());
    }

    #[test]
    fn test_completion_statistics_and_streaks() {
        let m = ProductivityMonitor::with_defaults();
        m.record_agent_completion("s1", Uuid::new_v4(), "sonnet", true, 1000, None);
        m.record_agent_completion("s2", Uuid::new_v4(), "sonnet", true, 1000, None);
        m.record_agent_completion("s3", Uuid::new_v4(), "opus", false, 500, Some("boom"));

        let s = m.snapshot();
        assert_eq!(s.successes, 2);
        assert_eq!(s.failures, 1);
        assert_eq!(s.consecutive_failures, 1);
        assert_eq!(s.healthy_streak, 0);

        m.record_agent_completion("s4", Uuid::new_v4(), "haiku", true, 100, None);
        let s = m.snapshot();
        assert_eq!(s.consecutive_failures, 0);
        assert_eq!(s.healthy_streak, 1);
    }

    #[test]
    fn test_completion_retires_agent_counters() {
        let m = ProductivityMonitor::new(config(100));
        m.record_tokens("s1", 50);
        m.record_agent_completion("s1", Uuid::new_v4(), "sonnet", true, 10, None);
        assert!(m.snapshot().agents.is_empty());
        assert_eq!(m.max_tokens_without_output(), 0);
    }

    #[test]
    fn test_watermark_tracks_worst_agent() {
        let m = ProductivityMonitor::new(config(1_000_000));
        m.record_tokens("s1", 10);
        m.record_tokens("s2", 500);
        assert_eq!(m.max_tokens_without_output(), 500);
    }

    #[test]
    fn test_format_for_slack_lists_unproductive_agents() {
        let m = ProductivityMonitor::new(config(1_000_000));
        m.record_tokens("s1", 500);
        let text = m.format_for_slack();
        assert!(text.contains("Productivity"));
        assert!(text.contains("s1: 500 tokens"));
    }
}
