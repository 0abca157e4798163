//! Spend monitoring with rolling daily and weekly budget windows.
//!
//! Every billed unit of agent work lands in an append-only ledger;
//! window totals are recomputed from the ledger so they always equal the
//! sum of entries falling in the window. Threshold alerts fire once per
//! threshold per window, and `should_stop` drives the kernel's hard
//! pause when a window budget is reached.

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::domain::models::config::BudgetConfig;
use crate::domain::models::UsageEntry;

/// Which rolling window an alert refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetWindowKind {
    Daily,
    Weekly,
}

impl BudgetWindowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }
}

impl std::fmt::Display for BudgetWindowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fired once per threshold crossing per window.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetAlert {
    pub kind: BudgetWindowKind,
    /// Fraction of budget consumed when the alert fired, in `[0, ..)`.
    pub percentage: f64,
    pub current_spend: f64,
    pub budget: f64,
}

pub type AlertCallback = Arc<dyn Fn(BudgetAlert) + Send + Sync>;

/// Deep-copied view for status and Slack surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct SpendSnapshot {
    pub total_usd: f64,
    pub daily_spend_usd: f64,
    pub weekly_spend_usd: f64,
    pub daily_budget_usd: f64,
    pub weekly_budget_usd: f64,
    pub by_model: Vec<(String, f64)>,
    pub entry_count: usize,
}

struct Inner {
    entries: Vec<UsageEntry>,
    totals_by_model: HashMap<String, f64>,
    total_usd: f64,
    /// Alert dedup keys: `<kind>:<window id>:<threshold permille>`.
    fired: HashSet<String>,
}

/// The spend monitor service.
pub struct SpendMonitor {
    config: BudgetConfig,
    inner: Mutex<Inner>,
    on_alert: Option<AlertCallback>,
}

impl SpendMonitor {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: Vec::new(),
                totals_by_model: HashMap::new(),
                total_usd: 0.0,
                fired: HashSet::new(),
            }),
            on_alert: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(BudgetConfig::default())
    }

    pub fn with_on_alert(mut self, callback: AlertCallback) -> Self {
        self.on_alert = Some(callback);
        self
    }

    /// Record one billed unit of agent work and evaluate thresholds.
    pub fn record_agent_cost(
        &self,
        session_id: &str,
        task_id: Uuid,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
    ) -> UsageEntry {
        self.record_agent_cost_at(
            Utc::now(),
            session_id,
            task_id,
            model,
            input_tokens,
            output_tokens,
            cost_usd,
        )
    }

    pub(crate) fn record_agent_cost_at(
        &self,
        now: DateTime<Utc>,
        session_id: &str,
        task_id: Uuid,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
    ) -> UsageEntry {
        let entry = UsageEntry {
            session_id: session_id.to_string(),
            task_id,
            model: model.to_string(),
            input_tokens,
            output_tokens,
            cost_usd,
            at: now,
        };

        let alerts = {
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            inner.entries.push(entry.clone());
            inner.total_usd += cost_usd;
            *inner.totals_by_model.entry(model.to_string()).or_default() += cost_usd;
            self.evaluate_thresholds(&mut inner, now)
        };

        for alert in alerts {
            tracing::warn!(
                window = %alert.kind,
                percentage = format!("{:.0}%", alert.percentage * 100.0),
                spend = alert.current_spend,
                "budget threshold crossed"
            );
            if let Some(ref callback) = self.on_alert {
                callback(alert);
            }
        }
        entry
    }

    fn evaluate_thresholds(&self, inner: &mut Inner, now: DateTime<Utc>) -> Vec<BudgetAlert> {
        let mut alerts = Vec::new();
        let windows = [
            (BudgetWindowKind::Daily, Self::daily_window_id(now), self.config.daily_budget_usd),
            (BudgetWindowKind::Weekly, Self::weekly_window_id(now), self.config.weekly_budget_usd),
        ];
        for (kind, window_id, budget) in windows {
            if budget <= 0.0 {
                continue;
            }
            let spend = Self::spend_in_window(&inner.entries, kind, now);
            for threshold in &self.config.alert_thresholds {
                if spend >= threshold * budget {
                    let key = format!(
                        "{}:{}:{}",
                        kind.as_str(),
                        window_id,
                        (threshold * 1000.0) as u64
                    );
                    if inner.fired.insert(key) {
                        alerts.push(BudgetAlert {
                            kind,
                            percentage: spend / budget,
                            current_spend: spend,
                            budget,
                        });
                    }
                }
            }
        }
        alerts
    }

    fn daily_window_id(now: DateTime<Utc>) -> String {
        now.date_naive().to_string()
    }

    fn weekly_window_id(now: DateTime<Utc>) -> String {
        let week = now.iso_week();
        format!("{}-W{:02}", week.year(), week.week())
    }

    fn spend_in_window(entries: &[UsageEntry], kind: BudgetWindowKind, now: DateTime<Utc>) -> f64 {
        entries
            .iter()
            .filter(|e| match kind {
                BudgetWindowKind::Daily => e.at.date_naive() == now.date_naive(),
                BudgetWindowKind::Weekly => e.at.iso_week() == now.iso_week(),
            })
            .map(|e| e.cost_usd)
            .sum()
    }

    /// True when a window budget is reached and hard stop is enabled.
    pub fn should_stop(&self) -> bool {
        self.should_stop_at(Utc::now())
    }

    pub(crate) fn should_stop_at(&self, now: DateTime<Utc>) -> bool {
        if !self.config.hard_stop_at_limit {
            return false;
        }
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let daily = Self::spend_in_window(&inner.entries, BudgetWindowKind::Daily, now);
        let weekly = Self::spend_in_window(&inner.entries, BudgetWindowKind::Weekly, now);
        daily >= self.config.daily_budget_usd || weekly >= self.config.weekly_budget_usd
    }

    /// Deep-copied snapshot of current totals and window spend.
    pub fn snapshot(&self) -> SpendSnapshot {
        self.snapshot_at(Utc::now())
    }

    pub(crate) fn snapshot_at(&self, now: DateTime<Utc>) -> SpendSnapshot {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut by_model: Vec<(String, f64)> =
            inner.totals_by_model.iter().map(|(m, c)| (m.clone(), *c)).collect();
        by_model.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        SpendSnapshot {
            total_usd: inner.total_usd,
            daily_spend_usd: Self::spend_in_window(&inner.entries, BudgetWindowKind::Daily, now),
            weekly_spend_usd: Self::spend_in_window(&inner.entries, BudgetWindowKind::Weekly, now),
            daily_budget_usd: self.config.daily_budget_usd,
            weekly_budget_usd: self.config.weekly_budget_usd,
            by_model,
            entry_count: inner.entries.len(),
        }
    }

    /// Multi-line summary for Slack check-ins.
    pub fn format_for_slack(&self) -> String {
        let s = self.snapshot();
        let mut out = format!(
            "*Spend*\nToday: ${:.2} / ${:.2}\nThis week: ${:.2} / ${:.2}\nAll time: ${:.2}",
            s.daily_spend_usd, s.daily_budget_usd, s.weekly_spend_usd, s.weekly_budget_usd, s.total_usd,
        );
        if !s.by_model.is_empty() {
            out.push_str("\nBy model:");
            for (model, cost) in &s.by_model {
                out.push_str(&format!("\n  {model}: ${cost:.2}"));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn monitor(daily: f64, weekly: f64) -> SpendMonitor {
        SpendMonitor::new(BudgetConfig {
            daily_budget_usd: daily,
            weekly_budget_usd: weekly,
            hard_stop_at_limit: true,
            alert_thresholds: vec![0.5, 0.8, 1.0],
        })
    }

    fn noon(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_totals_accumulate_per_model() {
        let m = monitor(100.0, 500.0);
        let now = noon(2);
        m.record_agent_cost_at(now, "s1", Uuid::new_v4(), "opus", 1000, 2000, 3.0);
        m.record_agent_cost_at(now, "s2", Uuid::new_v4(), "haiku", 1000, 2000, 0.5);
        m.record_agent_cost_at(now, "s3", Uuid::new_v4(), "opus", 1000, 2000, 2.0);

        let s = m.snapshot_at(now);
        assert!((s.total_usd - 5.5).abs() < 1e-9);
        assert_eq!(s.by_model[0], ("opus".to_string(), 5.0));
        assert_eq!(s.entry_count, 3);
    }

    #[test]
    fn test_daily_window_excludes_other_days() {
        let m = monitor(10.0, 100.0);
        m.record_agent_cost_at(noon(2), "s1", Uuid::new_v4(), "sonnet", 0, 0, 4.0);
        m.record_agent_cost_at(noon(3), "s2", Uuid::new_v4(), "sonnet", 0, 0, 4.0);

        let s = m.snapshot_at(noon(3));
        assert!((s.daily_spend_usd - 4.0).abs() < 1e-9);
        assert!((s.weekly_spend_usd - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_should_stop_at_daily_budget() {
        let m = monitor(1.0, 100.0);
        let now = noon(2);
        m.record_agent_cost_at(now, "s1", Uuid::new_v4(), "sonnet", 0, 0, 0.4);
        m.record_agent_cost_at(now, "s2", Uuid::new_v4(), "sonnet", 0, 0, 0.4);
        assert!(!m.should_stop_at(now));
        m.record_agent_cost_at(now, "s3", Uuid::new_v4(), "sonnet", 0, 0, 0.3);
        assert!(m.should_stop_at(now));
    }

    #[test]
    fn test_hard_stop_disabled() {
        let m = SpendMonitor::new(BudgetConfig {
            daily_budget_usd: 1.0,
            hard_stop_at_limit: false,
            ..BudgetConfig::default()
        });
        let now = noon(2);
        m.record_agent_cost_at(now, "s1", Uuid::new_v4(), "sonnet", 0, 0, 5.0);
        assert!(!m.should_stop_at(now));
    }

    #[test]
    fn test_alerts_fire_once_per_threshold_per_window() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let m = SpendMonitor::new(BudgetConfig {
            daily_budget_usd: 10.0,
            weekly_budget_usd: 1_000.0,
            hard_stop_at_limit: true,
            alert_thresholds: vec![0.5],
        })
        .with_on_alert(Arc::new(move |_alert| {
            f.fetch_add(1, Ordering::SeqCst);
        }));

        let now = noon(2);
        m.record_agent_cost_at(now, "s1", Uuid::new_v4(), "sonnet", 0, 0, 6.0);
        m.record_agent_cost_at(now, "s2", Uuid::new_v4(), "sonnet", 0, 0, 1.0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // A new day is a new window: the same threshold fires again.
        m.record_agent_cost_at(noon(3), "s3", Uuid::new_v4(), "sonnet", 0, 0, 6.0);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_window_totals_equal_entry_sums() {
        let m = monitor(100.0, 500.0);
        let now = noon(2);
        let mut expected = 0.0;
        for i in 0..10 {
            let cost = 0.25 * (i as f64 + 1.0);
            expected += cost;
            m.record_agent_cost_at(now, &format!("s{i}"), Uuid::new_v4(), "sonnet", 10, 20, cost);
        }
        let s = m.snapshot_at(now);
        assert!((s.daily_spend_usd - expected).abs() < 1e-9);
        assert!((s.total_usd - expected).abs() < 1e-9);
    }

    #[test]
    fn test_format_for_slack_mentions_budgets() {
        let m = monitor(10.0, 50.0);
        m.record_agent_cost_at(noon(2), "s1", Uuid::new_v4(), "opus", 100, 200, 2.5);
        let text = m.format_for_slack();
        assert!(text.contains("Spend"));
        assert!(text.contains("opus"));
    }
}
