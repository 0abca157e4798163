//! Human-readable Slack renderings for safety events.
//!
//! Severity markers: `:white_check_mark:` informational,
//! `:warning:` warning, `:no_entry:` / `:rotating_light:` critical.

use crate::services::circuit_breaker::BreakerSnapshot;
use crate::services::productivity::{AlertLevel, ProductivityAlert};
use crate::services::spend_monitor::BudgetAlert;

/// Budget threshold crossing.
pub fn budget_alert(alert: &BudgetAlert) -> String {
    let marker = if alert.percentage >= 1.0 { ":no_entry:" } else { ":warning:" };
    format!(
        "{marker} *Budget {}*: ${:.2} of ${:.2} ({:.0}%) {} spend",
        if alert.percentage >= 1.0 { "Exceeded" } else { "Alert" },
        alert.current_spend,
        alert.budget,
        alert.percentage * 100.0,
        alert.kind,
    )
}

/// Unproductive agent alert.
pub fn productivity_alert(alert: &ProductivityAlert) -> String {
    let marker = match alert.level {
        AlertLevel::Warning => ":warning:",
        AlertLevel::Critical => ":rotating_light:",
    };
    let mut text = format!(
        "{marker} Agent `{}` has burned {} tokens without meaningful output",
        alert.session_id, alert.tokens_without_output,
    );
    if alert.pause_requested {
        text.push_str(", pausing it");
    }
    text
}

/// Circuit breaker trip notice.
pub fn breaker_tripped(snapshot: &BreakerSnapshot) -> String {
    let mut text = format!(
        ":rotating_light: *Circuit breaker tripped* ({})",
        snapshot.reason.map_or("unknown", |r| r.as_str()),
    );
    if let Some(ref message) = snapshot.message {
        text.push_str(&format!(": {message}"));
    }
    if let Some(ref agent) = snapshot.triggering_agent {
        text.push_str(&format!(" [agent `{agent}`]"));
    }
    text.push_str("\nNo new work will be admitted until reset (`tc` restart or manual reset).");
    text
}

/// Degraded-mode entry notice.
pub fn database_degraded(consecutive_failures: u32, last_error: &str) -> String {
    format!(
        ":warning: *Database degraded* after {consecutive_failures} consecutive failures: {last_error}\nScheduling is suspended; recovery probes run every tick.",
    )
}

/// Degraded-mode recovery notice.
pub fn database_recovered(downtime_ms: u64) -> String {
    format!(
        ":white_check_mark: *Database recovered* after {:.1}s of downtime.",
        downtime_ms as f64 / 1000.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::circuit_breaker::{BreakerMode, TripReason};
    use crate::services::spend_monitor::BudgetWindowKind;

    #[test]
    fn test_budget_alert_markers() {
        let warning = budget_alert(&BudgetAlert {
            kind: BudgetWindowKind::Daily,
            percentage: 0.8,
            current_spend: 8.0,
            budget: 10.0,
        });
        assert!(warning.starts_with(":warning:"));

        let exceeded = budget_alert(&BudgetAlert {
            kind: BudgetWindowKind::Daily,
            percentage: 1.05,
            current_spend: 10.5,
            budget: 10.0,
        });
        assert!(exceeded.starts_with(":no_entry:"));
        assert!(exceeded.contains("Exceeded"));
    }

    #[test]
    fn test_breaker_tripped_mentions_agent() {
        let text = breaker_tripped(&BreakerSnapshot {
            mode: BreakerMode::Open,
            reason: Some(TripReason::ConsecutiveAgentErrors),
            message: Some("agent a1 failed 3 times in a row: boom".to_string()),
            triggering_agent: Some("a1".to_string()),
            tripped_at: None,
            last_failure_at: None,
            window_len: 3,
            window_error_rate: 1.0,
            total_cost_usd: 0.0,
        });
        assert!(text.contains("consecutive_agent_errors"));
        assert!(text.contains("`a1`"));
    }

    #[test]
    fn test_database_messages() {
        assert!(database_degraded(3, "ECONNREFUSED").contains("3 consecutive"));
        assert!(database_recovered(2500).contains("2.5s"));
    }
}
