//! Circuit breaker guarding the scheduling loop.
//!
//! Closed: operations allowed, every agent outcome lands in a rolling
//! window. Open: operations denied until the open timeout elapses, after
//! which one half-open probe is allowed; its outcome closes or reopens
//! the breaker. Trips are idempotent until [`CircuitBreaker::reset`].

use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::domain::models::config::BreakerConfig;
use crate::services::event_bus::{EventBus, EventPayload};

/// Breaker mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerMode {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Why the breaker tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripReason {
    ConsecutiveAgentErrors,
    GlobalErrorRate,
    BudgetExceeded,
    TokenLimitWithoutOutput,
    Manual,
}

impl TripReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConsecutiveAgentErrors => "consecutive_agent_errors",
            Self::GlobalErrorRate => "global_error_rate",
            Self::BudgetExceeded => "budget_exceeded",
            Self::TokenLimitWithoutOutput => "token_limit_without_output",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for TripReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Callback invoked asynchronously when the breaker trips; its errors
/// are swallowed.
pub type TripCallback =
    Arc<dyn Fn(TripReason, String) -> BoxFuture<'static, Result<(), anyhow::Error>> + Send + Sync>;

/// Point-in-time view of the breaker for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub mode: BreakerMode,
    pub reason: Option<TripReason>,
    pub message: Option<String>,
    pub triggering_agent: Option<String>,
    pub tripped_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub window_len: usize,
    pub window_error_rate: f64,
    pub total_cost_usd: f64,
}

struct Inner {
    mode: BreakerMode,
    reason: Option<TripReason>,
    message: Option<String>,
    triggering_agent: Option<String>,
    tripped_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    /// Rolling outcome window; true = success.
    window: VecDeque<bool>,
    /// Consecutive failures per agent; reset on that agent's success.
    consecutive: HashMap<String, u32>,
    total_cost_usd: f64,
    tokens_without_output: u64,
}

impl Inner {
    fn fresh() -> Self {
        Self {
            mode: BreakerMode::Closed,
            reason: None,
            message: None,
            triggering_agent: None,
            tripped_at: None,
            last_failure_at: None,
            window: VecDeque::new(),
            consecutive: HashMap::new(),
            total_cost_usd: 0.0,
            tokens_without_output: 0,
        }
    }

    fn error_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let errors = self.window.iter().filter(|ok| !**ok).count();
        errors as f64 / self.window.len() as f64
    }

    fn push_outcome(&mut self, success: bool, window_size: usize) {
        if self.window.len() >= window_size {
            self.window.pop_front();
        }
        self.window.push_back(success);
    }
}

/// The breaker service. Mutations happen on the kernel actor; callers
/// elsewhere get deep-copied snapshots.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
    on_trip: Option<TripCallback>,
    bus: Option<Arc<EventBus>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::fresh()),
            on_trip: None,
            bus: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(BreakerConfig::default())
    }

    pub fn with_on_trip(mut self, callback: TripCallback) -> Self {
        self.on_trip = Some(callback);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Whether the kernel may call the scheduler right now. An open
    /// breaker transitions to half-open after the open timeout and
    /// permits one probe.
    pub fn allows_operation(&self) -> bool {
        self.allows_operation_at(Utc::now())
    }

    pub(crate) fn allows_operation_at(&self, now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match inner.mode {
            BreakerMode::Closed | BreakerMode::HalfOpen => true,
            BreakerMode::Open => {
                let open_timeout = Duration::milliseconds(self.config.open_timeout_ms as i64);
                match inner.tripped_at {
                    Some(at) if now > at + open_timeout => {
                        inner.mode = BreakerMode::HalfOpen;
                        tracing::info!("circuit breaker half-open, allowing probe");
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    /// Record a successful agent outcome. Resets the agent's consecutive
    /// failure counter; a success in half-open closes the breaker.
    pub fn record_agent_success(&self, agent_id: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.consecutive.remove(agent_id);
        inner.push_outcome(true, self.config.outcome_window);
        if inner.mode == BreakerMode::HalfOpen {
            tracing::info!("half-open probe succeeded, closing circuit breaker");
            *inner = Inner::fresh();
        }
    }

    /// Record a failed agent outcome; may trip the breaker.
    pub fn record_agent_error(&self, agent_id: &str, error: &str) {
        let trip = {
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            inner.last_failure_at = Some(Utc::now());
            inner.push_outcome(false, self.config.outcome_window);
            let count = inner.consecutive.entry(agent_id.to_string()).or_insert(0);
            *count += 1;
            let count = *count;

            if inner.mode == BreakerMode::HalfOpen {
                inner.mode = BreakerMode::Open;
                inner.tripped_at = Some(Utc::now());
                tracing::warn!(agent_id = %agent_id, "half-open probe failed, reopening");
                None
            } else if count >= self.config.max_consecutive_agent_errors {
                inner.triggering_agent = Some(agent_id.to_string());
                Some((
                    TripReason::ConsecutiveAgentErrors,
                    format!("agent {agent_id} failed {count} times in a row: {error}"),
                ))
            } else if inner.window.len() >= self.config.outcome_window
                && inner.error_rate() > self.config.error_rate_threshold
            {
                Some((
                    TripReason::GlobalErrorRate,
                    format!(
                        "error rate {:.0}% over last {} outcomes",
                        inner.error_rate() * 100.0,
                        inner.window.len()
                    ),
                ))
            } else {
                None
            }
        };

        if let Some((reason, message)) = trip {
            self.trip(reason, message);
        }
    }

    /// Accumulate billed cost; trips at the hard budget limit.
    pub fn record_cost(&self, cost_usd: f64) {
        let trip = {
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            inner.total_cost_usd += cost_usd;
            (inner.total_cost_usd >= self.config.hard_budget_limit_usd).then(|| {
                (
                    TripReason::BudgetExceeded,
                    format!(
                        "total cost ${:.2} reached hard limit ${:.2}",
                        inner.total_cost_usd, self.config.hard_budget_limit_usd
                    ),
                )
            })
        };
        if let Some((reason, message)) = trip {
            self.trip(reason, message);
        }
    }

    /// Report the highest tokens-without-meaningful-output watermark seen
    /// across agents; trips at the configured limit.
    pub fn record_tokens_without_output(&self, tokens: u64) {
        let trip = {
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            inner.tokens_without_output = inner.tokens_without_output.max(tokens);
            (inner.tokens_without_output >= self.config.token_limit_without_output).then(|| {
                (
                    TripReason::TokenLimitWithoutOutput,
                    format!(
                        "{tokens} tokens consumed without meaningful output (limit {})",
                        self.config.token_limit_without_output
                    ),
                )
            })
        };
        if let Some((reason, message)) = trip {
            self.trip(reason, message);
        }
    }

    /// Trip manually (operator action).
    pub fn trip_manual(&self, message: impl Into<String>) {
        self.trip(TripReason::Manual, message.into());
    }

    /// Trip the breaker. Idempotent: a second trip before reset is
    /// ignored. The `on_trip` callback runs asynchronously with its
    /// errors swallowed, and a `system:error` event is emitted.
    fn trip(&self, reason: TripReason, message: String) {
        {
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if inner.mode == BreakerMode::Open {
                return;
            }
            inner.mode = BreakerMode::Open;
            inner.reason = Some(reason);
            inner.message = Some(message.clone());
            inner.tripped_at = Some(Utc::now());
        }
        tracing::error!(reason = %reason, "circuit breaker tripped: {}", message);

        if let Some(ref callback) = self.on_trip {
            let fut = callback(reason, message.clone());
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(err) = fut.await {
                        tracing::warn!(error = %err, "on_trip callback failed");
                    }
                });
            }
        }

        if let Some(ref bus) = self.bus {
            bus.publish(EventPayload::SystemError {
                component: "circuit-breaker".to_string(),
                message: format!("tripped ({}): {message}", reason.as_str()),
            });
        }
    }

    /// Clear all counters and state; behaves as a fresh instance after.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *inner = Inner::fresh();
        tracing::info!("circuit breaker reset");
    }

    pub fn is_tripped(&self) -> bool {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.mode == BreakerMode::Open
    }

    /// Deep-copied snapshot for status and Slack surfaces.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        BreakerSnapshot {
            mode: inner.mode,
            reason: inner.reason,
            message: inner.message.clone(),
            triggering_agent: inner.triggering_agent.clone(),
            tripped_at: inner.tripped_at,
            last_failure_at: inner.last_failure_at,
            window_len: inner.window.len(),
            window_error_rate: inner.error_rate(),
            total_cost_usd: inner.total_cost_usd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(config: BreakerConfig) -> CircuitBreaker {
        CircuitBreaker::new(config)
    }

    fn lenient_rate() -> BreakerConfig {
        BreakerConfig {
            max_consecutive_agent_errors: 3,
            error_rate_threshold: 0.99,
            outcome_window: 100,
            ..BreakerConfig::default()
        }
    }

    #[test]
    fn test_consecutive_agent_errors_trip() {
        let b = breaker(lenient_rate());
        b.record_agent_error("a1", "boom");
        b.record_agent_error("a1", "boom");
        assert!(!b.is_tripped());
        b.record_agent_error("a1", "boom");
        assert!(b.is_tripped());

        let snapshot = b.snapshot();
        assert_eq!(snapshot.reason, Some(TripReason::ConsecutiveAgentErrors));
        assert_eq!(snapshot.triggering_agent.as_deref(), Some("a1"));
    }

    #[test]
    fn test_success_resets_consecutive_counter() {
        let b = breaker(lenient_rate());
        b.record_agent_error("a1", "boom");
        b.record_agent_error("a1", "boom");
        b.record_agent_success("a1");
        b.record_agent_error("a1", "boom");
        assert!(!b.is_tripped());
    }

    #[test]
    fn test_consecutive_counter_is_per_agent() {
        let b = breaker(lenient_rate());
        b.record_agent_error("a1", "boom");
        b.record_agent_error("a2", "boom");
        b.record_agent_error("a3", "boom");
        assert!(!b.is_tripped());
    }

    #[test]
    fn test_error_rate_trips_only_once_window_full() {
        let b = breaker(BreakerConfig {
            max_consecutive_agent_errors: 100,
            error_rate_threshold: 0.5,
            outcome_window: 10,
            ..BreakerConfig::default()
        });

        for i in 0..4 {
            b.record_agent_success(&format!("s{i}"));
        }
        for i in 0..5 {
            b.record_agent_error(&format!("e{i}"), "boom");
        }
        // 9 outcomes: window not yet full, no rate evaluation.
        assert!(!b.is_tripped());

        b.record_agent_error("e5", "boom");
        assert!(b.is_tripped());
        assert_eq!(b.snapshot().reason, Some(TripReason::GlobalErrorRate));
    }

    #[test]
    fn test_budget_trip() {
        let b = breaker(BreakerConfig {
            hard_budget_limit_usd: 1.0,
            ..lenient_rate()
        });
        b.record_cost(0.4);
        b.record_cost(0.4);
        assert!(!b.is_tripped());
        b.record_cost(0.3);
        assert!(b.is_tripped());
        assert_eq!(b.snapshot().reason, Some(TripReason::BudgetExceeded));
    }

    #[test]
    fn test_token_watermark_trip() {
        let b = breaker(BreakerConfig {
            token_limit_without_output: 1000,
            ..lenient_rate()
        });
        b.record_tokens_without_output(999);
        assert!(!b.is_tripped());
        b.record_tokens_without_output(1000);
        assert!(b.is_tripped());
        assert_eq!(b.snapshot().reason, Some(TripReason::TokenLimitWithoutOutput));
    }

    #[test]
    fn test_trip_is_idempotent() {
        let b = breaker(lenient_rate());
        b.trip_manual("first");
        b.trip_manual("second");
        assert_eq!(b.snapshot().message.as_deref(), Some("first"));
    }

    #[test]
    fn test_reset_restores_fresh_state() {
        let b = breaker(BreakerConfig {
            hard_budget_limit_usd: 1.0,
            ..lenient_rate()
        });
        b.record_cost(2.0);
        assert!(b.is_tripped());

        b.reset();
        assert!(!b.is_tripped());
        let snapshot = b.snapshot();
        assert_eq!(snapshot.mode, BreakerMode::Closed);
        assert!(snapshot.reason.is_none());
        assert_eq!(snapshot.total_cost_usd, 0.0);
        assert_eq!(snapshot.window_len, 0);

        // Previous cost does not linger after reset.
        b.record_cost(0.5);
        assert!(!b.is_tripped());
    }

    #[test]
    fn test_half_open_probe_after_timeout() {
        let b = breaker(BreakerConfig {
            open_timeout_ms: 1_000,
            ..lenient_rate()
        });
        b.trip_manual("stuck");
        let tripped_at = b.snapshot().tripped_at.unwrap();

        assert!(!b.allows_operation_at(tripped_at + Duration::milliseconds(500)));
        assert!(b.allows_operation_at(tripped_at + Duration::milliseconds(1_500)));
        assert_eq!(b.snapshot().mode, BreakerMode::HalfOpen);

        // Probe success closes the breaker completely.
        b.record_agent_success("probe");
        assert_eq!(b.snapshot().mode, BreakerMode::Closed);
    }

    #[test]
    fn test_half_open_probe_failure_reopens() {
        let b = breaker(BreakerConfig {
            open_timeout_ms: 1_000,
            ..lenient_rate()
        });
        b.trip_manual("stuck");
        let tripped_at = b.snapshot().tripped_at.unwrap();
        assert!(b.allows_operation_at(tripped_at + Duration::milliseconds(1_500)));

        b.record_agent_error("probe", "still broken");
        assert_eq!(b.snapshot().mode, BreakerMode::Open);
        // The reopen stamps a fresh trip time, so the probe window restarts.
        assert!(!b.allows_operation_at(Utc::now()));
    }

    #[tokio::test]
    async fn test_on_trip_callback_invoked_and_errors_swallowed() {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<TripReason>(4);
        let callback: TripCallback = Arc::new(move |reason, _message| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(reason).await;
                Err(anyhow::anyhow!("callback failure is swallowed"))
            })
        });
        let b = CircuitBreaker::new(lenient_rate()).with_on_trip(callback);
        b.trip_manual("operator");

        let reason = rx.recv().await.unwrap();
        assert_eq!(reason, TripReason::Manual);
    }
}
