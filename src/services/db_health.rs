//! Database health monitoring and degraded-mode tracking.
//!
//! Consecutive DB-shaped failures flip the monitor into degraded mode
//! (emitting `database:degraded` exactly once); a successful probe or
//! organic success emits `database:recovered` with the measured
//! downtime. The error classifier is an injected predicate so typed
//! clients can replace the substring heuristic.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::services::event_bus::{EventBus, EventPayload};

/// Async connectivity probe run during startup and degraded recovery.
pub type HealthProbe =
    Arc<dyn Fn() -> BoxFuture<'static, Result<(), anyhow::Error>> + Send + Sync>;

/// Predicate deciding whether an error message is DB-shaped.
pub type DbErrorClassifier = Arc<dyn Fn(&str) -> bool + Send + Sync>;

const DB_ERROR_MARKERS: &[&str] = &[
    "supabase",
    "database",
    "connection",
    "network",
    "timeout",
    "econnrefused",
    "enotfound",
];

/// Default substring classifier over the known marker list.
pub fn default_db_error_classifier() -> DbErrorClassifier {
    Arc::new(|message: &str| {
        let lower = message.to_lowercase();
        DB_ERROR_MARKERS.iter().any(|marker| lower.contains(marker))
    })
}

/// Deep-copied view of the monitor.
#[derive(Debug, Clone, Serialize)]
pub struct DbHealthSnapshot {
    pub healthy: bool,
    pub degraded: bool,
    pub consecutive_failures: u32,
    pub degraded_since: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

struct Inner {
    consecutive_failures: u32,
    degraded: bool,
    degraded_since: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// The DB health monitor service.
pub struct DbHealthMonitor {
    max_consecutive_failures: u32,
    inner: Mutex<Inner>,
    probe: Option<HealthProbe>,
    classifier: DbErrorClassifier,
    bus: Option<Arc<EventBus>>,
}

impl DbHealthMonitor {
    pub fn new(max_consecutive_failures: u32) -> Self {
        Self {
            max_consecutive_failures,
            inner: Mutex::new(Inner {
                consecutive_failures: 0,
                degraded: false,
                degraded_since: None,
                last_error: None,
            }),
            probe: None,
            classifier: default_db_error_classifier(),
            bus: None,
        }
    }

    pub fn with_probe(mut self, probe: HealthProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_classifier(mut self, classifier: DbErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Whether a message matches the DB error shape.
    pub fn is_db_error(&self, message: &str) -> bool {
        (self.classifier)(message)
    }

    /// Record a DB failure; entering degraded mode emits
    /// `database:degraded` exactly once.
    pub fn on_db_failure(&self, error: &str) {
        self.on_db_failure_at(Utc::now(), error);
    }

    pub(crate) fn on_db_failure_at(&self, now: DateTime<Utc>, error: &str) {
        let newly_degraded = {
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            inner.consecutive_failures += 1;
            inner.last_error = Some(error.to_string());
            if inner.consecutive_failures >= self.max_consecutive_failures && !inner.degraded {
                inner.degraded = true;
                inner.degraded_since = Some(now);
                Some(inner.consecutive_failures)
            } else {
                None
            }
        };

        if let Some(failures) = newly_degraded {
            tracing::error!(
                consecutive_failures = failures,
                error = %error,
                "database degraded"
            );
            if let Some(ref bus) = self.bus {
                bus.publish(EventPayload::DatabaseDegraded {
                    consecutive_failures: failures,
                    last_error: error.to_string(),
                });
            }
        }
    }

    /// Record a DB success; recovering from degraded mode emits
    /// `database:recovered` with the measured downtime.
    pub fn on_db_success(&self) {
        self.on_db_success_at(Utc::now());
    }

    pub(crate) fn on_db_success_at(&self, now: DateTime<Utc>) {
        let downtime_ms = {
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let downtime = if inner.degraded {
                inner
                    .degraded_since
                    .map(|since| (now - since).num_milliseconds().max(0) as u64)
            } else {
                None
            };
            inner.consecutive_failures = 0;
            inner.degraded = false;
            inner.degraded_since = None;
            inner.last_error = None;
            downtime
        };

        if let Some(downtime_ms) = downtime_ms {
            tracing::info!(downtime_ms, "database recovered");
            if let Some(ref bus) = self.bus {
                bus.publish(EventPayload::DatabaseRecovered { downtime_ms });
            }
        }
    }

    /// Run the health probe; a success clears degraded mode. Returns
    /// true when the database is reachable. Without a configured probe
    /// this is a no-op success.
    pub async fn attempt_recovery(&self) -> bool {
        let Some(probe) = self.probe.clone() else {
            self.on_db_success();
            return true;
        };
        match probe().await {
            Ok(()) => {
                self.on_db_success();
                true
            }
            Err(err) => {
                self.on_db_failure(&err.to_string());
                false
            }
        }
    }

    /// Emit `database:healthy` after a successful startup probe.
    pub fn record_startup_healthy(&self, latency_ms: u64) {
        tracing::info!(latency_ms, "database healthy at startup");
        if let Some(ref bus) = self.bus {
            bus.publish(EventPayload::DatabaseHealthy { latency_ms });
        }
    }

    pub fn is_degraded(&self) -> bool {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.degraded
    }

    /// Reset the consecutive failure counter without touching degraded
    /// state (called after a fully successful tick).
    pub fn reset_failure_counter(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if !inner.degraded {
            inner.consecutive_failures = 0;
        }
    }

    pub fn snapshot(&self) -> DbHealthSnapshot {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        DbHealthSnapshot {
            healthy: !inner.degraded,
            degraded: inner.degraded,
            consecutive_failures: inner.consecutive_failures,
            degraded_since: inner.degraded_since,
            last_error: inner.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::event_bus::{EventKind, HistoryFilter};
    use chrono::Duration;

    #[test]
    fn test_classifier_matches_known_markers() {
        let classifier = default_db_error_classifier();
        assert!(classifier("ECONNREFUSED: connection refused"));
        assert!(classifier("Supabase returned 500"));
        assert!(classifier("request timeout"));
        assert!(!classifier("invalid prompt"));
    }

    #[test]
    fn test_degraded_emitted_once() {
        let bus = Arc::new(EventBus::with_defaults());
        let m = DbHealthMonitor::new(3).with_event_bus(bus.clone());

        for _ in 0..3 {
            m.on_db_failure("ECONNREFUSED");
        }
        assert!(m.is_degraded());

        // Further failures emit nothing new.
        m.on_db_failure("ECONNREFUSED");
        m.on_db_failure("ECONNREFUSED");

        let degraded = bus.history(&HistoryFilter::default().kinds([EventKind::DatabaseDegraded]));
        assert_eq!(degraded.len(), 1);
    }

    #[test]
    fn test_recovery_reports_downtime() {
        let bus = Arc::new(EventBus::with_defaults());
        let m = DbHealthMonitor::new(2).with_event_bus(bus.clone());

        let t0 = Utc::now();
        m.on_db_failure_at(t0, "connection lost");
        m.on_db_failure_at(t0, "connection lost");
        assert!(m.is_degraded());

        m.on_db_success_at(t0 + Duration::milliseconds(2_500));
        assert!(!m.is_degraded());

        let recovered = bus.history(&HistoryFilter::default().kinds([EventKind::DatabaseRecovered]));
        assert_eq!(recovered.len(), 1);
        match &recovered[0].payload {
            EventPayload::DatabaseRecovered { downtime_ms } => assert!(*downtime_ms >= 2_500),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_success_below_threshold_resets_counter() {
        let m = DbHealthMonitor::new(3);
        m.on_db_failure("timeout");
        m.on_db_failure("timeout");
        m.on_db_success();
        m.on_db_failure("timeout");
        m.on_db_failure("timeout");
        assert!(!m.is_degraded());
    }

    #[tokio::test]
    async fn test_attempt_recovery_with_probe() {
        use std::sync::atomic::{AtomicBool, Ordering};
        let bus = Arc::new(EventBus::with_defaults());
        let reachable = Arc::new(AtomicBool::new(false));

        let flag = reachable.clone();
        let probe: HealthProbe = Arc::new(move || {
            let flag = flag.clone();
            Box::pin(async move {
                if flag.load(Ordering::SeqCst) {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("ECONNREFUSED"))
                }
            })
        });

        let m = DbHealthMonitor::new(1).with_probe(probe).with_event_bus(bus.clone());
        assert!(!m.attempt_recovery().await);
        assert!(m.is_degraded());

        reachable.store(true, Ordering::SeqCst);
        assert!(m.attempt_recovery().await);
        assert!(!m.is_degraded());

        let recovered = bus.history(&HistoryFilter::default().kinds([EventKind::DatabaseRecovered]));
        assert_eq!(recovered.len(), 1);
    }

    #[test]
    fn test_startup_healthy_event() {
        let bus = Arc::new(EventBus::with_defaults());
        let m = DbHealthMonitor::new(3).with_event_bus(bus.clone());
        m.record_startup_healthy(42);

        let healthy = bus.history(&HistoryFilter::default().kinds([EventKind::DatabaseHealthy]));
        assert_eq!(healthy.len(), 1);
    }
}
