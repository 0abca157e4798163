//! Typed in-process event bus for the orchestration kernel.
//!
//! Emission is synchronous: every registered handler for the event kind
//! runs in insertion order on the emitting task, then every matching
//! pattern handler. Handler failures are isolated and republished as
//! `system:error`. Asynchronous side effects go through
//! [`EventBus::spawn_guarded`] so their eventual failures re-enter the
//! bus through the same error channel.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Kind discriminant for every event the system can emit.
///
/// The wire names (returned by [`EventKind::as_str`]) form the exhaustive
/// lexicon that pattern subscriptions match against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AgentSpawned,
    AgentQuestion,
    AgentBlocked,
    AgentCompleted,
    AgentFailed,
    TaskQueued,
    TaskAssigned,
    TaskCompleted,
    CapacityAvailable,
    CapacityExhausted,
    LearningExtracted,
    RetrospectiveTriggered,
    SlackMessageReceived,
    SlackResponseSent,
    SystemStarted,
    SystemStopped,
    SystemError,
    DatabaseHealthy,
    DatabaseDegraded,
    DatabaseRecovered,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentSpawned => "agent:spawned",
            Self::AgentQuestion => "agent:question",
            Self::AgentBlocked => "agent:blocked",
            Self::AgentCompleted => "agent:completed",
            Self::AgentFailed => "agent:failed",
            Self::TaskQueued => "task:queued",
            Self::TaskAssigned => "task:assigned",
            Self::TaskCompleted => "task:completed",
            Self::CapacityAvailable => "capacity:available",
            Self::CapacityExhausted => "capacity:exhausted",
            Self::LearningExtracted => "learning:extracted",
            Self::RetrospectiveTriggered => "retrospective:triggered",
            Self::SlackMessageReceived => "slack:message_received",
            Self::SlackResponseSent => "slack:response_sent",
            Self::SystemStarted => "system:started",
            Self::SystemStopped => "system:stopped",
            Self::SystemError => "system:error",
            Self::DatabaseHealthy => "database:healthy",
            Self::DatabaseDegraded => "database:degraded",
            Self::DatabaseRecovered => "database:recovered",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Closed, tagged payload sum; one variant per [`EventKind`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    AgentSpawned {
        session_id: String,
        task_id: Uuid,
        model: String,
        parent_session_id: Option<String>,
    },
    AgentQuestion {
        session_id: String,
        question: String,
    },
    AgentBlocked {
        session_id: String,
        reason: String,
    },
    AgentCompleted {
        session_id: String,
        task_id: Uuid,
        tokens_used: u64,
        cost_usd: f64,
    },
    AgentFailed {
        session_id: String,
        task_id: Uuid,
        error: String,
    },
    TaskQueued {
        task_id: Uuid,
        title: String,
    },
    TaskAssigned {
        task_id: Uuid,
        session_id: String,
        model: String,
    },
    TaskCompleted {
        task_id: Uuid,
        success: bool,
    },
    CapacityAvailable {
        model: String,
        available: usize,
    },
    CapacityExhausted {
        model: String,
        limit: usize,
    },
    LearningExtracted {
        task_id: Option<Uuid>,
        summary: String,
    },
    RetrospectiveTriggered {
        project_id: Uuid,
        task_id: Uuid,
        reason: String,
    },
    SlackMessageReceived {
        channel: String,
        user: String,
        text: String,
    },
    SlackResponseSent {
        channel: String,
        message_id: String,
    },
    SystemStarted,
    SystemStopped {
        reason: String,
    },
    SystemError {
        component: String,
        message: String,
    },
    DatabaseHealthy {
        latency_ms: u64,
    },
    DatabaseDegraded {
        consecutive_failures: u32,
        last_error: String,
    },
    DatabaseRecovered {
        downtime_ms: u64,
    },
}

impl EventPayload {
    /// The kind this payload belongs to.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::AgentSpawned { .. } => EventKind::AgentSpawned,
            Self::AgentQuestion { .. } => EventKind::AgentQuestion,
            Self::AgentBlocked { .. } => EventKind::AgentBlocked,
            Self::AgentCompleted { .. } => EventKind::AgentCompleted,
            Self::AgentFailed { .. } => EventKind::AgentFailed,
            Self::TaskQueued { .. } => EventKind::TaskQueued,
            Self::TaskAssigned { .. } => EventKind::TaskAssigned,
            Self::TaskCompleted { .. } => EventKind::TaskCompleted,
            Self::CapacityAvailable { .. } => EventKind::CapacityAvailable,
            Self::CapacityExhausted { .. } => EventKind::CapacityExhausted,
            Self::LearningExtracted { .. } => EventKind::LearningExtracted,
            Self::RetrospectiveTriggered { .. } => EventKind::RetrospectiveTriggered,
            Self::SlackMessageReceived { .. } => EventKind::SlackMessageReceived,
            Self::SlackResponseSent { .. } => EventKind::SlackResponseSent,
            Self::SystemStarted => EventKind::SystemStarted,
            Self::SystemStopped { .. } => EventKind::SystemStopped,
            Self::SystemError { .. } => EventKind::SystemError,
            Self::DatabaseHealthy { .. } => EventKind::DatabaseHealthy,
            Self::DatabaseDegraded { .. } => EventKind::DatabaseDegraded,
            Self::DatabaseRecovered { .. } => EventKind::DatabaseRecovered,
        }
    }
}

/// One event as seen by subscribers and the history buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl BusEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self { payload, timestamp: Utc::now(), correlation_id: None }
    }

    pub fn with_correlation(payload: EventPayload, correlation_id: Uuid) -> Self {
        Self { payload, timestamp: Utc::now(), correlation_id: Some(correlation_id) }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// Token returned by subscribe calls; pass to [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Handler signature. Returning an error never stops delivery to other
/// handlers; the failure is republished as `system:error`.
pub type HandlerResult = Result<(), anyhow::Error>;

type Handler = Arc<dyn Fn(&BusEvent) -> HandlerResult + Send + Sync>;

struct Registration {
    id: u64,
    handler: Handler,
    once: bool,
}

struct PatternRegistration {
    id: u64,
    pattern: Regex,
    handler: Handler,
}

struct Inner {
    typed: HashMap<EventKind, Vec<Registration>>,
    patterns: Vec<PatternRegistration>,
    history: VecDeque<BusEvent>,
    next_id: u64,
}

/// Filter over the bounded event history.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub kinds: Option<Vec<EventKind>>,
    pub correlation_id: Option<Uuid>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Keep only the most recent N matches (still chronological).
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn correlation(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, event: &BusEvent) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }
        if let Some(id) = self.correlation_id {
            if event.correlation_id != Some(id) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.timestamp > until {
                return false;
            }
        }
        true
    }
}

/// Configuration for the event bus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Ring-buffer capacity for history; oldest entries drop first.
    pub history_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { history_capacity: 1024 }
    }
}

/// Error returned by [`EventBus::wait_for`].
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(std::time::Duration, EventKind),
    #[error("event bus dropped while waiting for {0}")]
    Closed(EventKind),
}

/// The bus itself. One owned instance is created at program entry and
/// threaded through constructors; tests build their own.
pub struct EventBus {
    config: EventBusConfig,
    inner: Mutex<Inner>,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                typed: HashMap::new(),
                patterns: Vec::new(),
                history: VecDeque::new(),
                next_id: 0,
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(EventBusConfig::default())
    }

    /// Register a handler for one event kind. Handlers run in insertion
    /// order when an event of that kind is emitted.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&BusEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(handler), false)
    }

    /// Register a handler invoked on at most one matching emission.
    pub fn subscribe_once<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&BusEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(handler), true)
    }

    fn register(&self, kind: EventKind, handler: Handler, once: bool) -> SubscriptionId {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .typed
            .entry(kind)
            .or_default()
            .push(Registration { id, handler, once });
        SubscriptionId(id)
    }

    /// Register a handler for every event whose wire name (e.g.
    /// `"agent:completed"`) matches the regex. Pattern handlers run after
    /// the type-specific handlers.
    pub fn subscribe_pattern<F>(&self, pattern: Regex, handler: F) -> SubscriptionId
    where
        F: Fn(&BusEvent) -> HandlerResult + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.patterns.push(PatternRegistration { id, pattern, handler: Arc::new(handler) });
        SubscriptionId(id)
    }

    /// Remove a subscription. Unknown ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for regs in inner.typed.values_mut() {
            regs.retain(|r| r.id != id.0);
        }
        inner.patterns.retain(|r| r.id != id.0);
    }

    /// Emit an event: append to history, then run every type handler in
    /// insertion order, then every matching pattern handler. A failing
    /// handler never prevents the rest from running.
    pub fn emit(&self, event: BusEvent) {
        let kind = event.kind();
        let (handlers, pattern_handlers) = {
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if inner.history.len() >= self.config.history_capacity {
                inner.history.pop_front();
            }
            inner.history.push_back(event.clone());

            let handlers: Vec<Handler> = match inner.typed.get_mut(&kind) {
                Some(regs) => {
                    let snapshot: Vec<Handler> = regs.iter().map(|r| r.handler.clone()).collect();
                    regs.retain(|r| !r.once);
                    snapshot
                }
                None => Vec::new(),
            };
            let pattern_handlers: Vec<Handler> = inner
                .patterns
                .iter()
                .filter(|r| r.pattern.is_match(kind.as_str()))
                .map(|r| r.handler.clone())
                .collect();
            (handlers, pattern_handlers)
        };

        for handler in handlers.into_iter().chain(pattern_handlers) {
            if let Err(err) = handler(&event) {
                self.handle_handler_failure(&event, &err);
            }
        }
    }

    /// Convenience: wrap a payload and emit it.
    pub fn publish(&self, payload: EventPayload) {
        self.emit(BusEvent::new(payload));
    }

    /// Emit with a correlation id carried across related events.
    pub fn publish_correlated(&self, payload: EventPayload, correlation_id: Uuid) {
        self.emit(BusEvent::with_correlation(payload, correlation_id));
    }

    // Failures while handling `system:error` are logged but not
    // republished; that is the recursion guard.
    fn handle_handler_failure(&self, event: &BusEvent, err: &anyhow::Error) {
        tracing::warn!(
            kind = %event.kind(),
            error = %err,
            "event handler failed"
        );
        if event.kind() == EventKind::SystemError {
            return;
        }
        let error_event = BusEvent {
            payload: EventPayload::SystemError {
                component: "event-bus".to_string(),
                message: format!("handler for {} failed: {err}", event.kind()),
            },
            timestamp: Utc::now(),
            correlation_id: event.correlation_id,
        };
        self.emit(error_event);
    }

    /// Resolve on the first matching emission after the call. With a
    /// timeout, rejects with [`WaitError::Timeout`].
    pub async fn wait_for(
        &self,
        kind: EventKind,
        timeout: Option<std::time::Duration>,
    ) -> Result<BusEvent, WaitError> {
        let (tx, rx) = tokio::sync::oneshot::channel::<BusEvent>();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let id = self.subscribe_once(kind, move |event| {
            if let Some(tx) = slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take() {
                let _ = tx.send(event.clone());
            }
            Ok(())
        });

        match timeout {
            Some(duration) => match tokio::time::timeout(duration, rx).await {
                Ok(Ok(event)) => Ok(event),
                Ok(Err(_)) => Err(WaitError::Closed(kind)),
                Err(_) => {
                    self.unsubscribe(id);
                    Err(WaitError::Timeout(duration, kind))
                }
            },
            None => rx.await.map_err(|_| WaitError::Closed(kind)),
        }
    }

    /// Snapshot of history entries matching the filter, chronological.
    pub fn history(&self, filter: &HistoryFilter) -> Vec<BusEvent> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let matched: Vec<BusEvent> =
            inner.history.iter().filter(|e| filter.matches(e)).cloned().collect();
        match filter.limit {
            Some(limit) if matched.len() > limit => {
                matched[matched.len() - limit..].to_vec()
            }
            _ => matched,
        }
    }

    /// Number of events currently retained.
    pub fn history_len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.history.len()
    }

    /// Dispatch fire-and-forget async work whose eventual failure is
    /// captured and republished as `system:error` for `component`.
    pub fn spawn_guarded<F>(self: &Arc<Self>, component: &str, correlation_id: Option<Uuid>, fut: F)
    where
        F: std::future::Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        let bus = Arc::clone(self);
        let component = component.to_string();
        tokio::spawn(async move {
            if let Err(err) = fut.await {
                tracing::warn!(component = %component, error = %err, "background task failed");
                let event = BusEvent {
                    payload: EventPayload::SystemError {
                        component,
                        message: err.to_string(),
                    },
                    timestamp: Utc::now(),
                    correlation_id,
                };
                bus.emit(event);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn spawned(session: &str) -> EventPayload {
        EventPayload::AgentSpawned {
            session_id: session.to_string(),
            task_id: Uuid::new_v4(),
            model: "sonnet".to_string(),
            parent_session_id: None,
        }
    }

    #[test]
    fn test_subscribe_and_emit_in_order() {
        let bus = EventBus::with_defaults();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe(EventKind::AgentSpawned, move |_| {
            o1.lock().unwrap().push(1);
            Ok(())
        });
        let o2 = order.clone();
        bus.subscribe(EventKind::AgentSpawned, move |_| {
            o2.lock().unwrap().push(2);
            Ok(())
        });

        bus.publish(spawned("s1"));
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_unsubscribe_restores_behavior() {
        let bus = EventBus::with_defaults();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let id = bus.subscribe(EventKind::AgentSpawned, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        bus.publish(spawned("s1"));
        bus.unsubscribe(id);
        bus.publish(spawned("s2"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscribe_once_fires_at_most_once() {
        let bus = EventBus::with_defaults();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        bus.subscribe_once(EventKind::AgentSpawned, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(spawned("s1"));
        bus.publish(spawned("s2"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_handler_does_not_block_others() {
        let bus = EventBus::with_defaults();
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe(EventKind::AgentSpawned, |_| Err(anyhow::anyhow!("boom")));
        let c = count.clone();
        bus.subscribe(EventKind::AgentSpawned, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(spawned("s1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_failure_republished_as_system_error() {
        let bus = EventBus::with_defaults();
        let errors = Arc::new(Mutex::new(Vec::new()));

        let e = errors.clone();
        bus.subscribe(EventKind::SystemError, move |event| {
            if let EventPayload::SystemError { component, .. } = &event.payload {
                e.lock().unwrap().push(component.clone());
            }
            Ok(())
        });
        bus.subscribe(EventKind::AgentSpawned, |_| Err(anyhow::anyhow!("boom")));

        let correlation = Uuid::new_v4();
        bus.publish_correlated(spawned("s1"), correlation);

        assert_eq!(*errors.lock().unwrap(), vec!["event-bus".to_string()]);
        let history = bus.history(&HistoryFilter::default().kinds([EventKind::SystemError]));
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].correlation_id, Some(correlation));
    }

    #[test]
    fn test_failing_system_error_handler_does_not_recurse() {
        let bus = EventBus::with_defaults();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        bus.subscribe(EventKind::SystemError, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("handler is itself broken"))
        });

        bus.publish(EventPayload::SystemError {
            component: "test".to_string(),
            message: "original".to_string(),
        });

        // Invoked exactly once for the original event; the guard stops
        // the failure from being republished.
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pattern_subscription_matches_family() {
        let bus = EventBus::with_defaults();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        bus.subscribe_pattern(Regex::new("^agent:").unwrap(), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(spawned("s1"));
        bus.publish(EventPayload::SystemStarted);
        bus.publish(EventPayload::AgentBlocked {
            session_id: "s1".to_string(),
            reason: "stuck".to_string(),
        });

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_history_ring_buffer_drops_oldest() {
        let bus = EventBus::new(EventBusConfig { history_capacity: 3 });
        for i in 0..5 {
            bus.publish(spawned(&format!("s{i}")));
        }

        let history = bus.history(&HistoryFilter::default());
        assert_eq!(history.len(), 3);
        // The oldest retained entry is the third emission.
        match &history[0].payload {
            EventPayload::AgentSpawned { session_id, .. } => assert_eq!(session_id, "s2"),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_history_limit_returns_most_recent() {
        let bus = EventBus::with_defaults();
        for i in 0..4 {
            bus.publish(spawned(&format!("s{i}")));
        }

        let history = bus.history(
            &HistoryFilter::default().kinds([EventKind::AgentSpawned]).limit(1),
        );
        assert_eq!(history.len(), 1);
        match &history[0].payload {
            EventPayload::AgentSpawned { session_id, .. } => assert_eq!(session_id, "s3"),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wait_for_resolves_on_emission() {
        let bus = Arc::new(EventBus::with_defaults());

        let waiter = {
            let bus = bus.clone();
            tokio::spawn(async move {
                bus.wait_for(EventKind::SystemStarted, Some(std::time::Duration::from_secs(5)))
                    .await
            })
        };
        // Give the waiter a chance to register.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        bus.publish(EventPayload::SystemStarted);

        let event = waiter.await.unwrap().unwrap();
        assert_eq!(event.kind(), EventKind::SystemStarted);
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let bus = EventBus::with_defaults();
        let result = bus
            .wait_for(EventKind::SystemStarted, Some(std::time::Duration::from_millis(20)))
            .await;
        assert!(matches!(result, Err(WaitError::Timeout(_, EventKind::SystemStarted))));
    }

    #[tokio::test]
    async fn test_spawn_guarded_routes_failure_to_system_error() {
        let bus = Arc::new(EventBus::with_defaults());
        bus.spawn_guarded("notifier", None, async { Err(anyhow::anyhow!("send failed")) });

        let event = bus
            .wait_for(EventKind::SystemError, Some(std::time::Duration::from_secs(5)))
            .await
            .unwrap();
        match event.payload {
            EventPayload::SystemError { component, message } => {
                assert_eq!(component, "notifier");
                assert!(message.contains("send failed"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
