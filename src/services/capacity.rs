//! Per-model capacity ledger with strict release discipline.
//!
//! Invariants: `current == |reserved_by|`, `current <= limit`, and every
//! reserved session corresponds to a live agent record (restored by
//! [`CapacityTracker::sync`] after crash recovery).

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::domain::models::AgentRecord;
use crate::services::event_bus::{EventBus, EventPayload};

/// Snapshot of one tier's ledger entry.
#[derive(Debug, Clone, Serialize)]
pub struct TierCapacity {
    pub limit: usize,
    pub current: usize,
    pub reserved_by: Vec<String>,
}

struct Inner {
    limits: HashMap<String, usize>,
    reserved: HashMap<String, HashSet<String>>,
    /// Cap on concurrent sessions across all tiers; None = unbounded.
    total_limit: Option<usize>,
}

impl Inner {
    fn total_reserved(&self) -> usize {
        self.reserved.values().map(HashSet::len).sum()
    }
}

/// Reservation counters per model tier.
pub struct CapacityTracker {
    inner: Mutex<Inner>,
    bus: Option<Arc<EventBus>>,
}

impl CapacityTracker {
    pub fn new(limits: HashMap<String, usize>) -> Self {
        Self {
            inner: Mutex::new(Inner { limits, reserved: HashMap::new(), total_limit: None }),
            bus: None,
        }
    }

    /// Bound concurrent sessions across all tiers.
    pub fn with_total_limit(self, total: usize) -> Self {
        {
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            inner.total_limit = Some(total);
        }
        self
    }

    /// Wire capacity edge transitions (`capacity:exhausted` /
    /// `capacity:available`) onto the bus.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Reserve a slot for `session_id` on `model`. Returns false when the
    /// tier is at its limit or the model is unknown (limit 0).
    pub fn try_reserve(&self, model: &str, session_id: &str) -> bool {
        let (reserved_ok, exhausted) = {
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let limit = inner.limits.get(model).copied().unwrap_or(0);
            let at_total = inner.total_limit.is_some_and(|t| inner.total_reserved() >= t);
            let set = inner.reserved.entry(model.to_string()).or_default();
            if set.len() >= limit || at_total {
                (false, false)
            } else {
                let inserted = set.insert(session_id.to_string());
                if !inserted {
                    tracing::error!(
                        model = %model,
                        session_id = %session_id,
                        "duplicate reservation for session; ledger unchanged"
                    );
                }
                (inserted, set.len() >= limit)
            }
        };

        if reserved_ok && exhausted {
            if let Some(ref bus) = self.bus {
                let limit = self.limit_for(model);
                bus.publish(EventPayload::CapacityExhausted {
                    model: model.to_string(),
                    limit,
                });
            }
        }
        reserved_ok
    }

    /// Release the slot held by `session_id`. Idempotent: unknown
    /// sessions and models are a silent no-op.
    pub fn release(&self, model: &str, session_id: &str) {
        let freed_from_full = {
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let limit = inner.limits.get(model).copied().unwrap_or(0);
            match inner.reserved.get_mut(model) {
                Some(set) => {
                    let was_full = set.len() >= limit && limit > 0;
                    set.remove(session_id) && was_full
                }
                None => false,
            }
        };

        if freed_from_full {
            if let Some(ref bus) = self.bus {
                let available = self.available(model);
                bus.publish(EventPayload::CapacityAvailable {
                    model: model.to_string(),
                    available,
                });
            }
        }
    }

    /// Reconcile the ledger against the live agent set after recovery.
    /// Existing reservations are replaced wholesale.
    pub fn sync(&self, active: &[AgentRecord]) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.reserved.clear();
        for agent in active {
            inner
                .reserved
                .entry(agent.model.clone())
                .or_default()
                .insert(agent.session_id.clone());
        }
        for (model, set) in &inner.reserved {
            let limit = inner.limits.get(model).copied().unwrap_or(0);
            if set.len() > limit {
                tracing::error!(
                    model = %model,
                    reserved = set.len(),
                    limit,
                    "recovered reservations exceed limit"
                );
            }
        }
    }

    /// Free slots for a tier (respecting the total cap).
    pub fn available(&self, model: &str) -> usize {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let limit = inner.limits.get(model).copied().unwrap_or(0);
        let used = inner.reserved.get(model).map_or(0, HashSet::len);
        let tier_free = limit.saturating_sub(used);
        match inner.total_limit {
            Some(total) => tier_free.min(total.saturating_sub(inner.total_reserved())),
            None => tier_free,
        }
    }

    /// True when any tier still has a free slot.
    pub fn any_available(&self) -> bool {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if inner.total_limit.is_some_and(|t| inner.total_reserved() >= t) {
            return false;
        }
        inner.limits.iter().any(|(model, limit)| {
            let used = inner.reserved.get(model).map_or(0, HashSet::len);
            used < *limit
        })
    }

    fn limit_for(&self, model: &str) -> usize {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.limits.get(model).copied().unwrap_or(0)
    }

    /// Deep-copied snapshot of every tier, sorted by model name.
    pub fn snapshot(&self) -> Vec<(String, TierCapacity)> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut tiers: Vec<(String, TierCapacity)> = inner
            .limits
            .iter()
            .map(|(model, limit)| {
                let mut reserved_by: Vec<String> = inner
                    .reserved
                    .get(model)
                    .map(|s| s.iter().cloned().collect())
                    .unwrap_or_default();
                reserved_by.sort();
                (
                    model.clone(),
                    TierCapacity { limit: *limit, current: reserved_by.len(), reserved_by },
                )
            })
            .collect();
        tiers.sort_by(|a, b| a.0.cmp(&b.0));
        tiers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn tracker(limit: usize) -> CapacityTracker {
        CapacityTracker::new(HashMap::from([("sonnet".to_string(), limit)]))
    }

    #[test]
    fn test_reserve_up_to_limit() {
        let t = tracker(2);
        assert!(t.try_reserve("sonnet", "s1"));
        assert!(t.try_reserve("sonnet", "s2"));
        assert!(!t.try_reserve("sonnet", "s3"));
        assert_eq!(t.available("sonnet"), 0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let t = tracker(1);
        assert!(t.try_reserve("sonnet", "s1"));
        t.release("sonnet", "s1");
        t.release("sonnet", "s1");
        t.release("sonnet", "never-reserved");
        t.release("opus", "s1");
        assert_eq!(t.available("sonnet"), 1);
    }

    #[test]
    fn test_unknown_model_has_no_capacity() {
        let t = tracker(2);
        assert!(!t.try_reserve("opus", "s1"));
    }

    #[test]
    fn test_duplicate_reservation_rejected() {
        let t = tracker(3);
        assert!(t.try_reserve("sonnet", "s1"));
        assert!(!t.try_reserve("sonnet", "s1"));
        assert_eq!(t.available("sonnet"), 2);
    }

    #[test]
    fn test_sync_rebuilds_ledger_from_agents() {
        let t = tracker(3);
        assert!(t.try_reserve("sonnet", "stale"));

        let agents = vec![
            AgentRecord::new("s1", Uuid::new_v4(), "sonnet"),
            AgentRecord::new("s2", Uuid::new_v4(), "sonnet"),
        ];
        t.sync(&agents);

        assert_eq!(t.available("sonnet"), 1);
        let snapshot = t.snapshot();
        assert_eq!(snapshot[0].1.reserved_by, vec!["s1".to_string(), "s2".to_string()]);
    }

    #[test]
    fn test_total_limit_caps_across_tiers() {
        let t = CapacityTracker::new(HashMap::from([
            ("sonnet".to_string(), 3),
            ("haiku".to_string(), 3),
        ]))
        .with_total_limit(2);
        assert!(t.try_reserve("sonnet", "s1"));
        assert!(t.try_reserve("haiku", "h1"));
        assert!(!t.try_reserve("haiku", "h2"));
        assert!(!t.any_available());
        assert_eq!(t.available("sonnet"), 0);
    }

    #[test]
    fn test_exhausted_and_available_events() {
        let bus = Arc::new(EventBus::with_defaults());
        let t = tracker(1).with_event_bus(bus.clone());

        assert!(t.try_reserve("sonnet", "s1"));
        t.release("sonnet", "s1");

        use crate::services::event_bus::{EventKind, HistoryFilter};
        let exhausted = bus.history(&HistoryFilter::default().kinds([EventKind::CapacityExhausted]));
        let available = bus.history(&HistoryFilter::default().kinds([EventKind::CapacityAvailable]));
        assert_eq!(exhausted.len(), 1);
        assert_eq!(available.len(), 1);
    }
}
