//! Property tests for the capacity ledger and the event history ring.

use proptest::prelude::*;
use std::collections::HashMap;
use trafficcontrol::services::capacity::CapacityTracker;
use trafficcontrol::services::event_bus::{
    EventBus, EventBusConfig, EventPayload, HistoryFilter,
};

#[derive(Debug, Clone)]
enum Op {
    Reserve(u8),
    Release(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..8).prop_map(Op::Reserve),
        (0u8..8).prop_map(Op::Release),
    ]
}

proptest! {
    /// Under any interleaving of reserves and releases, the ledger
    /// never exceeds its limit and `current` always equals the number
    /// of distinct reserved sessions.
    #[test]
    fn capacity_invariants_hold(ops in proptest::collection::vec(op_strategy(), 0..64), limit in 0usize..4) {
        let tracker = CapacityTracker::new(HashMap::from([("sonnet".to_string(), limit)]));
        let mut model = std::collections::HashSet::new();

        for op in ops {
            match op {
                Op::Reserve(n) => {
                    let session = format!("s{n}");
                    let reserved = tracker.try_reserve("sonnet", &session);
                    if reserved {
                        prop_assert!(model.insert(session));
                        prop_assert!(model.len() <= limit);
                    } else {
                        prop_assert!(model.len() >= limit || model.contains(&session));
                    }
                }
                Op::Release(n) => {
                    let session = format!("s{n}");
                    tracker.release("sonnet", &session);
                    model.remove(&session);
                }
            }

            let snapshot = tracker.snapshot();
            let (_, tier) = &snapshot[0];
            prop_assert_eq!(tier.current, tier.reserved_by.len());
            prop_assert_eq!(tier.current, model.len());
            prop_assert!(tier.current <= limit);
        }
    }

    /// The history ring retains at most its capacity, dropping oldest
    /// first and preserving emission order.
    #[test]
    fn history_ring_bounds_and_order(total in 0usize..40, capacity in 1usize..16) {
        let bus = EventBus::new(EventBusConfig { history_capacity: capacity });
        for i in 0..total {
            bus.publish(EventPayload::TaskQueued {
                task_id: uuid::Uuid::new_v4(),
                title: format!("t{i}"),
            });
        }

        let history = bus.history(&HistoryFilter::default());
        prop_assert_eq!(history.len(), total.min(capacity));

        let titles: Vec<String> = history
            .iter()
            .map(|event| match &event.payload {
                EventPayload::TaskQueued { title, .. } => title.clone(),
                other => panic!("unexpected payload: {other:?}"),
            })
            .collect();
        let expected: Vec<String> = (total.saturating_sub(capacity)..total)
            .map(|i| format!("t{i}"))
            .collect();
        prop_assert_eq!(titles, expected);
    }
}
