//! Kernel services: the event bus, the capacity/reservation contract,
//! the safety monitors, and the orchestration kernel itself.

pub mod approval_gate;
pub mod capacity;
pub mod circuit_breaker;
pub mod db_health;
pub mod event_bus;
pub mod orchestrator;
pub mod preflight;
pub mod pricing;
pub mod productivity;
pub mod retry;
pub mod scheduler;
pub mod spend_monitor;
pub mod state_store;

pub use approval_gate::{Admissibility, ApprovalCallback, TaskApprovalGate};
pub use capacity::{CapacityTracker, TierCapacity};
pub use circuit_breaker::{
    BreakerMode, BreakerSnapshot, CircuitBreaker, TripCallback, TripReason,
};
pub use db_health::{
    default_db_error_classifier, DbErrorClassifier, DbHealthMonitor, DbHealthSnapshot, HealthProbe,
};
pub use event_bus::{
    BusEvent, EventBus, EventBusConfig, EventKind, EventPayload, HistoryFilter, SubscriptionId,
    WaitError,
};
pub use orchestrator::{KernelConfig, KernelPhase, KernelStats, Orchestrator};
pub use preflight::{
    AutoConfirmer, Confirmer, PreFlightChecker, PreFlightResult, PreFlightWarning,
};
pub use pricing::{estimate_cost, estimate_cost_for_total, get_model_pricing, ModelPricing};
pub use productivity::{
    AlertLevel, OutputCounts, OutputKind, ProductivityAlert, ProductivityMonitor,
    ProductivitySnapshot, TaskOutcome,
};
pub use retry::RetryPolicy;
pub use scheduler::{
    AdmissibleFilter, BacklogScheduler, ScheduleOutcome, ScheduleStatus, Scheduler, SchedulerStats,
};
pub use spend_monitor::{BudgetAlert, BudgetWindowKind, SpendMonitor, SpendSnapshot};
pub use state_store::StateStore;
