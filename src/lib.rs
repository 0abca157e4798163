//! TrafficControl - autonomous orchestrator for AI coding agents.
//!
//! Dispatches agents of distinct model tiers against a persisted
//! backlog, subject to per-tier concurrency limits, budget limits,
//! productivity heuristics, and human approval gates. The core is a
//! single long-lived control loop composed with five safety systems:
//! circuit breaker, spend monitor, productivity monitor, database
//! health monitor, and the task approval gate.

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export the composition surface for embedders.
pub use domain::models::Config;
pub use infrastructure::config::ConfigLoader;
pub use services::{EventBus, KernelConfig, Orchestrator};
