//! Backlog persistence adapters and the usage log.

pub mod memory;
pub mod rest;
pub mod runtime;
pub mod usage;

pub use memory::InMemoryTaskRepository;
pub use rest::RestTaskRepository;
pub use runtime::NullAgentRuntime;
pub use usage::{JsonlUsageLogStore, MemoryUsageLogStore};
