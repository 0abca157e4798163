//! Command handlers for the `tc` binary.

pub mod agent;
pub mod backlog;
pub mod config_cmd;
pub mod project;
pub mod proposal;
pub mod report;
pub mod start;
pub mod status;
pub mod stop;
pub mod task;

use std::sync::Arc;

use crate::domain::models::Config;
use crate::domain::ports::TaskRepository;
use crate::infrastructure::backlog::{InMemoryTaskRepository, RestTaskRepository};

/// Build the backlog repository from configuration: REST when an
/// endpoint is configured, otherwise process-local memory.
pub fn build_repository(config: &Config) -> Arc<dyn TaskRepository> {
    match (&config.database.url, &config.database.service_key) {
        (Some(url), Some(key)) => Arc::new(RestTaskRepository::new(url.clone(), key.clone())),
        (Some(_), None) => {
            tracing::warn!("backlog url configured without service key; using in-memory store");
            Arc::new(InMemoryTaskRepository::new())
        }
        _ => Arc::new(InMemoryTaskRepository::new()),
    }
}
