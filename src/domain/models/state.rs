//! Persisted orchestration state, reloaded across restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::agent::AgentRecord;

/// Durable snapshot of the kernel: written on stop and periodically,
/// loaded best-effort at start. Unknown fields are ignored so older
/// binaries can read files written by newer ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationState {
    pub is_running: bool,
    pub is_paused: bool,
    #[serde(default)]
    pub active_agents: Vec<AgentRecord>,
    pub last_checkpoint: DateTime<Utc>,
}

impl Default for OrchestrationState {
    fn default() -> Self {
        Self {
            is_running: false,
            is_paused: false,
            active_agents: Vec::new(),
            last_checkpoint: Utc::now(),
        }
    }
}

impl OrchestrationState {
    pub fn checkpoint(&mut self) {
        self.last_checkpoint = Utc::now();
    }
}
