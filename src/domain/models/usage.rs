//! Append-only spend ledger entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One billed unit of agent work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEntry {
    pub session_id: String,
    pub task_id: Uuid,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub at: DateTime<Utc>,
}

impl UsageEntry {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}
