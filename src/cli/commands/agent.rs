//! `tc agent`: active sessions and per-model capacity.

use anyhow::Result;
use serde_json::json;
use std::collections::HashMap;

use crate::cli::output;
use crate::cli::types::OutputFormat;
use crate::domain::models::Config;
use crate::services::capacity::TierCapacity;
use crate::services::state_store::StateStore;

pub fn handle_list(config: &Config, format: OutputFormat) -> Result<()> {
    let store = StateStore::new(config.orchestrator.runtime_dir.clone());
    let agents = store.load().map(|s| s.active_agents).unwrap_or_default();
    output::print(format, &agents, || output::agents_table(&agents));
    Ok(())
}

pub fn handle_capacity(config: &Config, format: OutputFormat) -> Result<()> {
    let store = StateStore::new(config.orchestrator.runtime_dir.clone());
    let agents = store.load().map(|s| s.active_agents).unwrap_or_default();

    let mut in_use: HashMap<&str, Vec<String>> = HashMap::new();
    for agent in &agents {
        in_use.entry(agent.model.as_str()).or_default().push(agent.session_id.clone());
    }

    let mut tiers: Vec<(String, TierCapacity)> = config
        .orchestrator
        .model_limits
        .iter()
        .map(|(model, limit)| {
            let mut reserved_by = in_use.remove(model.as_str()).unwrap_or_default();
            reserved_by.sort();
            (
                model.clone(),
                TierCapacity { limit: *limit, current: reserved_by.len(), reserved_by },
            )
        })
        .collect();
    tiers.sort_by(|a, b| a.0.cmp(&b.0));

    let value = json!({
        "max_concurrent_agents": config.orchestrator.max_concurrent_agents,
        "tiers": tiers,
    });
    output::print(format, &value, || output::capacity_table(&tiers));
    Ok(())
}
