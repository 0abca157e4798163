//! `tc status`: report the persisted kernel state.

use anyhow::Result;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde_json::json;

use crate::cli::output;
use crate::cli::types::OutputFormat;
use crate::domain::models::Config;
use crate::services::state_store::StateStore;

pub fn handle_status(config: &Config, format: OutputFormat) -> Result<()> {
    let store = StateStore::new(config.orchestrator.runtime_dir.clone());
    let state = store.load();
    let pid = store.read_pid();
    let alive = pid.is_some_and(|p| kill(Pid::from_raw(p), None).is_ok());

    let phase = match &state {
        Some(s) if s.is_running && alive => {
            if s.is_paused {
                "paused"
            } else {
                "running"
            }
        }
        Some(s) if s.is_running => "stopped (stale state)",
        _ => "stopped",
    };

    let agents = state.as_ref().map(|s| s.active_agents.clone()).unwrap_or_default();
    let value = json!({
        "phase": phase,
        "pid": pid,
        "active_agents": agents,
        "last_checkpoint": state.as_ref().map(|s| s.last_checkpoint),
    });
    output::print(format, &value, || {
        let mut text = format!("TrafficControl: {phase}");
        if let Some(pid) = pid {
            text.push_str(&format!(" (pid {pid})"));
        }
        if let Some(ref s) = state {
            text.push_str(&format!("\nLast checkpoint: {}", s.last_checkpoint));
        }
        text.push('\n');
        text.push_str(&output::agents_table(&agents));
        text
    });
    Ok(())
}
