//! Terminal output helpers: tables for humans, JSON for machines.

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Table};
use console::style;

use crate::domain::models::{AgentRecord, ApprovalEntry, BacklogSummary, BacklogTask, Project};
use crate::services::capacity::TierCapacity;

use super::types::OutputFormat;

/// Print a serializable result in the requested format, falling back to
/// the provided text rendering.
pub fn print<T: serde::Serialize>(format: OutputFormat, value: &T, text: impl FnOnce() -> String) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{json}"),
            Err(err) => eprintln!("Error: {err}"),
        },
        OutputFormat::Text => println!("{}", text()),
    }
}

pub fn tasks_table(tasks: &[BacklogTask]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(["ID", "Title", "Model", "Prio", "Confirmed", "Status"]);
    for task in tasks {
        table.add_row([
            Cell::new(short_id(&task.id.to_string())),
            Cell::new(&task.title),
            Cell::new(&task.model),
            Cell::new(task.priority),
            Cell::new(if task.priority_confirmed { "yes" } else { "no" }),
            Cell::new(task.status),
        ]);
    }
    table.to_string()
}

pub fn projects_table(projects: &[Project]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(["ID", "Name", "State"]);
    for project in projects {
        table.add_row([
            Cell::new(short_id(&project.id.to_string())),
            Cell::new(&project.name),
            Cell::new(if project.paused { "paused" } else { "active" }),
        ]);
    }
    table.to_string()
}

pub fn agents_table(agents: &[AgentRecord]) -> String {
    if agents.is_empty() {
        return format!("{}", style("No active agents.").dim());
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(["Session", "Task", "Model", "Status", "Since", "Blocker"]);
    for agent in agents {
        table.add_row([
            Cell::new(&agent.session_id),
            Cell::new(short_id(&agent.task_id.to_string())),
            Cell::new(&agent.model),
            Cell::new(agent.status),
            Cell::new(agent.started_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(agent.blocker_reason.as_deref().unwrap_or("-")),
        ]);
    }
    table.to_string()
}

pub fn capacity_table(tiers: &[(String, TierCapacity)]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(["Model", "In use", "Limit", "Sessions"]);
    for (model, tier) in tiers {
        table.add_row([
            Cell::new(model),
            Cell::new(tier.current),
            Cell::new(tier.limit),
            Cell::new(tier.reserved_by.join(", ")),
        ]);
    }
    table.to_string()
}

pub fn approvals_table(entries: &[ApprovalEntry]) -> String {
    if entries.is_empty() {
        return format!("{}", style("No proposals.").dim());
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(["#", "Task", "Requested", "Status", "By", "Reason"]);
    for (index, entry) in entries.iter().enumerate() {
        table.add_row([
            Cell::new(index + 1),
            Cell::new(short_id(&entry.task_id.to_string())),
            Cell::new(entry.requested_at.format("%Y-%m-%d %H:%M")),
            Cell::new(entry.status),
            Cell::new(entry.responded_by.as_deref().unwrap_or("-")),
            Cell::new(entry.reason.as_deref().unwrap_or("-")),
        ]);
    }
    table.to_string()
}

pub fn summary_text(summary: &BacklogSummary) -> String {
    format!(
        "Backlog: {} total\n  pending {} / ready {} / running {}\n  completed {} / failed {} / cancelled {}\n  unconfirmed priority {} / missing estimates {}",
        summary.total,
        summary.pending,
        summary.ready,
        summary.running,
        summary.completed,
        summary.failed,
        summary.cancelled,
        summary.unconfirmed_priority,
        summary.missing_estimates,
    )
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}
