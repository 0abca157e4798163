//! `tc proposal`: list and answer approval proposals.

use anyhow::{bail, Context, Result};
use std::sync::Arc;

use crate::cli::output;
use crate::cli::types::OutputFormat;
use crate::domain::models::{ApprovalEntry, ApprovalResponse, ApprovalStatus};
use crate::domain::ports::TaskRepository;

pub async fn handle_list(repo: &Arc<dyn TaskRepository>, format: OutputFormat) -> Result<()> {
    let entries = repo.list_approvals().await.context("could not list proposals")?;
    output::print(format, &entries, || output::approvals_table(&entries));
    Ok(())
}

/// `tc proposal approve <idx|all>`: indexes are 1-based over the
/// pending entries as shown by `tc proposal list`.
pub async fn handle_approve(
    repo: &Arc<dyn TaskRepository>,
    format: OutputFormat,
    selector: &str,
) -> Result<()> {
    let pending = pending_entries(repo).await?;
    if pending.is_empty() {
        bail!("no pending proposals");
    }

    let selected: Vec<&ApprovalEntry> = if selector.eq_ignore_ascii_case("all") {
        pending.iter().collect()
    } else {
        vec![select_by_index(&pending, selector)?]
    };

    for entry in &selected {
        repo.submit_approval_response(&ApprovalResponse {
            task_id: entry.task_id,
            approved: true,
            responded_by: operator(),
            reason: None,
        })
        .await
        .context("could not submit approval")?;
    }

    let task_ids: Vec<_> = selected.iter().map(|e| e.task_id).collect();
    output::print(format, &serde_json::json!({ "approved": task_ids }), || {
        format!("Approved {} proposal(s)", task_ids.len())
    });
    Ok(())
}

/// `tc proposal reject <idx>:<reason>`.
pub async fn handle_reject(
    repo: &Arc<dyn TaskRepository>,
    format: OutputFormat,
    selector: &str,
) -> Result<()> {
    let Some((index, reason)) = selector.split_once(':') else {
        bail!("expected <idx>:<reason>, e.g. \"2:not this sprint\"");
    };
    let reason = reason.trim();
    if reason.is_empty() {
        bail!("a rejection reason is required");
    }

    let pending = pending_entries(repo).await?;
    let entry = select_by_index(&pending, index)?;
    repo.submit_approval_response(&ApprovalResponse {
        task_id: entry.task_id,
        approved: false,
        responded_by: operator(),
        reason: Some(reason.to_string()),
    })
    .await
    .context("could not submit rejection")?;

    output::print(
        format,
        &serde_json::json!({ "rejected": entry.task_id, "reason": reason }),
        || format!("Rejected proposal for task {}", entry.task_id),
    );
    Ok(())
}

async fn pending_entries(repo: &Arc<dyn TaskRepository>) -> Result<Vec<ApprovalEntry>> {
    Ok(repo
        .list_approvals()
        .await
        .context("could not list proposals")?
        .into_iter()
        .filter(|e| e.status == ApprovalStatus::Pending)
        .collect())
}

fn select_by_index<'a>(pending: &'a [ApprovalEntry], raw: &str) -> Result<&'a ApprovalEntry> {
    let index: usize = raw.trim().parse().context("proposal index must be a number or \"all\"")?;
    if index == 0 || index > pending.len() {
        bail!("proposal index {index} out of range (1..={})", pending.len());
    }
    Ok(&pending[index - 1])
}

fn operator() -> String {
    std::env::var("USER").unwrap_or_else(|_| "cli".to_string())
}
