//! `tc backlog`: aggregate backlog counts.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::cli::output;
use crate::cli::types::OutputFormat;
use crate::domain::ports::TaskRepository;

pub async fn handle_summary(repo: &Arc<dyn TaskRepository>, format: OutputFormat) -> Result<()> {
    let summary = repo.backlog_summary().await.context("could not summarize backlog")?;
    output::print(format, &summary, || output::summary_text(&summary));
    Ok(())
}
