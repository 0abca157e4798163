//! `tc project`: project listing and dispatch pause/resume.

use anyhow::{Context, Result};
use std::sync::Arc;
use uuid::Uuid;

use crate::cli::output;
use crate::cli::types::OutputFormat;
use crate::domain::ports::TaskRepository;

pub async fn handle_list(repo: &Arc<dyn TaskRepository>, format: OutputFormat) -> Result<()> {
    let projects = repo.list_projects().await.context("could not list projects")?;
    output::print(format, &projects, || output::projects_table(&projects));
    Ok(())
}

pub async fn handle_set_paused(
    repo: &Arc<dyn TaskRepository>,
    format: OutputFormat,
    project_id: Uuid,
    paused: bool,
) -> Result<()> {
    repo.set_project_paused(project_id, paused)
        .await
        .context("could not update project")?;
    let verb = if paused { "Paused" } else { "Resumed" };
    output::print(
        format,
        &serde_json::json!({ "project_id": project_id, "paused": paused }),
        || format!("{verb} project {project_id}"),
    );
    Ok(())
}
