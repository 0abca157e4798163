//! `tc task`: backlog task management.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use uuid::Uuid;

use crate::cli::output;
use crate::cli::types::OutputFormat;
use crate::domain::models::{BacklogTask, TaskStatus};
use crate::domain::ports::{TaskFilter, TaskRepository};

#[allow(clippy::too_many_arguments)]
pub async fn handle_add(
    repo: &Arc<dyn TaskRepository>,
    format: OutputFormat,
    title: String,
    description: String,
    model: String,
    priority: u8,
    confirmed: bool,
    project: Option<Uuid>,
    estimate: Option<u64>,
) -> Result<()> {
    if priority > 10 {
        bail!("priority must be between 0 and 10");
    }
    let mut task = BacklogTask::new(title, description, model).with_priority(priority, confirmed);
    if let Some(project_id) = project {
        task = task.with_project(project_id);
    }
    if let Some(tokens) = estimate {
        task = task.with_estimate(tokens);
    }
    repo.add_task(&task).await.context("could not add task")?;
    output::print(format, &task, || format!("Added task {} ({})", task.id, task.title));
    Ok(())
}

pub async fn handle_list(
    repo: &Arc<dyn TaskRepository>,
    format: OutputFormat,
    status: Option<String>,
    limit: usize,
) -> Result<()> {
    let status = match status {
        Some(raw) => Some(raw.parse::<TaskStatus>().map_err(|e| anyhow::anyhow!(e))?),
        None => None,
    };
    let tasks = repo
        .list_tasks(TaskFilter { status, limit: Some(limit), ..TaskFilter::default() })
        .await
        .context("could not list tasks")?;
    output::print(format, &tasks, || output::tasks_table(&tasks));
    Ok(())
}

pub async fn handle_cancel(
    repo: &Arc<dyn TaskRepository>,
    format: OutputFormat,
    task_id: Uuid,
) -> Result<()> {
    repo.cancel_task(task_id).await.context("could not cancel task")?;
    output::print(format, &serde_json::json!({ "cancelled": task_id }), || {
        format!("Cancelled task {task_id}")
    });
    Ok(())
}

pub async fn handle_update(
    repo: &Arc<dyn TaskRepository>,
    format: OutputFormat,
    task_id: Uuid,
    priority: Option<u8>,
    status: Option<String>,
    model: Option<String>,
    confirm: bool,
) -> Result<()> {
    let Some(mut task) = repo.get_task(task_id).await.context("could not load task")? else {
        bail!("task {task_id} not found");
    };
    if let Some(priority) = priority {
        if priority > 10 {
            bail!("priority must be between 0 and 10");
        }
        task.priority = priority;
    }
    if let Some(raw) = status {
        task.status = raw.parse::<TaskStatus>().map_err(|e| anyhow::anyhow!(e))?;
    }
    if let Some(model) = model {
        task.model = model;
    }
    if confirm {
        task.priority_confirmed = true;
    }
    task.updated_at = chrono::Utc::now();
    repo.update_task(&task).await.context("could not update task")?;
    output::print(format, &task, || format!("Updated task {task_id}"));
    Ok(())
}
