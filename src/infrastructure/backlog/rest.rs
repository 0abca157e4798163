//! REST backlog repository over a Supabase-style endpoint.
//!
//! Thin adapter: rows map 1:1 onto the domain models and every call
//! goes through the shared retry policy with the DB-shaped transience
//! classifier. Schema management lives with the backlog service, not
//! here.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::json;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ApprovalEntry, ApprovalResponse, ApprovalStatus, BacklogSummary, BacklogTask, Project,
    TaskStatus,
};
use crate::domain::ports::{TaskFilter, TaskRepository};
use crate::services::db_health::default_db_error_classifier;
use crate::services::retry::RetryPolicy;

const TASKS: &str = "tasks";
const PROJECTS: &str = "projects";
const APPROVALS: &str = "approvals";
const APPROVAL_RESPONSES: &str = "approval_responses";

/// Repository over the `rest/v1` surface of a Supabase project.
pub struct RestTaskRepository {
    http: reqwest::Client,
    base_url: String,
    service_key: String,
    retry: RetryPolicy,
}

impl RestTaskRepository {
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        let classifier = default_db_error_classifier();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
            retry: RetryPolicy::new(2, 500, 10_000)
                .with_classifier(move |err| classifier(&err.to_string())),
        }
    }

    fn endpoint(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.service_key) {
            headers.insert("apikey", value);
        }
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", self.service_key)) {
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        headers
    }

    async fn get_rows<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        query: &[(String, String)],
    ) -> DomainResult<Vec<T>> {
        let url = self.endpoint(table);
        self.retry
            .execute(|| async {
                let response = self
                    .http
                    .get(&url)
                    .headers(self.headers())
                    .query(query)
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(response.json::<Vec<T>>().await?)
            })
            .await
            .map_err(|err| DomainError::BacklogStore(err.to_string()))
    }

    async fn post_row(&self, table: &str, body: serde_json::Value) -> DomainResult<()> {
        let url = self.endpoint(table);
        self.retry
            .execute(|| async {
                self.http
                    .post(&url)
                    .headers(self.headers())
                    .json(&body)
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(())
            })
            .await
            .map_err(|err| DomainError::BacklogStore(err.to_string()))
    }

    async fn patch_rows(
        &self,
        table: &str,
        query: &[(String, String)],
        body: serde_json::Value,
    ) -> DomainResult<()> {
        let url = self.endpoint(table);
        self.retry
            .execute(|| async {
                self.http
                    .patch(&url)
                    .headers(self.headers())
                    .query(query)
                    .json(&body)
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(())
            })
            .await
            .map_err(|err| DomainError::BacklogStore(err.to_string()))
    }

    fn eq(column: &str, value: impl std::fmt::Display) -> (String, String) {
        (column.to_string(), format!("eq.{value}"))
    }
}

#[async_trait]
impl TaskRepository for RestTaskRepository {
    async fn add_task(&self, task: &BacklogTask) -> DomainResult<()> {
        self.post_row(TASKS, serde_json::to_value(task)?).await
    }

    async fn get_task(&self, id: Uuid) -> DomainResult<Option<BacklogTask>> {
        let rows: Vec<BacklogTask> = self.get_rows(TASKS, &[Self::eq("id", id)]).await?;
        Ok(rows.into_iter().next())
    }

    async fn update_task(&self, task: &BacklogTask) -> DomainResult<()> {
        self.patch_rows(TASKS, &[Self::eq("id", task.id)], serde_json::to_value(task)?).await
    }

    async fn cancel_task(&self, id: Uuid) -> DomainResult<()> {
        self.patch_rows(
            TASKS,
            &[Self::eq("id", id)],
            json!({ "status": TaskStatus::Cancelled, "updated_at": chrono::Utc::now() }),
        )
        .await
    }

    async fn list_tasks(&self, filter: TaskFilter) -> DomainResult<Vec<BacklogTask>> {
        let mut query = vec![(
            "order".to_string(),
            "priority.desc,created_at.asc".to_string(),
        )];
        if let Some(status) = filter.status {
            query.push(Self::eq("status", status));
        }
        if let Some(project_id) = filter.project_id {
            query.push(Self::eq("project_id", project_id));
        }
        if let Some(ref model) = filter.model {
            query.push(Self::eq("model", model));
        }
        if let Some(limit) = filter.limit {
            query.push(("limit".to_string(), limit.to_string()));
        }
        self.get_rows(TASKS, &query).await
    }

    async fn fetch_ready(&self, limit: usize) -> DomainResult<Vec<BacklogTask>> {
        // The backlog view already excludes paused projects; filter
        // again here so a stale view cannot leak one through.
        let paused: Vec<Uuid> = self
            .list_projects()
            .await?
            .into_iter()
            .filter(|p| p.paused)
            .map(|p| p.id)
            .collect();
        let tasks = self
            .list_tasks(TaskFilter {
                status: Some(TaskStatus::Ready),
                limit: Some(limit + paused.len().min(limit)),
                ..TaskFilter::default()
            })
            .await?;
        let mut ready: Vec<BacklogTask> = tasks
            .into_iter()
            .filter(|t| t.project_id.is_none_or(|p| !paused.contains(&p)))
            .collect();
        ready.truncate(limit);
        Ok(ready)
    }

    async fn list_projects(&self) -> DomainResult<Vec<Project>> {
        self.get_rows(PROJECTS, &[("order".to_string(), "name.asc".to_string())]).await
    }

    async fn set_project_paused(&self, project_id: Uuid, paused: bool) -> DomainResult<()> {
        self.patch_rows(PROJECTS, &[Self::eq("id", project_id)], json!({ "paused": paused }))
            .await
    }

    async fn backlog_summary(&self) -> DomainResult<BacklogSummary> {
        let tasks = self.list_tasks(TaskFilter::default()).await?;
        let mut summary = BacklogSummary { total: tasks.len(), ..BacklogSummary::default() };
        for task in &tasks {
            match task.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::Ready => summary.ready += 1,
                TaskStatus::Running => summary.running += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::Cancelled => summary.cancelled += 1,
            }
            if matches!(task.status, TaskStatus::Pending | TaskStatus::Ready) {
                if !task.priority_confirmed {
                    summary.unconfirmed_priority += 1;
                }
                if task.estimated_tokens.is_none() {
                    summary.missing_estimates += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn record_pending_approval(&self, entry: &ApprovalEntry) -> DomainResult<()> {
        self.post_row(APPROVALS, serde_json::to_value(entry)?).await
    }

    async fn list_approvals(&self) -> DomainResult<Vec<ApprovalEntry>> {
        self.get_rows(APPROVALS, &[("order".to_string(), "requested_at.desc".to_string())])
            .await
    }

    async fn submit_approval_response(&self, response: &ApprovalResponse) -> DomainResult<()> {
        self.post_row(APPROVAL_RESPONSES, serde_json::to_value(response)?).await?;
        let status = if response.approved { ApprovalStatus::Approved } else { ApprovalStatus::Rejected };
        self.patch_rows(
            APPROVALS,
            &[Self::eq("task_id", response.task_id)],
            json!({
                "status": status,
                "responded_by": response.responded_by,
                "reason": response.reason,
            }),
        )
        .await
    }

    async fn take_approval_responses(&self) -> DomainResult<Vec<ApprovalResponse>> {
        let responses: Vec<ApprovalResponse> = self
            .get_rows(APPROVAL_RESPONSES, &[Self::eq("consumed", "false")])
            .await?;
        if !responses.is_empty() {
            self.patch_rows(
                APPROVAL_RESPONSES,
                &[Self::eq("consumed", "false")],
                json!({ "consumed": true }),
            )
            .await?;
        }
        Ok(responses)
    }

    async fn health_probe(&self) -> DomainResult<()> {
        let _: Vec<serde_json::Value> = self
            .get_rows(TASKS, &[("limit".to_string(), "1".to_string())])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(server: &mockito::ServerGuard) -> RestTaskRepository {
        RestTaskRepository::new(server.url(), "service-key")
    }

    #[tokio::test]
    async fn test_get_task_sends_auth_headers() {
        let mut server = mockito::Server::new_async().await;
        let task = BacklogTask::new("t", "d", "sonnet");
        let body = serde_json::to_string(&vec![task.clone()]).unwrap();
        let mock = server
            .mock("GET", "/rest/v1/tasks")
            .match_query(mockito::Matcher::UrlEncoded("id".into(), format!("eq.{}", task.id)))
            .match_header("apikey", "service-key")
            .match_header("authorization", "Bearer service-key")
            .with_body(body)
            .create_async()
            .await;

        let fetched = repo(&server).get_task(task.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, task.id);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_health_probe_maps_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/rest/v1/tasks")
            .match_query(mockito::Matcher::Any)
            .with_status(503)
            .expect_at_least(1)
            .create_async()
            .await;

        let result = repo(&server).health_probe().await;
        assert!(matches!(result, Err(DomainError::BacklogStore(_))));
        mock.assert_async().await;
    }
}
