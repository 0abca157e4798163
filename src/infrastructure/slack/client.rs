//! Slack Web API notifier.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::BacklogTask;
use crate::domain::ports::Notifier;
use crate::services::retry::RetryPolicy;

const SLACK_API_BASE: &str = "https://slack.com/api";

/// Slack API errors that will never succeed on retry.
const PERSISTENT_SLACK_ERRORS: &[&str] = &[
    "invalid_auth",
    "account_inactive",
    "token_revoked",
    "missing_scope",
    "channel_not_found",
    "not_in_channel",
];

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Notifier over `chat.postMessage`.
pub struct SlackNotifier {
    http: reqwest::Client,
    token: String,
    default_channel: String,
    base_url: String,
    retry: RetryPolicy,
}

impl SlackNotifier {
    pub fn new(token: impl Into<String>, default_channel: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.into(),
            default_channel: default_channel.into(),
            base_url: SLACK_API_BASE.to_string(),
            retry: RetryPolicy::new(2, 500, 5_000)
                .with_classifier(|err| !err.to_string().starts_with("persistent:")),
        }
    }

    /// Point the client at a different API base (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<String, anyhow::Error> {
        let mut body = json!({ "channel": channel, "text": text });
        if let Some(ts) = thread_ts {
            body["thread_ts"] = json!(ts);
        }

        let response = self
            .http
            .post(format!("{}/chat.postMessage", self.base_url))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let parsed: PostMessageResponse = response.json().await?;

        if !parsed.ok {
            let code = parsed.error.unwrap_or_else(|| "unknown_error".to_string());
            if PERSISTENT_SLACK_ERRORS.contains(&code.as_str()) {
                anyhow::bail!("persistent: slack rejected message: {code}");
            }
            anyhow::bail!("slack error: {code}");
        }
        Ok(parsed.ts.unwrap_or_default())
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> DomainResult<String> {
        self.retry
            .execute(|| self.post_message(channel, text, thread_ts))
            .await
            .map_err(|err| {
                let message = err.to_string();
                if message.starts_with("persistent:") {
                    DomainError::Denied(message)
                } else {
                    DomainError::Transport(message)
                }
            })
    }

    async fn send_approval_request(
        &self,
        task: &BacklogTask,
        message: &str,
    ) -> DomainResult<String> {
        let text = format!(
            "{message}\nReply with `tc proposal approve` / `tc proposal reject` (task `{}`).",
            task.id,
        );
        self.send_message(&self.default_channel, &text, None).await
    }
}
