//! One-shot startup validation over the current backlog.
//!
//! Produces a [`PreFlightResult`] with the warning list; when user
//! confirmation is configured, a summary is sent and an explicit
//! approve/reject decision is awaited. A confirmation timeout counts as
//! rejection.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::config::PreFlightConfig;
use crate::domain::ports::TaskRepository;
use crate::services::pricing;

/// Markers that suggest a task is leftover test data.
const TEST_DATA_MARKERS: &[&str] = &[
    "test task",
    "dummy",
    "lorem ipsum",
    "asdf",
    "placeholder",
    "delete me",
    "do not run",
];

/// Built-in tier limits; anything above these is flagged as elevated.
const DEFAULT_TIER_LIMITS: &[(&str, usize)] = &[("opus", 1), ("sonnet", 3), ("haiku", 5)];

/// One pre-flight warning.
#[derive(Debug, Clone, PartialEq)]
pub enum PreFlightWarning {
    QueueDepth { depth: usize, threshold: usize },
    TestDataPattern { task_id: Uuid, title: String, marker: String },
    MissingEstimates { count: usize },
    UnconfirmedPriorities { count: usize },
    ElevatedLimit { model: String, limit: usize, default: usize },
}

impl std::fmt::Display for PreFlightWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QueueDepth { depth, threshold } => {
                write!(f, "queue depth {depth} exceeds {threshold}")
            }
            Self::TestDataPattern { title, marker, .. } => {
                write!(f, "task '{title}' looks like test data (matched '{marker}')")
            }
            Self::MissingEstimates { count } => {
                write!(f, "{count} ready task(s) have no token estimate")
            }
            Self::UnconfirmedPriorities { count } => {
                write!(f, "{count} ready task(s) have unconfirmed priority")
            }
            Self::ElevatedLimit { model, limit, default } => {
                write!(f, "{model} session limit {limit} is above the default {default}")
            }
        }
    }
}

/// Outcome of the pre-flight pass.
#[derive(Debug, Clone)]
pub struct PreFlightResult {
    pub passed: bool,
    pub warnings: Vec<PreFlightWarning>,
    pub queue_depth: usize,
    pub estimated_cost_usd: f64,
}

impl PreFlightResult {
    /// Human-readable summary used for the confirmation prompt.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Pre-flight: {} ready task(s), estimated cost ${:.2}",
            self.queue_depth, self.estimated_cost_usd,
        );
        if self.warnings.is_empty() {
            out.push_str("\nNo warnings.");
        } else {
            out.push_str(&format!("\n{} warning(s):", self.warnings.len()));
            for warning in &self.warnings {
                out.push_str(&format!("\n  - {warning}"));
            }
        }
        out
    }
}

/// Go/no-go decision channel for pre-flight confirmation.
#[async_trait]
pub trait Confirmer: Send + Sync {
    /// Present the summary and return the explicit decision.
    async fn confirm(&self, summary: &str) -> bool;
}

/// Confirmer that approves everything; used when confirmation is not
/// required and in tests.
pub struct AutoConfirmer;

#[async_trait]
impl Confirmer for AutoConfirmer {
    async fn confirm(&self, _summary: &str) -> bool {
        true
    }
}

/// The pre-flight checker.
pub struct PreFlightChecker {
    config: PreFlightConfig,
    model_limits: HashMap<String, usize>,
    repo: Arc<dyn TaskRepository>,
}

impl PreFlightChecker {
    pub fn new(
        config: PreFlightConfig,
        model_limits: HashMap<String, usize>,
        repo: Arc<dyn TaskRepository>,
    ) -> Self {
        Self { config, model_limits, repo }
    }

    /// Run the checks over the current backlog.
    pub async fn run(&self) -> DomainResult<PreFlightResult> {
        let ready = self.repo.fetch_ready(10_000).await?;
        let summary = self.repo.backlog_summary().await?;
        let mut warnings = Vec::new();

        if ready.len() > self.config.queue_depth_warning {
            warnings.push(PreFlightWarning::QueueDepth {
                depth: ready.len(),
                threshold: self.config.queue_depth_warning,
            });
        }

        for task in &ready {
            let haystack = format!("{} {}", task.title, task.description).to_lowercase();
            if let Some(marker) = TEST_DATA_MARKERS.iter().find(|m| haystack.contains(**m)) {
                warnings.push(PreFlightWarning::TestDataPattern {
                    task_id: task.id,
                    title: task.title.clone(),
                    marker: (*marker).to_string(),
                });
            }
        }

        let missing = ready.iter().filter(|t| t.estimated_tokens.is_none()).count();
        if missing > 0 {
            warnings.push(PreFlightWarning::MissingEstimates { count: missing });
        }

        if summary.unconfirmed_priority > 0 {
            warnings.push(PreFlightWarning::UnconfirmedPriorities {
                count: summary.unconfirmed_priority,
            });
        }

        for (model, default) in DEFAULT_TIER_LIMITS {
            if let Some(limit) = self.model_limits.get(*model) {
                if *limit > *default {
                    warnings.push(PreFlightWarning::ElevatedLimit {
                        model: (*model).to_string(),
                        limit: *limit,
                        default: *default,
                    });
                }
            }
        }

        let estimated_cost_usd = ready
            .iter()
            .filter_map(|t| {
                t.estimated_tokens
                    .and_then(|tokens| pricing::estimate_cost_for_total(&t.model, tokens))
            })
            .sum();

        Ok(PreFlightResult {
            passed: warnings.is_empty(),
            warnings,
            queue_depth: ready.len(),
            estimated_cost_usd,
        })
    }

    /// Run the checks and, when configured, wait for an explicit
    /// confirmation. Returns `Ok(false)` when the operator rejects or
    /// the confirmation window times out.
    pub async fn run_with_confirmation(
        &self,
        confirmer: &dyn Confirmer,
    ) -> DomainResult<(PreFlightResult, bool)> {
        let result = self.run().await?;
        if !self.config.require_confirmation {
            return Ok((result, true));
        }

        let window = Duration::from_secs(self.config.confirmation_timeout_secs);
        let approved =
            match tokio::time::timeout(window, confirmer.confirm(&result.summary())).await {
                Ok(decision) => decision,
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = self.config.confirmation_timeout_secs,
                        "pre-flight confirmation timed out; treating as rejection"
                    );
                    false
                }
            };
        Ok((result, approved))
    }
}
