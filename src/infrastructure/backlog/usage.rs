//! Usage-log stores: JSONL file (default) and in-memory (tests).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::UsageEntry;
use crate::domain::ports::UsageLogStore;

/// Append-only JSONL usage log on disk; one entry per line.
pub struct JsonlUsageLogStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlUsageLogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }
}

#[async_trait]
impl UsageLogStore for JsonlUsageLogStore {
    async fn append(&self, entry: &UsageEntry) -> DomainResult<()> {
        let line = serde_json::to_string(entry)?;
        let _guard = self.write_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DomainError::BacklogStore(format!("create {}: {e}", parent.display())))?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| DomainError::BacklogStore(format!("open {}: {e}", self.path.display())))?;
        writeln!(file, "{line}")
            .map_err(|e| DomainError::BacklogStore(format!("write {}: {e}", self.path.display())))
    }

    async fn list_since(&self, since: DateTime<Utc>) -> DomainResult<Vec<UsageEntry>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(DomainError::BacklogStore(format!(
                    "read {}: {err}",
                    self.path.display()
                )))
            }
        };
        let mut entries = Vec::new();
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<UsageEntry>(line) {
                Ok(entry) if entry.at >= since => entries.push(entry),
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "skipping malformed usage log line"),
            }
        }
        Ok(entries)
    }
}

/// In-memory usage log for tests.
#[derive(Default)]
pub struct MemoryUsageLogStore {
    entries: Mutex<Vec<UsageEntry>>,
}

impl MemoryUsageLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageLogStore for MemoryUsageLogStore {
    async fn append(&self, entry: &UsageEntry) -> DomainResult<()> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }

    async fn list_since(&self, since: DateTime<Utc>) -> DomainResult<Vec<UsageEntry>> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|e| e.at >= since)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn entry(cost: f64) -> UsageEntry {
        UsageEntry {
            session_id: "s1".to_string(),
            task_id: Uuid::new_v4(),
            model: "sonnet".to_string(),
            input_tokens: 100,
            output_tokens: 200,
            cost_usd: cost,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_jsonl_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlUsageLogStore::new(dir.path().join("usage.jsonl"));

        store.append(&entry(1.0)).await.unwrap();
        store.append(&entry(2.0)).await.unwrap();

        let all = store.list_since(Utc::now() - Duration::hours(1)).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].cost_usd, 2.0);
    }

    #[tokio::test]
    async fn test_jsonl_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlUsageLogStore::new(dir.path().join("missing.jsonl"));
        assert!(store.list_since(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_jsonl_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.jsonl");
        let store = JsonlUsageLogStore::new(&path);
        store.append(&entry(1.0)).await.unwrap();
        std::fs::write(&path, format!("{}\nnot json\n", std::fs::read_to_string(&path).unwrap()))
            .unwrap();
        store.append(&entry(2.0)).await.unwrap();

        let all = store.list_since(Utc::now() - Duration::hours(1)).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_list_since_filters_by_time() {
        let store = MemoryUsageLogStore::new();
        store.append(&entry(1.0)).await.unwrap();
        assert!(store.list_since(Utc::now() + Duration::hours(1)).await.unwrap().is_empty());
    }
}
