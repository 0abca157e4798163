//! Usage-log storage port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::UsageEntry;

/// Append-only persistence for billed agent work.
///
/// Writes are best-effort from the kernel's perspective: a failing
/// append is logged and swallowed, never raised into the tick.
#[async_trait]
pub trait UsageLogStore: Send + Sync {
    /// Append one entry.
    async fn append(&self, entry: &UsageEntry) -> DomainResult<()>;

    /// Entries at or after `since`, chronological order.
    async fn list_since(&self, since: DateTime<Utc>) -> DomainResult<Vec<UsageEntry>>;
}
