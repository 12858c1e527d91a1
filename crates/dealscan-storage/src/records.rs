use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealscan_core::{DealMetrics, IngestedRecord, Snapshot, Source, StoredRecord};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt stored row: {0}")]
    Corrupt(String),
}

/// One atomic write against the record store.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordChange {
    /// Insert a first sighting. Loses to a concurrent insert of the same identity.
    Create {
        record: IngestedRecord,
        seen_at: DateTime<Utc>,
    },
    /// Snapshot `expected` and write `next`, only if the stored metrics still equal `expected`.
    Update {
        id: Uuid,
        expected: DealMetrics,
        next: DealMetrics,
        seen_at: DateTime<Utc>,
    },
    /// Bump `last_seen_at` only.
    Touch { id: Uuid, seen_at: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeApplied {
    Applied(Uuid),
    /// The stored state moved since it was read; nothing was written.
    Conflict,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordHistory {
    pub record: StoredRecord,
    /// Oldest first.
    pub snapshots: Vec<Snapshot>,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_record(
        &self,
        source: Source,
        external_id: &str,
    ) -> Result<Option<StoredRecord>, StoreError>;

    async fn apply_change(&self, change: RecordChange) -> Result<ChangeApplied, StoreError>;

    async fn history(
        &self,
        source: Source,
        external_id: &str,
    ) -> Result<Option<RecordHistory>, StoreError>;
}
