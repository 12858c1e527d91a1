use std::collections::HashMap;

use async_trait::async_trait;
use dealscan_core::{Snapshot, Source, StoredRecord};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::records::{ChangeApplied, RecordChange, RecordHistory, RecordStore, StoreError};

/// Process-local store with the same atomicity contract as Postgres. Used for
/// tests and for running without a database.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<Uuid, StoredRecord>,
    by_identity: HashMap<(Source, String), Uuid>,
    snapshots: HashMap<Uuid, Vec<Snapshot>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_count(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn snapshot_count(&self) -> usize {
        self.state.lock().await.snapshots.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_record(
        &self,
        source: Source,
        external_id: &str,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .by_identity
            .get(&(source, external_id.to_string()))
            .and_then(|id| state.records.get(id))
            .cloned())
    }

    async fn apply_change(&self, change: RecordChange) -> Result<ChangeApplied, StoreError> {
        let mut state = self.state.lock().await;
        match change {
            RecordChange::Create { record, seen_at } => {
                let key = (record.source, record.external_id.clone());
                if state.by_identity.contains_key(&key) {
                    return Ok(ChangeApplied::Conflict);
                }
                let id = Uuid::new_v4();
                state.by_identity.insert(key, id);
                state.records.insert(
                    id,
                    StoredRecord {
                        id,
                        record,
                        first_seen_at: seen_at,
                        last_seen_at: seen_at,
                        updated_at: seen_at,
                    },
                );
                Ok(ChangeApplied::Applied(id))
            }
            RecordChange::Update {
                id,
                expected,
                next,
                seen_at,
            } => {
                let Some(stored) = state.records.get_mut(&id) else {
                    return Ok(ChangeApplied::Conflict);
                };
                if stored.record.metrics != expected {
                    return Ok(ChangeApplied::Conflict);
                }
                stored.record.metrics = next;
                stored.last_seen_at = seen_at;
                stored.updated_at = seen_at;
                state.snapshots.entry(id).or_default().push(Snapshot {
                    id: Uuid::new_v4(),
                    record_id: id,
                    metrics: expected,
                    captured_at: seen_at,
                });
                Ok(ChangeApplied::Applied(id))
            }
            RecordChange::Touch { id, seen_at } => match state.records.get_mut(&id) {
                Some(stored) => {
                    stored.last_seen_at = seen_at;
                    Ok(ChangeApplied::Applied(id))
                }
                None => Ok(ChangeApplied::Conflict),
            },
        }
    }

    async fn history(
        &self,
        source: Source,
        external_id: &str,
    ) -> Result<Option<RecordHistory>, StoreError> {
        let state = self.state.lock().await;
        let Some(record) = state
            .by_identity
            .get(&(source, external_id.to_string()))
            .and_then(|id| state.records.get(id))
            .cloned()
        else {
            return Ok(None);
        };
        let mut snapshots = state.snapshots.get(&record.id).cloned().unwrap_or_default();
        snapshots.sort_by_key(|s| s.captured_at);
        Ok(Some(RecordHistory { record, snapshots }))
    }
}
