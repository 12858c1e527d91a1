use std::sync::Arc;

use chrono::{DateTime, Utc};
use dealscan_core::{IngestedRecord, Source, StoredRecord, UpsertOutcome, UpsertResult};
use dealscan_storage::{ChangeApplied, RecordChange, RecordStore, StoreError};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum UpsertError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{origin}/{external_id} kept changing underneath us ({attempts} attempts)")]
    Contended {
        origin: Source,
        external_id: String,
        attempts: usize,
    },
}

/// Decide what one sighting means for the stored record. Metrics compare by
/// exact equality, so replaying an already-applied sighting plans a `Touch`.
pub fn plan_change(
    existing: Option<&StoredRecord>,
    incoming: &IngestedRecord,
    seen_at: DateTime<Utc>,
) -> (RecordChange, UpsertOutcome) {
    match existing {
        None => (
            RecordChange::Create {
                record: incoming.clone(),
                seen_at,
            },
            UpsertOutcome::Created,
        ),
        Some(stored) if stored.record.metrics != incoming.metrics => (
            RecordChange::Update {
                id: stored.id,
                expected: stored.record.metrics,
                next: incoming.metrics,
                seen_at,
            },
            UpsertOutcome::Updated,
        ),
        Some(stored) => (
            RecordChange::Touch {
                id: stored.id,
                seen_at,
            },
            UpsertOutcome::Unchanged,
        ),
    }
}

/// Create / update-with-snapshot / touch, keyed by `(source, external_id)`.
#[derive(Clone)]
pub struct UpsertEngine {
    store: Arc<dyn RecordStore>,
    max_attempts: usize,
}

impl UpsertEngine {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub async fn upsert(&self, record: &IngestedRecord) -> Result<UpsertResult, UpsertError> {
        for attempt in 1..=self.max_attempts {
            let existing = self
                .store
                .find_record(record.source, &record.external_id)
                .await?;
            if let Some(stored) = &existing {
                let changed = stored.record.metrics.changed_fields(&record.metrics);
                if !changed.is_empty() {
                    debug!(
                        source = %record.source,
                        external_id = %record.external_id,
                        fields = ?changed,
                        "tracked metrics changed"
                    );
                }
            }

            let (change, outcome) = plan_change(existing.as_ref(), record, Utc::now());
            match self.store.apply_change(change).await? {
                ChangeApplied::Applied(id) => return Ok(UpsertResult { outcome, id }),
                ChangeApplied::Conflict => {
                    debug!(
                        source = %record.source,
                        external_id = %record.external_id,
                        attempt,
                        "upsert conflict; re-reading"
                    );
                }
            }
        }

        Err(UpsertError::Contended {
            origin: record.source,
            external_id: record.external_id.clone(),
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dealscan_core::DealMetrics;
    use dealscan_storage::{MemoryRecordStore, RecordHistory};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(external_id: &str, quantity_sold: i64) -> IngestedRecord {
        IngestedRecord {
            source: Source::Partner,
            external_id: external_id.to_string(),
            name: format!("Deal {external_id}"),
            metrics: DealMetrics {
                quantity_sold,
                ..DealMetrics::default()
            },
            url: None,
            start_at: None,
            end_at: None,
        }
    }

    #[tokio::test]
    async fn same_input_twice_is_created_then_unchanged() {
        let store = Arc::new(MemoryRecordStore::new());
        let engine = UpsertEngine::new(store.clone());

        let first = engine.upsert(&record("7", 3)).await.unwrap();
        let second = engine.upsert(&record("7", 3)).await.unwrap();

        assert_eq!(first.outcome, UpsertOutcome::Created);
        assert_eq!(second.outcome, UpsertOutcome::Unchanged);
        assert_eq!(first.id, second.id);
        assert_eq!(store.record_count().await, 1);
        assert_eq!(store.snapshot_count().await, 0);
    }

    #[tokio::test]
    async fn changed_metrics_snapshot_the_previous_values() {
        let store = Arc::new(MemoryRecordStore::new());
        let engine = UpsertEngine::new(store.clone());

        engine.upsert(&record("42", 10)).await.unwrap();
        let updated = engine.upsert(&record("42", 15)).await.unwrap();
        assert_eq!(updated.outcome, UpsertOutcome::Updated);

        let history = store.history(Source::Partner, "42").await.unwrap().unwrap();
        assert_eq!(history.record.record.metrics.quantity_sold, 15);
        assert_eq!(history.snapshots.len(), 1);
        assert_eq!(history.snapshots[0].metrics.quantity_sold, 10);

        let replay = engine.upsert(&record("42", 15)).await.unwrap();
        assert_eq!(replay.outcome, UpsertOutcome::Unchanged);
        assert_eq!(store.snapshot_count().await, 1);
    }

    #[tokio::test]
    async fn any_drift_counts_as_a_change() {
        let store = Arc::new(MemoryRecordStore::new());
        let engine = UpsertEngine::new(store.clone());
        let mut base = record("9", 1);
        base.metrics.net_revenue = 100.0;
        engine.upsert(&base).await.unwrap();

        base.metrics.net_revenue = 100.000_001;
        let result = engine.upsert(&base).await.unwrap();
        assert_eq!(result.outcome, UpsertOutcome::Updated);
    }

    #[test]
    fn plan_touches_when_only_descriptive_fields_differ() {
        let now = Utc::now();
        let stored = StoredRecord {
            id: uuid::Uuid::new_v4(),
            record: record("5", 2),
            first_seen_at: now,
            last_seen_at: now,
            updated_at: now,
        };
        let mut incoming = record("5", 2);
        incoming.name = "Renamed".into();

        let (change, outcome) = plan_change(Some(&stored), &incoming, now);
        assert_eq!(outcome, UpsertOutcome::Unchanged);
        assert_eq!(
            change,
            RecordChange::Touch {
                id: stored.id,
                seen_at: now
            }
        );
    }

    /// Always loses the race.
    struct ContendedStore {
        inner: MemoryRecordStore,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl RecordStore for ContendedStore {
        async fn find_record(
            &self,
            source: Source,
            external_id: &str,
        ) -> Result<Option<StoredRecord>, StoreError> {
            self.inner.find_record(source, external_id).await
        }

        async fn apply_change(&self, _change: RecordChange) -> Result<ChangeApplied, StoreError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Ok(ChangeApplied::Conflict)
        }

        async fn history(
            &self,
            source: Source,
            external_id: &str,
        ) -> Result<Option<RecordHistory>, StoreError> {
            self.inner.history(source, external_id).await
        }
    }

    #[tokio::test]
    async fn persistent_conflicts_give_up_after_bounded_attempts() {
        let store = Arc::new(ContendedStore {
            inner: MemoryRecordStore::new(),
            attempts: AtomicUsize::new(0),
        });
        let engine = UpsertEngine::new(store.clone());

        let err = engine.upsert(&record("1", 1)).await.unwrap_err();
        assert!(matches!(err, UpsertError::Contended { attempts: 3, .. }));
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
    }

    /// Lets a rival sighting land first, then reports the caller's write as lost.
    struct RacingStore {
        inner: MemoryRecordStore,
        rival: std::sync::Mutex<Option<IngestedRecord>>,
    }

    impl RacingStore {
        fn new(rival: IngestedRecord) -> Self {
            Self {
                inner: MemoryRecordStore::new(),
                rival: std::sync::Mutex::new(Some(rival)),
            }
        }
    }

    #[async_trait]
    impl RecordStore for RacingStore {
        async fn find_record(
            &self,
            source: Source,
            external_id: &str,
        ) -> Result<Option<StoredRecord>, StoreError> {
            self.inner.find_record(source, external_id).await
        }

        async fn apply_change(&self, change: RecordChange) -> Result<ChangeApplied, StoreError> {
            let rival = self.rival.lock().unwrap().take();
            let Some(rival) = rival else {
                return self.inner.apply_change(change).await;
            };
            let existing = self
                .inner
                .find_record(rival.source, &rival.external_id)
                .await?;
            let (rival_change, _) = plan_change(existing.as_ref(), &rival, Utc::now());
            self.inner.apply_change(rival_change).await?;
            Ok(ChangeApplied::Conflict)
        }

        async fn history(
            &self,
            source: Source,
            external_id: &str,
        ) -> Result<Option<RecordHistory>, StoreError> {
            self.inner.history(source, external_id).await
        }
    }

    async fn seeded(rival: IngestedRecord) -> Arc<RacingStore> {
        let store = Arc::new(RacingStore::new(rival));
        let seed = record("42", 10);
        let seed_change = plan_change(None, &seed, Utc::now()).0;
        store.inner.apply_change(seed_change).await.unwrap();
        store
    }

    #[tokio::test]
    async fn losing_to_an_identical_write_ends_unchanged_with_one_snapshot() {
        let store = seeded(record("42", 15)).await;
        let engine = UpsertEngine::new(store.clone());

        let result = engine.upsert(&record("42", 15)).await.unwrap();
        assert_eq!(result.outcome, UpsertOutcome::Unchanged);

        let history = store.history(Source::Partner, "42").await.unwrap().unwrap();
        assert_eq!(history.record.record.metrics.quantity_sold, 15);
        assert_eq!(history.snapshots.len(), 1);
        assert_eq!(history.snapshots[0].metrics.quantity_sold, 10);
        assert_eq!(store.inner.record_count().await, 1);
    }

    #[tokio::test]
    async fn losing_to_a_different_write_re_decides_against_it() {
        let store = seeded(record("42", 12)).await;
        let engine = UpsertEngine::new(store.clone());

        let result = engine.upsert(&record("42", 15)).await.unwrap();
        assert_eq!(result.outcome, UpsertOutcome::Updated);

        let history = store.history(Source::Partner, "42").await.unwrap().unwrap();
        assert_eq!(history.record.record.metrics.quantity_sold, 15);
        let previous = history
            .snapshots
            .iter()
            .map(|snapshot| snapshot.metrics.quantity_sold)
            .collect::<Vec<_>>();
        assert_eq!(previous, vec![10, 12]);
    }

    #[tokio::test]
    async fn losing_a_create_race_reads_the_winner() {
        let store = Arc::new(RacingStore::new(record("77", 4)));
        let engine = UpsertEngine::new(store.clone());

        let result = engine.upsert(&record("77", 4)).await.unwrap();
        assert_eq!(result.outcome, UpsertOutcome::Unchanged);
        assert_eq!(store.inner.record_count().await, 1);
        assert_eq!(store.inner.snapshot_count().await, 0);
    }
}
