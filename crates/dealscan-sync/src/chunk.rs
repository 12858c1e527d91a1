use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use dealscan_adapters::{normalize, FetchError, SourceFetcher};
use dealscan_core::{ScanChunkResult, ScanPosition, Source, UpsertOutcome};
use thiserror::Error;
use tracing::{info, warn};

use crate::upsert::{UpsertEngine, UpsertError};

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("no fetcher configured for {0}")]
    NoFetcher(Source),
    #[error("fetching {origin} at cursor {cursor} failed: {error}")]
    Fetch {
        origin: Source,
        cursor: u64,
        #[source]
        error: FetchError,
    },
    #[error(transparent)]
    Upsert(#[from] UpsertError),
}

/// Fetches one bounded page of a source, then normalizes and upserts every item.
pub struct ChunkProcessor {
    fetchers: HashMap<Source, Arc<dyn SourceFetcher>>,
    upsert: UpsertEngine,
    chunk_size: u64,
}

impl ChunkProcessor {
    pub fn new(upsert: UpsertEngine, chunk_size: u64) -> Self {
        Self {
            fetchers: HashMap::new(),
            upsert,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.fetchers.insert(fetcher.source(), fetcher);
        self
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn has_fetcher(&self, source: Source) -> bool {
        self.fetchers.contains_key(&source)
    }

    pub fn upsert_engine(&self) -> &UpsertEngine {
        &self.upsert
    }

    /// Process `[cursor, cursor + chunk_size)`. Item-level problems land in
    /// `errors`; a fetch or store failure fails the whole chunk.
    pub async fn process_chunk(&self, position: ScanPosition) -> Result<ScanChunkResult, ChunkError> {
        let ScanPosition { source, cursor } = position;
        let fetcher = self
            .fetchers
            .get(&source)
            .ok_or(ChunkError::NoFetcher(source))?;
        let started = Instant::now();

        let page = fetcher
            .list_page(cursor, self.chunk_size)
            .await
            .map_err(|error| ChunkError::Fetch {
                origin: source,
                cursor: cursor.offset(),
                error,
            })?;

        let mut result = ScanChunkResult {
            source,
            cursor,
            items_processed: page.items.len() as u64,
            items_with_sales_count: 0,
            new_records: 0,
            updated_records: 0,
            errors: Vec::new(),
            duration_ms: 0,
            total_available: page.total_available,
            is_source_complete: false,
            next_cursor: None,
        };

        for (index, item) in page.items.iter().enumerate() {
            let record = match normalize(item, source) {
                Ok(record) => record,
                Err(err) => {
                    let position = cursor.offset() + index as u64;
                    warn!(%source, position, error = %err, "skipping malformed item");
                    result.errors.push(format!("item {position}: {err}"));
                    continue;
                }
            };

            if record.metrics.has_sales() {
                result.items_with_sales_count += 1;
            }
            match self.upsert.upsert(&record).await?.outcome {
                UpsertOutcome::Created => result.new_records += 1,
                UpsertOutcome::Updated => result.updated_records += 1,
                UpsertOutcome::Unchanged => {}
            }
        }

        result.next_cursor = cursor.advance(self.chunk_size, page.total_available);
        result.is_source_complete = result.next_cursor.is_none();
        result.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            %source,
            cursor = cursor.offset(),
            items = result.items_processed,
            new = result.new_records,
            updated = result.updated_records,
            errors = result.errors.len(),
            total = result.total_available,
            complete = result.is_source_complete,
            duration_ms = result.duration_ms,
            "chunk processed"
        );
        Ok(result)
    }
}
