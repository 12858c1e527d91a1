//! Change-tracked ingestion and the resumable scan orchestrator.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dealscan_adapters::build_fetcher;
use dealscan_storage::{HttpClientConfig, HttpFetcher, RecordStore};
use tracing::info;

mod chunk;
mod config;
mod orchestrator;
mod report;
mod schedule;
mod upsert;

pub use chunk::{ChunkError, ChunkProcessor};
pub use config::{
    ScanConfig, SourceConfig, SourceRegistry, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_DURATION_SECS,
    DEFAULT_SCAN_CRON,
};
pub use orchestrator::{
    Continuation, NoopContinuation, RecordingContinuation, ScanError, ScanOrchestrator,
    ScanRequest, ScanStep, ScanTrigger, StepTransition,
};
pub use report::{
    chunk_message, chunk_response, interactive_message, interactive_response, ApiResponse,
    ChannelProgressSink, ChunkSummary, InteractiveSummary, NullProgressSink, ProgressSink,
    ScanPhase, ScanProgressEvent, ScanTotals,
};
pub use schedule::maybe_build_scheduler;
pub use upsert::{plan_change, UpsertEngine, UpsertError, DEFAULT_MAX_ATTEMPTS};

/// Wire fetchers for every enabled registry entry into an orchestrator.
pub fn build_orchestrator(
    config: &ScanConfig,
    registry: &SourceRegistry,
    store: Arc<dyn RecordStore>,
    continuation: Arc<dyn Continuation>,
) -> Result<ScanOrchestrator> {
    let http = Arc::new(HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
        ..Default::default()
    })?);

    let mut chunks = ChunkProcessor::new(UpsertEngine::new(store), config.chunk_size);
    let sequence = registry.sweep_sequence();
    for source in &sequence {
        let Some(entry) = registry.get(*source) else {
            continue;
        };
        let fetcher = build_fetcher(*source, &entry.fetcher, http.clone(), &config.workspace_root)
            .with_context(|| format!("configuring fetcher for {source}"))?;
        chunks = chunks.with_fetcher(fetcher);
    }

    info!(
        sources = ?sequence,
        chunk_size = chunks.chunk_size(),
        max_duration_secs = config.max_duration.as_secs(),
        "scan orchestrator ready"
    );
    Ok(ScanOrchestrator::new(
        chunks,
        sequence,
        continuation,
        config.max_duration,
    ))
}

/// Load the registry under `config.workspace_root` and build the orchestrator.
pub async fn orchestrator_from_config(
    config: &ScanConfig,
    store: Arc<dyn RecordStore>,
    continuation: Arc<dyn Continuation>,
) -> Result<ScanOrchestrator> {
    let registry = SourceRegistry::load(&config.workspace_root).await?;
    build_orchestrator(config, &registry, store, continuation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealscan_core::{Source, UpsertOutcome};
    use dealscan_storage::MemoryRecordStore;
    use std::path::PathBuf;

    fn shipped_config() -> ScanConfig {
        ScanConfig {
            chunk_size: 3,
            workspace_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../.."),
            ..ScanConfig::default()
        }
    }

    #[tokio::test]
    async fn shipped_fixtures_sweep_end_to_end() {
        let store = Arc::new(MemoryRecordStore::new());
        let orchestrator =
            orchestrator_from_config(&shipped_config(), store.clone(), Arc::new(NoopContinuation))
                .await
                .unwrap();
        assert_eq!(orchestrator.sequence(), &Source::SWEEP_ORDER);

        let totals = orchestrator
            .run_interactive(None, &NullProgressSink)
            .await
            .unwrap();
        assert_eq!(totals.items_processed, 17);
        assert_eq!(totals.new_records, 17);
        assert!(totals.errors.is_empty());
        assert_eq!(store.record_count().await, 17);
    }

    #[tokio::test]
    async fn rescanned_item_with_new_sales_is_updated_with_one_snapshot() {
        let store = Arc::new(MemoryRecordStore::new());
        let engine = UpsertEngine::new(store.clone());
        let mut deal = dealscan_adapters::normalize(
            &serde_json::json!({ "dealId": "42", "quantitySold": 10 }),
            Source::Partner,
        )
        .unwrap();

        assert_eq!(engine.upsert(&deal).await.unwrap().outcome, UpsertOutcome::Created);
        deal.metrics.quantity_sold = 15;
        assert_eq!(engine.upsert(&deal).await.unwrap().outcome, UpsertOutcome::Updated);

        let history = store.history(Source::Partner, "42").await.unwrap().unwrap();
        assert_eq!(history.record.record.metrics.quantity_sold, 15);
        assert_eq!(history.snapshots.len(), 1);
        assert_eq!(history.snapshots[0].metrics.quantity_sold, 10);
    }

    #[test]
    fn html_fetcher_for_partner_fails_wiring() {
        let registry = SourceRegistry::from_yaml_str(
            r#"
sources:
  - source: partner
    fetcher: { kind: html_listing, listing_url: "https://partner.example" }
"#,
        )
        .unwrap();
        let err = build_orchestrator(
            &ScanConfig::default(),
            &registry,
            Arc::new(MemoryRecordStore::new()),
            Arc::new(NoopContinuation),
        )
        .err()
        .unwrap();
        assert!(format!("{err:#}").contains("html_listing"));
    }
}
