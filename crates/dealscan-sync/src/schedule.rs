use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::config::ScanConfig;
use crate::orchestrator::{ScanOrchestrator, ScanRequest, ScanTrigger};

/// In-process stand-in for the platform cron: every tick starts a sweep the
/// same way an authenticated `GET /scan` without a source would.
pub async fn maybe_build_scheduler(
    config: &ScanConfig,
    orchestrator: Arc<ScanOrchestrator>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = config.scan_cron.as_str();
    let job = Job::new_async(cron, move |_uuid, _l| {
        let orchestrator = orchestrator.clone();
        Box::pin(async move {
            match orchestrator
                .run_step(ScanRequest::sweep_start(ScanTrigger::Scheduler))
                .await
            {
                Ok(step) => info!(
                    source = %step.result.source,
                    items = step.result.items_processed,
                    "scheduled sweep started"
                ),
                Err(err) => warn!(error = %err, "scheduled sweep failed to start"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    info!(cron, "scan scheduler configured");
    Ok(Some(sched))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkProcessor;
    use crate::orchestrator::NoopContinuation;
    use crate::upsert::UpsertEngine;
    use dealscan_storage::MemoryRecordStore;
    use std::time::Duration;

    fn orchestrator() -> Arc<ScanOrchestrator> {
        let chunks = ChunkProcessor::new(UpsertEngine::new(Arc::new(MemoryRecordStore::new())), 5);
        Arc::new(ScanOrchestrator::new(
            chunks,
            Vec::new(),
            Arc::new(NoopContinuation),
            Duration::from_secs(1),
        ))
    }

    #[tokio::test]
    async fn disabled_scheduler_builds_nothing() {
        let config = ScanConfig::default();
        assert!(maybe_build_scheduler(&config, orchestrator())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn invalid_cron_is_reported() {
        let config = ScanConfig {
            scheduler_enabled: true,
            scan_cron: "every now and then".into(),
            ..ScanConfig::default()
        };
        let err = match maybe_build_scheduler(&config, orchestrator()).await {
            Ok(_) => panic!("an unparseable cron expression must be rejected"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("every now and then"));
    }
}
