use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dealscan_core::{Cursor, ScanChunkResult, ScanPosition, Source};
use dealscan_storage::RecordStore;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::chunk::{ChunkError, ChunkProcessor};
use crate::report::{ProgressSink, ScanProgressEvent, ScanTotals};

/// Who asked for a scan step. Carried explicitly; the orchestrator never
/// inspects request headers itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanTrigger {
    Scheduler,
    Continuation,
    Admin,
}

impl fmt::Display for ScanTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScanTrigger::Scheduler => "scheduler",
            ScanTrigger::Continuation => "continuation",
            ScanTrigger::Admin => "admin",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRequest {
    /// `None` starts a full sweep at the first enabled source.
    pub source: Option<Source>,
    pub cursor: Cursor,
    pub trigger: ScanTrigger,
}

impl ScanRequest {
    pub fn sweep_start(trigger: ScanTrigger) -> Self {
        Self {
            source: None,
            cursor: Cursor::START,
            trigger,
        }
    }

    pub fn resume(position: ScanPosition, trigger: ScanTrigger) -> Self {
        Self {
            source: Some(position.source),
            cursor: position.cursor,
            trigger,
        }
    }
}

/// Hands the next `(source, cursor)` to whatever runs the following step.
/// Fire-and-forget: no result, no retry.
pub trait Continuation: Send + Sync {
    fn schedule(&self, next: ScanPosition);
}

/// Drops every continuation. For one-shot runs such as the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopContinuation;

impl Continuation for NoopContinuation {
    fn schedule(&self, next: ScanPosition) {
        tracing::debug!(source = %next.source, cursor = %next.cursor, "continuation dropped");
    }
}

/// Keeps scheduled positions in memory so callers can inspect or drive them.
#[derive(Debug, Default)]
pub struct RecordingContinuation {
    scheduled: Mutex<Vec<ScanPosition>>,
}

impl RecordingContinuation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled(&self) -> Vec<ScanPosition> {
        self.scheduled
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn take(&self) -> Vec<ScanPosition> {
        match self.scheduled.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl Continuation for RecordingContinuation {
    fn schedule(&self, next: ScanPosition) {
        match self.scheduled.lock() {
            Ok(mut guard) => guard.push(next),
            Err(poisoned) => poisoned.into_inner().push(next),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepTransition {
    /// Same source, next cursor.
    Continue(ScanPosition),
    /// Source finished; next source in the sweep from the start.
    Advance(ScanPosition),
    /// Sweep exhausted.
    Done,
}

impl StepTransition {
    pub fn next_position(&self) -> Option<ScanPosition> {
        match self {
            StepTransition::Continue(next) | StepTransition::Advance(next) => Some(*next),
            StepTransition::Done => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanStep {
    pub result: ScanChunkResult,
    pub transition: StepTransition,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("no sources are enabled")]
    NoSources,
    #[error("source {0} is not enabled")]
    SourceDisabled(Source),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error("scan exceeded its {}s limit", .limit.as_secs())]
    DeadlineExceeded { limit: Duration },
}

pub struct ScanOrchestrator {
    chunks: ChunkProcessor,
    sequence: Vec<Source>,
    continuation: Arc<dyn Continuation>,
    max_duration: Duration,
}

impl ScanOrchestrator {
    /// `sequence` is the sweep order; every entry needs a fetcher in `chunks`.
    pub fn new(
        chunks: ChunkProcessor,
        sequence: Vec<Source>,
        continuation: Arc<dyn Continuation>,
        max_duration: Duration,
    ) -> Self {
        let sequence = sequence
            .into_iter()
            .filter(|source| {
                let known = chunks.has_fetcher(*source);
                if !known {
                    warn!(%source, "dropping source without a fetcher from the sweep");
                }
                known
            })
            .collect();
        Self {
            chunks,
            sequence,
            continuation,
            max_duration,
        }
    }

    pub fn sequence(&self) -> &[Source] {
        &self.sequence
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunks.chunk_size()
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        self.chunks.upsert_engine().store()
    }

    fn ensure_enabled(&self, source: Source) -> Result<Source, ScanError> {
        if self.sequence.contains(&source) {
            Ok(source)
        } else {
            Err(ScanError::SourceDisabled(source))
        }
    }

    fn source_after(&self, source: Source) -> Option<Source> {
        self.sequence
            .iter()
            .position(|s| *s == source)
            .and_then(|idx| self.sequence.get(idx + 1))
            .copied()
    }

    fn transition_after(&self, result: &ScanChunkResult) -> StepTransition {
        match result.next_cursor {
            Some(cursor) => StepTransition::Continue(ScanPosition {
                source: result.source,
                cursor,
            }),
            None => match self.source_after(result.source) {
                Some(next) => StepTransition::Advance(ScanPosition::start_of(next)),
                None => StepTransition::Done,
            },
        }
    }

    /// Cron / continuation protocol: run exactly one chunk, then hand the next
    /// position to the continuation. A failed chunk schedules nothing.
    pub async fn run_step(&self, request: ScanRequest) -> Result<ScanStep, ScanError> {
        let position = match request.source {
            Some(source) => ScanPosition {
                source: self.ensure_enabled(source)?,
                cursor: request.cursor,
            },
            None => {
                let first = self.sequence.first().copied().ok_or(ScanError::NoSources)?;
                if request.cursor != Cursor::START {
                    warn!(cursor = %request.cursor, "cursor without source ignored; starting a sweep");
                }
                ScanPosition::start_of(first)
            }
        };

        let span = info_span!(
            "scan_step",
            trigger = %request.trigger,
            source = %position.source,
            cursor = %position.cursor
        );
        async move {
            let result = self.chunks.process_chunk(position).await?;
            let transition = self.transition_after(&result);
            match transition.next_position() {
                Some(next) => {
                    info!(next_source = %next.source, next_cursor = %next.cursor, "scheduling continuation");
                    self.continuation.schedule(next);
                }
                None => info!("sweep complete"),
            }
            Ok(ScanStep { result, transition })
        }
        .instrument(span)
        .await
    }

    /// Interactive protocol: drive every chunk of one source (or of the whole
    /// sweep) inside this call, bounded by `max_duration`. Never schedules a
    /// continuation. Ends with exactly one `complete` or `error` event.
    pub async fn run_interactive(
        &self,
        source: Option<Source>,
        sink: &dyn ProgressSink,
    ) -> Result<ScanTotals, ScanError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("interactive_scan", %run_id);
        self.run_interactive_in_span(run_id, source, sink)
            .instrument(span)
            .await
    }

    async fn run_interactive_in_span(
        &self,
        run_id: Uuid,
        source: Option<Source>,
        sink: &dyn ProgressSink,
    ) -> Result<ScanTotals, ScanError> {
        let mut totals = ScanTotals::new(run_id);
        let started = Instant::now();

        let outcome = match self.interactive_sources(source) {
            Ok(sources) => {
                let drive = self.drive(&sources, sink, &mut totals);
                match tokio::time::timeout(self.max_duration, drive).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ScanError::DeadlineExceeded {
                        limit: self.max_duration,
                    }),
                }
            }
            Err(err) => Err(err),
        };
        totals.duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                info!(
                    chunks = totals.chunks,
                    items = totals.items_processed,
                    new = totals.new_records,
                    updated = totals.updated_records,
                    duration_ms = totals.duration_ms,
                    "interactive scan complete"
                );
                sink.emit(ScanProgressEvent::complete(&totals)).await;
                Ok(totals)
            }
            Err(err) => {
                warn!(error = %err, chunks = totals.chunks, "interactive scan failed");
                sink.emit(ScanProgressEvent::error(err.to_string(), &totals))
                    .await;
                Err(err)
            }
        }
    }

    fn interactive_sources(&self, source: Option<Source>) -> Result<Vec<Source>, ScanError> {
        match source {
            Some(source) => self.ensure_enabled(source).map(|s| vec![s]),
            None if self.sequence.is_empty() => Err(ScanError::NoSources),
            None => Ok(self.sequence.clone()),
        }
    }

    async fn drive(
        &self,
        sources: &[Source],
        sink: &dyn ProgressSink,
        totals: &mut ScanTotals,
    ) -> Result<(), ScanError> {
        for source in sources {
            let mut position = Some(ScanPosition::start_of(*source));
            while let Some(current) = position {
                let result = self.chunks.process_chunk(current).await?;
                totals.absorb(&result);
                sink.emit(ScanProgressEvent::progress(&result, totals)).await;
                position = result.next_cursor.map(|cursor| ScanPosition { cursor, ..current });
            }
        }
        Ok(())
    }
}
