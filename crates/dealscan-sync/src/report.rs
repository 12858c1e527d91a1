//! Progress events and the JSON bodies returned by the scan endpoints.

use async_trait::async_trait;
use dealscan_core::{Cursor, ScanChunkResult, Source};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Aggregate of every chunk in one interactive run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanTotals {
    pub run_id: Uuid,
    pub sources_scanned: Vec<Source>,
    pub chunks: u64,
    pub items_processed: u64,
    pub items_with_sales: u64,
    pub new_records: u64,
    pub updated_records: u64,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl ScanTotals {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            ..Self::default()
        }
    }

    pub fn absorb(&mut self, chunk: &ScanChunkResult) {
        if !self.sources_scanned.contains(&chunk.source) {
            self.sources_scanned.push(chunk.source);
        }
        self.chunks += 1;
        self.items_processed += chunk.items_processed;
        self.items_with_sales += chunk.items_with_sales_count;
        self.new_records += chunk.new_records;
        self.updated_records += chunk.updated_records;
        self.errors
            .extend(chunk.errors.iter().map(|e| format!("{}: {e}", chunk.source)));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanPhase {
    Scanning,
    Complete,
    Error,
}

impl ScanPhase {
    /// SSE `event:` name for this phase.
    pub fn event_name(&self) -> &'static str {
        match self {
            ScanPhase::Scanning => "progress",
            ScanPhase::Complete => "complete",
            ScanPhase::Error => "error",
        }
    }
}

/// One streamed unit of an interactive run: the chunk just finished (if any),
/// the running totals, and a phase tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgressEvent {
    pub phase: ScanPhase,
    #[serde(flatten)]
    pub chunk: Option<ScanChunkResult>,
    pub totals: ScanTotals,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ScanProgressEvent {
    pub fn progress(chunk: &ScanChunkResult, totals: &ScanTotals) -> Self {
        Self {
            phase: ScanPhase::Scanning,
            message: Some(format!(
                "{}: {} of {} items scanned",
                chunk.source.display_name(),
                chunk.cursor.offset() + chunk.items_processed,
                chunk.total_available
            )),
            chunk: Some(chunk.clone()),
            totals: totals.clone(),
        }
    }

    pub fn complete(totals: &ScanTotals) -> Self {
        Self {
            phase: ScanPhase::Complete,
            chunk: None,
            totals: totals.clone(),
            message: Some(interactive_message(totals)),
        }
    }

    pub fn error(message: impl Into<String>, totals: &ScanTotals) -> Self {
        Self {
            phase: ScanPhase::Error,
            chunk: None,
            totals: totals.clone(),
            message: Some(message.into()),
        }
    }

    pub fn event_name(&self) -> &'static str {
        self.phase.event_name()
    }
}

/// Receives progress events while an interactive run is in flight.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, event: ScanProgressEvent);
}

/// Drops every event; used when the caller only wants the final JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgressSink;

#[async_trait]
impl ProgressSink for NullProgressSink {
    async fn emit(&self, _event: ScanProgressEvent) {}
}

/// Forwards events to a channel. A closed receiver (client went away) is ignored;
/// the run keeps going since its chunks are already durable.
#[derive(Debug, Clone)]
pub struct ChannelProgressSink {
    tx: mpsc::Sender<ScanProgressEvent>,
}

impl ChannelProgressSink {
    pub fn new(tx: mpsc::Sender<ScanProgressEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ProgressSink for ChannelProgressSink {
    async fn emit(&self, event: ScanProgressEvent) {
        if self.tx.send(event).await.is_err() {
            tracing::debug!("progress receiver dropped");
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>, error: Option<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error,
        }
    }
}

/// `data` of a single-chunk (cron / continuation) response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkSummary {
    pub source: Source,
    pub items_processed: u64,
    pub new_records: u64,
    pub updated_records: u64,
    /// Milliseconds.
    pub duration: u64,
    pub total_available: u64,
    pub is_source_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Cursor>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl From<&ScanChunkResult> for ChunkSummary {
    fn from(chunk: &ScanChunkResult) -> Self {
        Self {
            source: chunk.source,
            items_processed: chunk.items_processed,
            new_records: chunk.new_records,
            updated_records: chunk.updated_records,
            duration: chunk.duration_ms,
            total_available: chunk.total_available,
            is_source_complete: chunk.is_source_complete,
            next_cursor: chunk.next_cursor,
            errors: chunk.errors.clone(),
        }
    }
}

/// `data` of a non-streaming interactive response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractiveSummary {
    pub total_deals_found: u64,
    pub new_deals: u64,
    pub updated_deals: u64,
    /// Milliseconds.
    pub duration: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl From<&ScanTotals> for InteractiveSummary {
    fn from(totals: &ScanTotals) -> Self {
        Self {
            total_deals_found: totals.items_processed,
            new_deals: totals.new_records,
            updated_deals: totals.updated_records,
            duration: totals.duration_ms,
            errors: totals.errors.clone(),
        }
    }
}

pub fn chunk_message(chunk: &ScanChunkResult) -> String {
    let mut message = format!(
        "Scanned {} {} items at cursor {}",
        chunk.items_processed,
        chunk.source.display_name(),
        chunk.cursor
    );
    match chunk.next_cursor {
        Some(next) => message.push_str(&format!("; continuing at {next}")),
        None => message.push_str("; source complete"),
    }
    message
}

pub fn interactive_message(totals: &ScanTotals) -> String {
    format!(
        "Scan complete: {} deals found, {} new, {} updated",
        totals.items_processed, totals.new_records, totals.updated_records
    )
}

pub fn chunk_response(chunk: &ScanChunkResult) -> ApiResponse<ChunkSummary> {
    ApiResponse::ok(chunk_message(chunk), ChunkSummary::from(chunk))
}

pub fn interactive_response(totals: &ScanTotals) -> ApiResponse<InteractiveSummary> {
    ApiResponse::ok(interactive_message(totals), InteractiveSummary::from(totals))
}
