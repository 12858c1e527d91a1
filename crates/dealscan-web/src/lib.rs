//! Axum surface for the scan orchestrator: cron/continuation steps, admin
//! interactive scans (JSON or SSE), record history and a health check.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use dealscan_core::{Cursor, Source};
use dealscan_storage::RecordStore;
use dealscan_sync::{
    chunk_response, interactive_response, ApiResponse, ChannelProgressSink, NullProgressSink,
    ScanConfig, ScanError, ScanOrchestrator, ScanRequest,
};
use futures::StreamExt;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

mod auth;
mod continuation;

pub use auth::{AuthRejection, ScanAuth, SessionResolver, SessionRole, StaticSessions, SESSION_COOKIE};
pub use continuation::HttpContinuation;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ScanOrchestrator>,
    pub auth: ScanAuth,
}

impl AppState {
    pub fn new(orchestrator: Arc<ScanOrchestrator>, auth: ScanAuth) -> Self {
        Self { orchestrator, auth }
    }

    fn store(&self) -> &Arc<dyn RecordStore> {
        self.orchestrator.store()
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/scan", get(scan_step_handler).post(interactive_scan_handler))
        .route(
            "/records/{source}/{external_id}/history",
            get(record_history_handler),
        )
        .route("/healthz", get(healthz_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "dealscan web listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Orchestrator whose continuations call back into this server. Scheduled
/// sweeps chain through `internal=true` calls, so they need a shared secret.
pub async fn state_from_config(
    config: &ScanConfig,
    store: Arc<dyn RecordStore>,
) -> anyhow::Result<AppState> {
    if config.scheduler_enabled && !config.has_shared_secret() {
        anyhow::bail!(
            "the scheduler needs DEALSCAN_CRON_SECRET or DEALSCAN_INTERNAL_SECRET to chain continuations"
        );
    }
    let continuation = Arc::new(HttpContinuation::from_config(config));
    let orchestrator =
        dealscan_sync::orchestrator_from_config(config, store, continuation).await?;
    Ok(AppState::new(
        Arc::new(orchestrator),
        ScanAuth::from_config(config),
    ))
}

#[derive(Debug, Deserialize)]
struct StepQuery {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    cursor: Option<u64>,
    #[serde(default)]
    internal: bool,
}

#[derive(Debug, Default, Deserialize)]
struct InteractiveBody {
    #[serde(default)]
    source: Option<String>,
}

fn failure(status: StatusCode, message: impl Into<String>, error: Option<String>) -> Response {
    (status, Json(ApiResponse::<()>::failed(message, error))).into_response()
}

fn rejected(rejection: AuthRejection) -> Response {
    failure(rejection.status(), rejection.message(), None)
}

fn scan_error(err: ScanError) -> Response {
    let (status, message) = match &err {
        ScanError::NoSources | ScanError::SourceDisabled(_) => {
            (StatusCode::BAD_REQUEST, "Source not available")
        }
        ScanError::Chunk(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Scan chunk failed"),
        ScanError::DeadlineExceeded { .. } => (StatusCode::GATEWAY_TIMEOUT, "Scan timed out"),
    };
    failure(status, message, Some(err.to_string()))
}

fn parse_source(raw: Option<&str>) -> Result<Option<Source>, Response> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => raw.parse::<Source>().map(Some).map_err(|err| {
            failure(StatusCode::BAD_REQUEST, "Unknown source", Some(err.to_string()))
        }),
    }
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"))
}

async fn scan_step_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<StepQuery>,
) -> Response {
    let trigger = match state.auth.authorize_step(&headers, query.internal) {
        Ok(trigger) => trigger,
        Err(rejection) => return rejected(rejection),
    };
    let source = match parse_source(query.source.as_deref()) {
        Ok(source) => source,
        Err(resp) => return resp,
    };
    let request = ScanRequest {
        source,
        cursor: Cursor::new(query.cursor.unwrap_or(0)),
        trigger,
    };

    match state.orchestrator.run_step(request).await {
        Ok(step) => Json(chunk_response(&step.result)).into_response(),
        Err(err) => scan_error(err),
    }
}

async fn interactive_scan_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(rejection) = state.auth.require_admin(&headers) {
        return rejected(rejection);
    }
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        InteractiveBody::default()
    } else {
        match serde_json::from_slice::<InteractiveBody>(&body) {
            Ok(body) => body,
            Err(err) => {
                return failure(StatusCode::BAD_REQUEST, "Invalid request body", Some(err.to_string()))
            }
        }
    };
    let source = match parse_source(body.source.as_deref()) {
        Ok(source) => source,
        Err(resp) => return resp,
    };
    if let Some(source) = source {
        if !state.orchestrator.sequence().contains(&source) {
            return scan_error(ScanError::SourceDisabled(source));
        }
    }

    if wants_event_stream(&headers) {
        return stream_interactive(state.orchestrator.clone(), source).into_response();
    }
    match state
        .orchestrator
        .run_interactive(source, &NullProgressSink)
        .await
    {
        Ok(totals) => Json(interactive_response(&totals)).into_response(),
        Err(err) => scan_error(err),
    }
}

/// Runs the scan on its own task so a disconnecting client does not cancel
/// chunks mid-write; events flow to the response through a channel.
fn stream_interactive(
    orchestrator: Arc<ScanOrchestrator>,
    source: Option<Source>,
) -> Sse<impl futures::Stream<Item = Result<Event, axum::Error>>> {
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(async move {
        let sink = ChannelProgressSink::new(tx);
        if let Err(err) = orchestrator.run_interactive(source, &sink).await {
            debug!(error = %err, "streamed scan ended with an error event");
        }
    });

    let events = ReceiverStream::new(rx).map(|event| {
        Event::default()
            .event(event.event_name())
            .json_data(&event)
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn record_history_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((source, external_id)): Path<(String, String)>,
) -> Response {
    if let Err(rejection) = state.auth.require_admin(&headers) {
        return rejected(rejection);
    }
    let source = match parse_source(Some(source.as_str())) {
        Ok(Some(source)) => source,
        Ok(None) => return failure(StatusCode::BAD_REQUEST, "Unknown source", None),
        Err(resp) => return resp,
    };

    match state.store().history(source, &external_id).await {
        Ok(Some(history)) => {
            let message = format!(
                "{} snapshot(s) for {source}/{external_id}",
                history.snapshots.len()
            );
            Json(ApiResponse::ok(message, history)).into_response()
        }
        Ok(None) => failure(StatusCode::NOT_FOUND, "Record not found", None),
        Err(err) => {
            warn!(%source, %external_id, error = %err, "history lookup failed");
            failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "History lookup failed",
                Some(err.to_string()),
            )
        }
    }
}

async fn healthz_handler() -> &'static str {
    "ok"
}
