use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

use super::collector::MetricsSnapshot;
use crate::tracking::CoordinatorStats;
use crate::AppState;

/// SSE push interval
const STREAM_INTERVAL: Duration = Duration::from_secs(1);

// ─── GET /api/metrics ────────────────────────────────────────────

/// Returns a single JSON snapshot of the page-hit aggregates.
pub async fn get_metrics(
    State(state): State<Arc<AppState>>,
) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

// ─── GET /api/metrics/stream ─────────────────────────────────────

/// Server-Sent Events endpoint.
/// Pushes a full `MetricsSnapshot` as JSON every second.
pub async fn metrics_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let interval = tokio::time::interval(STREAM_INTERVAL);

    let stream = IntervalStream::new(interval).map(move |_| {
        let snapshot = state.metrics.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap_or_default();
        Ok(Event::default().event("snapshot").data(json))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

// ─── GET /api/pipeline ───────────────────────────────────────────

/// Health of the instrumentation itself: how many pipeline instances
/// exist and how their metrics were finalized.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub instances_created: u64,
    pub instances_idle: usize,
    #[serde(flatten)]
    pub finalized: CoordinatorStats,
}

pub async fn get_pipeline(
    State(state): State<Arc<AppState>>,
) -> Json<PipelineReport> {
    Json(PipelineReport {
        instances_created: state.pipeline.created_count(),
        instances_idle: state.pipeline.idle_count(),
        finalized: state.pipeline.stats(),
    })
}
