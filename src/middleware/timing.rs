use axum::{
    extract::{Request, State},
    http::{Extensions, Uri},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;

use crate::error::Result;
use crate::tracking::{
    HostRequest, IdentityProvider, Phase, RequestIdentity, RequestTrackingCoordinator, StageName,
};
use crate::AppState;

// ─── Host adapter types ──────────────────────────────────────────

/// An axum request URI seen as a host pipeline request. The router is
/// mounted at the root, so the URI path is already app-relative.
struct UriRequest<'a>(&'a Uri);

impl HostRequest for UriRequest<'_> {
    fn app_relative_path(&self) -> Result<String> {
        Ok(self.0.path().to_owned())
    }

    fn query_string(&self) -> Result<String> {
        Ok(self.0.query().unwrap_or_default().to_owned())
    }
}

/// Identity published by inner layers through response extensions.
struct ResponseIdentity<'a>(&'a Response);

impl IdentityProvider for ResponseIdentity<'_> {
    fn identity(&self) -> Result<RequestIdentity> {
        Ok(self
            .0
            .extensions()
            .get::<RequestIdentity>()
            .cloned()
            .unwrap_or_default())
    }
}

// ─── Stage handle for inner layers ───────────────────────────────

/// Lets inner layers and handlers mark pipeline stages of the current
/// request. Inserted into request extensions by [`track_request`].
#[derive(Clone)]
pub struct StageTracker {
    coordinator: Arc<RequestTrackingCoordinator>,
}

impl StageTracker {
    pub fn new(coordinator: Arc<RequestTrackingCoordinator>) -> Self {
        Self { coordinator }
    }

    pub fn from_extensions(extensions: &Extensions) -> Option<Self> {
        extensions.get::<Self>().cloned()
    }

    pub fn start(&self, stage: StageName) {
        self.coordinator.on_stage_transition(stage, Phase::Start);
    }

    pub fn end(&self, stage: StageName) {
        self.coordinator.on_stage_transition(stage, Phase::End);
    }

    /// Start `stage` now and end it when the guard drops.
    pub fn time(&self, stage: StageName) -> StageGuard {
        self.start(stage);
        StageGuard {
            tracker: self.clone(),
            stage,
        }
    }
}

/// Ends its stage on drop.
pub struct StageGuard {
    tracker: StageTracker,
    stage: StageName,
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        self.tracker.end(self.stage);
    }
}

// ─── Middleware ──────────────────────────────────────────────────

/// Outermost tracking layer: BeginRequest, the Log stage and EndRequest.
///
/// Each request runs on a pipeline instance checked out of the pool. If
/// the request future is dropped before completion the instance goes back
/// with its metric still pending, and that metric is suppressed when the
/// instance begins its next request.
///
/// Also adds two response headers:
///
///   X-Response-Time-Us: wall time of the inner stack in microseconds
///   Server-Timing:      the same value in Server-Timing format
pub async fn track_request(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let pipeline = state.pipeline.checkout();
    pipeline.begin_request(&UriRequest(req.uri()));
    req.extensions_mut().insert(StageTracker::new(pipeline.shared()));

    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed = start.elapsed();
    let us = elapsed.as_micros();

    // ── Inject response headers ─────────────────────────────────
    if let Ok(val) = us.to_string().parse() {
        response.headers_mut().insert("X-Response-Time-Us", val);
    }

    let server_timing = format!("total;dur={:.3}", elapsed.as_secs_f64() * 1000.0);
    if let Ok(val) = server_timing.parse() {
        response.headers_mut().insert("Server-Timing", val);
    }

    // ── Access log (the Log stage) ──────────────────────────────
    pipeline.on_stage_transition(StageName::Log, Phase::Start);
    let status = response.status().as_u16();
    if path.ends_with("/stream") {
        tracing::debug!(status, %method, %path, us, "request");
    } else {
        tracing::info!(status, %method, %path, us, "request");
    }
    pipeline.on_stage_transition(StageName::Log, Phase::End);

    pipeline.end_request(&ResponseIdentity(&response));
    response
}

/// Route layer timing the ExecuteHandler stage. Only matched routes run
/// it, so fallbacks and cache hits count as "no handler executed".
pub async fn handler_stage(req: Request, next: Next) -> Response {
    let _handler = StageTracker::from_extensions(req.extensions())
        .map(|tracker| tracker.time(StageName::ExecuteHandler));
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricSink;
    use crate::tracking::{PageHit, TrackingSettings};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        hits: Mutex<Vec<PageHit>>,
    }

    impl MetricSink for RecordingSink {
        fn emit(&self, hit: &PageHit) -> Result<()> {
            self.hits.lock().push(hit.clone());
            Ok(())
        }
    }

    #[test]
    fn uri_maps_to_app_relative_path() {
        let uri: Uri = "/pages/home.aspx?x=1&y=2".parse().unwrap();
        let req = UriRequest(&uri);
        assert_eq!(req.app_relative_path().unwrap(), "/pages/home.aspx");
        assert_eq!(req.query_string().unwrap(), "x=1&y=2");

        let uri: Uri = "/".parse().unwrap();
        assert_eq!(UriRequest(&uri).query_string().unwrap(), "");
    }

    #[test]
    fn stage_guard_ends_stage_on_drop() {
        let sink = Arc::new(RecordingSink::default());
        let coordinator = Arc::new(RequestTrackingCoordinator::new(
            Arc::new(TrackingSettings::default()),
            sink.clone(),
        ));
        let uri: Uri = "/pages/home".parse().unwrap();
        coordinator.begin_request(&UriRequest(&uri));

        let tracker = StageTracker::new(coordinator.clone());
        {
            let _guard = tracker.time(StageName::AcquireState);
        }
        coordinator.end_request(&RequestIdentity::default());

        let hits = sink.hits.lock();
        assert_eq!(hits[0].page_name, "home");
        assert!(hits[0].acquire_state_duration_ms.is_some());
        assert!(hits[0].release_state_duration_ms.is_none());
    }
}
