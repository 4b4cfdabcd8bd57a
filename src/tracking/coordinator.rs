use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use serde::Serialize;

use super::classify::{classify, normalize_path, Classification, ExclusionSet};
use super::metric::{FinalizeOutcome, Phase, RequestIdentity, RequestMetric, StageName};
use crate::error::Result;
use crate::metrics::MetricSink;

/// Path of the client-side reporting channel, relative to the app root.
pub const DEFAULT_REPORTING_PATH: &str = "loupe/log";

// ─── Host-facing traits ──────────────────────────────────────────

/// Read access to the request the host pipeline is starting.
///
/// Either accessor may fail when the host object is in a state where the
/// data isn't available yet.
pub trait HostRequest {
    /// App-relative path, e.g. `~/Default.aspx`. Empty when unknown.
    fn app_relative_path(&self) -> Result<String>;

    fn query_string(&self) -> Result<String>;
}

/// Identity/session lookup performed at EndRequest.
pub trait IdentityProvider {
    fn identity(&self) -> Result<RequestIdentity>;
}

impl IdentityProvider for RequestIdentity {
    fn identity(&self) -> Result<RequestIdentity> {
        Ok(self.clone())
    }
}

/// Provider for hosts with no notion of users or sessions.
pub struct Anonymous;

impl IdentityProvider for Anonymous {
    fn identity(&self) -> Result<RequestIdentity> {
        Ok(RequestIdentity::default())
    }
}

// ─── Settings ────────────────────────────────────────────────────

/// Classification inputs shared by every coordinator of one pipeline.
#[derive(Debug, Clone)]
pub struct TrackingSettings {
    pub exclusions: ExclusionSet,
    pub reporting_path: String,
}

impl TrackingSettings {
    pub fn new(exclusions: ExclusionSet, reporting_path: impl Into<String>) -> Self {
        Self {
            exclusions,
            reporting_path: reporting_path.into(),
        }
    }

    /// Classify a request, ignoring our own telemetry channel.
    pub fn classify(&self, raw_path: &str, query_string: &str) -> Classification {
        if self.is_reporting_path(raw_path) {
            return Classification::Ignore;
        }
        classify(raw_path, query_string, &self.exclusions)
    }

    fn is_reporting_path(&self, raw_path: &str) -> bool {
        if self.reporting_path.is_empty() {
            return false;
        }
        let path = normalize_path(raw_path);
        path == self.reporting_path
            || path.trim_start_matches('/') == self.reporting_path.trim_start_matches('/')
    }
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self::new(ExclusionSet::default(), DEFAULT_REPORTING_PATH)
    }
}

// ─── Stats ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Counters {
    emitted: AtomicU64,
    suppressed: AtomicU64,
    failed: AtomicU64,
    ignored: AtomicU64,
}

/// Finalization counts for one coordinator (or a whole pool).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub emitted: u64,
    pub suppressed: u64,
    pub failed: u64,
    pub ignored: u64,
}

impl CoordinatorStats {
    pub fn finalized(&self) -> u64 {
        self.emitted + self.suppressed + self.failed
    }
}

impl std::ops::AddAssign for CoordinatorStats {
    fn add_assign(&mut self, rhs: Self) {
        self.emitted += rhs.emitted;
        self.suppressed += rhs.suppressed;
        self.failed += rhs.failed;
        self.ignored += rhs.ignored;
    }
}

// ─── Coordinator ─────────────────────────────────────────────────

type Slot = Arc<Mutex<RequestMetric>>;

/// Binds one pipeline instance's stage callbacks to the metric of the
/// request it is currently serving.
///
/// The current metric lives in an atomically swappable slot. Every hand-off
/// (install at BeginRequest, removal at EndRequest or shutdown) is a single
/// swap, so each metric is finalized exactly once even when callbacks of
/// overlapping requests interleave. No entry point returns an error or
/// panics into the host.
pub struct RequestTrackingCoordinator {
    current: ArcSwapOption<Mutex<RequestMetric>>,
    settings: Arc<TrackingSettings>,
    sink: Arc<dyn MetricSink>,
    counters: Counters,
}

impl RequestTrackingCoordinator {
    pub fn new(settings: Arc<TrackingSettings>, sink: Arc<dyn MetricSink>) -> Self {
        Self {
            current: ArcSwapOption::empty(),
            settings,
            sink,
            counters: Counters::default(),
        }
    }

    pub fn settings(&self) -> &TrackingSettings {
        &self.settings
    }

    /// True while a metric occupies the slot.
    pub fn is_tracking(&self) -> bool {
        self.current.load().is_some()
    }

    /// Start tracking a new request.
    ///
    /// Whatever still occupies the slot belongs to a request that never
    /// reached EndRequest; its timing can't be trusted, so it is
    /// suppressed.
    pub fn begin_request(&self, request: &dyn HostRequest) {
        let next = match self.classify_request(request) {
            Ok(Classification::Track(metric)) => Some(Arc::new(Mutex::new(metric))),
            Ok(Classification::Ignore) => {
                self.counters.ignored.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "request not tracked: host state unavailable");
                None
            }
        };

        if let Some(stale) = self.current.swap(next) {
            let mut stale = stale.lock();
            tracing::debug!(path = %stale.absolute_path(), "suppressing metric of unfinished request");
            stale.suppress();
            let outcome = stale.finalize(self.sink.as_ref());
            self.count(outcome);
        }
    }

    /// Forward a stage notification to the current metric, if any.
    pub fn on_stage_transition(&self, stage: StageName, phase: Phase) {
        if let Some(metric) = self.current.load_full() {
            metric.lock().record(stage, phase);
        }
    }

    /// Enrich the current metric with identity data, finalize it and clear
    /// the slot.
    pub fn end_request(&self, identity: &dyn IdentityProvider) {
        let Some(metric) = self.current.swap(None) else {
            return;
        };
        let mut metric = metric.lock();

        match identity.identity() {
            Ok(identity) => metric.set_identity(identity),
            Err(e) => tracing::debug!(error = %e, "identity lookup failed at end of request"),
        }

        let outcome = metric.finalize(self.sink.as_ref());
        self.count(outcome);
    }

    /// Discard any leftover metric. Called when the pipeline instance is
    /// torn down.
    pub fn shutdown(&self) {
        if let Some(metric) = self.current.swap(None) {
            let mut metric = metric.lock();
            metric.suppress();
            let outcome = metric.finalize(self.sink.as_ref());
            self.count(outcome);
        }
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            emitted: self.counters.emitted.load(Ordering::Relaxed),
            suppressed: self.counters.suppressed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            ignored: self.counters.ignored.load(Ordering::Relaxed),
        }
    }

    fn classify_request(&self, request: &dyn HostRequest) -> Result<Classification> {
        let path = request.app_relative_path()?;
        let query = request.query_string()?;
        Ok(self.settings.classify(&path, &query))
    }

    fn count(&self, outcome: FinalizeOutcome) {
        let counter = match outcome {
            FinalizeOutcome::Emitted => &self.counters.emitted,
            FinalizeOutcome::Suppressed => &self.counters.suppressed,
            FinalizeOutcome::Failed => &self.counters.failed,
            FinalizeOutcome::AlreadyFinalized => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for RequestTrackingCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
