use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metrics::MetricSink;

// ─── Stage names ─────────────────────────────────────────────────

/// Pipeline stages timed between BeginRequest and EndRequest, in
/// pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageName {
    Authenticate,
    Authorize,
    ResolveCache,
    MapHandler,
    AcquireState,
    ExecuteHandler,
    ReleaseState,
    UpdateCache,
    Log,
}

impl StageName {
    pub const COUNT: usize = 9;

    pub const ALL: [StageName; Self::COUNT] = [
        Self::Authenticate,
        Self::Authorize,
        Self::ResolveCache,
        Self::MapHandler,
        Self::AcquireState,
        Self::ExecuteHandler,
        Self::ReleaseState,
        Self::UpdateCache,
        Self::Log,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authenticate => "authenticate",
            Self::Authorize => "authorize",
            Self::ResolveCache => "resolveCache",
            Self::MapHandler => "mapHandler",
            Self::AcquireState => "acquireState",
            Self::ExecuteHandler => "executeHandler",
            Self::ReleaseState => "releaseState",
            Self::UpdateCache => "updateCache",
            Self::Log => "log",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which edge of a stage a pipeline notification marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    End,
}

// ─── StageTimer ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
enum TimerState {
    #[default]
    NotStarted,
    Running(Instant),
    Stopped(Duration),
}

/// Start/stop wall-clock timer for one pipeline stage.
///
/// `start` always restarts (last start wins). `stop` without a prior
/// `start` records zero. A timer that was never stopped has no duration,
/// which is how a skipped stage differs from an instant one.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageTimer {
    state: TimerState,
}

impl StageTimer {
    pub fn start(&mut self) {
        self.state = TimerState::Running(Instant::now());
    }

    pub fn stop(&mut self) -> Duration {
        let elapsed = match self.state {
            TimerState::Running(started) => started.elapsed(),
            TimerState::Stopped(elapsed) => elapsed,
            TimerState::NotStarted => Duration::ZERO,
        };
        self.state = TimerState::Stopped(elapsed);
        elapsed
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, TimerState::Running(_))
    }

    pub fn duration(&self) -> Option<Duration> {
        match self.state {
            TimerState::Stopped(elapsed) => Some(elapsed),
            _ => None,
        }
    }
}

// ─── Identity ────────────────────────────────────────────────────

/// Who made the request, resolved at EndRequest. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestIdentity {
    pub user_name: Option<String>,
    pub session_id: Option<String>,
    pub agent_session_id: Option<String>,
}

// ─── Output record ───────────────────────────────────────────────

/// One finished page hit, as delivered to a [`MetricSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageHit {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub page_name: String,
    pub absolute_path: String,
    pub query_string: String,
    pub total_duration_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticate_duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorize_duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_cache_duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_handler_duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquire_state_duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_handler_duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_state_duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_cache_duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_duration_ms: Option<f64>,
    pub served_from_cache: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
}

impl PageHit {
    pub fn stage_duration_ms(&self, stage: StageName) -> Option<f64> {
        match stage {
            StageName::Authenticate => self.authenticate_duration_ms,
            StageName::Authorize => self.authorize_duration_ms,
            StageName::ResolveCache => self.resolve_cache_duration_ms,
            StageName::MapHandler => self.map_handler_duration_ms,
            StageName::AcquireState => self.acquire_state_duration_ms,
            StageName::ExecuteHandler => self.execute_handler_duration_ms,
            StageName::ReleaseState => self.release_state_duration_ms,
            StageName::UpdateCache => self.update_cache_duration_ms,
            StageName::Log => self.log_duration_ms,
        }
    }
}

// ─── RequestMetric ───────────────────────────────────────────────

/// What [`RequestMetric::finalize`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Emitted,
    Suppressed,
    /// The sink returned an error or panicked; the hit was dropped.
    Failed,
    AlreadyFinalized,
}

/// Timing breakdown of one in-flight request.
///
/// Path identity is fixed at construction. Stages are driven by
/// [`record`](Self::record); [`finalize`](Self::finalize) either emits the
/// hit or discards it, exactly once.
#[derive(Debug)]
pub struct RequestMetric {
    id: Uuid,
    page_name: String,
    absolute_path: String,
    query_string: String,
    identity: RequestIdentity,
    served_from_cache: bool,
    request_timer: Instant,
    stages: [StageTimer; StageName::COUNT],
    total_duration: Option<Duration>,
    suppressed: bool,
    finalized: bool,
}

impl RequestMetric {
    pub fn new(page_name: String, absolute_path: String, query_string: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            page_name,
            absolute_path,
            query_string,
            identity: RequestIdentity::default(),
            served_from_cache: false,
            request_timer: Instant::now(),
            stages: [StageTimer::default(); StageName::COUNT],
            total_duration: None,
            suppressed: false,
            finalized: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn page_name(&self) -> &str {
        &self.page_name
    }

    pub fn absolute_path(&self) -> &str {
        &self.absolute_path
    }

    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    pub fn identity(&self) -> &RequestIdentity {
        &self.identity
    }

    pub fn served_from_cache(&self) -> bool {
        self.served_from_cache
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn total_duration(&self) -> Option<Duration> {
        self.total_duration
    }

    pub fn stage_duration(&self, stage: StageName) -> Option<Duration> {
        self.stages[stage.index()].duration()
    }

    pub fn stage_start(&mut self, stage: StageName) {
        self.stages[stage.index()].start();
        if stage == StageName::ExecuteHandler {
            // a handler ran, so the response was generated
            self.served_from_cache = false;
        }
    }

    pub fn stage_end(&mut self, stage: StageName) {
        self.stages[stage.index()].stop();
        if stage == StageName::Authorize {
            // assume cached until a handler starts; the cache module may run
            // ahead of us and skip its own events
            self.served_from_cache = true;
        }
    }

    pub fn record(&mut self, stage: StageName, phase: Phase) {
        match phase {
            Phase::Start => self.stage_start(stage),
            Phase::End => self.stage_end(stage),
        }
    }

    pub fn set_identity(&mut self, identity: RequestIdentity) {
        self.identity = identity;
    }

    /// Mark the metric invalid; finalization will discard it.
    pub fn suppress(&mut self) {
        self.suppressed = true;
    }

    /// Stop the total timer and, unless suppressed, hand the hit to `sink`.
    ///
    /// Sink errors and panics are logged and swallowed.
    pub fn finalize(&mut self, sink: &dyn MetricSink) -> FinalizeOutcome {
        if self.finalized {
            return FinalizeOutcome::AlreadyFinalized;
        }
        self.finalized = true;
        self.total_duration = Some(self.request_timer.elapsed());

        if self.suppressed {
            return FinalizeOutcome::Suppressed;
        }

        let hit = self.to_page_hit();
        match panic::catch_unwind(AssertUnwindSafe(|| sink.emit(&hit))) {
            Ok(Ok(())) => FinalizeOutcome::Emitted,
            Ok(Err(e)) => {
                tracing::warn!(path = %hit.absolute_path, error = %e, "dropping page hit: sink failed");
                FinalizeOutcome::Failed
            }
            Err(_) => {
                tracing::warn!(path = %hit.absolute_path, "dropping page hit: sink panicked");
                FinalizeOutcome::Failed
            }
        }
    }

    /// Snapshot the metric as an output record.
    pub fn to_page_hit(&self) -> PageHit {
        let ms = |stage: StageName| self.stage_duration(stage).map(duration_ms);
        let total = self
            .total_duration
            .unwrap_or_else(|| self.request_timer.elapsed());

        PageHit {
            id: self.id,
            timestamp: Utc::now(),
            page_name: self.page_name.clone(),
            absolute_path: self.absolute_path.clone(),
            query_string: self.query_string.clone(),
            total_duration_ms: duration_ms(total),
            authenticate_duration_ms: ms(StageName::Authenticate),
            authorize_duration_ms: ms(StageName::Authorize),
            resolve_cache_duration_ms: ms(StageName::ResolveCache),
            map_handler_duration_ms: ms(StageName::MapHandler),
            acquire_state_duration_ms: ms(StageName::AcquireState),
            execute_handler_duration_ms: ms(StageName::ExecuteHandler),
            release_state_duration_ms: ms(StageName::ReleaseState),
            update_cache_duration_ms: ms(StageName::UpdateCache),
            log_duration_ms: ms(StageName::Log),
            served_from_cache: self.served_from_cache,
            user_name: self.identity.user_name.clone(),
            session_id: self.identity.session_id.clone(),
            agent_session_id: self.identity.agent_session_id.clone(),
        }
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
