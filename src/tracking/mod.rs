//! Request instrumentation engine.
//!
//! A pipeline instance owns one [`RequestTrackingCoordinator`]. The host
//! calls `begin_request`, then `on_stage_transition` for each stage edge,
//! then `end_request`; the coordinator classifies the path, times each
//! stage on a [`RequestMetric`] and hands the finished [`PageHit`] to a
//! [`MetricSink`](crate::metrics::MetricSink).

pub mod classify;
pub mod coordinator;
pub mod metric;
pub mod pool;

pub use classify::{
    classify, normalize_path, page_identity, Classification, ExclusionSet,
    DEFAULT_EXCLUDED_EXTENSIONS, DYNAMIC_EXTENSIONS,
};
pub use coordinator::{
    Anonymous, CoordinatorStats, HostRequest, IdentityProvider, RequestTrackingCoordinator,
    TrackingSettings, DEFAULT_REPORTING_PATH,
};
pub use metric::{
    FinalizeOutcome, PageHit, Phase, RequestIdentity, RequestMetric, StageName, StageTimer,
};
pub use pool::{PipelinePool, PooledCoordinator};
