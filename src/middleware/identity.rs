use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::timing::StageTracker;
use crate::config::TrackerConfig;
use crate::tracking::{RequestIdentity, StageName};
use crate::AppState;

/// Pages under this prefix need a known user.
const ACCOUNT_PREFIX: &str = "/pages/account";

/// Authenticate and Authorize stages of the demo pipeline.
///
/// Identity comes from trusted proxy headers. It is inserted into the
/// request extensions for handlers and echoed into the response
/// extensions so the tracking layer can enrich the page hit at
/// EndRequest.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let tracker = StageTracker::from_extensions(req.extensions());

    let identity = {
        let _stage = tracker.as_ref().map(|t| t.time(StageName::Authenticate));
        identity_from_headers(req.headers(), &state.config)
    };

    let allowed = {
        let _stage = tracker.as_ref().map(|t| t.time(StageName::Authorize));
        is_authorized(req.uri().path(), &identity)
    };

    let mut response = if allowed {
        req.extensions_mut().insert(identity.clone());
        next.run(req).await
    } else {
        (StatusCode::UNAUTHORIZED, "sign in required").into_response()
    };

    response.extensions_mut().insert(identity);
    response
}

pub fn identity_from_headers(headers: &HeaderMap, config: &TrackerConfig) -> RequestIdentity {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    };

    RequestIdentity {
        user_name: header(&config.user_header),
        session_id: header(&config.session_header),
        agent_session_id: header(&config.agent_session_header),
    }
}

fn is_authorized(path: &str, identity: &RequestIdentity) -> bool {
    !path.starts_with(ACCOUNT_PREFIX) || identity.user_name.is_some()
}
