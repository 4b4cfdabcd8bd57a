use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::timing::StageTracker;
use crate::tracking::StageName;
use crate::AppState;

/// Only pages are cached.
const CACHEABLE_PREFIX: &str = "/pages/";

/// Bodies larger than this are not buffered.
const MAX_CACHED_BODY: usize = 1024 * 1024;

struct CachedPage {
    stored: Instant,
    content_type: Option<HeaderValue>,
    body: Bytes,
}

/// Output cache for successful page responses, keyed by path and query.
pub struct ResponseCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedPage>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, key: &str) -> Option<Response> {
        let mut entries = self.entries.lock();
        let page = entries.get(key)?;
        if page.stored.elapsed() >= self.ttl {
            entries.remove(key);
            return None;
        }

        let mut response = Response::new(Body::from(page.body.clone()));
        if let Some(ct) = &page.content_type {
            response.headers_mut().insert(header::CONTENT_TYPE, ct.clone());
        }
        response
            .headers_mut()
            .insert("X-Cache", HeaderValue::from_static("hit"));
        Some(response)
    }

    fn put(&self, key: String, content_type: Option<HeaderValue>, body: Bytes) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, page| now.duration_since(page.stored) < self.ttl);
        entries.insert(
            key,
            CachedPage {
                stored: now,
                content_type,
                body,
            },
        );
    }
}

/// ResolveCache and UpdateCache stages of the demo pipeline.
///
/// A hit is answered here, so no handler runs and the page hit is
/// recorded as served from cache.
pub async fn response_cache(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let tracker = StageTracker::from_extensions(req.extensions());
    let key = cache_key(&state.cache, &req);

    let cached = {
        let _stage = tracker.as_ref().map(|t| t.time(StageName::ResolveCache));
        key.as_deref().and_then(|k| state.cache.get(k))
    };
    if let Some(response) = cached {
        return response;
    }

    let response = next.run(req).await;
    let Some(key) = key else {
        return response;
    };
    if response.status() != StatusCode::OK {
        return response;
    }

    let _stage = tracker.as_ref().map(|t| t.time(StageName::UpdateCache));
    let (parts, body) = response.into_parts();
    match axum::body::to_bytes(body, MAX_CACHED_BODY).await {
        Ok(bytes) => {
            let content_type = parts.headers.get(header::CONTENT_TYPE).cloned();
            state.cache.put(key, content_type, bytes.clone());
            Response::from_parts(parts, Body::from(bytes))
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not buffer page for output cache");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn cache_key(cache: &ResponseCache, req: &Request) -> Option<String> {
    let cacheable = cache.is_enabled()
        && req.method() == Method::GET
        && req.uri().path().starts_with(CACHEABLE_PREFIX);
    cacheable.then(|| req.uri().to_string())
}
