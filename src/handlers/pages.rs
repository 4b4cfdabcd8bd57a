use axum::{extract::Path, response::Html};

use super::AppError;

// ─── GET / ───────────────────────────────────────────────────────

pub async fn home() -> Html<&'static str> {
    Html(
        "<!doctype html><title>Request tracker</title>\
         <h1>Request tracker</h1>\
         <p>Page hits: <a href=\"/api/metrics\">/api/metrics</a></p>",
    )
}

// ─── GET /pages/:name ────────────────────────────────────────────

/// Page bodies must not depend on the caller: they go through the
/// output cache.
pub async fn page(Path(name): Path<String>) -> Result<Html<String>, AppError> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(AppError::NotFound(format!("page '{name}' not found")));
    }

    Ok(Html(format!(
        "<!doctype html><title>{name}</title><h1>{name}</h1>"
    )))
}
