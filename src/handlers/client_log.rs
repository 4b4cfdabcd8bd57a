use axum::{http::StatusCode, Json};
use serde::Deserialize;

use super::AppError;

/// Entries accepted per batch.
const MAX_BATCH: usize = 500;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientSeverity {
    Critical,
    Error,
    Warning,
    Information,
    Verbose,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientLogMessage {
    pub severity: ClientSeverity,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientLogBatch {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub agent_session_id: Option<String>,
    pub messages: Vec<ClientLogMessage>,
}

// ─── POST /loupe/log ─────────────────────────────────────────────

/// Client-side reporting channel: browser agents post their log messages
/// here. Requests to this path are never recorded as page hits.
pub async fn receive(Json(batch): Json<ClientLogBatch>) -> Result<StatusCode, AppError> {
    if batch.messages.len() > MAX_BATCH {
        return Err(AppError::BadRequest(format!(
            "at most {MAX_BATCH} messages per batch"
        )));
    }

    let session = batch.session_id.as_deref().unwrap_or("-");
    let agent_session = batch.agent_session_id.as_deref().unwrap_or("-");

    for msg in &batch.messages {
        let category = msg.category.as_deref().unwrap_or("client");
        let caption = msg.caption.as_deref().unwrap_or_default();
        let description = msg.description.as_deref().unwrap_or_default();

        match msg.severity {
            ClientSeverity::Critical | ClientSeverity::Error => tracing::error!(
                target: "client", session, agent_session, category, "{caption} {description}"
            ),
            ClientSeverity::Warning => tracing::warn!(
                target: "client", session, agent_session, category, "{caption} {description}"
            ),
            ClientSeverity::Information => tracing::info!(
                target: "client", session, agent_session, category, "{caption} {description}"
            ),
            ClientSeverity::Verbose => tracing::debug!(
                target: "client", session, agent_session, category, "{caption} {description}"
            ),
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_batch_with_optional_fields() {
        let batch: ClientLogBatch = serde_json::from_str(
            r#"{"sessionId":"s-1","messages":[
                {"severity":"error","caption":"boom"},
                {"severity":"verbose"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(batch.session_id.as_deref(), Some("s-1"));
        assert_eq!(batch.messages.len(), 2);
        assert!(matches!(batch.messages[0].severity, ClientSeverity::Error));
        assert!(batch.messages[1].caption.is_none());
    }

    #[tokio::test]
    async fn oversized_batch_is_rejected() {
        let messages = (0..=MAX_BATCH)
            .map(|_| ClientLogMessage {
                severity: ClientSeverity::Verbose,
                category: None,
                caption: None,
                description: None,
            })
            .collect();
        let batch = ClientLogBatch {
            session_id: None,
            agent_session_id: None,
            messages,
        };
        assert!(matches!(receive(Json(batch)).await, Err(AppError::BadRequest(_))));
    }
}
