//! Inbound GitLab webhook transport: payload types, the shared-token
//! admission gate, and routing to the reconcilers.
//!
//! Handler failures map to 500 so GitLab redelivers the webhook;
//! non-actionable events are acknowledged with 200 so they are not
//! redelivered.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{Json, Response},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::{approval, note, AppState};

/// GitLab redelivers on non-2xx, so oversized bodies get a definitive
/// 413 rather than a retryable failure.
const MAX_BODY_BYTES: usize = 512 * 1024;

#[derive(Debug, Deserialize)]
pub struct MergeRequestEvent {
    pub object_kind: String,
    pub object_attributes: MergeRequestAttributes,
    pub project: Option<Project>,
    pub project_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct MergeRequestAttributes {
    /// Globally unique MR id.
    pub id: u64,
    /// Per-project MR number, used for API addressing.
    pub iid: u64,
    pub action: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub web_url: Option<String>,
    pub http_url: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NoteEvent {
    pub object_kind: String,
    pub object_attributes: NoteAttributes,
    pub merge_request: Option<NoteMergeRequest>,
    pub project: Option<Project>,
    pub project_id: Option<u64>,
    pub user: Option<User>,
}

#[derive(Debug, Deserialize)]
pub struct NoteAttributes {
    pub id: u64,
    pub note: String,
    pub noteable_type: Option<String>,
    pub discussion_id: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NoteMergeRequest {
    pub id: u64,
    pub iid: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Project {
    pub id: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct User {
    pub id: Option<u64>,
    pub username: Option<String>,
}

#[derive(Serialize)]
pub struct WebhookResponse {
    pub message: String,
}

pub fn webhook_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhooks/gitlab", post(gitlab_webhook_handler))
        .layer(middleware::from_fn_with_state(state, verify_webhook_token))
}

/// Admission gate: GitLab sends the configured secret verbatim in the
/// `X-Gitlab-Token` header.
async fn verify_webhook_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = request
        .headers()
        .get("x-gitlab-token")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if token != state.config.webhook_secret {
        error!("Invalid webhook token");
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

fn payload_project_id(payload: &serde_json::Value) -> Option<u64> {
    payload
        .get("project")
        .and_then(|p| p.get("id"))
        .or_else(|| payload.get("project_id"))
        .and_then(|v| v.as_u64())
}

fn is_project_allowed(allowed: Option<&[u64]>, payload: &serde_json::Value) -> bool {
    let Some(allowed) = allowed else {
        return true;
    };
    if allowed.is_empty() {
        return true;
    }
    match payload_project_id(payload) {
        Some(project_id) => allowed.contains(&project_id),
        None => false,
    }
}

pub async fn gitlab_webhook_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<WebhookResponse>, StatusCode> {
    let (_parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE)?;

    let payload: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|_| StatusCode::BAD_REQUEST)?;

    if !is_project_allowed(state.config.allowed_projects.as_deref(), &payload) {
        info!(
            project_id = ?payload_project_id(&payload),
            "Ignoring webhook from non-allowed project"
        );
        return Ok(Json(WebhookResponse {
            message: "ignored".to_string(),
        }));
    }

    match payload.get("object_kind").and_then(|v| v.as_str()) {
        Some("merge_request") => {
            let event: MergeRequestEvent =
                serde_json::from_value(payload).map_err(|_| StatusCode::BAD_REQUEST)?;

            approval::handle_merge_request_approval(
                &event,
                &state.config,
                &state.db,
                state.gitlab.as_ref(),
            )
            .await
            .map_err(|e| {
                error!("Approval handler error: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?;
        }
        Some("note") => {
            let event: NoteEvent =
                serde_json::from_value(payload).map_err(|_| StatusCode::BAD_REQUEST)?;

            note::handle_note(&event, &state.config, &state.db, state.gitlab.as_ref())
                .await
                .map_err(|e| {
                    error!("Note handler error: {:#}", e);
                    StatusCode::INTERNAL_SERVER_ERROR
                })?;
        }
        other => {
            info!(object_kind = ?other, "Ignoring unsupported event kind");
        }
    }

    Ok(Json(WebhookResponse {
        message: "ok".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_allowed_when_unrestricted() {
        let payload = serde_json::json!({ "project": { "id": 5 } });
        assert!(is_project_allowed(None, &payload));
    }

    #[test]
    fn test_project_allowed_when_listed() {
        let payload = serde_json::json!({ "project": { "id": 5 } });
        assert!(is_project_allowed(Some(&[1, 5]), &payload));
    }

    #[test]
    fn test_project_rejected_when_not_listed() {
        let payload = serde_json::json!({ "project": { "id": 9 } });
        assert!(!is_project_allowed(Some(&[1, 5]), &payload));
    }

    #[test]
    fn test_project_rejected_when_id_missing_and_list_set() {
        let payload = serde_json::json!({ "object_kind": "note" });
        assert!(!is_project_allowed(Some(&[1]), &payload));
    }

    #[test]
    fn test_top_level_project_id_fallback() {
        let payload = serde_json::json!({ "project_id": 5 });
        assert!(is_project_allowed(Some(&[5]), &payload));
    }

    #[test]
    fn test_note_event_deserializes() {
        let payload = serde_json::json!({
            "object_kind": "note",
            "object_attributes": {
                "id": 900,
                "note": "Clarity: 8",
                "noteable_type": "MergeRequest",
                "discussion_id": "abc",
                "created_at": "2024-01-01T00:00:00Z"
            },
            "merge_request": { "id": 42, "iid": 7 },
            "project": { "id": 10 },
            "user": { "id": 3, "username": "alice" }
        });
        let event: NoteEvent =
            serde_json::from_value(payload).expect("note event should deserialize");
        assert_eq!(event.object_attributes.id, 900);
        assert_eq!(event.merge_request.expect("mr").iid, 7);
    }

    #[test]
    fn test_merge_request_event_tolerates_missing_optional_fields() {
        let payload = serde_json::json!({
            "object_kind": "merge_request",
            "object_attributes": { "id": 42, "iid": 7 }
        });
        let event: MergeRequestEvent =
            serde_json::from_value(payload).expect("mr event should deserialize");
        assert_eq!(event.object_attributes.action, None);
        assert!(event.project.is_none());
    }
}
