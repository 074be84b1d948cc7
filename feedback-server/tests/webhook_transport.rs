//! HTTP-level tests for the webhook admission gate and routing.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use feedback_server::config::Config;
use feedback_server::db::SqliteDb;
use feedback_server::gitlab::{DiscussionApi, GitLabError};
use feedback_server::webhook::webhook_router;
use feedback_server::AppState;

/// Minimal fake: hands out sequential discussion ids, accepts notes.
struct StubGitLab;

#[async_trait]
impl DiscussionApi for StubGitLab {
    async fn create_merge_request_discussion(
        &self,
        _project_id: u64,
        _mr_iid: u64,
        _body: &str,
    ) -> Result<String, GitLabError> {
        Ok("disc-1".to_string())
    }

    async fn post_discussion_note(
        &self,
        _project_id: u64,
        _mr_iid: u64,
        _discussion_id: &str,
        _body: &str,
    ) -> Result<(), GitLabError> {
        Ok(())
    }
}

fn app(allowed_projects: Option<Vec<u64>>) -> (Router, Arc<AppState>) {
    let config = Config {
        gitlab_base_url: "https://gitlab.example.com".to_string(),
        gitlab_token: "token".to_string(),
        webhook_secret: "hook-secret".to_string(),
        categories: vec!["Clarity".to_string()],
        bot_user_id: None,
        bot_username: None,
        create_ack_reply: false,
        allowed_projects,
        feedback_info_url: None,
        db_path: PathBuf::from(":memory:"),
        port: 3000,
    };
    let state = Arc::new(AppState {
        config,
        db: SqliteDb::new_in_memory().expect("should create db"),
        gitlab: Arc::new(StubGitLab),
    });
    let router = Router::new()
        .merge(webhook_router(state.clone()))
        .with_state(state.clone());
    (router, state)
}

fn post(token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhooks/gitlab")
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("x-gitlab-token", token);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("should build request")
}

fn approved_payload(project_id: u64) -> String {
    serde_json::json!({
        "object_kind": "merge_request",
        "object_attributes": {
            "id": 42,
            "iid": 7,
            "action": "approved",
            "title": "Add parser"
        },
        "project": { "id": project_id }
    })
    .to_string()
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let (app, _state) = app(None);
    let response = app
        .oneshot(post(None, &approved_payload(10)))
        .await
        .expect("request should complete");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_wrong_token_is_unauthorized() {
    let (app, state) = app(None);
    let response = app
        .oneshot(post(Some("wrong"), &approved_payload(10)))
        .await
        .expect("request should complete");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(state
        .db
        .get_merge_request_by_id(42)
        .expect("should query")
        .is_none());
}

#[tokio::test]
async fn test_non_post_is_method_not_allowed() {
    let (app, _state) = app(None);
    let request = Request::builder()
        .method("GET")
        .uri("/webhooks/gitlab")
        .header("x-gitlab-token", "hook-secret")
        .body(Body::empty())
        .expect("should build request");
    let response = app.oneshot(request).await.expect("request should complete");
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_invalid_json_is_bad_request() {
    let (app, _state) = app(None);
    let response = app
        .oneshot(post(Some("hook-secret"), "{not json"))
        .await
        .expect("request should complete");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_body_is_payload_too_large() {
    let (app, _state) = app(None);
    let padding = "x".repeat(600 * 1024);
    let body = format!(r#"{{"object_kind": "note", "padding": "{padding}"}}"#);
    let response = app
        .oneshot(post(Some("hook-secret"), &body))
        .await
        .expect("request should complete");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_approved_event_is_processed_through_http() {
    let (app, state) = app(None);
    let response = app
        .oneshot(post(Some("hook-secret"), &approved_payload(10)))
        .await
        .expect("request should complete");
    assert_eq!(response.status(), StatusCode::OK);

    let row = state
        .db
        .get_merge_request_by_id(42)
        .expect("should query")
        .expect("row should exist");
    assert_eq!(row.discussion_id.as_deref(), Some("disc-1"));
}

#[tokio::test]
async fn test_non_allowed_project_is_acknowledged_but_ignored() {
    let (app, state) = app(Some(vec![1, 2]));
    let response = app
        .oneshot(post(Some("hook-secret"), &approved_payload(10)))
        .await
        .expect("request should complete");
    // 200 so GitLab does not redeliver.
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state
        .db
        .get_merge_request_by_id(42)
        .expect("should query")
        .is_none());
}

#[tokio::test]
async fn test_unknown_event_kind_is_acknowledged() {
    let (app, _state) = app(None);
    let response = app
        .oneshot(post(
            Some("hook-secret"),
            r#"{"object_kind": "pipeline", "project": {"id": 1}}"#,
        ))
        .await
        .expect("request should complete");
    assert_eq!(response.status(), StatusCode::OK);
}
