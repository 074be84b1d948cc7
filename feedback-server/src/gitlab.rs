//! GitLab API client for merge request discussions.
//!
//! Only the two operations the reconcilers need are wrapped: creating
//! the feedback discussion and replying into it. Requests run through
//! the bounded-retry executor; transport failures and 5xx responses
//! retry, 4xx rejections surface immediately because retrying cannot
//! change the outcome.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::info;

use feedback_core::retry::{retry, RetryOptions};

use crate::config::Config;

/// Error from a GitLab API call, preserving the remote status and
/// response body for operator diagnosis.
#[derive(Debug, thiserror::Error)]
pub enum GitLabError {
    #[error("GitLab API returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("GitLab request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl GitLabError {
    /// Whether retrying the call could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            GitLabError::Api { status, .. } => status.is_server_error(),
            GitLabError::Transport(_) => true,
        }
    }
}

/// The remote discussion operations consumed by the reconcilers.
///
/// A trait seam so tests can substitute an in-memory fake for the real
/// HTTP client.
#[async_trait]
pub trait DiscussionApi: Send + Sync {
    /// Create a discussion on an MR; returns the new discussion id.
    async fn create_merge_request_discussion(
        &self,
        project_id: u64,
        mr_iid: u64,
        body: &str,
    ) -> Result<String, GitLabError>;

    /// Post a note into an existing discussion on an MR.
    async fn post_discussion_note(
        &self,
        project_id: u64,
        mr_iid: u64,
        discussion_id: &str,
        body: &str,
    ) -> Result<(), GitLabError>;
}

pub struct GitLabClient {
    client: Client,
    base_api: String,
    token: String,
    retry_options: RetryOptions,
}

#[derive(Debug, Deserialize)]
struct DiscussionResponse {
    id: String,
}

impl GitLabClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_api: format!("{}/api/v4", config.gitlab_base_url.trim_end_matches('/')),
            token: config.gitlab_token.clone(),
            retry_options: RetryOptions::default(),
        }
    }

    /// POST a JSON payload, retrying on transport failures and 5xx.
    ///
    /// 4xx responses are returned as `Ok` here and rejected by the
    /// caller, so they never enter the retry loop.
    async fn post_json(
        &self,
        path: &str,
        payload: serde_json::Value,
    ) -> Result<reqwest::Response, GitLabError> {
        let url = format!("{}{}", self.base_api, path);

        retry(self.retry_options, move || {
            let client = self.client.clone();
            let token = self.token.clone();
            let url = url.clone();
            let payload = payload.clone();
            async move {
                let response = client
                    .post(&url)
                    .header("PRIVATE-TOKEN", &token)
                    .json(&payload)
                    .send()
                    .await?;

                let status = response.status();
                if status.is_server_error() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(GitLabError::Api { status, body });
                }

                Ok(response)
            }
        })
        .await
    }
}

#[async_trait]
impl DiscussionApi for GitLabClient {
    async fn create_merge_request_discussion(
        &self,
        project_id: u64,
        mr_iid: u64,
        body: &str,
    ) -> Result<String, GitLabError> {
        let path = format!("/projects/{}/merge_requests/{}/discussions", project_id, mr_iid);
        let response = self
            .post_json(&path, serde_json::json!({ "body": body }))
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GitLabError::Api { status, body });
        }

        let discussion: DiscussionResponse = response.json().await?;
        info!(
            project_id,
            mr_iid,
            discussion_id = %discussion.id,
            "Created merge request discussion"
        );
        Ok(discussion.id)
    }

    async fn post_discussion_note(
        &self,
        project_id: u64,
        mr_iid: u64,
        discussion_id: &str,
        body: &str,
    ) -> Result<(), GitLabError> {
        let path = format!(
            "/projects/{}/merge_requests/{}/discussions/{}/notes",
            project_id, mr_iid, discussion_id
        );
        let response = self
            .post_json(&path, serde_json::json!({ "body": body }))
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GitLabError::Api { status, body });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_retryable() {
        let err = GitLabError::Api {
            status: StatusCode::BAD_GATEWAY,
            body: "upstream down".to_string(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        let err = GitLabError::Api {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            body: "invalid body".to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_display_preserves_status_and_body() {
        let err = GitLabError::Api {
            status: StatusCode::NOT_FOUND,
            body: "404 Project Not Found".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("404"));
        assert!(rendered.contains("Project Not Found"));
    }
}
