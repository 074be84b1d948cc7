//! Approval reconciler: ensures exactly one feedback discussion exists
//! per merge request.
//!
//! The lifecycle is made explicit as [`DiscussionLifecycle`] so the
//! idempotent short-circuit (a redelivered "approved" event must not
//! open a second discussion) is a testable contract rather than
//! incidental control flow.

use anyhow::Result;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::{MergeRequestRow, SqliteDb};
use crate::gitlab::DiscussionApi;
use crate::webhook::MergeRequestEvent;

/// Marker identifying the bot's own prompt message. The note
/// reconciler uses it to avoid re-processing the opening post when it
/// arrives back as a webhook.
pub const FEEDBACK_PROMPT_MARKER: &str = "Feedback request 💬";

/// Where a merge request stands in the feedback discussion lifecycle,
/// as recorded in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscussionLifecycle {
    /// No row for this MR yet.
    Untracked,
    /// Row exists but no feedback discussion has been recorded.
    TrackedWithoutDiscussion,
    /// Row exists and points at the feedback discussion. Terminal:
    /// the pointer is never overwritten.
    TrackedWithDiscussion { discussion_id: String },
}

impl DiscussionLifecycle {
    pub fn of(row: Option<&MergeRequestRow>) -> Self {
        match row {
            None => DiscussionLifecycle::Untracked,
            Some(row) => match row.discussion_id.as_deref() {
                Some(id) if !id.is_empty() => DiscussionLifecycle::TrackedWithDiscussion {
                    discussion_id: id.to_string(),
                },
                _ => DiscussionLifecycle::TrackedWithoutDiscussion,
            },
        }
    }
}

/// Build the prompt body posted as the opening message of the feedback
/// discussion: a header, then a fenced example reply with one line per
/// category (last category always shown as 10).
pub fn build_discussion_body(categories: &[String], info_url: Option<&str>) -> String {
    let mut header = vec![
        format!("### {FEEDBACK_PROMPT_MARKER} — quick ratings 1–10 + optional comment"),
        String::new(),
        "Please reply to this thread with short ratings for these categories \
         (1 = poor, 10 = excellent), followed by any optional text."
            .to_string(),
    ];
    if let Some(url) = info_url {
        header.push(format!("[More info about the feedback request]({url})"));
    }

    let mut example = vec![
        "Example reply:".to_string(),
        String::new(),
        "```text".to_string(),
    ];
    for (i, category) in categories.iter().enumerate() {
        let suggested = if i == categories.len() - 1 {
            10
        } else {
            std::cmp::min(i + 8, 10)
        };
        example.push(format!("{category}: {suggested}"));
    }
    example.push(String::new());
    example.push("Optional comment:".to_string());
    example.push("The PR description could be clearer about the breaking change.".to_string());
    example.push("```".to_string());

    format!("{}\n\n{}", header.join("\n"), example.join("\n"))
}

/// Handle a merge request event. Only the "approved" action is acted
/// on; everything else is a silent no-op.
pub async fn handle_merge_request_approval(
    event: &MergeRequestEvent,
    config: &Config,
    db: &SqliteDb,
    gitlab: &dyn DiscussionApi,
) -> Result<()> {
    if event.object_kind != "merge_request" {
        return Ok(());
    }

    let attrs = &event.object_attributes;
    if attrs.action.as_deref() != Some("approved") {
        return Ok(());
    }

    let mr_id = attrs.id;
    let Some(project_id) = event.project.as_ref().map(|p| p.id).or(event.project_id) else {
        warn!(mr_id, "Approval event has no project id, skipping");
        return Ok(());
    };

    let web_url = attrs
        .url
        .clone()
        .or_else(|| attrs.web_url.clone())
        .or_else(|| attrs.http_url.clone());

    db.upsert_merge_request(&MergeRequestRow {
        mr_id,
        project_id,
        iid: attrs.iid,
        title: attrs.title.clone(),
        web_url,
        discussion_id: None,
        created_at: attrs.created_at.clone(),
        updated_at: attrs.updated_at.clone(),
    })?;

    let row = db.get_merge_request_by_id(mr_id)?;
    if let DiscussionLifecycle::TrackedWithDiscussion { discussion_id } =
        DiscussionLifecycle::of(row.as_ref())
    {
        info!(
            mr_id,
            discussion_id = %discussion_id,
            "Discussion already exists for MR; skipping create"
        );
        return Ok(());
    }

    let body = build_discussion_body(&config.categories, config.feedback_info_url.as_deref());
    let discussion_id = gitlab
        .create_merge_request_discussion(project_id, attrs.iid, &body)
        .await?;

    // Conditional on null: if a concurrent delivery raced us past the
    // lifecycle check, the first recorded id stands and the extra
    // remote discussion is accepted as an orphan.
    let recorded = db.set_discussion_id(mr_id, &discussion_id)?;
    if recorded {
        info!(
            mr_id,
            project_id,
            iid = attrs.iid,
            discussion_id = %discussion_id,
            "Created discussion for MR"
        );
    } else {
        info!(
            mr_id,
            discussion_id = %discussion_id,
            "Concurrent delivery already recorded a discussion; keeping the first"
        );
    }

    Ok(())
}
