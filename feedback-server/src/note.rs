//! Note reconciler: turns qualifying discussion replies into stored
//! feedback rows.
//!
//! Every precondition failure is a silent skip, not an error: wrong
//! event shape, untracked MR, a note on some other thread, the bot's
//! own messages, or a reply with nothing to store. Only remote and
//! storage failures propagate, with one exception: a failed
//! acknowledgement reply is logged and swallowed because the feedback
//! is already durably stored and a 5xx here would make GitLab redeliver
//! the whole webhook.

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use feedback_core::parser::parse_feedback;

use crate::approval::FEEDBACK_PROMPT_MARKER;
use crate::config::Config;
use crate::db::{FeedbackRow, SqliteDb};
use crate::gitlab::DiscussionApi;
use crate::webhook::NoteEvent;

/// Fixed confirmation reply posted after feedback is stored.
pub const ACK_TEXT: &str = "Thanks for the feedback! ✅";

/// Whether a note author matches the configured bot identity, by
/// numeric id first, else case-insensitive username.
fn is_bot_author(config: &Config, author_id: Option<u64>, author_username: Option<&str>) -> bool {
    if let (Some(bot_id), Some(id)) = (config.bot_user_id, author_id) {
        if bot_id == id {
            return true;
        }
    }
    if let (Some(bot_name), Some(name)) = (config.bot_username.as_deref(), author_username) {
        if bot_name.eq_ignore_ascii_case(name) {
            return true;
        }
    }
    false
}

pub async fn handle_note(
    event: &NoteEvent,
    config: &Config,
    db: &SqliteDb,
    gitlab: &dyn DiscussionApi,
) -> Result<()> {
    if event.object_kind != "note" {
        return Ok(());
    }
    let attrs = &event.object_attributes;
    if attrs.noteable_type.as_deref() != Some("MergeRequest") {
        return Ok(());
    }
    let Some(mr) = &event.merge_request else {
        return Ok(());
    };
    let mr_id = mr.id;
    let comment_id = attrs.id;

    let Some(project_id) = event.project.as_ref().map(|p| p.id).or(event.project_id) else {
        warn!(mr_id, comment_id, "Note event has no project id, skipping");
        return Ok(());
    };

    // Only notes in the one discussion we opened are feedback.
    let Some(mr_row) = db.get_merge_request_by_id(mr_id)? else {
        return Ok(());
    };
    let Some(recorded_discussion) = mr_row.discussion_id.filter(|id| !id.is_empty()) else {
        return Ok(());
    };
    let Some(discussion_id) = attrs.discussion_id.as_deref() else {
        return Ok(());
    };
    if discussion_id != recorded_discussion {
        info!(
            mr_id,
            comment_id,
            discussion_id = %discussion_id,
            "Ignoring note on a different discussion"
        );
        return Ok(());
    }

    let author_id = event.user.as_ref().and_then(|u| u.id);
    let author_username = event.user.as_ref().and_then(|u| u.username.as_deref());
    if is_bot_author(config, author_id, author_username) {
        info!(mr_id, comment_id, "Ignoring bot-authored note");
        return Ok(());
    }

    let note_body = attrs.note.as_str();
    if note_body.trim() == ACK_TEXT {
        info!(mr_id, comment_id, "Ignoring ack note");
        return Ok(());
    }
    // The opening prompt can arrive authored by a different identity
    // than configured; recognize it by its marker text.
    if note_body.contains(FEEDBACK_PROMPT_MARKER) {
        info!(mr_id, comment_id, "Ignoring feedback request note");
        return Ok(());
    }

    let result = parse_feedback(note_body, &config.categories);
    if !result.has_any {
        info!(mr_id, comment_id, "Ignoring note without ratings or text");
        return Ok(());
    }

    let submitted_at = attrs
        .created_at
        .clone()
        .unwrap_or_else(|| Utc::now().to_rfc3339());

    let ratings_json =
        serde_json::to_string(&result.ratings).context("Failed to serialize ratings")?;

    let inserted = db.insert_feedback_if_not_exists(&FeedbackRow {
        mr_id,
        comment_id,
        author_id,
        author_username: author_username.map(|s| s.to_string()),
        submitted_at: Some(submitted_at),
        ratings_json,
        comment_html: Some(note_body.to_string()),
        comment_text: Some(result.comment_text),
    })?;

    if inserted {
        info!(mr_id, comment_id, "Stored feedback");
    } else {
        info!(mr_id, comment_id, "Feedback already stored for this note");
    }

    if config.create_ack_reply {
        // Best effort: the feedback is already durable, so a failed ack
        // must not turn this delivery into a retryable failure.
        if let Err(err) = gitlab
            .post_discussion_note(project_id, mr.iid, &recorded_discussion, ACK_TEXT)
            .await
        {
            warn!(mr_id, comment_id, error = %err, "Failed to post ack reply");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config() -> Config {
        Config {
            gitlab_base_url: "https://gitlab.example.com".to_string(),
            gitlab_token: "token".to_string(),
            webhook_secret: "secret".to_string(),
            categories: vec!["Clarity".to_string()],
            bot_user_id: Some(99),
            bot_username: Some("feedback-bot".to_string()),
            create_ack_reply: true,
            allowed_projects: None,
            feedback_info_url: None,
            db_path: PathBuf::from(":memory:"),
            port: 3000,
        }
    }

    #[test]
    fn test_bot_matched_by_id() {
        assert!(is_bot_author(&config(), Some(99), Some("someone-else")));
    }

    #[test]
    fn test_bot_matched_by_username_case_insensitively() {
        assert!(is_bot_author(&config(), Some(1), Some("Feedback-Bot")));
    }

    #[test]
    fn test_non_bot_author() {
        assert!(!is_bot_author(&config(), Some(1), Some("alice")));
    }

    #[test]
    fn test_anonymous_author_is_not_bot() {
        assert!(!is_bot_author(&config(), None, None));
    }

    #[test]
    fn test_no_bot_configured_never_matches() {
        let mut config = config();
        config.bot_user_id = None;
        config.bot_username = None;
        assert!(!is_bot_author(&config, Some(99), Some("feedback-bot")));
    }
}
