use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

/// Default rating categories solicited from reviewers.
const DEFAULT_CATEGORIES: [&str; 4] = ["Clarity", "Timeliness", "CI_Quality", "Review_Helpfulness"];

#[derive(Debug, Clone)]
pub struct Config {
    pub gitlab_base_url: String,
    pub gitlab_token: String,
    pub webhook_secret: String,
    /// Ordered rating categories; order determines parser precedence
    /// and the order of example lines in the discussion prompt.
    pub categories: Vec<String>,
    /// Bot identity used to filter self-authored notes. Matched by
    /// numeric id first, falling back to case-insensitive username.
    pub bot_user_id: Option<u64>,
    pub bot_username: Option<String>,
    /// Whether to post an acknowledgement reply after storing feedback.
    pub create_ack_reply: bool,
    /// If set, only webhooks from these project ids are processed.
    pub allowed_projects: Option<Vec<u64>>,
    /// Optional "more info" link included in the discussion prompt.
    pub feedback_info_url: Option<String>,
    /// Path of the SQLite database file.
    pub db_path: PathBuf,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let gitlab_base_url = env::var("GITLAB_BASE_URL")
            .context("GITLAB_BASE_URL environment variable is required")?
            .trim()
            .to_string();

        let gitlab_token = env::var("GITLAB_TOKEN")
            .context("GITLAB_TOKEN environment variable is required")?
            .trim()
            .to_string();

        let webhook_secret = env::var("GITLAB_WEBHOOK_SECRET")
            .context("GITLAB_WEBHOOK_SECRET environment variable is required")?
            .trim()
            .to_string();

        let categories = parse_categories(env::var("FEEDBACK_CATEGORIES").ok().as_deref());

        let bot_user_id = match env::var("BOT_USER_ID").ok().filter(|s| !s.trim().is_empty()) {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u64>()
                    .context("BOT_USER_ID must be a valid number")?,
            ),
            None => None,
        };

        let bot_username = env::var("BOT_USERNAME")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let create_ack_reply = env::var("CREATE_ACK_REPLY")
            .unwrap_or_else(|_| "true".to_string())
            .to_lowercase()
            == "true";

        let allowed_projects = parse_allowed_projects(env::var("ALLOWED_PROJECTS").ok().as_deref());

        let feedback_info_url = env::var("FEEDBACK_INFO_URL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let db_path = env::var("DB_PATH")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/app.db"));

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        Ok(Config {
            gitlab_base_url,
            gitlab_token,
            webhook_secret,
            categories,
            bot_user_id,
            bot_username,
            create_ack_reply,
            allowed_projects,
            feedback_info_url,
            db_path,
            port,
        })
    }
}

/// Parse the category list from either a JSON array or a CSV string.
///
/// Falls back to the default categories when the variable is unset or
/// blank. A value that looks like JSON but fails to parse is treated
/// as CSV.
pub fn parse_categories(value: Option<&str>) -> Vec<String> {
    let Some(value) = value else {
        return DEFAULT_CATEGORIES.iter().map(|s| s.to_string()).collect();
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return DEFAULT_CATEGORIES.iter().map(|s| s.to_string()).collect();
    }

    if (trimmed.starts_with('[') && trimmed.ends_with(']')) || trimmed.contains('"') {
        if let Ok(parsed) = serde_json::from_str::<Vec<String>>(trimmed) {
            return parsed;
        }
        // fall through to CSV parsing
    }

    trimmed
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a CSV of project ids; returns `None` when unset or when no
/// entry parses, meaning all projects are allowed.
pub fn parse_allowed_projects(value: Option<&str>) -> Option<Vec<u64>> {
    let ids: Vec<u64> = value?
        .split(',')
        .filter_map(|s| s.trim().parse::<u64>().ok())
        .collect();
    if ids.is_empty() {
        None
    } else {
        Some(ids)
    }
}
