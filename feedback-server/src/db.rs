//! SQLite persistence for merge requests and collected feedback.
//!
//! All cross-delivery safety lives here: feedback deduplication is a
//! UNIQUE index on `(mr_id, comment_id)` enforced at insert time, and
//! the feedback discussion pointer is written with a conditional
//! UPDATE so the first writer wins under concurrent deliveries.
//!
//! # Schema Versioning
//!
//! The database uses SQLite's `user_version` pragma to track schema
//! versions. When the schema changes, increment `SCHEMA_VERSION` and
//! add a migration function in `run_migrations`.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Current schema version. Increment when making schema changes.
const SCHEMA_VERSION: i32 = 1;

/// A tracked merge request, keyed on the GitLab-global MR id.
///
/// `discussion_id` points at the single feedback-collection thread
/// opened on the MR; once set it is never overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequestRow {
    pub mr_id: u64,
    pub project_id: u64,
    pub iid: u64,
    pub title: Option<String>,
    pub web_url: Option<String>,
    pub discussion_id: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// One stored feedback reply, keyed on `(mr_id, comment_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackRow {
    pub mr_id: u64,
    pub comment_id: u64,
    pub author_id: Option<u64>,
    pub author_username: Option<String>,
    pub submitted_at: Option<String>,
    /// Category-to-rating mapping serialized as JSON.
    pub ratings_json: String,
    /// Raw note body as delivered by the webhook.
    pub comment_html: Option<String>,
    /// Free text extracted by the parser.
    pub comment_text: Option<String>,
}

/// SQLite database for merge-request and feedback state.
///
/// Uses a `Mutex<Connection>` because `rusqlite::Connection` is not
/// `Sync`. The Mutex provides the required synchronization; each
/// operation is a single statement, so nothing is held across await
/// points.
pub struct SqliteDb {
    conn: Mutex<Connection>,
}

impl SqliteDb {
    /// Open or create the database file at the given path, creating
    /// parent directories as needed.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {:?}", parent)
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {:?}", path))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    /// Create an in-memory database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    /// Initialize the database schema and run any pending migrations.
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");

        let current_version: i32 =
            conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if current_version > SCHEMA_VERSION {
            anyhow::bail!(
                "Database schema version {} is newer than supported version {}. \
                 Please upgrade the application.",
                current_version,
                SCHEMA_VERSION
            );
        }

        if current_version < SCHEMA_VERSION {
            Self::run_migrations(&conn, current_version)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }

        Ok(())
    }

    /// Run migrations from `from_version` up to `SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i32) -> Result<()> {
        if from_version < 1 {
            Self::migrate_v0_to_v1(conn)?;
        }

        Ok(())
    }

    /// Migration v0 -> v1: Create initial schema.
    fn migrate_v0_to_v1(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS merge_requests (
                mr_id INTEGER PRIMARY KEY,
                project_id INTEGER NOT NULL,
                iid INTEGER NOT NULL,
                title TEXT,
                web_url TEXT,
                discussion_id TEXT,
                created_at TEXT,
                updated_at TEXT
            );

            CREATE TABLE IF NOT EXISTS feedback (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mr_id INTEGER NOT NULL,
                comment_id INTEGER NOT NULL,
                author_id INTEGER,
                author_username TEXT,
                submitted_at TEXT,
                ratings_json TEXT,
                comment_html TEXT,
                comment_text TEXT,
                FOREIGN KEY (mr_id) REFERENCES merge_requests(mr_id)
            );

            -- Deduplication under retried webhook deliveries.
            CREATE UNIQUE INDEX IF NOT EXISTS idx_feedback_mr_comment
            ON feedback(mr_id, comment_id);
            "#,
        )
        .context("Failed to create initial schema (v0 -> v1)")?;

        Ok(())
    }

    /// Create or update a merge request row.
    ///
    /// On conflict the addressing fields are overwritten from the new
    /// event, but an already-set `discussion_id` or `created_at` is
    /// preserved (COALESCE merge): redelivered approval events must not
    /// clobber either.
    pub fn upsert_merge_request(&self, row: &MergeRequestRow) -> Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");

        conn.execute(
            r#"
            INSERT INTO merge_requests
                (mr_id, project_id, iid, title, web_url, discussion_id, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (mr_id)
            DO UPDATE SET
                project_id = excluded.project_id,
                iid = excluded.iid,
                title = excluded.title,
                web_url = excluded.web_url,
                discussion_id = COALESCE(merge_requests.discussion_id, excluded.discussion_id),
                created_at = COALESCE(merge_requests.created_at, excluded.created_at),
                updated_at = excluded.updated_at
            "#,
            rusqlite::params![
                row.mr_id,
                row.project_id,
                row.iid,
                &row.title,
                &row.web_url,
                &row.discussion_id,
                &row.created_at,
                &row.updated_at,
            ],
        )
        .context("Failed to upsert merge request")?;

        Ok(())
    }

    /// Record the feedback discussion id for an MR, but only if none is
    /// recorded yet. Returns whether the write was applied; a `false`
    /// means a concurrent delivery won the race and its id stands.
    pub fn set_discussion_id(&self, mr_id: u64, discussion_id: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("mutex poisoned");

        let rows_affected = conn
            .execute(
                r#"
                UPDATE merge_requests
                SET discussion_id = ?1
                WHERE mr_id = ?2 AND (discussion_id IS NULL OR discussion_id = '')
                "#,
                rusqlite::params![discussion_id, mr_id],
            )
            .context("Failed to set discussion id")?;

        Ok(rows_affected > 0)
    }

    /// Point lookup of a merge request row.
    pub fn get_merge_request_by_id(&self, mr_id: u64) -> Result<Option<MergeRequestRow>> {
        let conn = self.conn.lock().expect("mutex poisoned");

        let result = conn.query_row(
            r#"
            SELECT mr_id, project_id, iid, title, web_url, discussion_id, created_at, updated_at
            FROM merge_requests
            WHERE mr_id = ?1
            "#,
            rusqlite::params![mr_id],
            |row| {
                Ok(MergeRequestRow {
                    mr_id: row.get(0)?,
                    project_id: row.get(1)?,
                    iid: row.get(2)?,
                    title: row.get(3)?,
                    web_url: row.get(4)?,
                    discussion_id: row.get(5)?,
                    created_at: row.get(6)?,
                    updated_at: row.get(7)?,
                })
            },
        );

        match result {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).context("Failed to get merge request"),
        }
    }

    /// Insert a feedback row unless one already exists for the same
    /// `(mr_id, comment_id)`. Returns whether a row was inserted; a
    /// duplicate delivery is a silent no-op, never an error.
    pub fn insert_feedback_if_not_exists(&self, row: &FeedbackRow) -> Result<bool> {
        let conn = self.conn.lock().expect("mutex poisoned");

        let rows_affected = conn
            .execute(
                r#"
                INSERT OR IGNORE INTO feedback
                    (mr_id, comment_id, author_id, author_username, submitted_at,
                     ratings_json, comment_html, comment_text)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                rusqlite::params![
                    row.mr_id,
                    row.comment_id,
                    row.author_id,
                    &row.author_username,
                    &row.submitted_at,
                    &row.ratings_json,
                    &row.comment_html,
                    &row.comment_text,
                ],
            )
            .context("Failed to insert feedback")?;

        Ok(rows_affected > 0)
    }

    /// All feedback stored for an MR, oldest first. Used by tests and
    /// operator tooling; the reconcilers only ever insert.
    pub fn list_feedback_for_mr(&self, mr_id: u64) -> Result<Vec<FeedbackRow>> {
        let conn = self.conn.lock().expect("mutex poisoned");

        let mut stmt = conn
            .prepare(
                r#"
                SELECT mr_id, comment_id, author_id, author_username, submitted_at,
                       ratings_json, comment_html, comment_text
                FROM feedback
                WHERE mr_id = ?1
                ORDER BY id
                "#,
            )
            .context("Failed to prepare feedback query")?;

        let rows = stmt
            .query_map(rusqlite::params![mr_id], |row| {
                Ok(FeedbackRow {
                    mr_id: row.get(0)?,
                    comment_id: row.get(1)?,
                    author_id: row.get(2)?,
                    author_username: row.get(3)?,
                    submitted_at: row.get(4)?,
                    ratings_json: row.get(5)?,
                    comment_html: row.get(6)?,
                    comment_text: row.get(7)?,
                })
            })
            .context("Failed to query feedback")?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.context("Failed to read feedback row")?);
        }

        Ok(results)
    }
}
