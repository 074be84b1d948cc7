pub mod approval;
pub mod config;
pub mod db;
pub mod gitlab;
pub mod note;
pub mod webhook;

use std::sync::Arc;

use crate::config::Config;
use crate::db::SqliteDb;
use crate::gitlab::DiscussionApi;

pub struct AppState {
    pub config: Config,
    pub db: SqliteDb,
    pub gitlab: Arc<dyn DiscussionApi>,
}
