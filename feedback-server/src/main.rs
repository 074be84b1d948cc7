use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

use feedback_server::config::Config;
use feedback_server::db::SqliteDb;
use feedback_server::gitlab::GitLabClient;
use feedback_server::webhook::webhook_router;
use feedback_server::AppState;

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "feedback-bot"
    })))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting GitLab MR Feedback Bot");

    let config = Config::from_env().context("Failed to load configuration")?;

    info!("Using feedback database: {}", config.db_path.display());
    let db = SqliteDb::new(&config.db_path).context("Failed to initialize SQLite database")?;

    let gitlab = GitLabClient::new(&config);
    let port = config.port;

    let app_state = Arc::new(AppState {
        config,
        db,
        gitlab: Arc::new(gitlab),
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(webhook_router(app_state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Server listening on port {}", port);

    axum::serve(listener, app).await?;

    Ok(())
}
