//! HTTP and WebSocket API for the lecture video pipeline
//!
//! Exposes upload, start/reprocess, status, result, history and export
//! endpoints over the task store and orchestrator, plus a per-task
//! WebSocket progress stream. Uploaded videos and generated artifacts are
//! also served statically.

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;

use lecture_common::AppConfig;
use lecture_orchestrator::PipelineOrchestrator;
use lecture_store::TaskStore;

pub mod export;
pub mod handlers;
pub mod types;
pub mod ws;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<TaskStore>,
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub config: AppConfig,
}

/// Build the application router
#[must_use]
pub fn build_router(state: ApiState) -> Router {
    let uploads = ServeDir::new(&state.config.storage.upload_dir);
    let outputs = ServeDir::new(&state.config.storage.output_dir);

    Router::new()
        .route("/", get(handlers::health_check))
        .route("/api/config", get(handlers::get_app_config))
        .route("/api/video/check-duplicate", get(handlers::check_duplicate))
        .route("/api/video/upload", post(handlers::upload_video))
        .route("/api/video/start/{task_id}", post(handlers::start_processing))
        .route(
            "/api/video/reprocess/{task_id}",
            post(handlers::reprocess_video),
        )
        .route(
            "/api/video/pipeline/{task_id}/state",
            get(handlers::get_pipeline_state),
        )
        .route(
            "/api/video/pipeline/{task_id}/stage/{stage_name}",
            get(handlers::get_stage_result),
        )
        .route("/api/video/status/{task_id}", get(handlers::get_task_status))
        .route("/api/video/result/{task_id}", get(handlers::get_task_result))
        .route(
            "/api/video/subtitles/{task_id}",
            get(handlers::get_subtitles),
        )
        .route("/api/video/lecture/{task_id}", get(handlers::get_lecture))
        .route("/api/video/history", get(handlers::get_history))
        .route(
            "/api/video/history/{task_id}",
            get(handlers::get_history_item).delete(handlers::delete_history),
        )
        .route(
            "/api/video/history/{task_id}/load",
            get(handlers::load_history_result),
        )
        .route(
            "/api/export/markdown/{task_id}",
            get(handlers::export_markdown),
        )
        .route("/api/export/word/{task_id}", get(handlers::export_word))
        .route("/ws/progress/{task_id}", get(ws::progress_socket))
        .nest_service("/uploads", uploads)
        .nest_service("/outputs", outputs)
        // Video uploads routinely exceed the default multipart cap
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve the API until the process exits
pub async fn start_server(state: ApiState, addr: &str) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API server listening on {}", addr);
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lecture_workers::DefaultStageExecutor;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_router_builds_with_fresh_state() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.storage.upload_dir = dir.path().join("uploads");
        config.storage.output_dir = dir.path().join("outputs");

        let store = Arc::new(TaskStore::open(config.storage.clone()).await.unwrap());
        let executor = Arc::new(DefaultStageExecutor::new(&config));
        let orchestrator =
            PipelineOrchestrator::new(store.clone(), executor, &config.pipeline);

        let _router = build_router(ApiState {
            store,
            orchestrator,
            config,
        });
    }
}
