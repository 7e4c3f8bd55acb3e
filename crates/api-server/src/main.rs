//! API server binary for the lecture video pipeline

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lecture_api_server::{start_server, ApiState};
use lecture_common::AppConfig;
use lecture_orchestrator::PipelineOrchestrator;
use lecture_store::TaskStore;
use lecture_workers::DefaultStageExecutor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "lecture_api_server=info,lecture_orchestrator=info,lecture_workers=info,lecture_store=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::default();
    info!(
        "Starting with uploads at {} and outputs at {}",
        config.storage.upload_dir.display(),
        config.storage.output_dir.display()
    );

    let store = Arc::new(TaskStore::open(config.storage.clone()).await?);
    store.reconcile().await?;

    let executor = Arc::new(DefaultStageExecutor::new(&config));
    let orchestrator = PipelineOrchestrator::new(store.clone(), executor, &config.pipeline);

    let addr = AppConfig::bind_addr();
    start_server(
        ApiState {
            store,
            orchestrator,
            config,
        },
        &addr,
    )
    .await
}
