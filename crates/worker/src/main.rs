use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vellum_core::element_type::TypeRegistry;
use vellum_db::{PgContentStore, PgSearchIndexer};
use vellum_worker::{JobRunner, PgJobSource, SearchIndexHandler, WorkerConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vellum_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env();

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = vellum_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    vellum_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    vellum_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Runner ---
    // Element types are registered by the host application; a standalone
    // worker indexes attributes plus the handles named in each job.
    let handler = SearchIndexHandler::new(
        Arc::new(PgContentStore::new(pool.clone())),
        TypeRegistry::new(),
        Arc::new(PgSearchIndexer::new(pool.clone())),
    );
    let runner = JobRunner::new(Arc::new(PgJobSource::new(pool)), handler, config);

    let cancel = CancellationToken::new();
    let runner_cancel = cancel.clone();
    let runner_handle = tokio::spawn(async move {
        runner.run(runner_cancel).await;
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
    cancel.cancel();
    if let Err(e) = runner_handle.await {
        tracing::error!(error = %e, "Job runner task panicked");
    }
}
