use vellum_core::error::CoreError;
use vellum_db::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("No handler for job type '{0}'")]
    UnknownJobType(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
