use vellum_core::error::CoreError;
use vellum_core::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another transaction committed first.
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Row not found: {entity} with id {id}")]
    Missing { entity: &'static str, id: DbId },

    #[error(transparent)]
    Core(#[from] CoreError),
}
