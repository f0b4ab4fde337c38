//! Vellum content store gateway.
//!
//! - [`store`]: the [`ContentStore`] / [`StoreTx`] traits the engine writes through.
//! - [`pg`]: the PostgreSQL implementation, plus search indexer and job queue.
//! - [`memory`]: an in-process implementation with optimistic transactions.
//! - [`repositories`]: zero-sized SQL repositories used by [`pg`].

use sqlx::postgres::PgPoolOptions;

pub mod error;
pub mod memory;
pub mod models;
pub mod pg;
pub mod repositories;
pub mod store;

pub use error::StoreError;
pub use memory::{LoggedQuery, MemoryJobQueue, MemorySearchIndex, MemoryStore, QueryShape};
pub use pg::{PgContentStore, PgJobQueue, PgSearchIndexer};
pub use store::{ContentStore, OwnedFilter, StoreTx};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Run a trivial query to verify the connection works.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply all pending migrations from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}
