//! Where the worker claims jobs from.

use async_trait::async_trait;
use sqlx::PgPool;
use vellum_core::jobs::JobDescriptor;
use vellum_core::types::DbId;
use vellum_db::repositories::JobRepo;

use crate::error::WorkerError;

/// A job claimed for this worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedJob {
    pub id: DbId,
    pub descriptor: JobDescriptor,
    /// Attempts so far, this one included.
    pub attempts: i32,
}

#[async_trait]
pub trait JobSource: Send + Sync {
    /// Claim the next waiting job, if any.
    async fn claim_next(&self) -> Result<Option<ClaimedJob>, WorkerError>;

    async fn complete(&self, id: DbId) -> Result<(), WorkerError>;

    /// Record a failed attempt. Returns `true` if the job will be retried.
    async fn fail(&self, id: DbId, error: &str, max_attempts: i32) -> Result<bool, WorkerError>;
}

/// Claims jobs from the `queue_jobs` table.
#[derive(Debug, Clone)]
pub struct PgJobSource {
    pool: PgPool,
}

impl PgJobSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobSource for PgJobSource {
    async fn claim_next(&self) -> Result<Option<ClaimedJob>, WorkerError> {
        let claimed = JobRepo::claim_next(&self.pool).await?;
        Ok(claimed.map(|job| ClaimedJob {
            id: job.id,
            descriptor: job.descriptor(),
            attempts: job.attempts,
        }))
    }

    async fn complete(&self, id: DbId) -> Result<(), WorkerError> {
        Ok(JobRepo::complete(&self.pool, id).await?)
    }

    async fn fail(&self, id: DbId, error: &str, max_attempts: i32) -> Result<bool, WorkerError> {
        Ok(JobRepo::fail(&self.pool, id, error, max_attempts).await?)
    }
}
