//! Repository for the `queue_jobs` table.

use sqlx::PgPool;
use vellum_core::jobs::JobDescriptor;
use vellum_core::types::DbId;

use crate::models::job::QueuedJob;

const COLUMNS: &str = "\
    id, job_type, description, payload, priority, attempts, last_error, \
    claimed_at, completed_at, failed_at, created_at";

/// Provides push, claim and completion for queued background jobs.
pub struct JobRepo;

impl JobRepo {
    pub async fn push(pool: &PgPool, job: &JobDescriptor) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO queue_jobs (job_type, description, payload, priority) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id",
        )
        .bind(&job.job_type)
        .bind(&job.description)
        .bind(&job.payload)
        .bind(job.priority)
        .fetch_one(pool)
        .await
    }

    /// Atomically claim the next waiting job.
    ///
    /// Lower priority values run first, then oldest first. Uses
    /// `SELECT FOR UPDATE SKIP LOCKED` so concurrent workers never claim
    /// the same job.
    pub async fn claim_next(pool: &PgPool) -> Result<Option<QueuedJob>, sqlx::Error> {
        let query = format!(
            "UPDATE queue_jobs \
             SET claimed_at = NOW(), attempts = attempts + 1 \
             WHERE id = ( \
                 SELECT id FROM queue_jobs \
                 WHERE claimed_at IS NULL AND completed_at IS NULL AND failed_at IS NULL \
                 ORDER BY priority ASC, created_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueuedJob>(&query).fetch_optional(pool).await
    }

    pub async fn complete(pool: &PgPool, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE queue_jobs SET completed_at = NOW(), last_error = NULL WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Record a failed attempt. The job goes back to the queue unless it
    /// has used `max_attempts`, in which case it is marked failed.
    ///
    /// Returns `true` if the job will be retried.
    pub async fn fail(pool: &PgPool, id: DbId, error: &str, max_attempts: i32) -> Result<bool, sqlx::Error> {
        let retried: Option<bool> = sqlx::query_scalar(
            "UPDATE queue_jobs SET \
                last_error = $2, \
                claimed_at = CASE WHEN attempts < $3 THEN NULL ELSE claimed_at END, \
                failed_at = CASE WHEN attempts < $3 THEN NULL ELSE NOW() END \
             WHERE id = $1 \
             RETURNING failed_at IS NULL",
        )
        .bind(id)
        .bind(error)
        .bind(max_attempts)
        .fetch_optional(pool)
        .await?;
        Ok(retried.unwrap_or(false))
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<QueuedJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM queue_jobs WHERE id = $1");
        sqlx::query_as::<_, QueuedJob>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}
