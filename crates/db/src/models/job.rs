//! Queued background job rows.

use serde::Serialize;
use sqlx::FromRow;
use vellum_core::jobs::JobDescriptor;
use vellum_core::types::{DbId, Timestamp};

/// A row from the `queue_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QueuedJob {
    pub id: DbId,
    pub job_type: String,
    pub description: Option<String>,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub claimed_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub failed_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl QueuedJob {
    pub fn descriptor(&self) -> JobDescriptor {
        JobDescriptor {
            job_type: self.job_type.clone(),
            description: self.description.clone(),
            payload: self.payload.clone(),
            priority: self.priority,
        }
    }
}
