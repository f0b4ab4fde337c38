//! The job polling loop.
//!
//! [`JobRunner`] claims one job at a time from its [`JobSource`], runs it,
//! and marks it complete or failed. When the queue is empty it sleeps for
//! the configured poll interval. Cancellation is checked between jobs, so
//! a running job always finishes.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vellum_core::jobs::JOB_UPDATE_SEARCH_INDEX;

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::handler::SearchIndexHandler;
use crate::source::{ClaimedJob, JobSource};

pub struct JobRunner {
    source: Arc<dyn JobSource>,
    search_index: SearchIndexHandler,
    config: WorkerConfig,
}

impl JobRunner {
    pub fn new(source: Arc<dyn JobSource>, search_index: SearchIndexHandler, config: WorkerConfig) -> Self {
        Self {
            source,
            search_index,
            config,
        }
    }

    /// Run until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_attempts = self.config.max_attempts,
            "Job runner started",
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let idle = match self.run_once().await {
                Ok(ran) => !ran,
                Err(e) => {
                    tracing::error!(error = %e, "Job cycle failed");
                    true
                }
            };
            if !idle {
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        tracing::info!("Job runner shutting down");
    }

    /// Claim and run one job. Returns `false` when the queue was empty.
    pub async fn run_once(&self) -> Result<bool, WorkerError> {
        let Some(job) = self.source.claim_next().await? else {
            return Ok(false);
        };

        match self.dispatch(&job).await {
            Ok(()) => {
                self.source.complete(job.id).await?;
                tracing::debug!(job_id = job.id, job_type = %job.descriptor.job_type, "Job completed");
            }
            Err(e) => {
                let retried = self
                    .source
                    .fail(job.id, &e.to_string(), self.config.max_attempts)
                    .await?;
                tracing::warn!(
                    job_id = job.id,
                    job_type = %job.descriptor.job_type,
                    attempts = job.attempts,
                    retried,
                    error = %e,
                    "Job failed",
                );
            }
        }
        Ok(true)
    }

    async fn dispatch(&self, job: &ClaimedJob) -> Result<(), WorkerError> {
        match job.descriptor.job_type.as_str() {
            JOB_UPDATE_SEARCH_INDEX => self.search_index.handle(&job.descriptor).await.map(|_| ()),
            other => Err(WorkerError::UnknownJobType(other.to_string())),
        }
    }
}
