//! Background job descriptors and the queue seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{DbId, SiteId};

/// Job type for refreshing an element's search keywords.
pub const JOB_UPDATE_SEARCH_INDEX: &str = "update_search_index";

/// Default priority for search index jobs. Lower runs sooner.
pub const DEFAULT_SEARCH_JOB_PRIORITY: i32 = 2048;

/// A job waiting to be pushed onto the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_type: String,
    pub description: Option<String>,
    pub payload: serde_json::Value,
    pub priority: i32,
}

impl JobDescriptor {
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            job_type: job_type.into(),
            description: None,
            payload,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Payload of a [`JOB_UPDATE_SEARCH_INDEX`] job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchIndexPayload {
    pub element_type: String,
    pub element_id: DbId,
    pub site_id: SiteId,
    /// Field handles to reindex; `None` reindexes all searchable fields.
    pub field_handles: Option<Vec<String>>,
}

impl SearchIndexPayload {
    pub fn into_job(self, priority: i32) -> Result<JobDescriptor, CoreError> {
        let description = format!("Updating search index for {} {}", self.element_type, self.element_id);
        let payload = serde_json::to_value(&self).map_err(|e| CoreError::Internal(e.to_string()))?;
        Ok(JobDescriptor::new(JOB_UPDATE_SEARCH_INDEX, payload)
            .with_priority(priority)
            .with_description(description))
    }

    pub fn from_job(job: &JobDescriptor) -> Result<Self, CoreError> {
        serde_json::from_value(job.payload.clone())
            .map_err(|e| CoreError::Validation(format!("Invalid search index payload: {e}")))
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Push a job and return its id.
    async fn push(&self, job: JobDescriptor) -> Result<DbId, CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn search_payload_survives_job_encoding() {
        let payload = SearchIndexPayload {
            element_type: "entry".into(),
            element_id: 12,
            site_id: 2,
            field_handles: Some(vec!["body".into()]),
        };
        let job = payload.clone().into_job(DEFAULT_SEARCH_JOB_PRIORITY).unwrap();
        assert_eq!(job.job_type, JOB_UPDATE_SEARCH_INDEX);
        assert_eq!(job.priority, 2048);
        assert_eq!(job.description.as_deref(), Some("Updating search index for entry 12"));
        assert_eq!(SearchIndexPayload::from_job(&job).unwrap(), payload);
    }

    #[test]
    fn malformed_payload_is_a_validation_error() {
        let job = JobDescriptor::new(JOB_UPDATE_SEARCH_INDEX, serde_json::json!({"nope": 1}));
        assert_matches!(SearchIndexPayload::from_job(&job), Err(CoreError::Validation(_)));
    }
}
