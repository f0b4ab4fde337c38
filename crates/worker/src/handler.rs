//! Search index job handler.
//!
//! Saves from interactive requests queue an index job instead of writing
//! keywords inline. The handler loads the element in the job's site and
//! rewrites its keywords, or drops them when the element is gone.

use std::sync::Arc;

use vellum_core::element::Element;
use vellum_core::element_type::TypeRegistry;
use vellum_core::jobs::{JobDescriptor, SearchIndexPayload};
use vellum_core::query::{DerivativeFilter, ElementQuery, TrashFilter};
use vellum_core::search::SearchIndexer;
use vellum_db::ContentStore;

use crate::error::WorkerError;

/// What a search index job ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed,
    /// The element no longer exists; its keywords were dropped.
    Removed,
    /// The element is trashed or has no row in the job's site.
    Skipped,
}

pub struct SearchIndexHandler {
    store: Arc<dyn ContentStore>,
    types: TypeRegistry,
    search: Arc<dyn SearchIndexer>,
}

impl SearchIndexHandler {
    pub fn new(store: Arc<dyn ContentStore>, types: TypeRegistry, search: Arc<dyn SearchIndexer>) -> Self {
        Self { store, types, search }
    }

    pub async fn handle(&self, job: &JobDescriptor) -> Result<IndexOutcome, WorkerError> {
        let payload = SearchIndexPayload::from_job(job)?;
        let element_id = payload.element_id;

        let found = self
            .store
            .query(&ElementQuery::new(payload.site_id).id(element_id))
            .await?
            .into_iter()
            .next();
        let Some(element) = found else {
            return self.handle_missing(&payload).await;
        };

        let handles = payload
            .field_handles
            .clone()
            .unwrap_or_else(|| self.searchable_handles(&element));
        self.search.index_element(&element, &handles).await?;
        tracing::debug!(
            element_id,
            site_id = payload.site_id,
            fields = handles.len(),
            "Search keywords updated"
        );
        Ok(IndexOutcome::Indexed)
    }

    /// Drop keywords only when no trace of the element is left in the site.
    async fn handle_missing(&self, payload: &SearchIndexPayload) -> Result<IndexOutcome, WorkerError> {
        let any_row = self
            .store
            .count(
                &ElementQuery::new(payload.site_id)
                    .id(payload.element_id)
                    .trashed(TrashFilter::Include)
                    .derivatives(DerivativeFilter::All),
            )
            .await?;
        if any_row > 0 {
            tracing::debug!(element_id = payload.element_id, "Skipping index for unavailable element");
            return Ok(IndexOutcome::Skipped);
        }
        self.search.delete_element(payload.element_id).await?;
        tracing::debug!(element_id = payload.element_id, "Search keywords removed");
        Ok(IndexOutcome::Removed)
    }

    /// Searchable field handles of the element's layout. Unregistered
    /// types index attributes only.
    fn searchable_handles(&self, element: &Element) -> Vec<String> {
        match self.types.get(&element.type_tag) {
            Some(element_type) => element_type
                .field_layout(element)
                .into_iter()
                .filter(|f| f.searchable)
                .map(|f| f.handle)
                .collect(),
            None => {
                tracing::warn!(type_tag = %element.type_tag, "Indexing unregistered element type");
                Vec::new()
            }
        }
    }
}
