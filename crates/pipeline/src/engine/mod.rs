//! The element propagation engine.
//!
//! [`ElementService`] persists element mutations: a save writes the
//! canonical row, the site row for the element's own site, and then
//! replicates the change into every other supported site according to each
//! field's translation method. All of that happens in one store
//! transaction; any failure rolls the whole save back.
//!
//! Work that must not hold the transaction open (cache invalidation, search
//! indexing, events, `after_*` hooks) runs once the transaction commits.

mod batch;
mod delete;
mod derivatives;
mod duplicate;
mod propagate;
mod restore;
mod save;
mod structure;

use std::collections::BTreeSet;
use std::sync::Arc;

use vellum_core::cache_tags::{tags_for_element, TagInvalidator};
use vellum_core::element::{
    ChangeKind, ChangeRecord, Element, FieldErrors, ValidationScenario, ATTR_URI,
};
use vellum_core::element_type::{
    resolve_supported_sites, validate_element, ElementType, SupportedSite, TypeRegistry,
};
use vellum_core::error::CoreError;
use vellum_core::jobs::{JobQueue, SearchIndexPayload};
use vellum_core::query::ElementQuery;
use vellum_core::search::SearchIndexer;
use vellum_core::site::Sites;
use vellum_core::types::{DbId, SiteId};
use tokio::task::JoinHandle;
use vellum_db::{ContentStore, DbPool, PgJobQueue, PgSearchIndexer, StoreTx};
use vellum_events::{ElementEvent, EventBus, EventPersistence, HookRegistry};

use crate::config::{EngineConfig, SearchIndexMode};
use crate::error::ElementError;
use crate::unit_of_work::{ExecutionContext, UnitOfWork};

pub use batch::{BatchFailure, BatchOptions, BatchReport};
pub use duplicate::DuplicateOverrides;
pub use save::SaveOptions;

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// External services the engine hands work to after a commit.
#[derive(Clone)]
pub struct Collaborators {
    pub cache: Arc<dyn TagInvalidator>,
    pub search: Arc<dyn SearchIndexer>,
    pub jobs: Arc<dyn JobQueue>,
    pub events: Arc<EventBus>,
}

impl Collaborators {
    /// Collaborators backed by PostgreSQL.
    ///
    /// Every event published on the returned bus is written to
    /// `element_events` by a spawned [`EventPersistence`] task. The task
    /// ends once the bus and every service holding it are dropped.
    pub fn postgres(pool: DbPool, cache: Arc<dyn TagInvalidator>) -> (Self, JoinHandle<()>) {
        let events = Arc::new(EventBus::default());
        let persistence = tokio::spawn(EventPersistence::run(pool.clone(), events.subscribe()));
        tracing::info!("Event persistence started");
        let collaborators = Self {
            cache,
            search: Arc::new(PgSearchIndexer::new(pool.clone())),
            jobs: Arc::new(PgJobQueue::new(pool)),
            events,
        };
        (collaborators, persistence)
    }
}

// ---------------------------------------------------------------------------
// ElementService
// ---------------------------------------------------------------------------

pub struct ElementService {
    store: Arc<dyn ContentStore>,
    types: TypeRegistry,
    sites: Sites,
    cache: Arc<dyn TagInvalidator>,
    search: Arc<dyn SearchIndexer>,
    jobs: Arc<dyn JobQueue>,
    events: Arc<EventBus>,
    hooks: HookRegistry,
    config: EngineConfig,
}

impl ElementService {
    pub fn new(
        store: Arc<dyn ContentStore>,
        types: TypeRegistry,
        sites: Sites,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            store,
            types,
            sites,
            cache: collaborators.cache,
            search: collaborators.search,
            jobs: collaborators.jobs,
            events: collaborators.events,
            hooks: HookRegistry::new(),
            config: EngineConfig::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn sites(&self) -> &Sites {
        &self.sites
    }

    // ── Lookups ───────────────────────────────────────────────────────

    /// Find an element, preferring the unit of work's placeholder.
    pub async fn find_element(
        &self,
        uow: &mut UnitOfWork,
        id: DbId,
        site_id: SiteId,
    ) -> Result<Option<Element>, ElementError> {
        if let Some(placeholder) = uow.placeholders.get(id, site_id) {
            return Ok(Some(placeholder.clone()));
        }
        let found = self
            .store
            .query(&ElementQuery::new(site_id).id(id))
            .await?
            .into_iter()
            .next();
        if let Some(element) = &found {
            uow.ledger.collect_element(element);
        }
        Ok(found)
    }

    /// Run a query, swapping in placeholders and collecting cache tags.
    pub async fn find_elements(
        &self,
        uow: &mut UnitOfWork,
        query: &ElementQuery,
    ) -> Result<Vec<Element>, ElementError> {
        let found = self.store.query(query).await?;
        Ok(found
            .into_iter()
            .map(|element| {
                uow.ledger.collect_element(&element);
                uow.placeholders.resolve(element)
            })
            .collect())
    }

    // ── Shared helpers ────────────────────────────────────────────────

    fn element_type(&self, element: &Element) -> Result<Arc<dyn ElementType>, ElementError> {
        Ok(self.types.require(&element.type_tag)?)
    }

    /// Supported sites for `element`, which must be saved into one of them.
    fn supported_sites(
        &self,
        element_type: &dyn ElementType,
        element: &Element,
    ) -> Result<Vec<SupportedSite>, ElementError> {
        resolve_supported_sites(element_type, element, &self.sites).map_err(|e| match e {
            CoreError::NoSupportedSites { .. } => ElementError::UnsupportedSite {
                element_id: element.id,
                site_id: element.site_id,
            },
            other => other.into(),
        })
    }

    /// Built-in and type rules, plus URI uniqueness for live canonical
    /// elements.
    async fn validate(
        &self,
        tx: &mut dyn StoreTx,
        element_type: &dyn ElementType,
        element: &Element,
        scenario: ValidationScenario,
    ) -> Result<FieldErrors, ElementError> {
        let mut errors = validate_element(element_type, element, scenario);
        if let Some(uri) = element.uri() {
            let enforce = element.is_canonical() && element.enabled() && element.enabled_for_site();
            if enforce && tx.uri_taken(element.site_id, uri, element.id).await? {
                errors.add(ATTR_URI, format!("URI '{uri}' is already taken"));
            }
        }
        Ok(errors)
    }

    /// Change records for everything dirty on `element`.
    fn change_records(&self, uow: &UnitOfWork, element: &Element, propagated: bool) -> Vec<ChangeRecord> {
        let Some(element_id) = element.id else {
            return Vec::new();
        };
        let date_updated = element
            .site_date_updated
            .or(element.date_updated)
            .unwrap_or_else(chrono::Utc::now);
        let record = |kind, handle: &str| ChangeRecord {
            element_id,
            site_id: element.site_id,
            kind,
            handle: handle.to_string(),
            date_updated,
            propagated,
            user_id: uow.actor_id,
        };
        element
            .dirty_attributes()
            .map(|a| record(ChangeKind::Attribute, a))
            .chain(element.dirty_fields().map(|f| record(ChangeKind::Field, f)))
            .collect()
    }

    fn tracks_changes(&self, element_type: &dyn ElementType, element: &Element) -> bool {
        self.config.track_changes && element_type.track_changes() && element.is_canonical()
    }

    /// Start a tag collection for one engine operation.
    fn begin_tags(&self, uow: &mut UnitOfWork) {
        uow.ledger.start_collecting();
    }

    /// Collect the invalidation tags for `element`.
    fn collect_tags(&self, uow: &mut UnitOfWork, element_type: &dyn ElementType, element: &Element) {
        let extra = element_type.extra_cache_tags(element);
        uow.ledger.collect(tags_for_element(element, &extra));
    }

    /// End the operation's tag collection. The tags are invalidated now
    /// unless an outer collection is still running, in which case they
    /// join its batch.
    async fn flush_tags(&self, uow: &mut UnitOfWork) {
        let tags = uow.ledger.stop_collecting();
        if uow.ledger.is_collecting() || tags.is_empty() {
            return;
        }
        let tags: Vec<String> = tags.into_iter().collect();
        tracing::debug!(count = tags.len(), "Invalidating element cache tags");
        self.cache.invalidate_tags(&tags).await;
    }

    async fn rollback(&self, tx: Box<dyn StoreTx>) {
        if let Err(e) = tx.rollback().await {
            tracing::error!(error = %e, "Failed to roll back element transaction");
        }
    }

    fn indexes_synchronously(&self, uow: &UnitOfWork) -> bool {
        match self.config.search_index_mode {
            SearchIndexMode::Sync => true,
            SearchIndexMode::Queue => false,
            SearchIndexMode::Auto => uow.context == ExecutionContext::Console,
        }
    }

    /// Refresh search keywords for each given site instance.
    ///
    /// Failures are logged: the save has already committed and a later
    /// job or resave will index again.
    async fn update_search_index(
        &self,
        uow: &UnitOfWork,
        element_type: &dyn ElementType,
        instances: &[&Element],
    ) {
        let sync = self.indexes_synchronously(uow);
        for element in instances {
            let Some(element_id) = element.id else {
                continue;
            };
            let result = if sync {
                let handles: Vec<String> = element_type
                    .field_layout(element)
                    .into_iter()
                    .filter(|f| f.searchable)
                    .map(|f| f.handle)
                    .collect();
                self.search.index_element(element, &handles).await
            } else {
                let payload = SearchIndexPayload {
                    element_type: element.type_tag.clone(),
                    element_id,
                    site_id: element.site_id,
                    field_handles: None,
                };
                match payload.into_job(self.config.search_job_priority) {
                    Ok(job) => self.jobs.push(job).await.map(|_| ()),
                    Err(e) => Err(e),
                }
            };
            if let Err(e) = result {
                tracing::error!(
                    error = %e,
                    element_id,
                    site_id = element.site_id,
                    "Failed to update search index"
                );
            }
        }
    }

    fn publish(&self, uow: &UnitOfWork, event: ElementEvent) {
        self.events.publish(event.with_actor(uow.actor_id));
    }
}

/// Site ids in `supported`, excluding `site_id`, that receive propagation.
fn propagation_targets(supported: &[SupportedSite], site_id: SiteId) -> Vec<SupportedSite> {
    supported
        .iter()
        .filter(|s| s.site_id != site_id && s.propagate)
        .copied()
        .collect()
}

fn site_ids(supported: &[SupportedSite]) -> BTreeSet<SiteId> {
    supported.iter().map(|s| s.site_id).collect()
}

fn saved_id(element: &Element) -> Result<DbId, ElementError> {
    element
        .id
        .ok_or_else(|| CoreError::Validation("Element has not been saved".to_string()).into())
}
