//! PostgreSQL content store built on the repositories.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;
use vellum_core::element::{ChangeRecord, Element};
use vellum_core::error::CoreError;
use vellum_core::jobs::{JobDescriptor, JobQueue};
use vellum_core::query::{DerivativeFilter, ElementQuery, TrashFilter};
use vellum_core::search::{build_tsquery, keywords_for_element, SearchIndexer};
use vellum_core::structure::{StructureNode, StructureTree};
use vellum_core::types::{DbId, SiteId, Timestamp};

use crate::error::StoreError;
use crate::repositories::{
    ChangeRepo, ContentRepo, DerivativeRepo, ElementRepo, ElementSiteRepo, JobRepo, SearchIndexRepo,
    StructureRepo,
};
use crate::store::{ContentStore, OwnedFilter, StoreTx};

fn saved_id(element: &Element) -> Result<DbId, StoreError> {
    element
        .id
        .ok_or_else(|| CoreError::Internal("element has not been saved".to_string()).into())
}

// ---------------------------------------------------------------------------
// PgContentStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgContentStore {
    pool: PgPool,
}

impl PgContentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ContentStore for PgContentStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTx { tx }))
    }

    async fn query(&self, query: &ElementQuery) -> Result<Vec<Element>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(ElementRepo::query(&mut conn, query).await?)
    }

    async fn count(&self, query: &ElementQuery) -> Result<i64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(ElementRepo::count(&mut conn, query).await?)
    }

    async fn query_ids(&self, query: &ElementQuery) -> Result<Vec<DbId>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(ElementRepo::ids(&mut conn, query).await?)
    }
}

// ---------------------------------------------------------------------------
// PgStoreTx
// ---------------------------------------------------------------------------

pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn find_element(
        &mut self,
        id: DbId,
        site_id: SiteId,
        trashed: TrashFilter,
    ) -> Result<Option<Element>, StoreError> {
        let q = ElementQuery::new(site_id)
            .id(id)
            .trashed(trashed)
            .derivatives(DerivativeFilter::All);
        Ok(ElementRepo::query(&mut self.tx, &q).await?.into_iter().next())
    }

    async fn query(&mut self, query: &ElementQuery) -> Result<Vec<Element>, StoreError> {
        Ok(ElementRepo::query(&mut self.tx, query).await?)
    }

    async fn insert_element(&mut self, element: &mut Element) -> Result<(), StoreError> {
        let uid = element.uid.unwrap_or_else(Uuid::new_v4);
        let (id, created) = ElementRepo::insert(&mut self.tx, element, uid).await?;
        element.id = Some(id);
        element.uid = Some(uid);
        element.date_created = Some(created);
        element.date_updated = Some(created);
        Ok(())
    }

    async fn update_element(&mut self, element: &mut Element, touch: bool) -> Result<(), StoreError> {
        let id = saved_id(element)?;
        let updated = ElementRepo::update(&mut self.tx, element, touch, element.date_updated)
            .await?
            .ok_or(StoreError::Missing { entity: "element", id })?;
        element.date_updated = Some(updated);
        Ok(())
    }

    async fn soft_delete(
        &mut self,
        element_id: DbId,
        deleted_at: Timestamp,
        with_owner: bool,
    ) -> Result<bool, StoreError> {
        Ok(ElementRepo::soft_delete(&mut self.tx, element_id, deleted_at, with_owner).await?)
    }

    async fn restore(&mut self, element_id: DbId) -> Result<bool, StoreError> {
        Ok(ElementRepo::restore(&mut self.tx, element_id).await?)
    }

    async fn hard_delete(&mut self, element_id: DbId) -> Result<bool, StoreError> {
        // Close the nested-set gaps before the foreign keys drop the nodes.
        let doomed = ElementRepo::cascade_ids(&mut self.tx, element_id).await?;
        for structure_id in StructureRepo::structures_containing(&mut self.tx, &doomed).await? {
            let mut tree = self.load_structure(structure_id, None).await?;
            for id in &doomed {
                if tree.contains(*id) {
                    tree.remove(*id)?;
                }
            }
            self.save_structure(&mut tree).await?;
        }
        Ok(ElementRepo::hard_delete(&mut self.tx, element_id).await?)
    }

    async fn derivative_ids(&mut self, canonical_id: DbId) -> Result<Vec<DbId>, StoreError> {
        Ok(ElementRepo::derivative_ids(&mut self.tx, canonical_id).await?)
    }

    async fn owned_element_ids(
        &mut self,
        owner_id: DbId,
        filter: OwnedFilter,
    ) -> Result<Vec<DbId>, StoreError> {
        Ok(ElementRepo::owned_ids(&mut self.tx, owner_id, filter).await?)
    }

    async fn upsert_site_row(&mut self, element: &mut Element) -> Result<(), StoreError> {
        let id = saved_id(element)?;
        let (site_settings_id, site_updated) = ElementSiteRepo::upsert(
            &mut self.tx,
            id,
            element.site_id,
            element.slug(),
            element.uri(),
            element.enabled_for_site(),
        )
        .await?;
        let (content_id, content_updated) = ContentRepo::upsert(
            &mut self.tx,
            id,
            element.site_id,
            element.title(),
            element.field_values(),
        )
        .await?;
        element.site_settings_id = Some(site_settings_id);
        element.content_id = Some(content_id);
        element.site_date_updated = Some(site_updated.max(content_updated));
        Ok(())
    }

    async fn site_ids_for_element(&mut self, element_id: DbId) -> Result<Vec<SiteId>, StoreError> {
        Ok(ElementSiteRepo::site_ids(&mut self.tx, element_id).await?)
    }

    async fn delete_site_rows(&mut self, element_id: DbId, site_ids: &[SiteId]) -> Result<u64, StoreError> {
        Ok(ElementSiteRepo::delete_for_sites(&mut self.tx, element_id, site_ids).await?)
    }

    async fn uri_taken(
        &mut self,
        site_id: SiteId,
        uri: &str,
        exclude: Option<DbId>,
    ) -> Result<bool, StoreError> {
        Ok(ElementSiteRepo::uri_taken(&mut self.tx, site_id, uri, exclude).await?)
    }

    async fn load_structure(
        &mut self,
        structure_id: DbId,
        max_levels: Option<i32>,
    ) -> Result<StructureTree, StoreError> {
        let (root, stored_max) = StructureRepo::ensure(&mut self.tx, structure_id, max_levels).await?;
        let rows = StructureRepo::rows(&mut self.tx, structure_id).await?;
        let tree = StructureTree::from_rows(structure_id, root, rows.iter().map(StructureNode::from))?
            .with_max_levels(max_levels.or(stored_max));
        Ok(tree)
    }

    async fn save_structure(&mut self, tree: &mut StructureTree) -> Result<(), StoreError> {
        let changes = tree.changes();
        if !changes.removed.is_empty() {
            StructureRepo::delete_nodes(&mut self.tx, tree.structure_id(), &changes.removed).await?;
        }
        for node in &changes.upserts {
            StructureRepo::upsert_node(&mut self.tx, tree.structure_id(), tree.root(), node).await?;
        }
        if let Some(rgt) = changes.root_rgt {
            StructureRepo::set_root_rgt(&mut self.tx, tree.root(), rgt).await?;
        }
        tracing::debug!(
            structure_id = tree.structure_id(),
            upserts = changes.upserts.len(),
            removed = changes.removed.len(),
            "Structure saved"
        );
        tree.mark_saved();
        Ok(())
    }

    async fn record_changes(&mut self, changes: &[ChangeRecord]) -> Result<(), StoreError> {
        for change in changes {
            ChangeRepo::upsert(&mut self.tx, change).await?;
        }
        Ok(())
    }

    async fn create_draft(
        &mut self,
        canonical_id: DbId,
        creator_id: Option<DbId>,
        name: &str,
    ) -> Result<DbId, StoreError> {
        Ok(DerivativeRepo::create_draft(&mut self.tx, canonical_id, creator_id, name).await?)
    }

    async fn create_revision(
        &mut self,
        canonical_id: DbId,
        creator_id: Option<DbId>,
        notes: Option<&str>,
    ) -> Result<(DbId, i32), StoreError> {
        Ok(DerivativeRepo::create_revision(&mut self.tx, canonical_id, creator_id, notes).await?)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Search index and job queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgSearchIndexer {
    pool: PgPool,
}

impl PgSearchIndexer {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Element ids in `site_id` matching every term of `query`.
    pub async fn search(&self, site_id: SiteId, query: &str) -> Result<Vec<DbId>, sqlx::Error> {
        match build_tsquery(query) {
            Some(tsquery) => SearchIndexRepo::search(&self.pool, site_id, &tsquery).await,
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl SearchIndexer for PgSearchIndexer {
    async fn index_element(&self, element: &Element, field_handles: &[String]) -> Result<(), CoreError> {
        let Some(element_id) = element.id else {
            return Ok(());
        };
        let rows = keywords_for_element(element, field_handles);
        SearchIndexRepo::replace_for_site(&self.pool, element_id, element.site_id, &rows)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))
    }

    async fn delete_element(&self, element_id: DbId) -> Result<(), CoreError> {
        SearchIndexRepo::delete_for_element(&self.pool, element_id)
            .await
            .map(|_| ())
            .map_err(|e| CoreError::Internal(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn push(&self, job: JobDescriptor) -> Result<DbId, CoreError> {
        JobRepo::push(&self.pool, &job)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))
    }
}
