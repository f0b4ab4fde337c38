//! The content store gateway.
//!
//! [`ContentStore`] hands out transactions and serves read-only queries.
//! Every write goes through a [`StoreTx`]; dropping a transaction without
//! committing discards its writes.

use async_trait::async_trait;
use vellum_core::element::{ChangeRecord, Element};
use vellum_core::query::{ElementQuery, TrashFilter};
use vellum_core::structure::StructureTree;
use vellum_core::types::{DbId, SiteId, Timestamp};

use crate::error::StoreError;

/// Which owned elements to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnedFilter {
    /// Owned elements that are not trashed.
    Live,
    /// Owned elements trashed together with their owner.
    DeletedWithOwner,
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    /// Fetch elements in one site, hydrated with their site row, content
    /// and structure position.
    async fn query(&self, query: &ElementQuery) -> Result<Vec<Element>, StoreError>;

    async fn count(&self, query: &ElementQuery) -> Result<i64, StoreError>;

    /// Ids of every match, in id order, without loading site rows or
    /// content. Ordering, offset and limit are ignored.
    async fn query_ids(&self, query: &ElementQuery) -> Result<Vec<DbId>, StoreError>;
}

#[async_trait]
pub trait StoreTx: Send {
    async fn find_element(
        &mut self,
        id: DbId,
        site_id: SiteId,
        trashed: TrashFilter,
    ) -> Result<Option<Element>, StoreError>;

    async fn query(&mut self, query: &ElementQuery) -> Result<Vec<Element>, StoreError>;

    // ── Element rows ──────────────────────────────────────────────────

    /// Insert the canonical row. Sets `id`, `uid` and both timestamps.
    async fn insert_element(&mut self, element: &mut Element) -> Result<(), StoreError>;

    /// Update the canonical row. `touch` refreshes `date_updated`; otherwise
    /// the element's current timestamp is kept.
    async fn update_element(&mut self, element: &mut Element, touch: bool) -> Result<(), StoreError>;

    async fn soft_delete(
        &mut self,
        element_id: DbId,
        deleted_at: Timestamp,
        with_owner: bool,
    ) -> Result<bool, StoreError>;

    async fn restore(&mut self, element_id: DbId) -> Result<bool, StoreError>;

    /// Remove the element and everything hanging off it.
    async fn hard_delete(&mut self, element_id: DbId) -> Result<bool, StoreError>;

    /// Drafts and revisions of `canonical_id`, trashed or not.
    async fn derivative_ids(&mut self, canonical_id: DbId) -> Result<Vec<DbId>, StoreError>;

    async fn owned_element_ids(
        &mut self,
        owner_id: DbId,
        filter: OwnedFilter,
    ) -> Result<Vec<DbId>, StoreError>;

    // ── Site rows and content ────────────────────────────────────────

    /// Upsert the element's site row and content row for `element.site_id`.
    /// Sets `site_settings_id`, `content_id` and `site_date_updated`; the
    /// timestamp only moves when the stored values change.
    async fn upsert_site_row(&mut self, element: &mut Element) -> Result<(), StoreError>;

    async fn site_ids_for_element(&mut self, element_id: DbId) -> Result<Vec<SiteId>, StoreError>;

    async fn delete_site_rows(&mut self, element_id: DbId, site_ids: &[SiteId]) -> Result<u64, StoreError>;

    /// Whether a live, canonical element other than `exclude` owns `uri`.
    async fn uri_taken(
        &mut self,
        site_id: SiteId,
        uri: &str,
        exclude: Option<DbId>,
    ) -> Result<bool, StoreError>;

    // ── Structures ────────────────────────────────────────────────────

    /// Load a structure, creating it (and its root row) if needed.
    async fn load_structure(
        &mut self,
        structure_id: DbId,
        max_levels: Option<i32>,
    ) -> Result<StructureTree, StoreError>;

    /// Write back the tree's pending changes and mark it saved.
    async fn save_structure(&mut self, tree: &mut StructureTree) -> Result<(), StoreError>;

    // ── History ───────────────────────────────────────────────────────

    async fn record_changes(&mut self, changes: &[ChangeRecord]) -> Result<(), StoreError>;

    async fn create_draft(
        &mut self,
        canonical_id: DbId,
        creator_id: Option<DbId>,
        name: &str,
    ) -> Result<DbId, StoreError>;

    /// Returns the revision id and its number within the canonical element.
    async fn create_revision(
        &mut self,
        canonical_id: DbId,
        creator_id: Option<DbId>,
        notes: Option<&str>,
    ) -> Result<(DbId, i32), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
