//! In-process content store.
//!
//! Transactions work on a snapshot of the committed state and commit
//! optimistically: if another transaction committed in the meantime the
//! commit fails with [`StoreError::Conflict`] and nothing is applied.
//! Ids come from a counter outside the snapshots, so an id handed to a
//! rolled-back or hard-deleted element is never reused.
//!
//! Store-level queries are logged so callers can assert how many batches
//! a read path issued.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;
use vellum_core::element::{ChangeKind, ChangeRecord, ContentMap, Element};
use vellum_core::error::CoreError;
use vellum_core::jobs::{JobDescriptor, JobQueue};
use vellum_core::query::{
    DerivativeFilter, ElementQuery, OrderColumn, StatusFilter, TrashFilter,
};
use vellum_core::search::{keywords_for_element, SearchIndexer, SearchKeywords};
use vellum_core::structure::{StructureNode, StructurePosition, StructureTree};
use vellum_core::types::{DbId, SiteId, Timestamp};

use crate::error::StoreError;
use crate::store::{ContentStore, OwnedFilter, StoreTx};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ElementRecord {
    uid: Uuid,
    type_tag: String,
    canonical_id: Option<DbId>,
    draft_id: Option<DbId>,
    revision_id: Option<DbId>,
    owner_id: Option<DbId>,
    enabled: bool,
    archived: bool,
    deleted_with_owner: bool,
    date_created: Timestamp,
    date_updated: Timestamp,
    date_deleted: Option<Timestamp>,
}

/// A stored site row joined with its content row.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteRowSnapshot {
    pub site_settings_id: DbId,
    pub content_id: DbId,
    pub slug: Option<String>,
    pub uri: Option<String>,
    pub enabled: bool,
    pub title: Option<String>,
    pub fields: ContentMap,
    pub date_updated: Timestamp,
}

#[derive(Debug, Clone)]
struct StructureRecord {
    root: DbId,
    max_levels: Option<i32>,
    root_node: StructureNode,
    nodes: BTreeMap<DbId, StructureNode>,
}

#[derive(Debug, Clone)]
struct DerivativeRecord {
    canonical_id: DbId,
    num: i32,
}

type ChangeKey = (DbId, SiteId, bool, String);

#[derive(Debug, Clone, Default)]
struct MemoryState {
    version: u64,
    elements: BTreeMap<DbId, ElementRecord>,
    site_rows: BTreeMap<(DbId, SiteId), SiteRowSnapshot>,
    structures: BTreeMap<DbId, StructureRecord>,
    changes: BTreeMap<ChangeKey, ChangeRecord>,
    drafts: BTreeMap<DbId, DerivativeRecord>,
    revisions: BTreeMap<DbId, DerivativeRecord>,
}

impl MemoryState {
    fn position_of(&self, element_id: DbId) -> Option<StructurePosition> {
        self.structures.iter().find_map(|(structure_id, s)| {
            s.nodes.get(&element_id).map(|n| StructurePosition {
                structure_id: *structure_id,
                root: s.root,
                lft: n.lft,
                rgt: n.rgt,
                level: n.level,
            })
        })
    }

    fn hydrate(&self, id: DbId, site_id: SiteId) -> Option<Element> {
        let rec = self.elements.get(&id)?;
        let row = self.site_rows.get(&(id, site_id))?;
        let mut element = Element::new(rec.type_tag.clone(), site_id);
        element.id = Some(id);
        element.uid = Some(rec.uid);
        element.canonical_id = rec.canonical_id;
        element.draft_id = rec.draft_id;
        element.revision_id = rec.revision_id;
        element.owner_id = rec.owner_id;
        element.site_settings_id = Some(row.site_settings_id);
        element.content_id = Some(row.content_id);
        element.date_created = Some(rec.date_created);
        element.date_updated = Some(rec.date_updated);
        element.site_date_updated = Some(row.date_updated);
        element.date_deleted = rec.date_deleted;
        element.deleted_with_owner = rec.deleted_with_owner;
        element.position = self.position_of(id);
        element.hydrate(
            rec.enabled,
            row.enabled,
            rec.archived,
            row.title.clone(),
            row.slug.clone(),
            row.uri.clone(),
            row.fields.clone(),
        );
        Some(element)
    }

    fn matches(&self, id: DbId, rec: &ElementRecord, row: &SiteRowSnapshot, q: &ElementQuery) -> bool {
        if q.type_tag.as_deref().is_some_and(|t| t != rec.type_tag) {
            return false;
        }
        if q.ids.as_ref().is_some_and(|ids| !ids.contains(&id)) {
            return false;
        }
        if q.owner_id.is_some() && q.owner_id != rec.owner_id {
            return false;
        }
        if q.canonical_id.is_some() && q.canonical_id != rec.canonical_id {
            return false;
        }
        let derivative_ok = match q.derivatives {
            DerivativeFilter::CanonicalOnly => rec.draft_id.is_none() && rec.revision_id.is_none(),
            DerivativeFilter::DraftsOnly => rec.draft_id.is_some(),
            DerivativeFilter::RevisionsOnly => rec.revision_id.is_some(),
            DerivativeFilter::All => true,
        };
        let trash_ok = match q.trashed {
            TrashFilter::Exclude => rec.date_deleted.is_none(),
            TrashFilter::Only => rec.date_deleted.is_some(),
            TrashFilter::Include => true,
        };
        let status_ok = match q.status {
            StatusFilter::Live => rec.enabled && row.enabled && !rec.archived,
            StatusFilter::Disabled => (!rec.enabled || !row.enabled) && !rec.archived,
            StatusFilter::Archived => rec.archived,
            StatusFilter::Any => true,
        };
        derivative_ok && trash_ok && status_ok
    }

    fn run_query(&self, q: &ElementQuery) -> Vec<Element> {
        if q.is_empty_id_set() {
            return Vec::new();
        }
        let mut found: Vec<Element> = self
            .elements
            .iter()
            .filter_map(|(id, rec)| {
                let row = self.site_rows.get(&(*id, q.site_id))?;
                self.matches(*id, rec, row, q).then(|| self.hydrate(*id, q.site_id))?
            })
            .collect();

        if !q.order_by.is_empty() {
            found.sort_by(|a, b| {
                for order in &q.order_by {
                    let ord = compare_column(a, b, &order.column);
                    let ord = if order.descending { ord.reverse() } else { ord };
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                a.id.cmp(&b.id)
            });
        }

        let offset = q.offset.unwrap_or(0).max(0) as usize;
        let iter = found.into_iter().skip(offset);
        match q.limit {
            Some(limit) => iter.take(limit.max(0) as usize).collect(),
            None => iter.collect(),
        }
    }

    /// Ids matching `q`'s filters, ignoring ordering and paging.
    fn match_ids(&self, q: &ElementQuery) -> Vec<DbId> {
        if q.is_empty_id_set() {
            return Vec::new();
        }
        self.elements
            .iter()
            .filter(|(id, rec)| {
                self.site_rows
                    .get(&(**id, q.site_id))
                    .is_some_and(|row| self.matches(**id, rec, row, q))
            })
            .map(|(id, _)| *id)
            .collect()
    }

    fn cascade_ids(&self, element_id: DbId) -> Vec<DbId> {
        let mut out = BTreeSet::new();
        let mut pending = vec![element_id];
        while let Some(id) = pending.pop() {
            if !out.insert(id) {
                continue;
            }
            pending.extend(
                self.elements
                    .iter()
                    .filter(|(_, r)| r.canonical_id == Some(id) || r.owner_id == Some(id))
                    .map(|(child, _)| *child),
            );
        }
        out.into_iter().collect()
    }
}

fn compare_column(a: &Element, b: &Element, column: &OrderColumn) -> std::cmp::Ordering {
    match column {
        OrderColumn::Id => a.id.cmp(&b.id),
        OrderColumn::DateCreated => a.date_created.cmp(&b.date_created),
        OrderColumn::DateUpdated => a.date_updated.cmp(&b.date_updated),
        OrderColumn::Title => a.title().cmp(&b.title()),
        OrderColumn::Slug => a.slug().cmp(&b.slug()),
        OrderColumn::Field(handle) => {
            let key = |e: &Element| e.field_value(handle).map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            });
            key(a).cmp(&key(b))
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// What a logged store-level query returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryShape {
    Elements,
    Count,
    Ids,
}

#[derive(Debug, Clone)]
pub struct LoggedQuery {
    pub shape: QueryShape,
    pub query: ElementQuery,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<MemoryState>,
    next_id: AtomicI64,
    query_log: Mutex<Vec<LoggedQuery>>,
    failing_sites: Mutex<BTreeSet<SiteId>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> DbId {
        self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    // ── Inspection ────────────────────────────────────────────────────

    /// Store-level queries issued so far, oldest first.
    pub fn query_log(&self) -> Vec<LoggedQuery> {
        lock(&self.shared.query_log).clone()
    }

    fn log_query(&self, shape: QueryShape, query: &ElementQuery) {
        lock(&self.shared.query_log).push(LoggedQuery {
            shape,
            query: query.clone(),
        });
    }

    pub fn clear_query_log(&self) {
        lock(&self.shared.query_log).clear();
    }

    pub fn site_row(&self, element_id: DbId, site_id: SiteId) -> Option<SiteRowSnapshot> {
        lock(&self.shared.state).site_rows.get(&(element_id, site_id)).cloned()
    }

    pub fn site_ids(&self, element_id: DbId) -> Vec<SiteId> {
        lock(&self.shared.state)
            .site_rows
            .keys()
            .filter(|(id, _)| *id == element_id)
            .map(|(_, site)| *site)
            .collect()
    }

    pub fn element_ids(&self) -> Vec<DbId> {
        lock(&self.shared.state).elements.keys().copied().collect()
    }

    pub fn is_trashed(&self, element_id: DbId) -> Option<bool> {
        lock(&self.shared.state)
            .elements
            .get(&element_id)
            .map(|r| r.date_deleted.is_some())
    }

    pub fn change_records(&self, element_id: DbId) -> Vec<ChangeRecord> {
        lock(&self.shared.state)
            .changes
            .values()
            .filter(|c| c.element_id == element_id)
            .cloned()
            .collect()
    }

    /// Draft records pointing at `canonical_id`.
    pub fn draft_records(&self, canonical_id: DbId) -> Vec<DbId> {
        lock(&self.shared.state)
            .drafts
            .iter()
            .filter(|(_, d)| d.canonical_id == canonical_id)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Element nodes of a structure, in tree order.
    pub fn structure_nodes(&self, structure_id: DbId) -> Vec<StructureNode> {
        let state = lock(&self.shared.state);
        let mut nodes: Vec<StructureNode> = state
            .structures
            .get(&structure_id)
            .map(|s| s.nodes.values().copied().collect())
            .unwrap_or_default();
        nodes.sort_by_key(|n| n.lft);
        nodes
    }

    /// Make every site row write for `site_id` fail until cleared.
    pub fn fail_writes_to_site(&self, site_id: SiteId) {
        lock(&self.shared.failing_sites).insert(site_id);
    }

    pub fn clear_write_failures(&self) {
        lock(&self.shared.failing_sites).clear();
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let state = lock(&self.shared.state).clone();
        Ok(Box::new(MemoryTx {
            store: self.clone(),
            base_version: state.version,
            started_at: Utc::now(),
            state,
        }))
    }

    async fn query(&self, query: &ElementQuery) -> Result<Vec<Element>, StoreError> {
        self.log_query(QueryShape::Elements, query);
        Ok(lock(&self.shared.state).run_query(query))
    }

    async fn count(&self, query: &ElementQuery) -> Result<i64, StoreError> {
        self.log_query(QueryShape::Count, query);
        Ok(lock(&self.shared.state).match_ids(query).len() as i64)
    }

    async fn query_ids(&self, query: &ElementQuery) -> Result<Vec<DbId>, StoreError> {
        self.log_query(QueryShape::Ids, query);
        Ok(lock(&self.shared.state).match_ids(query))
    }
}

// ---------------------------------------------------------------------------
// MemoryTx
// ---------------------------------------------------------------------------

pub struct MemoryTx {
    store: MemoryStore,
    base_version: u64,
    /// Timestamp for every write in the transaction, like `NOW()` in
    /// PostgreSQL.
    started_at: Timestamp,
    state: MemoryState,
}

impl MemoryTx {
    fn record_mut(&mut self, element_id: DbId) -> Result<&mut ElementRecord, StoreError> {
        self.state.elements.get_mut(&element_id).ok_or(StoreError::Missing {
            entity: "element",
            id: element_id,
        })
    }
}

fn saved_id(element: &Element) -> Result<DbId, StoreError> {
    element
        .id
        .ok_or_else(|| CoreError::Internal("element has not been saved".to_string()).into())
}

#[async_trait]
impl StoreTx for MemoryTx {
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
        Ok(self.state.run_query(&q).into_iter().next())
    }

    async fn query(&mut self, query: &ElementQuery) -> Result<Vec<Element>, StoreError> {
        Ok(self.state.run_query(query))
    }

    async fn insert_element(&mut self, element: &mut Element) -> Result<(), StoreError> {
        let id = self.store.next_id();
        let now = self.started_at;
        let uid = element.uid.unwrap_or_else(Uuid::new_v4);
        self.state.elements.insert(
            id,
            ElementRecord {
                uid,
                type_tag: element.type_tag.clone(),
                canonical_id: element.canonical_id,
                draft_id: element.draft_id,
                revision_id: element.revision_id,
                owner_id: element.owner_id,
                enabled: element.enabled(),
                archived: element.archived(),
                deleted_with_owner: false,
                date_created: now,
                date_updated: now,
                date_deleted: None,
            },
        );
        element.id = Some(id);
        element.uid = Some(uid);
        element.date_created = Some(now);
        element.date_updated = Some(now);
        Ok(())
    }

    async fn update_element(&mut self, element: &mut Element, touch: bool) -> Result<(), StoreError> {
        let id = saved_id(element)?;
        let started_at = self.started_at;
        let rec = self.record_mut(id)?;
        rec.enabled = element.enabled();
        rec.archived = element.archived();
        rec.owner_id = element.owner_id;
        rec.canonical_id = element.canonical_id;
        if touch {
            rec.date_updated = started_at;
        } else if let Some(date) = element.date_updated {
            rec.date_updated = date;
        }
        element.date_updated = Some(rec.date_updated);
        Ok(())
    }

    async fn soft_delete(
        &mut self,
        element_id: DbId,
        deleted_at: Timestamp,
        with_owner: bool,
    ) -> Result<bool, StoreError> {
        let Some(rec) = self.state.elements.get_mut(&element_id) else {
            return Ok(false);
        };
        if rec.date_deleted.is_some() {
            return Ok(false);
        }
        rec.date_deleted = Some(deleted_at);
        rec.deleted_with_owner = with_owner;
        Ok(true)
    }

    async fn restore(&mut self, element_id: DbId) -> Result<bool, StoreError> {
        let Some(rec) = self.state.elements.get_mut(&element_id) else {
            return Ok(false);
        };
        if rec.date_deleted.is_none() {
            return Ok(false);
        }
        rec.date_deleted = None;
        rec.deleted_with_owner = false;
        Ok(true)
    }

    async fn hard_delete(&mut self, element_id: DbId) -> Result<bool, StoreError> {
        if !self.state.elements.contains_key(&element_id) {
            return Ok(false);
        }
        let doomed: BTreeSet<DbId> = self.state.cascade_ids(element_id).into_iter().collect();

        let structure_ids: Vec<DbId> = self
            .state
            .structures
            .iter()
            .filter(|(_, s)| s.nodes.keys().any(|id| doomed.contains(id)))
            .map(|(structure_id, _)| *structure_id)
            .collect();
        for structure_id in structure_ids {
            let mut tree = self.load_structure(structure_id, None).await?;
            for id in &doomed {
                if tree.contains(*id) {
                    tree.remove(*id)?;
                }
            }
            self.save_structure(&mut tree).await?;
        }

        let own_drafts: BTreeSet<DbId> = doomed
            .iter()
            .filter_map(|id| self.state.elements.get(id)?.draft_id)
            .collect();
        let own_revisions: BTreeSet<DbId> = doomed
            .iter()
            .filter_map(|id| self.state.elements.get(id)?.revision_id)
            .collect();
        self.state.elements.retain(|id, _| !doomed.contains(id));
        self.state.site_rows.retain(|(id, _), _| !doomed.contains(id));
        self.state.changes.retain(|(id, ..), _| !doomed.contains(id));
        self.state
            .drafts
            .retain(|id, d| !doomed.contains(&d.canonical_id) && !own_drafts.contains(id));
        self.state
            .revisions
            .retain(|id, r| !doomed.contains(&r.canonical_id) && !own_revisions.contains(id));
        Ok(true)
    }

    async fn derivative_ids(&mut self, canonical_id: DbId) -> Result<Vec<DbId>, StoreError> {
        Ok(self
            .state
            .elements
            .iter()
            .filter(|(_, r)| r.canonical_id == Some(canonical_id))
            .map(|(id, _)| *id)
            .collect())
    }

    async fn owned_element_ids(
        &mut self,
        owner_id: DbId,
        filter: OwnedFilter,
    ) -> Result<Vec<DbId>, StoreError> {
        Ok(self
            .state
            .elements
            .iter()
            .filter(|(_, r)| r.owner_id == Some(owner_id))
            .filter(|(_, r)| match filter {
                OwnedFilter::Live => r.date_deleted.is_none(),
                OwnedFilter::DeletedWithOwner => r.date_deleted.is_some() && r.deleted_with_owner,
            })
            .map(|(id, _)| *id)
            .collect())
    }

    async fn upsert_site_row(&mut self, element: &mut Element) -> Result<(), StoreError> {
        let id = saved_id(element)?;
        if lock(&self.store.shared.failing_sites).contains(&element.site_id) {
            return Err(StoreError::Conflict(format!(
                "writes to site {} are failing",
                element.site_id
            )));
        }
        let now = self.started_at;
        let key = (id, element.site_id);
        let existing = self.state.site_rows.get(&key).cloned();
        let (site_settings_id, content_id) = match &existing {
            Some(row) => (row.site_settings_id, row.content_id),
            None => (self.store.next_id(), self.store.next_id()),
        };
        let mut row = SiteRowSnapshot {
            site_settings_id,
            content_id,
            slug: element.slug().map(str::to_string),
            uri: element.uri().map(str::to_string),
            enabled: element.enabled_for_site(),
            title: element.title().map(str::to_string),
            fields: element.field_values().clone(),
            date_updated: now,
        };
        if let Some(old) = existing {
            let unchanged = SiteRowSnapshot {
                date_updated: old.date_updated,
                ..row.clone()
            } == old;
            if unchanged {
                row.date_updated = old.date_updated;
            }
        }
        element.site_settings_id = Some(site_settings_id);
        element.content_id = Some(content_id);
        element.site_date_updated = Some(row.date_updated);
        self.state.site_rows.insert(key, row);
        Ok(())
    }

    async fn site_ids_for_element(&mut self, element_id: DbId) -> Result<Vec<SiteId>, StoreError> {
        Ok(self
            .state
            .site_rows
            .keys()
            .filter(|(id, _)| *id == element_id)
            .map(|(_, site)| *site)
            .collect())
    }

    async fn delete_site_rows(&mut self, element_id: DbId, site_ids: &[SiteId]) -> Result<u64, StoreError> {
        let before = self.state.site_rows.len();
        self.state
            .site_rows
            .retain(|(id, site), _| !(*id == element_id && site_ids.contains(site)));
        Ok((before - self.state.site_rows.len()) as u64)
    }

    async fn uri_taken(
        &mut self,
        site_id: SiteId,
        uri: &str,
        exclude: Option<DbId>,
    ) -> Result<bool, StoreError> {
        Ok(self.state.site_rows.iter().any(|((id, site), row)| {
            *site == site_id
                && Some(*id) != exclude
                && row.uri.as_deref() == Some(uri)
                && self.state.elements.get(id).is_some_and(|r| {
                    r.date_deleted.is_none() && r.draft_id.is_none() && r.revision_id.is_none()
                })
        }))
    }

    async fn load_structure(
        &mut self,
        structure_id: DbId,
        max_levels: Option<i32>,
    ) -> Result<StructureTree, StoreError> {
        if !self.state.structures.contains_key(&structure_id) {
            let root = self.store.next_id();
            self.state.structures.insert(
                structure_id,
                StructureRecord {
                    root,
                    max_levels,
                    root_node: StructureNode {
                        element_id: None,
                        lft: 1,
                        rgt: 2,
                        level: 0,
                    },
                    nodes: BTreeMap::new(),
                },
            );
        }
        let record = &self.state.structures[&structure_id];
        let rows = std::iter::once(record.root_node).chain(record.nodes.values().copied());
        let tree = StructureTree::from_rows(structure_id, record.root, rows)?
            .with_max_levels(max_levels.or(record.max_levels));
        Ok(tree)
    }

    async fn save_structure(&mut self, tree: &mut StructureTree) -> Result<(), StoreError> {
        let changes = tree.changes();
        let record = self
            .state
            .structures
            .get_mut(&tree.structure_id())
            .ok_or(StoreError::Missing {
                entity: "structure",
                id: tree.structure_id(),
            })?;
        for id in &changes.removed {
            record.nodes.remove(id);
        }
        for node in changes.upserts {
            if let Some(element_id) = node.element_id {
                record.nodes.insert(element_id, node);
            }
        }
        if let Some(rgt) = changes.root_rgt {
            record.root_node.rgt = rgt;
        }
        tree.mark_saved();
        Ok(())
    }

    async fn record_changes(&mut self, changes: &[ChangeRecord]) -> Result<(), StoreError> {
        for change in changes {
            let key = (
                change.element_id,
                change.site_id,
                change.kind == ChangeKind::Field,
                change.handle.clone(),
            );
            self.state.changes.insert(key, change.clone());
        }
        Ok(())
    }

    async fn create_draft(
        &mut self,
        canonical_id: DbId,
        _creator_id: Option<DbId>,
        _name: &str,
    ) -> Result<DbId, StoreError> {
        let id = self.store.next_id();
        self.state.drafts.insert(id, DerivativeRecord { canonical_id, num: 0 });
        Ok(id)
    }

    async fn create_revision(
        &mut self,
        canonical_id: DbId,
        _creator_id: Option<DbId>,
        _notes: Option<&str>,
    ) -> Result<(DbId, i32), StoreError> {
        let num = self
            .state
            .revisions
            .values()
            .filter(|r| r.canonical_id == canonical_id)
            .map(|r| r.num)
            .max()
            .unwrap_or(0)
            + 1;
        let id = self.store.next_id();
        self.state.revisions.insert(id, DerivativeRecord { canonical_id, num });
        Ok((id, num))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx {
            store,
            base_version,
            mut state,
            ..
        } = *self;
        let mut committed = lock(&store.shared.state);
        if committed.version != base_version {
            return Err(StoreError::Conflict(format!(
                "state moved from version {base_version} to {}",
                committed.version
            )));
        }
        state.version = base_version + 1;
        *committed = state;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Search index and job queue
// ---------------------------------------------------------------------------

/// Keyword rows held in memory, keyed by `(element, site, attribute)`.
#[derive(Debug, Default)]
pub struct MemorySearchIndex {
    rows: Mutex<BTreeMap<(DbId, SiteId, String), SearchKeywords>>,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keywords(&self, element_id: DbId, site_id: SiteId) -> Vec<SearchKeywords> {
        lock(&self.rows)
            .values()
            .filter(|r| r.element_id == element_id && r.site_id == site_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.rows).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.rows).is_empty()
    }
}

#[async_trait]
impl SearchIndexer for MemorySearchIndex {
    async fn index_element(&self, element: &Element, field_handles: &[String]) -> Result<(), CoreError> {
        let Some(element_id) = element.id else {
            return Ok(());
        };
        let mut rows = lock(&self.rows);
        rows.retain(|(id, site, _), _| !(*id == element_id && *site == element.site_id));
        for row in keywords_for_element(element, field_handles) {
            rows.insert((row.element_id, row.site_id, row.attribute.clone()), row);
        }
        Ok(())
    }

    async fn delete_element(&self, element_id: DbId) -> Result<(), CoreError> {
        lock(&self.rows).retain(|(id, ..), _| *id != element_id);
        Ok(())
    }
}

/// A queue that only records what was pushed.
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    next_id: AtomicI64,
    jobs: Mutex<Vec<(DbId, JobDescriptor)>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<JobDescriptor> {
        lock(&self.jobs).iter().map(|(_, j)| j.clone()).collect()
    }

    /// Remove and return every queued job.
    pub fn drain(&self) -> Vec<(DbId, JobDescriptor)> {
        std::mem::take(&mut *lock(&self.jobs))
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn push(&self, job: JobDescriptor) -> Result<DbId, CoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.jobs).push((id, job));
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use vellum_core::structure::StructureMode;

    async fn insert(store: &MemoryStore, title: &str, site_id: SiteId) -> Element {
        let mut tx = store.begin().await.unwrap();
        let mut el = Element::new("entry", site_id).with_title(title);
        tx.insert_element(&mut el).await.unwrap();
        tx.upsert_site_row(&mut el).await.unwrap();
        tx.commit().await.unwrap();
        el
    }

    #[tokio::test]
    async fn rolled_back_writes_are_invisible() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut el = Element::new("entry", 1).with_title("Gone");
        tx.insert_element(&mut el).await.unwrap();
        tx.upsert_site_row(&mut el).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(store.element_ids().is_empty());
        let next = insert(&store, "Kept", 1).await;
        assert_ne!(next.id, el.id, "ids are never reused");
    }

    #[tokio::test]
    async fn concurrent_commit_conflicts() {
        let store = MemoryStore::new();
        let first = store.begin().await.unwrap();
        insert(&store, "Winner", 1).await;
        assert_matches!(first.commit().await, Err(StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn unchanged_site_row_keeps_its_timestamp() {
        let store = MemoryStore::new();
        let mut el = insert(&store, "Same", 1).await;
        let before = store.site_row(el.id.unwrap(), 1).unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.upsert_site_row(&mut el).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.site_row(el.id.unwrap(), 1).unwrap(), before);
    }

    #[tokio::test]
    async fn query_filters_by_site_and_logs() {
        let store = MemoryStore::new();
        let a = insert(&store, "A", 1).await;
        insert(&store, "B", 2).await;

        let found = store.query(&ElementQuery::new(1)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a.id);
        assert_eq!(found[0].title(), Some("A"));
        assert!(!found[0].is_dirty());
        assert_eq!(store.query_log().len(), 1);
    }

    #[tokio::test]
    async fn query_orders_and_pages() {
        let store = MemoryStore::new();
        for title in ["c", "a", "b"] {
            insert(&store, title, 1).await;
        }
        let q = ElementQuery::new(1)
            .order_by(title_asc())
            .offset(1)
            .limit(1);
        let found = store.query(&q).await.unwrap();
        assert_eq!(found[0].title(), Some("b"));
        assert_eq!(store.count(&q).await.unwrap(), 3);
    }

    fn title_asc() -> vellum_core::query::OrderBy {
        vellum_core::query::OrderBy::asc(OrderColumn::Title)
    }

    #[tokio::test]
    async fn hard_delete_cascades_to_derivatives_and_owned() {
        let store = MemoryStore::new();
        let owner = insert(&store, "Owner", 1).await;
        let owner_id = owner.id.unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut block = Element::new("block", 1).owned_by(owner_id);
        tx.insert_element(&mut block).await.unwrap();
        tx.upsert_site_row(&mut block).await.unwrap();
        let mut draft = Element::new("entry", 1).with_field("body", json!("wip"));
        draft.canonical_id = Some(owner_id);
        draft.draft_id = Some(tx.create_draft(owner_id, None, "Draft 1").await.unwrap());
        tx.insert_element(&mut draft).await.unwrap();
        tx.upsert_site_row(&mut draft).await.unwrap();
        assert!(tx.hard_delete(owner_id).await.unwrap());
        tx.commit().await.unwrap();

        assert!(store.element_ids().is_empty());
    }

    #[tokio::test]
    async fn hard_deleting_a_draft_drops_its_record() {
        let store = MemoryStore::new();
        let canonical_id = insert(&store, "Canonical", 1).await.id.unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut draft = Element::new("entry", 1);
        draft.canonical_id = Some(canonical_id);
        draft.draft_id = Some(tx.create_draft(canonical_id, None, "Draft 1").await.unwrap());
        tx.insert_element(&mut draft).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.draft_records(canonical_id).len(), 1);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.hard_delete(draft.id.unwrap()).await.unwrap());
        tx.commit().await.unwrap();

        assert!(store.draft_records(canonical_id).is_empty());
        assert_eq!(store.element_ids(), vec![canonical_id]);
    }

    #[tokio::test]
    async fn hard_delete_closes_gaps_left_by_owned_nodes() {
        let store = MemoryStore::new();
        let owner_id = insert(&store, "Owner", 1).await.id.unwrap();
        let after = insert(&store, "After", 1).await.id.unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut block = Element::new("block", 1).owned_by(owner_id);
        tx.insert_element(&mut block).await.unwrap();
        let block_id = block.id.unwrap();
        let mut tree = tx.load_structure(9, None).await.unwrap();
        tree.append_to_root(block_id, StructureMode::Insert).unwrap();
        tree.append_to_root(after, StructureMode::Insert).unwrap();
        tx.save_structure(&mut tree).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.hard_delete(owner_id).await.unwrap());
        let tree = tx.load_structure(9, None).await.unwrap();
        tree.check_invariants().unwrap();
        tx.commit().await.unwrap();

        let nodes = store.structure_nodes(9);
        assert_eq!(nodes.len(), 1);
        assert_eq!((nodes[0].element_id, nodes[0].lft, nodes[0].rgt), (Some(after), 2, 3));
    }

    #[tokio::test]
    async fn structure_round_trip() {
        let store = MemoryStore::new();
        let a = insert(&store, "A", 1).await.id.unwrap();
        let b = insert(&store, "B", 1).await.id.unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut tree = tx.load_structure(9, None).await.unwrap();
        tree.append_to_root(a, StructureMode::Insert).unwrap();
        tree.append(b, a, StructureMode::Insert).unwrap();
        tx.save_structure(&mut tree).await.unwrap();
        tx.commit().await.unwrap();

        let nodes = store.structure_nodes(9);
        assert_eq!(nodes.len(), 2);
        assert_eq!((nodes[1].lft, nodes[1].rgt, nodes[1].level), (3, 4, 2));

        let loaded = store.query(&ElementQuery::new(1).id(b)).await.unwrap();
        assert_eq!(loaded[0].position.map(|p| p.level), Some(2));

        let mut tx = store.begin().await.unwrap();
        let tree = tx.load_structure(9, None).await.unwrap();
        assert_eq!(tree.ordered(), vec![a, b]);
        tree.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn injected_site_failure() {
        let store = MemoryStore::new();
        store.fail_writes_to_site(2);
        let mut tx = store.begin().await.unwrap();
        let mut el = Element::new("entry", 2);
        tx.insert_element(&mut el).await.unwrap();
        assert_matches!(tx.upsert_site_row(&mut el).await, Err(StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn search_index_replaces_rows_per_site() {
        let index = MemorySearchIndex::new();
        let mut el = Element::new("entry", 1).with_title("One");
        el.id = Some(4);
        index.index_element(&el, &[]).await.unwrap();
        el.set_title(Some("Two".into()));
        index.index_element(&el, &[]).await.unwrap();
        let rows = index.keywords(4, 1);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].keywords, "two");
        index.delete_element(4).await.unwrap();
        assert!(index.is_empty());
    }
}
