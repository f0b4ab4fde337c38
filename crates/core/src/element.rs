//! The element model.
//!
//! An [`Element`] is one site-localized view of a canonical content unit.
//! The canonical identity (`id`, `uid`) is shared by every site projection;
//! the localized state (title, slug, URI, per-site enabled flag, custom field
//! content) belongs to the projection for `site_id`.
//!
//! Mutations go through setters so the element can track which attributes
//! and fields are dirty. Propagation only copies dirty values, and change
//! tracking only records dirty handles.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::structure::StructurePosition;
use crate::types::{DbId, SiteId, Timestamp};

/// Custom field values keyed by field handle.
pub type ContentMap = BTreeMap<String, serde_json::Value>;

pub const ATTR_TITLE: &str = "title";
pub const ATTR_SLUG: &str = "slug";
pub const ATTR_URI: &str = "uri";
pub const ATTR_ENABLED: &str = "enabled";
pub const ATTR_ENABLED_FOR_SITE: &str = "enabled_for_site";
pub const ATTR_ARCHIVED: &str = "archived";

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Which rule set applies when validating an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationScenario {
    /// Every rule, including required custom fields.
    #[default]
    Default,
    /// Only the rules needed to keep the rows consistent (identity, slug,
    /// URI uniqueness). Used for propagation, duplication and restore.
    Essentials,
    /// Stricter rules applied when an element goes live.
    Live,
}

/// Field-level validation errors keyed by attribute or field handle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, handle: impl Into<String>, message: impl Into<String>) {
        self.0.entry(handle.into()).or_default().push(message.into());
    }

    pub fn merge(&mut self, other: FieldErrors) {
        for (handle, messages) in other.0 {
            self.0.entry(handle).or_default().extend(messages);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has(&self, handle: &str) -> bool {
        self.0.contains_key(handle)
    }

    /// Returns `true` when every error belongs to `handle`.
    pub fn only(&self, handle: &str) -> bool {
        !self.0.is_empty() && self.0.keys().all(|k| k == handle)
    }

    pub fn get(&self, handle: &str) -> Option<&[String]> {
        self.0.get(handle).map(Vec::as_slice)
    }

    pub fn handles(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(handle, messages)| format!("{handle}: {}", messages.join("; ")))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

// ---------------------------------------------------------------------------
// Change tracking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Attribute,
    Field,
}

/// One "this handle changed" record written after a committed save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub element_id: DbId,
    pub site_id: SiteId,
    pub kind: ChangeKind,
    pub handle: String,
    pub date_updated: Timestamp,
    /// Whether the change arrived through propagation from another site.
    pub propagated: bool,
    pub user_id: Option<DbId>,
}

// ---------------------------------------------------------------------------
// Element
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Element {
    pub id: Option<DbId>,
    pub uid: Option<Uuid>,
    pub type_tag: String,
    pub site_id: SiteId,
    /// For drafts and revisions, the element they derive from.
    pub canonical_id: Option<DbId>,
    pub draft_id: Option<DbId>,
    pub revision_id: Option<DbId>,
    /// For nested (block-level) elements, the element that owns them.
    pub owner_id: Option<DbId>,
    pub site_settings_id: Option<DbId>,
    pub content_id: Option<DbId>,
    pub date_created: Option<Timestamp>,
    pub date_updated: Option<Timestamp>,
    /// Last change to this site's row, as opposed to the element row.
    pub site_date_updated: Option<Timestamp>,
    pub date_deleted: Option<Timestamp>,
    pub deleted_with_owner: bool,
    /// Current structure position, when the element belongs to a structure.
    pub position: Option<StructurePosition>,
    /// Requested parent to place the element under on its next save.
    pub new_parent_id: Option<DbId>,

    /// Set while the element is being saved as a propagation echo.
    pub propagating: bool,
    /// Set while the element is being saved by a bulk resave.
    pub resaving: bool,
    /// Source element id while a duplicate is being created.
    pub duplicate_of: Option<DbId>,
    pub scenario: ValidationScenario,
    /// Sites this element was first propagated to during the last save.
    pub new_site_ids: Vec<SiteId>,

    enabled: bool,
    enabled_for_site: bool,
    archived: bool,
    title: Option<String>,
    slug: Option<String>,
    uri: Option<String>,
    fields: ContentMap,
    dirty_attributes: BTreeSet<String>,
    dirty_fields: BTreeSet<String>,
    errors: FieldErrors,
    eager_loaded: BTreeMap<String, Vec<Element>>,
    eager_counts: BTreeMap<String, usize>,
}

impl Element {
    /// Create a new, unsaved element of the given type in `site_id`.
    pub fn new(type_tag: impl Into<String>, site_id: SiteId) -> Self {
        Self {
            id: None,
            uid: None,
            type_tag: type_tag.into(),
            site_id,
            canonical_id: None,
            draft_id: None,
            revision_id: None,
            owner_id: None,
            site_settings_id: None,
            content_id: None,
            date_created: None,
            date_updated: None,
            site_date_updated: None,
            date_deleted: None,
            deleted_with_owner: false,
            position: None,
            new_parent_id: None,
            propagating: false,
            resaving: false,
            duplicate_of: None,
            scenario: ValidationScenario::Default,
            new_site_ids: Vec::new(),
            enabled: true,
            enabled_for_site: true,
            archived: false,
            title: None,
            slug: None,
            uri: None,
            fields: ContentMap::new(),
            dirty_attributes: BTreeSet::new(),
            dirty_fields: BTreeSet::new(),
            errors: FieldErrors::new(),
            eager_loaded: BTreeMap::new(),
            eager_counts: BTreeMap::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.set_title(Some(title.into()));
        self
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.set_slug(Some(slug.into()));
        self
    }

    pub fn with_field(mut self, handle: impl Into<String>, value: serde_json::Value) -> Self {
        self.set_field_value(handle, value);
        self
    }

    pub fn owned_by(mut self, owner_id: DbId) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    // ── Identity ──────────────────────────────────────────────────────

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    pub fn is_draft(&self) -> bool {
        self.draft_id.is_some()
    }

    pub fn is_revision(&self) -> bool {
        self.revision_id.is_some()
    }

    /// Drafts and revisions are derivatives; everything else is canonical.
    pub fn is_canonical(&self) -> bool {
        !self.is_draft() && !self.is_revision()
    }

    /// The id of the canonical element this one represents.
    pub fn canonical_element_id(&self) -> Option<DbId> {
        self.canonical_id.or(self.id)
    }

    pub fn is_trashed(&self) -> bool {
        self.date_deleted.is_some()
    }

    pub fn structure_id(&self) -> Option<DbId> {
        self.position.as_ref().map(|p| p.structure_id)
    }

    // ── Attributes ────────────────────────────────────────────────────

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            self.enabled = enabled;
            self.dirty_attributes.insert(ATTR_ENABLED.to_string());
        }
    }

    pub fn enabled_for_site(&self) -> bool {
        self.enabled_for_site
    }

    pub fn set_enabled_for_site(&mut self, enabled: bool) {
        if self.enabled_for_site != enabled {
            self.enabled_for_site = enabled;
            self.dirty_attributes
                .insert(ATTR_ENABLED_FOR_SITE.to_string());
        }
    }

    /// Live means enabled globally and in this site, and not archived.
    pub fn is_live(&self) -> bool {
        self.enabled && self.enabled_for_site && !self.archived
    }

    pub fn archived(&self) -> bool {
        self.archived
    }

    pub fn set_archived(&mut self, archived: bool) {
        if self.archived != archived {
            self.archived = archived;
            self.dirty_attributes.insert(ATTR_ARCHIVED.to_string());
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn set_title(&mut self, title: Option<String>) {
        if self.title != title {
            self.title = title;
            self.dirty_attributes.insert(ATTR_TITLE.to_string());
        }
    }

    pub fn slug(&self) -> Option<&str> {
        self.slug.as_deref()
    }

    pub fn set_slug(&mut self, slug: Option<String>) {
        if self.slug != slug {
            self.slug = slug;
            self.dirty_attributes.insert(ATTR_SLUG.to_string());
        }
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn set_uri(&mut self, uri: Option<String>) {
        if self.uri != uri {
            self.uri = uri;
            self.dirty_attributes.insert(ATTR_URI.to_string());
        }
    }

    // ── Custom fields ─────────────────────────────────────────────────

    pub fn field_value(&self, handle: &str) -> Option<&serde_json::Value> {
        self.fields.get(handle)
    }

    pub fn field_values(&self) -> &ContentMap {
        &self.fields
    }

    /// Set a field value, marking the field dirty if the value changed.
    pub fn set_field_value(&mut self, handle: impl Into<String>, value: serde_json::Value) {
        let handle = handle.into();
        if self.fields.get(&handle) != Some(&value) {
            self.dirty_fields.insert(handle.clone());
            self.fields.insert(handle, value);
        }
    }

    /// Set each given field value, marking each changed handle dirty.
    pub fn set_field_values(&mut self, values: ContentMap) {
        for (handle, value) in values {
            self.set_field_value(handle, value);
        }
    }

    pub fn is_field_dirty(&self, handle: &str) -> bool {
        self.dirty_fields.contains(handle)
    }

    pub fn mark_field_dirty(&mut self, handle: impl Into<String>) {
        self.dirty_fields.insert(handle.into());
    }

    pub fn dirty_fields(&self) -> impl Iterator<Item = &str> {
        self.dirty_fields.iter().map(String::as_str)
    }

    pub fn dirty_attributes(&self) -> impl Iterator<Item = &str> {
        self.dirty_attributes.iter().map(String::as_str)
    }

    pub fn is_attribute_dirty(&self, attribute: &str) -> bool {
        self.dirty_attributes.contains(attribute)
    }

    pub fn set_dirty_attributes<I, S>(&mut self, attributes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dirty_attributes = attributes.into_iter().map(Into::into).collect();
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty_attributes.is_empty() || !self.dirty_fields.is_empty()
    }

    /// Forget all dirty state, e.g. after a successful save.
    pub fn mark_as_clean(&mut self) {
        self.dirty_attributes.clear();
        self.dirty_fields.clear();
    }

    // ── Errors ────────────────────────────────────────────────────────

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn add_error(&mut self, handle: impl Into<String>, message: impl Into<String>) {
        self.errors.add(handle, message);
    }

    pub fn set_errors(&mut self, errors: FieldErrors) {
        self.errors = errors;
    }

    pub fn clear_errors(&mut self) {
        self.errors = FieldErrors::new();
    }

    // ── Eager-loaded relations ────────────────────────────────────────

    pub fn set_eager_loaded_elements(&mut self, alias: impl Into<String>, elements: Vec<Element>) {
        self.eager_loaded.insert(alias.into(), elements);
    }

    pub fn set_eager_loaded_count(&mut self, alias: impl Into<String>, count: usize) {
        self.eager_counts.insert(alias.into(), count);
    }

    pub fn eager_loaded_elements(&self, alias: &str) -> Option<&[Element]> {
        self.eager_loaded.get(alias).map(Vec::as_slice)
    }

    pub fn eager_loaded_count(&self, alias: &str) -> Option<usize> {
        self.eager_counts.get(alias).copied()
    }

    pub fn has_eager_loaded(&self, alias: &str) -> bool {
        self.eager_loaded.contains_key(alias) || self.eager_counts.contains_key(alias)
    }

    // ── Cloning ───────────────────────────────────────────────────────

    /// Clone this element as the seed for a projection into another site.
    ///
    /// Identity is kept; the site-row linkage and transient state are reset.
    pub fn clone_for_site(&self, site_id: SiteId) -> Self {
        let mut clone = self.clone();
        clone.site_id = site_id;
        clone.site_settings_id = None;
        clone.content_id = None;
        clone.site_date_updated = None;
        clone.new_site_ids.clear();
        clone.errors = FieldErrors::new();
        clone.eager_loaded.clear();
        clone.eager_counts.clear();
        clone
    }

    /// Clone this element as the seed for a brand new element.
    ///
    /// Identity, structure position, timestamps and row linkage are cleared;
    /// every attribute and field is marked dirty so the clone writes fully.
    pub fn clone_as_new(&self) -> Self {
        let mut clone = self.clone_for_site(self.site_id);
        clone.id = None;
        clone.uid = None;
        clone.position = None;
        clone.new_parent_id = None;
        clone.date_created = None;
        clone.date_updated = None;
        clone.date_deleted = None;
        clone.deleted_with_owner = false;
        clone.propagating = false;
        clone.resaving = false;
        clone.dirty_attributes = [ATTR_TITLE, ATTR_SLUG, ATTR_URI, ATTR_ENABLED]
            .iter()
            .map(|a| a.to_string())
            .collect();
        clone.dirty_fields = clone.fields.keys().cloned().collect();
        clone
    }

    /// Overwrite the persisted state without touching dirty tracking.
    ///
    /// Used by stores when hydrating rows.
    #[allow(clippy::too_many_arguments)]
    pub fn hydrate(
        &mut self,
        enabled: bool,
        enabled_for_site: bool,
        archived: bool,
        title: Option<String>,
        slug: Option<String>,
        uri: Option<String>,
        fields: ContentMap,
    ) {
        self.enabled = enabled;
        self.enabled_for_site = enabled_for_site;
        self.archived = archived;
        self.title = title;
        self.slug = slug;
        self.uri = uri;
        self.fields = fields;
        self.mark_as_clean();
    }
}
