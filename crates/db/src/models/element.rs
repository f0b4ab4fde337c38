//! Element rows joined with their site projection and content.

use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;
use vellum_core::element::{ContentMap, Element};
use vellum_core::structure::StructurePosition;
use vellum_core::types::{DbId, SiteId, Timestamp};

/// One element as seen from one site.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ElementRow {
    pub id: DbId,
    pub uid: Uuid,
    pub type_tag: String,
    pub canonical_id: Option<DbId>,
    pub draft_id: Option<DbId>,
    pub revision_id: Option<DbId>,
    pub owner_id: Option<DbId>,
    pub enabled: bool,
    pub archived: bool,
    pub deleted_with_owner: bool,
    pub date_created: Timestamp,
    pub date_updated: Timestamp,
    pub date_deleted: Option<Timestamp>,
    pub site_settings_id: DbId,
    pub site_id: SiteId,
    pub slug: Option<String>,
    pub uri: Option<String>,
    pub enabled_for_site: bool,
    pub site_date_updated: Timestamp,
    pub content_id: DbId,
    pub title: Option<String>,
    pub fields: serde_json::Value,
    pub structure_id: Option<DbId>,
    pub root: Option<DbId>,
    pub lft: Option<i32>,
    pub rgt: Option<i32>,
    pub level: Option<i32>,
}

impl ElementRow {
    pub fn into_element(self) -> Element {
        let mut element = Element::new(self.type_tag, self.site_id);
        element.id = Some(self.id);
        element.uid = Some(self.uid);
        element.canonical_id = self.canonical_id;
        element.draft_id = self.draft_id;
        element.revision_id = self.revision_id;
        element.owner_id = self.owner_id;
        element.site_settings_id = Some(self.site_settings_id);
        element.content_id = Some(self.content_id);
        element.date_created = Some(self.date_created);
        element.date_updated = Some(self.date_updated);
        element.site_date_updated = Some(self.site_date_updated);
        element.date_deleted = self.date_deleted;
        element.deleted_with_owner = self.deleted_with_owner;
        element.position = match (self.structure_id, self.root, self.lft, self.rgt, self.level) {
            (Some(structure_id), Some(root), Some(lft), Some(rgt), Some(level)) => Some(StructurePosition {
                structure_id,
                root,
                lft,
                rgt,
                level,
            }),
            _ => None,
        };
        let fields: ContentMap = match self.fields {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => ContentMap::new(),
        };
        element.hydrate(
            self.enabled,
            self.enabled_for_site,
            self.archived,
            self.title,
            self.slug,
            self.uri,
            fields,
        );
        element
    }
}
