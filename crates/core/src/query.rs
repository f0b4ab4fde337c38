//! Element query criteria understood by every content store.

use serde::{Deserialize, Serialize};

use crate::types::{DbId, SiteId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    /// Enabled, enabled for the site, and not archived.
    Live,
    /// Disabled globally or for the site.
    Disabled,
    /// Archived elements only.
    Archived,
    /// Any status, archived included.
    #[default]
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrashFilter {
    #[default]
    Exclude,
    Only,
    Include,
}

/// Which derivatives a query returns alongside canonical elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivativeFilter {
    /// Canonical elements only.
    #[default]
    CanonicalOnly,
    DraftsOnly,
    RevisionsOnly,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderColumn {
    Id,
    DateCreated,
    DateUpdated,
    Title,
    Slug,
    /// A custom field value.
    Field(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: OrderColumn,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(column: OrderColumn) -> Self {
        Self {
            column,
            descending: false,
        }
    }

    pub fn desc(column: OrderColumn) -> Self {
        Self {
            column,
            descending: true,
        }
    }
}

/// Criteria for fetching elements in one site.
///
/// With no `order_by`, results come back in id order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementQuery {
    pub site_id: SiteId,
    pub type_tag: Option<String>,
    pub ids: Option<Vec<DbId>>,
    pub owner_id: Option<DbId>,
    pub canonical_id: Option<DbId>,
    pub status: StatusFilter,
    pub trashed: TrashFilter,
    pub derivatives: DerivativeFilter,
    pub order_by: Vec<OrderBy>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

impl ElementQuery {
    pub fn new(site_id: SiteId) -> Self {
        Self {
            site_id,
            type_tag: None,
            ids: None,
            owner_id: None,
            canonical_id: None,
            status: StatusFilter::Any,
            trashed: TrashFilter::Exclude,
            derivatives: DerivativeFilter::CanonicalOnly,
            order_by: Vec::new(),
            offset: None,
            limit: None,
        }
    }

    pub fn of_type(mut self, type_tag: impl Into<String>) -> Self {
        self.type_tag = Some(type_tag.into());
        self
    }

    pub fn id(mut self, id: DbId) -> Self {
        self.ids = Some(vec![id]);
        self
    }

    pub fn ids(mut self, ids: impl IntoIterator<Item = DbId>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }

    pub fn owned_by(mut self, owner_id: DbId) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn derived_from(mut self, canonical_id: DbId) -> Self {
        self.canonical_id = Some(canonical_id);
        self
    }

    pub fn status(mut self, status: StatusFilter) -> Self {
        self.status = status;
        self
    }

    pub fn trashed(mut self, trashed: TrashFilter) -> Self {
        self.trashed = trashed;
        self
    }

    pub fn derivatives(mut self, derivatives: DerivativeFilter) -> Self {
        self.derivatives = derivatives;
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns `true` if the id filter can never match anything.
    pub fn is_empty_id_set(&self) -> bool {
        self.ids.as_ref().is_some_and(Vec::is_empty)
    }
}
