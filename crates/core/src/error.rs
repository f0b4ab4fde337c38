use crate::types::{DbId, SiteId};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Unknown element type '{0}'")]
    UnknownElementType(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Element {element_id:?} does not support site {site_id}")]
    UnsupportedSite {
        element_id: Option<DbId>,
        site_id: SiteId,
    },

    #[error("Element type '{type_tag}' resolved no supported sites")]
    NoSupportedSites { type_tag: String },

    #[error("Structural inconsistency: {0}")]
    StructuralInconsistency(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
