use vellum_core::element::FieldErrors;
use vellum_core::error::CoreError;
use vellum_core::types::{DbId, SiteId};
use vellum_db::StoreError;

/// Errors returned by the element engine and eager loader.
#[derive(Debug, thiserror::Error)]
pub enum ElementError {
    /// Field-level errors. No rows were written.
    #[error("Validation failed for element {element_id:?}: {errors}")]
    ValidationFailed {
        element_id: Option<DbId>,
        errors: FieldErrors,
    },

    #[error("Element {element_id:?} does not support site {site_id}")]
    UnsupportedSite {
        element_id: Option<DbId>,
        site_id: SiteId,
    },

    #[error("Element not found: {entity} {id}")]
    NotFound { entity: &'static str, id: DbId },

    /// No element type is registered under the tag.
    #[error("Unknown element type '{0}'")]
    UnknownElementType(String),

    #[error("Structural inconsistency: {0}")]
    StructuralInconsistency(String),

    /// The store failed; the transaction was rolled back.
    #[error("Store error: {0}")]
    Store(StoreError),

    /// A `before_*` hook refused the operation.
    #[error("Vetoed: {0}")]
    Vetoed(String),

    #[error(transparent)]
    Core(CoreError),
}

impl From<CoreError> for ElementError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            CoreError::UnknownElementType(tag) => Self::UnknownElementType(tag),
            CoreError::UnsupportedSite {
                element_id,
                site_id,
            } => Self::UnsupportedSite {
                element_id,
                site_id,
            },
            CoreError::StructuralInconsistency(msg) => Self::StructuralInconsistency(msg),
            other => Self::Core(other),
        }
    }
}

impl From<StoreError> for ElementError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Core(core) => core.into(),
            StoreError::Missing { entity, id } => Self::NotFound { entity, id },
            other => Self::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn core_errors_map_onto_the_taxonomy() {
        let err: ElementError = CoreError::StructuralInconsistency("loop".into()).into();
        assert_matches!(err, ElementError::StructuralInconsistency(_));

        let err: ElementError = StoreError::Core(CoreError::UnsupportedSite {
            element_id: Some(1),
            site_id: 3,
        })
        .into();
        assert_matches!(err, ElementError::UnsupportedSite { site_id: 3, .. });

        let err: ElementError = CoreError::UnknownElementType("widget".into()).into();
        assert_matches!(err, ElementError::UnknownElementType(tag) if tag == "widget");

        let err: ElementError = StoreError::Conflict("busy".into()).into();
        assert_matches!(err, ElementError::Store(StoreError::Conflict(_)));
    }
}
