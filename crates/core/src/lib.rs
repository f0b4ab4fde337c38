//! Vellum domain core.
//!
//! Pure domain types with no storage or runtime dependencies:
//!
//! - [`element`]: the element model with dirty tracking and eager slots.
//! - [`element_type`]: per-type capabilities and the [`TypeRegistry`].
//! - [`site`]: sites and field translation rules.
//! - [`structure`]: nested-set trees and positional edits.
//! - [`eager`]: eager-load path compilation.
//! - [`cache_tags`]: the cache tag ledger and invalidation seam.
//! - [`placeholders`]: request-scoped element overrides.
//! - [`search`] and [`jobs`]: indexing and background job seams.

pub mod cache_tags;
pub mod eager;
pub mod element;
pub mod element_type;
pub mod error;
pub mod jobs;
pub mod placeholders;
pub mod query;
pub mod search;
pub mod site;
pub mod structure;
pub mod types;

pub use element::{Element, FieldErrors, ValidationScenario};
pub use element_type::{ElementType, TypeRegistry};
pub use error::CoreError;
pub use site::{Site, Sites, TranslationMethod};
pub use types::{DbId, SiteId, Timestamp};
