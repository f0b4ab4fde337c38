//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods. Methods
//! that take part in element transactions accept `&mut PgConnection`
//! (pass `&mut *tx`); standalone ones accept `&PgPool`.

pub mod change_repo;
pub mod content_repo;
pub mod derivative_repo;
pub mod element_repo;
pub mod element_site_repo;
pub mod event_repo;
pub mod job_repo;
pub mod search_index_repo;
pub mod structure_repo;

pub use change_repo::ChangeRepo;
pub use content_repo::ContentRepo;
pub use derivative_repo::DerivativeRepo;
pub use element_repo::ElementRepo;
pub use element_site_repo::ElementSiteRepo;
pub use event_repo::EventRepo;
pub use job_repo::JobRepo;
pub use search_index_repo::SearchIndexRepo;
pub use structure_repo::StructureRepo;
