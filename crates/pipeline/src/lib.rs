//! Vellum content pipeline.
//!
//! - [`ElementService`]: saves, propagates, duplicates, deletes and
//!   restores elements, transactionally across every supported site.
//! - [`EagerLoader`]: batched resolution of `with` paths.
//! - [`UnitOfWork`]: per-request cache tag ledger and placeholders.
//! - [`EngineConfig`]: engine switches read from the environment.

pub mod config;
pub mod eager;
pub mod engine;
pub mod error;
pub mod unit_of_work;

pub use config::{EngineConfig, SearchIndexMode};
pub use eager::EagerLoader;
pub use engine::{
    BatchFailure, BatchOptions, BatchReport, Collaborators, DuplicateOverrides, ElementService,
    SaveOptions,
};
pub use error::ElementError;
pub use unit_of_work::{ExecutionContext, UnitOfWork};
