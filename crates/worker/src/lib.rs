//! Vellum background worker.
//!
//! - [`config`]: [`WorkerConfig`] loaded from the environment.
//! - [`source`]: the [`JobSource`] seam and its PostgreSQL implementation.
//! - [`handler`]: refreshes search keywords for queued index jobs.
//! - [`runner`]: the polling loop that claims and runs jobs.

pub mod config;
pub mod error;
pub mod handler;
pub mod runner;
pub mod source;

pub use config::WorkerConfig;
pub use error::WorkerError;
pub use handler::{IndexOutcome, SearchIndexHandler};
pub use runner::JobRunner;
pub use source::{ClaimedJob, JobSource, PgJobSource};
