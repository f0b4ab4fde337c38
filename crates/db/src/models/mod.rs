//! Row structs for the content tables.
//!
//! Each submodule holds a `FromRow` + `Serialize` struct matching the
//! database row, plus conversions into domain types where one exists.

pub mod element;
pub mod event;
pub mod job;
pub mod structure;
