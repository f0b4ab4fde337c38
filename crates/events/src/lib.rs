//! Vellum element events and hooks.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`ElementEvent`]: the lifecycle event envelope.
//! - [`EventPersistence`]: background task writing every event to the
//!   `element_events` table.
//! - [`HookRegistry`]: before/after hooks that may veto saves, deletes
//!   and restores.

pub mod bus;
pub mod hooks;
pub mod persistence;

pub use bus::{ElementEvent, EventBus, EventKind};
pub use hooks::{ElementHook, HookDecision, HookRegistry};
pub use persistence::EventPersistence;
