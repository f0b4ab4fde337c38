//! Persisted element event rows.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use vellum_core::types::{DbId, SiteId, Timestamp};

/// A row from the `element_events` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ElementEventRow {
    pub id: DbId,
    pub event_type: String,
    pub element_id: Option<DbId>,
    pub site_id: Option<SiteId>,
    pub type_tag: Option<String>,
    pub actor_id: Option<DbId>,
    pub payload: serde_json::Value,
    pub created_at: Timestamp,
}

/// DTO for inserting an event.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateElementEvent {
    pub event_type: String,
    pub element_id: Option<DbId>,
    pub site_id: Option<SiteId>,
    pub type_tag: Option<String>,
    pub actor_id: Option<DbId>,
    pub payload: serde_json::Value,
}
