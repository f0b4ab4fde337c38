//! Repository for the `element_events` table.

use sqlx::PgPool;
use vellum_core::types::DbId;

use crate::models::event::{CreateElementEvent, ElementEventRow};

const COLUMNS: &str = "id, event_type, element_id, site_id, type_tag, actor_id, payload, created_at";

/// Durable storage for element lifecycle events.
pub struct EventRepo;

impl EventRepo {
    /// Insert a new event row, returning the generated ID.
    pub async fn insert(pool: &PgPool, input: &CreateElementEvent) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO element_events (event_type, element_id, site_id, type_tag, actor_id, payload) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id",
        )
        .bind(&input.event_type)
        .bind(input.element_id)
        .bind(input.site_id)
        .bind(&input.type_tag)
        .bind(input.actor_id)
        .bind(&input.payload)
        .fetch_one(pool)
        .await
    }

    /// Events for one element, newest first.
    pub async fn list_for_element(pool: &PgPool, element_id: DbId) -> Result<Vec<ElementEventRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM element_events WHERE element_id = $1 ORDER BY created_at DESC, id DESC"
        );
        sqlx::query_as::<_, ElementEventRow>(&query)
            .bind(element_id)
            .fetch_all(pool)
            .await
    }
}
