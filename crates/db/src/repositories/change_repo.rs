//! Repository for the `changed_attributes` and `changed_fields` tables.

use sqlx::PgConnection;
use vellum_core::element::{ChangeKind, ChangeRecord};
use vellum_core::types::DbId;

/// Records which attributes and fields changed, per element and site.
pub struct ChangeRepo;

impl ChangeRepo {
    /// Upsert one change record; later changes overwrite earlier ones.
    pub async fn upsert(conn: &mut PgConnection, change: &ChangeRecord) -> Result<(), sqlx::Error> {
        let (table, column) = match change.kind {
            ChangeKind::Attribute => ("changed_attributes", "attribute"),
            ChangeKind::Field => ("changed_fields", "field_handle"),
        };
        let query = format!(
            "INSERT INTO {table} (element_id, site_id, {column}, date_updated, propagated, user_id) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (element_id, site_id, {column}) DO UPDATE SET \
                date_updated = EXCLUDED.date_updated, \
                propagated = EXCLUDED.propagated, \
                user_id = EXCLUDED.user_id"
        );
        sqlx::query(&query)
            .bind(change.element_id)
            .bind(change.site_id)
            .bind(&change.handle)
            .bind(change.date_updated)
            .bind(change.propagated)
            .bind(change.user_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Attribute names recorded as changed for an element in any site.
    pub async fn changed_attributes(conn: &mut PgConnection, element_id: DbId) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT DISTINCT attribute FROM changed_attributes WHERE element_id = $1 ORDER BY attribute",
        )
        .bind(element_id)
        .fetch_all(conn)
        .await
    }
}
