//! Repository for the `content` table.

use sqlx::PgConnection;
use vellum_core::element::ContentMap;
use vellum_core::types::{DbId, SiteId, Timestamp};

/// Provides upserts for content rows holding titles and field values.
pub struct ContentRepo;

impl ContentRepo {
    /// Insert or update the content row for `(element_id, site_id)`.
    ///
    /// `date_updated` only moves when the title or field values change.
    /// Returns `(id, date_updated)`.
    pub async fn upsert(
        conn: &mut PgConnection,
        element_id: DbId,
        site_id: SiteId,
        title: Option<&str>,
        fields: &ContentMap,
    ) -> Result<(DbId, Timestamp), sqlx::Error> {
        sqlx::query_as(
            "INSERT INTO content (element_id, site_id, title, fields) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (element_id, site_id) DO UPDATE SET \
                title = EXCLUDED.title, \
                fields = EXCLUDED.fields, \
                date_updated = CASE \
                    WHEN (content.title, content.fields) IS DISTINCT FROM (EXCLUDED.title, EXCLUDED.fields) \
                    THEN NOW() ELSE content.date_updated END \
             RETURNING id, date_updated",
        )
        .bind(element_id)
        .bind(site_id)
        .bind(title)
        .bind(sqlx::types::Json(fields))
        .fetch_one(conn)
        .await
    }
}
