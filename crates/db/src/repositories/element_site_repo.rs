//! Repository for the `elements_sites` table.

use sqlx::PgConnection;
use vellum_core::types::{DbId, SiteId, Timestamp};

/// Provides upserts and lookups for per-site element rows.
pub struct ElementSiteRepo;

impl ElementSiteRepo {
    /// Insert or update the row for `(element_id, site_id)`.
    ///
    /// `date_updated` only moves when slug, URI or the enabled flag change.
    /// Returns `(id, date_updated)`.
    pub async fn upsert(
        conn: &mut PgConnection,
        element_id: DbId,
        site_id: SiteId,
        slug: Option<&str>,
        uri: Option<&str>,
        enabled: bool,
    ) -> Result<(DbId, Timestamp), sqlx::Error> {
        sqlx::query_as(
            "INSERT INTO elements_sites (element_id, site_id, slug, uri, enabled) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (element_id, site_id) DO UPDATE SET \
                slug = EXCLUDED.slug, \
                uri = EXCLUDED.uri, \
                enabled = EXCLUDED.enabled, \
                date_updated = CASE \
                    WHEN (elements_sites.slug, elements_sites.uri, elements_sites.enabled) \
                        IS DISTINCT FROM (EXCLUDED.slug, EXCLUDED.uri, EXCLUDED.enabled) \
                    THEN NOW() ELSE elements_sites.date_updated END \
             RETURNING id, date_updated",
        )
        .bind(element_id)
        .bind(site_id)
        .bind(slug)
        .bind(uri)
        .bind(enabled)
        .fetch_one(conn)
        .await
    }

    pub async fn site_ids(conn: &mut PgConnection, element_id: DbId) -> Result<Vec<SiteId>, sqlx::Error> {
        sqlx::query_scalar("SELECT site_id FROM elements_sites WHERE element_id = $1 ORDER BY site_id")
            .bind(element_id)
            .fetch_all(conn)
            .await
    }

    /// Delete the element's site rows and content rows for `site_ids`.
    pub async fn delete_for_sites(
        conn: &mut PgConnection,
        element_id: DbId,
        site_ids: &[SiteId],
    ) -> Result<u64, sqlx::Error> {
        sqlx::query("DELETE FROM content WHERE element_id = $1 AND site_id = ANY($2)")
            .bind(element_id)
            .bind(site_ids)
            .execute(&mut *conn)
            .await?;
        let result = sqlx::query("DELETE FROM elements_sites WHERE element_id = $1 AND site_id = ANY($2)")
            .bind(element_id)
            .bind(site_ids)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Whether a live canonical element other than `exclude` uses `uri`.
    pub async fn uri_taken(
        conn: &mut PgConnection,
        site_id: SiteId,
        uri: &str,
        exclude: Option<DbId>,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS ( \
                SELECT 1 FROM elements_sites es \
                JOIN elements e ON e.id = es.element_id \
                WHERE es.site_id = $1 AND es.uri = $2 \
                  AND ($3::bigint IS NULL OR e.id <> $3) \
                  AND e.date_deleted IS NULL \
                  AND e.draft_id IS NULL AND e.revision_id IS NULL \
             )",
        )
        .bind(site_id)
        .bind(uri)
        .bind(exclude)
        .fetch_one(conn)
        .await
    }
}
