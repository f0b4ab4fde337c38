//! Repository for the `search_index` table.

use sqlx::PgPool;
use vellum_core::search::SearchKeywords;
use vellum_core::types::{DbId, SiteId};

/// Keyword storage for full-text search.
pub struct SearchIndexRepo;

impl SearchIndexRepo {
    /// Replace every keyword row of an element in one site.
    pub async fn replace_for_site(
        pool: &PgPool,
        element_id: DbId,
        site_id: SiteId,
        rows: &[SearchKeywords],
    ) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM search_index WHERE element_id = $1 AND site_id = $2")
            .bind(element_id)
            .bind(site_id)
            .execute(&mut *tx)
            .await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO search_index (element_id, site_id, attribute, keywords) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(row.element_id)
            .bind(row.site_id)
            .bind(&row.attribute)
            .bind(&row.keywords)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_for_element(pool: &PgPool, element_id: DbId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM search_index WHERE element_id = $1")
            .bind(element_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Element ids in `site_id` whose keywords match every term of `tsquery`.
    pub async fn search(pool: &PgPool, site_id: SiteId, tsquery: &str) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT DISTINCT element_id FROM search_index \
             WHERE site_id = $1 AND keywords_vector @@ to_tsquery('simple', $2) \
             ORDER BY element_id",
        )
        .bind(site_id)
        .bind(tsquery)
        .fetch_all(pool)
        .await
    }
}
