//! Repository for the `drafts` and `revisions` tables.

use sqlx::PgConnection;
use vellum_core::types::DbId;

/// Creates the bookkeeping rows drafts and revisions point at.
pub struct DerivativeRepo;

impl DerivativeRepo {
    pub async fn create_draft(
        conn: &mut PgConnection,
        canonical_id: DbId,
        creator_id: Option<DbId>,
        name: &str,
    ) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO drafts (canonical_id, creator_id, name) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(canonical_id)
        .bind(creator_id)
        .bind(name)
        .fetch_one(conn)
        .await
    }

    /// Create the next revision for `canonical_id`, returning `(id, num)`.
    pub async fn create_revision(
        conn: &mut PgConnection,
        canonical_id: DbId,
        creator_id: Option<DbId>,
        notes: Option<&str>,
    ) -> Result<(DbId, i32), sqlx::Error> {
        sqlx::query_as(
            "INSERT INTO revisions (canonical_id, creator_id, num, notes) \
             VALUES ( \
                $1, $2, \
                (SELECT COALESCE(MAX(num), 0) + 1 FROM revisions WHERE canonical_id = $1), \
                $3 \
             ) \
             RETURNING id, num",
        )
        .bind(canonical_id)
        .bind(creator_id)
        .bind(notes)
        .fetch_one(conn)
        .await
    }
}
