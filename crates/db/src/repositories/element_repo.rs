//! Repository for the `elements` table and the joined element view.

use sqlx::PgConnection;
use vellum_core::element::Element;
use vellum_core::query::{DerivativeFilter, ElementQuery, OrderColumn, StatusFilter, TrashFilter};
use vellum_core::types::{DbId, Timestamp};

use crate::models::element::ElementRow;
use crate::store::OwnedFilter;

/// Columns of the joined element view.
const COLUMNS: &str = "\
    e.id, e.uid, e.type_tag, e.canonical_id, e.draft_id, e.revision_id, e.owner_id, \
    e.enabled, e.archived, e.deleted_with_owner, e.date_created, e.date_updated, e.date_deleted, \
    es.id AS site_settings_id, es.site_id, es.slug, es.uri, es.enabled AS enabled_for_site, \
    GREATEST(es.date_updated, c.date_updated) AS site_date_updated, \
    c.id AS content_id, c.title, c.fields, \
    se.structure_id, se.root, se.lft, se.rgt, se.level";

const FROM: &str = "\
    FROM elements e \
    JOIN elements_sites es ON es.element_id = e.id \
    JOIN content c ON c.element_id = e.id AND c.site_id = es.site_id \
    LEFT JOIN structure_elements se ON se.element_id = e.id";

/// Bound filters: `$1` site, `$2` type, `$3` ids, `$4` owner, `$5` canonical.
const BOUND_FILTERS: &str = "\
    es.site_id = $1 \
    AND ($2::text IS NULL OR e.type_tag = $2) \
    AND ($3::bigint[] IS NULL OR e.id = ANY($3)) \
    AND ($4::bigint IS NULL OR e.owner_id = $4) \
    AND ($5::bigint IS NULL OR e.canonical_id = $5)";

fn where_clause(q: &ElementQuery) -> String {
    let derivatives = match q.derivatives {
        DerivativeFilter::CanonicalOnly => "e.draft_id IS NULL AND e.revision_id IS NULL",
        DerivativeFilter::DraftsOnly => "e.draft_id IS NOT NULL",
        DerivativeFilter::RevisionsOnly => "e.revision_id IS NOT NULL",
        DerivativeFilter::All => "TRUE",
    };
    let trashed = match q.trashed {
        TrashFilter::Exclude => "e.date_deleted IS NULL",
        TrashFilter::Only => "e.date_deleted IS NOT NULL",
        TrashFilter::Include => "TRUE",
    };
    let status = match q.status {
        StatusFilter::Live => "e.enabled AND es.enabled AND NOT e.archived",
        StatusFilter::Disabled => "(NOT e.enabled OR NOT es.enabled) AND NOT e.archived",
        StatusFilter::Archived => "e.archived",
        StatusFilter::Any => "TRUE",
    };
    format!("WHERE {BOUND_FILTERS} AND {derivatives} AND {trashed} AND {status}")
}

/// `ORDER BY` clause; field handles are bound from `$8` onwards.
fn order_clause(q: &ElementQuery) -> (String, Vec<String>) {
    let mut parts = Vec::with_capacity(q.order_by.len() + 1);
    let mut handles = Vec::new();
    for order in &q.order_by {
        let column = match &order.column {
            OrderColumn::Id => "e.id".to_string(),
            OrderColumn::DateCreated => "e.date_created".to_string(),
            OrderColumn::DateUpdated => "e.date_updated".to_string(),
            OrderColumn::Title => "c.title".to_string(),
            OrderColumn::Slug => "es.slug".to_string(),
            OrderColumn::Field(handle) => {
                handles.push(handle.clone());
                format!("c.fields ->> ${}", 7 + handles.len())
            }
        };
        let direction = if order.descending { "DESC" } else { "ASC" };
        parts.push(format!("{column} {direction}"));
    }
    parts.push("e.id ASC".to_string());
    (format!("ORDER BY {}", parts.join(", ")), handles)
}

/// Provides reads and writes for canonical element rows.
pub struct ElementRepo;

impl ElementRepo {
    // ── Reads ────────────────────────────────────────────────────────

    /// Run an element query. `LIMIT`/`OFFSET` of `NULL` mean "no limit"
    /// and "from the start".
    pub async fn query(conn: &mut PgConnection, q: &ElementQuery) -> Result<Vec<Element>, sqlx::Error> {
        if q.is_empty_id_set() {
            return Ok(Vec::new());
        }
        let (order, handles) = order_clause(q);
        let sql = format!(
            "SELECT {COLUMNS} {FROM} {} {order} LIMIT $6 OFFSET $7",
            where_clause(q)
        );
        let mut query = sqlx::query_as::<_, ElementRow>(&sql)
            .bind(q.site_id)
            .bind(q.type_tag.as_deref())
            .bind(q.ids.as_deref())
            .bind(q.owner_id)
            .bind(q.canonical_id)
            .bind(q.limit)
            .bind(q.offset);
        for handle in &handles {
            query = query.bind(handle);
        }
        let rows = query.fetch_all(conn).await?;
        Ok(rows.into_iter().map(ElementRow::into_element).collect())
    }

    /// Count matches, ignoring offset and limit.
    pub async fn count(conn: &mut PgConnection, q: &ElementQuery) -> Result<i64, sqlx::Error> {
        if q.is_empty_id_set() {
            return Ok(0);
        }
        let sql = format!("SELECT COUNT(*) {FROM} {}", where_clause(q));
        sqlx::query_scalar(&sql)
            .bind(q.site_id)
            .bind(q.type_tag.as_deref())
            .bind(q.ids.as_deref())
            .bind(q.owner_id)
            .bind(q.canonical_id)
            .fetch_one(conn)
            .await
    }

    /// Ids of all matches. Only the tables the filters touch are joined.
    pub async fn ids(conn: &mut PgConnection, q: &ElementQuery) -> Result<Vec<DbId>, sqlx::Error> {
        if q.is_empty_id_set() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT e.id FROM elements e JOIN elements_sites es ON es.element_id = e.id {} ORDER BY e.id",
            where_clause(q)
        );
        sqlx::query_scalar(&sql)
            .bind(q.site_id)
            .bind(q.type_tag.as_deref())
            .bind(q.ids.as_deref())
            .bind(q.owner_id)
            .bind(q.canonical_id)
            .fetch_all(conn)
            .await
    }

    /// Drafts and revisions pointing at `canonical_id`.
    pub async fn derivative_ids(conn: &mut PgConnection, canonical_id: DbId) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar("SELECT id FROM elements WHERE canonical_id = $1 ORDER BY id")
            .bind(canonical_id)
            .fetch_all(conn)
            .await
    }

    /// `id` plus everything a hard delete of it cascades to: derivatives
    /// and owned elements, recursively.
    pub async fn cascade_ids(conn: &mut PgConnection, id: DbId) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "WITH RECURSIVE doomed(id) AS ( \
                SELECT id FROM elements WHERE id = $1 \
                UNION \
                SELECT e.id FROM elements e \
                JOIN doomed d ON e.canonical_id = d.id OR e.owner_id = d.id \
             ) \
             SELECT id FROM doomed ORDER BY id",
        )
        .bind(id)
        .fetch_all(conn)
        .await
    }

    pub async fn owned_ids(
        conn: &mut PgConnection,
        owner_id: DbId,
        filter: OwnedFilter,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        let condition = match filter {
            OwnedFilter::Live => "date_deleted IS NULL",
            OwnedFilter::DeletedWithOwner => "date_deleted IS NOT NULL AND deleted_with_owner",
        };
        let sql = format!("SELECT id FROM elements WHERE owner_id = $1 AND {condition} ORDER BY id");
        sqlx::query_scalar(&sql).bind(owner_id).fetch_all(conn).await
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Insert a canonical row, returning `(id, date_created)`.
    pub async fn insert(
        conn: &mut PgConnection,
        element: &Element,
        uid: uuid::Uuid,
    ) -> Result<(DbId, Timestamp), sqlx::Error> {
        sqlx::query_as(
            "INSERT INTO elements \
                (uid, type_tag, canonical_id, draft_id, revision_id, owner_id, enabled, archived) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id, date_created",
        )
        .bind(uid)
        .bind(&element.type_tag)
        .bind(element.canonical_id)
        .bind(element.draft_id)
        .bind(element.revision_id)
        .bind(element.owner_id)
        .bind(element.enabled())
        .bind(element.archived())
        .fetch_one(conn)
        .await
    }

    /// Update a canonical row. With `touch` the timestamp moves to now,
    /// otherwise it is set to `keep_date` (or left alone).
    ///
    /// Returns the stored `date_updated`, or `None` if the row is gone.
    pub async fn update(
        conn: &mut PgConnection,
        element: &Element,
        touch: bool,
        keep_date: Option<Timestamp>,
    ) -> Result<Option<Timestamp>, sqlx::Error> {
        sqlx::query_scalar(
            "UPDATE elements SET \
                enabled = $2, archived = $3, owner_id = $4, canonical_id = $5, \
                date_updated = CASE WHEN $6 THEN NOW() ELSE COALESCE($7, date_updated) END \
             WHERE id = $1 \
             RETURNING date_updated",
        )
        .bind(element.id)
        .bind(element.enabled())
        .bind(element.archived())
        .bind(element.owner_id)
        .bind(element.canonical_id)
        .bind(touch)
        .bind(keep_date)
        .fetch_optional(conn)
        .await
    }

    /// Soft-delete a row. Returns `true` if it was live.
    pub async fn soft_delete(
        conn: &mut PgConnection,
        id: DbId,
        deleted_at: Timestamp,
        with_owner: bool,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE elements SET date_deleted = $2, deleted_with_owner = $3 \
             WHERE id = $1 AND date_deleted IS NULL",
        )
        .bind(id)
        .bind(deleted_at)
        .bind(with_owner)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Restore a soft-deleted row. Returns `true` if it was trashed.
    pub async fn restore(conn: &mut PgConnection, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE elements SET date_deleted = NULL, deleted_with_owner = FALSE \
             WHERE id = $1 AND date_deleted IS NOT NULL",
        )
        .bind(id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Permanently delete a row. Site rows, content, structure nodes,
    /// change records, derivatives and owned elements cascade. The draft or
    /// revision record the row belongs to goes with it.
    pub async fn hard_delete(conn: &mut PgConnection, id: DbId) -> Result<bool, sqlx::Error> {
        let deleted: i64 = sqlx::query_scalar(
            "WITH doomed AS ( \
                DELETE FROM elements WHERE id = $1 RETURNING draft_id, revision_id \
             ), \
             drafts_gone AS ( \
                DELETE FROM drafts WHERE id IN (SELECT draft_id FROM doomed) \
             ), \
             revisions_gone AS ( \
                DELETE FROM revisions WHERE id IN (SELECT revision_id FROM doomed) \
             ) \
             SELECT COUNT(*) FROM doomed",
        )
        .bind(id)
        .fetch_one(conn)
        .await?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_core::query::OrderBy;

    #[test]
    fn field_order_binds_after_paging() {
        let q = ElementQuery::new(1)
            .order_by(OrderBy::desc(OrderColumn::Field("price".into())))
            .order_by(OrderBy::asc(OrderColumn::Title))
            .order_by(OrderBy::asc(OrderColumn::Field("sku".into())));
        let (clause, handles) = order_clause(&q);
        assert_eq!(
            clause,
            "ORDER BY c.fields ->> $8 DESC, c.title ASC, c.fields ->> $9 ASC, e.id ASC"
        );
        assert_eq!(handles, vec!["price", "sku"]);
    }

    #[test]
    fn where_clause_reflects_filters() {
        let q = ElementQuery::new(1)
            .status(StatusFilter::Live)
            .trashed(TrashFilter::Only)
            .derivatives(DerivativeFilter::DraftsOnly);
        let clause = where_clause(&q);
        assert!(clause.contains("e.draft_id IS NOT NULL"));
        assert!(clause.contains("e.date_deleted IS NOT NULL"));
        assert!(clause.contains("e.enabled AND es.enabled AND NOT e.archived"));
    }
}
