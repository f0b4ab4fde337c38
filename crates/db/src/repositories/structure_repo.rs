//! Repository for the `structures` and `structure_elements` tables.

use sqlx::PgConnection;
use vellum_core::structure::StructureNode;
use vellum_core::types::DbId;

use crate::models::structure::StructureElementRow;

const COLUMNS: &str = "id, structure_id, element_id, root, lft, rgt, level";

/// Provides loading and write-back of nested-set rows.
pub struct StructureRepo;

impl StructureRepo {
    /// Make sure the structure and its root row exist, and lock the
    /// structure row until the transaction ends.
    ///
    /// Returns the root row id and the stored `max_levels`.
    pub async fn ensure(
        conn: &mut PgConnection,
        structure_id: DbId,
        max_levels: Option<i32>,
    ) -> Result<(DbId, Option<i32>), sqlx::Error> {
        sqlx::query("INSERT INTO structures (id, max_levels) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING")
            .bind(structure_id)
            .bind(max_levels)
            .execute(&mut *conn)
            .await?;
        // Nested-set edits rewrite lft/rgt from a full read, so writers of
        // one structure must not interleave.
        let stored: Option<i32> = sqlx::query_scalar("SELECT max_levels FROM structures WHERE id = $1 FOR UPDATE")
            .bind(structure_id)
            .fetch_one(&mut *conn)
            .await?;

        let root: Option<DbId> = sqlx::query_scalar(
            "SELECT id FROM structure_elements WHERE structure_id = $1 AND element_id IS NULL",
        )
        .bind(structure_id)
        .fetch_optional(&mut *conn)
        .await?;
        let root = match root {
            Some(id) => id,
            None => {
                sqlx::query_scalar(
                    "INSERT INTO structure_elements (structure_id, element_id, lft, rgt, level) \
                     VALUES ($1, NULL, 1, 2, 0) \
                     RETURNING id",
                )
                .bind(structure_id)
                .fetch_one(&mut *conn)
                .await?
            }
        };
        sqlx::query("UPDATE structure_elements SET root = $1 WHERE id = $1 AND root IS NULL")
            .bind(root)
            .execute(&mut *conn)
            .await?;
        Ok((root, stored))
    }

    /// All rows of a structure, root included, in tree order.
    pub async fn rows(conn: &mut PgConnection, structure_id: DbId) -> Result<Vec<StructureElementRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM structure_elements WHERE structure_id = $1 ORDER BY lft");
        sqlx::query_as::<_, StructureElementRow>(&query)
            .bind(structure_id)
            .fetch_all(conn)
            .await
    }

    pub async fn upsert_node(
        conn: &mut PgConnection,
        structure_id: DbId,
        root: DbId,
        node: &StructureNode,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO structure_elements (structure_id, element_id, root, lft, rgt, level) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (structure_id, element_id) DO UPDATE SET \
                lft = EXCLUDED.lft, rgt = EXCLUDED.rgt, level = EXCLUDED.level",
        )
        .bind(structure_id)
        .bind(node.element_id)
        .bind(root)
        .bind(node.lft)
        .bind(node.rgt)
        .bind(node.level)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Structures holding any of `element_ids`.
    pub async fn structures_containing(
        conn: &mut PgConnection,
        element_ids: &[DbId],
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT DISTINCT structure_id FROM structure_elements WHERE element_id = ANY($1) ORDER BY structure_id",
        )
        .bind(element_ids)
        .fetch_all(conn)
        .await
    }

    pub async fn delete_nodes(
        conn: &mut PgConnection,
        structure_id: DbId,
        element_ids: &[DbId],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM structure_elements WHERE structure_id = $1 AND element_id = ANY($2)")
            .bind(structure_id)
            .bind(element_ids)
            .execute(conn)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn set_root_rgt(conn: &mut PgConnection, root: DbId, rgt: i32) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE structure_elements SET rgt = $2 WHERE id = $1")
            .bind(root)
            .bind(rgt)
            .execute(conn)
            .await?;
        Ok(())
    }
}
