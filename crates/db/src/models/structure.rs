//! Structure node rows.

use serde::Serialize;
use sqlx::FromRow;
use vellum_core::structure::StructureNode;
use vellum_core::types::DbId;

/// A row from the `structure_elements` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StructureElementRow {
    pub id: DbId,
    pub structure_id: DbId,
    pub element_id: Option<DbId>,
    pub root: Option<DbId>,
    pub lft: i32,
    pub rgt: i32,
    pub level: i32,
}

impl From<&StructureElementRow> for StructureNode {
    fn from(row: &StructureElementRow) -> Self {
        StructureNode {
            element_id: row.element_id,
            lft: row.lft,
            rgt: row.rgt,
            level: row.level,
        }
    }
}
