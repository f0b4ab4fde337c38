//! Structural positions: nested-set trees over elements.
//!
//! A structure is stored as one row per node with `root`, `lft`, `rgt` and
//! `level` columns. Every structure has a hidden root node (level 0, no
//! element) whose range spans the whole tree; top-level elements sit at
//! level 1.
//!
//! [`StructureTree`] is an in-memory arena of those rows keyed by element
//! id. All edits are applied in place with explicit range shifts and the
//! arena is never re-read mid-operation. Once an edit is done,
//! [`StructureTree::changes`] yields the rows to write back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::DbId;

/// A node's position as seen from its element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructurePosition {
    pub structure_id: DbId,
    /// Row id of the structure's root node.
    pub root: DbId,
    pub lft: i32,
    pub rgt: i32,
    pub level: i32,
}

/// A persisted structure row. The root row has no element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureNode {
    pub element_id: Option<DbId>,
    pub lft: i32,
    pub rgt: i32,
    pub level: i32,
}

/// Whether a placement may insert a new node, move an existing one, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureMode {
    /// Place the node only if it is not in the structure yet. A node that
    /// already has a slot keeps it and nothing is re-ordered.
    Insert,
    /// Move the node only if it is already in the structure.
    Update,
    /// Insert or move, whichever applies.
    Auto,
}

/// Where a node should end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// First child of the given parent (`None` for the root).
    FirstChildOf(Option<DbId>),
    /// Last child of the given parent (`None` for the root).
    LastChildOf(Option<DbId>),
    Before(DbId),
    After(DbId),
}

/// Rows to write back after editing a [`StructureTree`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructureChanges {
    /// New or moved element nodes.
    pub upserts: Vec<StructureNode>,
    /// Element ids whose nodes were removed.
    pub removed: Vec<DbId>,
    /// The root node's new `rgt`, when it changed.
    pub root_rgt: Option<i32>,
}

impl StructureChanges {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removed.is_empty() && self.root_rgt.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Range {
    lft: i32,
    rgt: i32,
    level: i32,
}

impl Range {
    fn width(&self) -> i32 {
        self.rgt - self.lft + 1
    }

    fn contains(&self, other: &Range) -> bool {
        self.lft < other.lft && other.rgt < self.rgt
    }
}

// ---------------------------------------------------------------------------
// StructureTree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StructureTree {
    structure_id: DbId,
    root: DbId,
    max_levels: Option<i32>,
    root_range: Range,
    original_root_rgt: i32,
    nodes: BTreeMap<DbId, Range>,
    original: BTreeMap<DbId, Range>,
}

impl StructureTree {
    /// An empty structure: just the hidden root node.
    pub fn new(structure_id: DbId, root: DbId) -> Self {
        let root_range = Range {
            lft: 1,
            rgt: 2,
            level: 0,
        };
        Self {
            structure_id,
            root,
            max_levels: None,
            root_range,
            original_root_rgt: root_range.rgt,
            nodes: BTreeMap::new(),
            original: BTreeMap::new(),
        }
    }

    /// Build the arena from persisted rows.
    ///
    /// `rows` must include the root row (the one without an element).
    pub fn from_rows(
        structure_id: DbId,
        root: DbId,
        rows: impl IntoIterator<Item = StructureNode>,
    ) -> Result<Self, CoreError> {
        let mut tree = Self::new(structure_id, root);
        let mut saw_root = false;
        for row in rows {
            let range = Range {
                lft: row.lft,
                rgt: row.rgt,
                level: row.level,
            };
            match row.element_id {
                Some(element_id) => {
                    tree.nodes.insert(element_id, range);
                }
                None => {
                    tree.root_range = range;
                    saw_root = true;
                }
            }
        }
        if !saw_root && !tree.nodes.is_empty() {
            return Err(CoreError::StructuralInconsistency(format!(
                "structure {structure_id} has nodes but no root row"
            )));
        }
        tree.original = tree.nodes.clone();
        tree.original_root_rgt = tree.root_range.rgt;
        Ok(tree)
    }

    pub fn with_max_levels(mut self, max_levels: Option<i32>) -> Self {
        self.max_levels = max_levels;
        self
    }

    pub fn structure_id(&self) -> DbId {
        self.structure_id
    }

    pub fn root(&self) -> DbId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, element_id: DbId) -> bool {
        self.nodes.contains_key(&element_id)
    }

    pub fn position(&self, element_id: DbId) -> Option<StructurePosition> {
        self.nodes.get(&element_id).map(|r| StructurePosition {
            structure_id: self.structure_id,
            root: self.root,
            lft: r.lft,
            rgt: r.rgt,
            level: r.level,
        })
    }

    /// The element's parent, or `None` for top-level (or absent) elements.
    pub fn parent_of(&self, element_id: DbId) -> Option<DbId> {
        let node = self.nodes.get(&element_id)?;
        self.nodes
            .iter()
            .filter(|(_, r)| r.contains(node) && r.level == node.level - 1)
            .map(|(id, _)| *id)
            .next()
    }

    /// Direct children of `parent` (`None` for the root), in order.
    pub fn children_of(&self, parent: Option<DbId>) -> Vec<DbId> {
        let Some(parent_range) = self.range_of(parent) else {
            return Vec::new();
        };
        self.sorted_where(|r| parent_range.contains(r) && r.level == parent_range.level + 1)
    }

    /// All descendants of `element_id`, in tree order.
    pub fn descendants_of(&self, element_id: DbId) -> Vec<DbId> {
        let Some(range) = self.nodes.get(&element_id).copied() else {
            return Vec::new();
        };
        self.sorted_where(|r| range.contains(r))
    }

    /// Every element in tree order.
    pub fn ordered(&self) -> Vec<DbId> {
        self.sorted_where(|_| true)
    }

    fn sorted_where(&self, pred: impl Fn(&Range) -> bool) -> Vec<DbId> {
        let mut ids: Vec<(i32, DbId)> = self
            .nodes
            .iter()
            .filter(|(_, r)| pred(r))
            .map(|(id, r)| (r.lft, *id))
            .collect();
        ids.sort_unstable();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    fn range_of(&self, node: Option<DbId>) -> Option<Range> {
        match node {
            None => Some(self.root_range),
            Some(id) => self.nodes.get(&id).copied(),
        }
    }

    fn require(&self, element_id: DbId) -> Result<Range, CoreError> {
        self.nodes.get(&element_id).copied().ok_or_else(|| {
            CoreError::StructuralInconsistency(format!(
                "element {element_id} is not in structure {}",
                self.structure_id
            ))
        })
    }

    // ── Edits ─────────────────────────────────────────────────────────

    pub fn append_to_root(&mut self, element_id: DbId, mode: StructureMode) -> Result<bool, CoreError> {
        self.place(element_id, Placement::LastChildOf(None), mode)
    }

    pub fn prepend_to_root(&mut self, element_id: DbId, mode: StructureMode) -> Result<bool, CoreError> {
        self.place(element_id, Placement::FirstChildOf(None), mode)
    }

    pub fn append(&mut self, element_id: DbId, parent_id: DbId, mode: StructureMode) -> Result<bool, CoreError> {
        self.place(element_id, Placement::LastChildOf(Some(parent_id)), mode)
    }

    pub fn prepend(&mut self, element_id: DbId, parent_id: DbId, mode: StructureMode) -> Result<bool, CoreError> {
        self.place(element_id, Placement::FirstChildOf(Some(parent_id)), mode)
    }

    pub fn move_before(&mut self, element_id: DbId, next_id: DbId, mode: StructureMode) -> Result<bool, CoreError> {
        self.place(element_id, Placement::Before(next_id), mode)
    }

    pub fn move_after(&mut self, element_id: DbId, prev_id: DbId, mode: StructureMode) -> Result<bool, CoreError> {
        self.place(element_id, Placement::After(prev_id), mode)
    }

    /// Insert or move `element_id` (with its whole subtree) to `placement`.
    ///
    /// Returns `Ok(false)` when the mode says there is nothing to do.
    /// All checks run before the arena is touched, so a failed placement
    /// leaves the tree unchanged.
    pub fn place(
        &mut self,
        element_id: DbId,
        placement: Placement,
        mode: StructureMode,
    ) -> Result<bool, CoreError> {
        let existing = self.nodes.get(&element_id).copied();
        match (mode, existing) {
            (StructureMode::Insert, Some(_)) => return Ok(false),
            (StructureMode::Update, None) => {
                return Err(CoreError::StructuralInconsistency(format!(
                    "cannot move element {element_id}: not in structure {}",
                    self.structure_id
                )))
            }
            _ => {}
        }

        let reference = match placement {
            Placement::FirstChildOf(parent) | Placement::LastChildOf(parent) => parent,
            Placement::Before(id) | Placement::After(id) => Some(id),
        };
        if reference == Some(element_id) {
            return Err(CoreError::StructuralInconsistency(format!(
                "element {element_id} cannot be positioned relative to itself"
            )));
        }
        let reference_range = match reference {
            Some(id) => self.require(id)?,
            None => self.root_range,
        };
        if let Some(node) = existing {
            if node.contains(&reference_range) {
                return Err(CoreError::StructuralInconsistency(format!(
                    "element {element_id} cannot be moved into its own subtree"
                )));
            }
        }

        let new_level = match placement {
            Placement::FirstChildOf(_) | Placement::LastChildOf(_) => reference_range.level + 1,
            Placement::Before(_) | Placement::After(_) => reference_range.level,
        };
        if new_level < 1 {
            return Err(CoreError::StructuralInconsistency(
                "elements cannot be siblings of the structure root".to_string(),
            ));
        }

        // Subtree to move, with positions relative to its own lft/level.
        let subtree: Vec<(DbId, Range)> = match existing {
            Some(node) => self
                .nodes
                .iter()
                .filter(|(_, r)| r.lft >= node.lft && r.rgt <= node.rgt)
                .map(|(id, r)| {
                    (
                        *id,
                        Range {
                            lft: r.lft - node.lft,
                            rgt: r.rgt - node.lft,
                            level: r.level - node.level,
                        },
                    )
                })
                .collect(),
            None => vec![(
                element_id,
                Range {
                    lft: 0,
                    rgt: 1,
                    level: 0,
                },
            )],
        };

        if let Some(max_levels) = self.max_levels {
            let depth = subtree.iter().map(|(_, r)| r.level).max().unwrap_or(0);
            if new_level + depth > max_levels {
                return Err(CoreError::StructuralInconsistency(format!(
                    "structure {} allows at most {max_levels} levels",
                    self.structure_id
                )));
            }
        }

        // Detach the existing subtree and close its gap.
        let width = match existing {
            Some(node) => {
                for (id, _) in &subtree {
                    self.nodes.remove(id);
                }
                self.shift(node.rgt + 1, -node.width());
                node.width()
            }
            None => 2,
        };

        // The reference may have shifted while closing the gap.
        let reference_range = match reference {
            Some(id) => self.require(id)?,
            None => self.root_range,
        };
        let point = match placement {
            Placement::FirstChildOf(_) => reference_range.lft + 1,
            Placement::LastChildOf(_) => reference_range.rgt,
            Placement::Before(_) => reference_range.lft,
            Placement::After(_) => reference_range.rgt + 1,
        };

        self.shift(point, width);
        for (id, rel) in subtree {
            self.nodes.insert(
                id,
                Range {
                    lft: point + rel.lft,
                    rgt: point + rel.rgt,
                    level: new_level + rel.level,
                },
            );
        }
        Ok(true)
    }

    /// Remove a node. Its children move up one level and take its place,
    /// in order, so no subtree is orphaned.
    pub fn remove(&mut self, element_id: DbId) -> Result<(), CoreError> {
        self.require(element_id)?;
        for child in self.children_of(Some(element_id)) {
            self.place(child, Placement::Before(element_id), StructureMode::Update)?;
        }
        let node = self.require(element_id)?;
        self.nodes.remove(&element_id);
        self.shift(node.rgt + 1, -node.width());
        Ok(())
    }

    /// Shift every boundary at or beyond `from` by `delta`, root included.
    fn shift(&mut self, from: i32, delta: i32) {
        for range in self
            .nodes
            .values_mut()
            .chain(std::iter::once(&mut self.root_range))
        {
            if range.lft >= from {
                range.lft += delta;
            }
            if range.rgt >= from {
                range.rgt += delta;
            }
        }
    }

    // ── Persistence ───────────────────────────────────────────────────

    /// Rows that differ from what the arena was loaded with.
    pub fn changes(&self) -> StructureChanges {
        let upserts = self
            .nodes
            .iter()
            .filter(|(id, r)| self.original.get(id) != Some(r))
            .map(|(id, r)| StructureNode {
                element_id: Some(*id),
                lft: r.lft,
                rgt: r.rgt,
                level: r.level,
            })
            .collect();
        let removed = self
            .original
            .keys()
            .filter(|id| !self.nodes.contains_key(id))
            .copied()
            .collect();
        let root_rgt = (self.root_range.rgt != self.original_root_rgt).then_some(self.root_range.rgt);
        StructureChanges {
            upserts,
            removed,
            root_rgt,
        }
    }

    /// Accept the current state as persisted.
    pub fn mark_saved(&mut self) {
        self.original = self.nodes.clone();
        self.original_root_rgt = self.root_range.rgt;
    }

    /// Verify the nested-set invariants: contiguous distinct boundaries,
    /// `lft < rgt`, strict nesting, and levels matching depth.
    pub fn check_invariants(&self) -> Result<(), CoreError> {
        let fail = |msg: String| Err(CoreError::StructuralInconsistency(msg));

        if self.root_range.lft != 1 || self.root_range.level != 0 {
            return fail("root node must start at lft 1, level 0".to_string());
        }
        let expected_rgt = 2 + 2 * self.nodes.len() as i32;
        if self.root_range.rgt != expected_rgt {
            return fail(format!(
                "root rgt is {} but {} nodes require {expected_rgt}",
                self.root_range.rgt,
                self.nodes.len()
            ));
        }

        let mut boundaries: Vec<i32> = Vec::with_capacity(self.nodes.len() * 2);
        for (id, r) in &self.nodes {
            if r.lft >= r.rgt {
                return fail(format!("element {id} has lft {} >= rgt {}", r.lft, r.rgt));
            }
            boundaries.push(r.lft);
            boundaries.push(r.rgt);
        }
        boundaries.sort_unstable();
        for (i, b) in boundaries.iter().enumerate() {
            if *b != i as i32 + 2 {
                return fail(format!("boundaries are not contiguous near {b}"));
            }
        }

        let mut ordered: Vec<(DbId, Range)> = self.nodes.iter().map(|(id, r)| (*id, *r)).collect();
        ordered.sort_unstable_by_key(|(_, r)| r.lft);
        let mut stack: Vec<Range> = vec![self.root_range];
        for (id, r) in ordered {
            while stack.last().is_some_and(|top| top.rgt < r.lft) {
                stack.pop();
            }
            let Some(parent) = stack.last() else {
                return fail(format!("element {id} lies outside the root"));
            };
            if !parent.contains(&r) {
                return fail(format!("element {id} partially overlaps its parent"));
            }
            if r.level != parent.level + 1 {
                return fail(format!(
                    "element {id} has level {} under a parent at level {}",
                    r.level, parent.level
                ));
            }
            stack.push(r);
        }
        Ok(())
    }
}
