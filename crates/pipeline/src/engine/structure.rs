use vellum_core::element::Element;
use vellum_core::element_type::ElementType;
use vellum_core::structure::{Placement, StructureMode};
use vellum_core::types::DbId;
use vellum_db::StoreTx;

use super::{saved_id, ElementService};
use crate::error::ElementError;
use crate::unit_of_work::UnitOfWork;

impl ElementService {
    /// Move `element` (with its subtree) within its type's structure.
    ///
    /// Returns `Ok(false)` when `mode` leaves nothing to do, e.g. an
    /// `Insert` for an element that already has a slot.
    pub async fn move_element(
        &self,
        uow: &mut UnitOfWork,
        element: &mut Element,
        placement: Placement,
        mode: StructureMode,
    ) -> Result<bool, ElementError> {
        let element_type = self.element_type(element)?;
        let id = saved_id(element)?;
        if !element.is_canonical() {
            return Err(ElementError::StructuralInconsistency(
                "drafts and revisions cannot be placed in a structure".to_string(),
            ));
        }
        let settings = element_type.structure(element).ok_or_else(|| {
            ElementError::StructuralInconsistency(format!(
                "element type '{}' has no structure",
                element.type_tag
            ))
        })?;

        let mut tx = self.store.begin().await?;
        let mut tree = match tx.load_structure(settings.structure_id, settings.max_levels).await {
            Ok(tree) => tree,
            Err(e) => {
                self.rollback(tx).await;
                return Err(e.into());
            }
        };
        let moved = match tree.place(id, placement, mode) {
            Ok(moved) => moved,
            Err(e) => {
                self.rollback(tx).await;
                return Err(e.into());
            }
        };
        if moved {
            if let Err(e) = tx.save_structure(&mut tree).await {
                self.rollback(tx).await;
                return Err(e.into());
            }
        }
        tx.commit().await?;
        element.position = tree.position(id);

        if moved {
            self.begin_tags(uow);
            self.collect_tags(uow, element_type.as_ref(), element);
            self.flush_tags(uow).await;
            tracing::debug!(
                element_id = id,
                structure_id = settings.structure_id,
                ?placement,
                "Element moved"
            );
        }
        Ok(moved)
    }

    /// Give a saved element its structure slot.
    ///
    /// A requested parent moves the element under it; an element without a
    /// position is appended to the root. Drafts and revisions are never
    /// placed.
    pub(crate) async fn place_in_structure(
        &self,
        tx: &mut dyn StoreTx,
        element_type: &dyn ElementType,
        element: &mut Element,
    ) -> Result<(), ElementError> {
        if !element.is_canonical() {
            return Ok(());
        }
        let Some(settings) = element_type.structure(element) else {
            return Ok(());
        };
        let id = saved_id(element)?;
        let mut tree = tx
            .load_structure(settings.structure_id, settings.max_levels)
            .await?;

        let placed = match element.new_parent_id {
            Some(parent_id) if tree.contains(id) && tree.parent_of(id) == Some(parent_id) => false,
            Some(parent_id) => tree.place(id, Placement::LastChildOf(Some(parent_id)), StructureMode::Auto)?,
            None => tree.place(id, Placement::LastChildOf(None), StructureMode::Insert)?,
        };
        if placed {
            tx.save_structure(&mut tree).await?;
        }
        element.position = tree.position(id);
        element.new_parent_id = None;
        Ok(())
    }

    /// Slot a fresh duplicate right after its source, or under the
    /// requested parent.
    pub(crate) async fn place_duplicate(
        &self,
        tx: &mut dyn StoreTx,
        element_type: &dyn ElementType,
        source_id: DbId,
        clone: &mut Element,
    ) -> Result<(), ElementError> {
        if !clone.is_canonical() {
            return Ok(());
        }
        let Some(settings) = element_type.structure(clone) else {
            return Ok(());
        };
        let id = saved_id(clone)?;
        let mut tree = tx
            .load_structure(settings.structure_id, settings.max_levels)
            .await?;
        let (placement, mode) = match clone.new_parent_id {
            Some(parent_id) => (Placement::LastChildOf(Some(parent_id)), StructureMode::Auto),
            None if tree.contains(source_id) => (Placement::After(source_id), StructureMode::Insert),
            None => return Ok(()),
        };
        if tree.place(id, placement, mode)? {
            tx.save_structure(&mut tree).await?;
        }
        clone.position = tree.position(id);
        clone.new_parent_id = None;
        Ok(())
    }

    /// Take `element_id` out of its structure. Children move up a level
    /// into its slot.
    pub(crate) async fn remove_from_structure(
        &self,
        tx: &mut dyn StoreTx,
        element_type: &dyn ElementType,
        element: &Element,
        element_id: DbId,
    ) -> Result<(), ElementError> {
        let structure_id = element
            .structure_id()
            .or_else(|| element_type.structure(element).map(|s| s.structure_id));
        let Some(structure_id) = structure_id else {
            return Ok(());
        };
        let mut tree = tx.load_structure(structure_id, None).await?;
        if !tree.contains(element_id) {
            return Ok(());
        }
        let children = tree.children_of(Some(element_id)).len();
        tree.remove(element_id)?;
        tx.save_structure(&mut tree).await?;
        tracing::debug!(
            element_id,
            structure_id,
            children,
            "Removed element from structure"
        );
        Ok(())
    }
}
