use vellum_core::element::{Element, ValidationScenario};
use vellum_core::element_type::ElementType;
use vellum_core::query::TrashFilter;
use vellum_core::structure::{Placement, StructureMode};
use vellum_core::types::DbId;
use vellum_db::{OwnedFilter, StoreTx};
use vellum_events::{ElementEvent, EventKind, HookDecision};

use super::{saved_id, ElementService};
use crate::error::ElementError;
use crate::unit_of_work::UnitOfWork;

impl ElementService {
    /// Bring trashed elements back.
    ///
    /// Every site row of every element is validated with the essentials
    /// rules first; if any fails, its errors are attached to that element,
    /// nothing is restored and `Ok(false)` is returned. Owned elements
    /// trashed with their owner, and drafts and revisions trashed in the
    /// same delete, come back too. Restored elements rejoin their structure
    /// at the end of the root level.
    pub async fn restore(
        &self,
        uow: &mut UnitOfWork,
        elements: &mut [Element],
    ) -> Result<bool, ElementError> {
        for element in elements.iter() {
            if let HookDecision::Veto(reason) = self.hooks.before_restore(element).await {
                tracing::info!(element_id = ?element.id, reason = %reason, "Element restore vetoed");
                return Ok(false);
            }
        }

        let mut tx = self.store.begin().await?;
        let mut instances = Vec::new();
        for element in elements.iter_mut() {
            match self.restore_in_tx(tx.as_mut(), element).await {
                Ok(Some(rows)) => instances.extend(rows),
                Ok(None) => {
                    self.rollback(tx).await;
                    return Ok(false);
                }
                Err(e) => {
                    self.rollback(tx).await;
                    return Err(e);
                }
            }
        }
        tx.commit().await?;

        self.after_write(uow, &instances).await;
        for element in elements.iter() {
            tracing::info!(element_id = ?element.id, type_tag = %element.type_tag, "Element restored");
            self.publish(uow, ElementEvent::for_element(EventKind::Restored, element));
            self.hooks.after_restore(element).await;
        }
        Ok(true)
    }

    /// Restore one element. Returns its restored site instances, or `None`
    /// when a site row failed validation.
    async fn restore_in_tx(
        &self,
        tx: &mut dyn StoreTx,
        element: &mut Element,
    ) -> Result<Option<Vec<Element>>, ElementError> {
        let element_type = self.element_type(element)?;
        let id = saved_id(element)?;
        element.clear_errors();

        let mut rows = Vec::new();
        for site in self.supported_sites(element_type.as_ref(), element)? {
            let Some(row) = tx.find_element(id, site.site_id, TrashFilter::Include).await? else {
                continue;
            };
            let errors = self
                .validate(tx, element_type.as_ref(), &row, ValidationScenario::Essentials)
                .await?;
            if !errors.is_empty() {
                tracing::debug!(element_id = id, site_id = site.site_id, errors = %errors, "Trashed element failed validation");
                element.set_errors(errors);
                return Ok(None);
            }
            rows.push(row);
        }

        let deleted_at = rows.iter().find_map(|r| r.date_deleted).or(element.date_deleted);
        if !tx.restore(id).await? {
            return Err(ElementError::NotFound {
                entity: "Element",
                id,
            });
        }

        for owned_id in tx.owned_element_ids(id, OwnedFilter::DeletedWithOwner).await? {
            tx.restore(owned_id).await?;
        }
        if let Some(deleted_at) = deleted_at {
            for derivative_id in tx.derivative_ids(id).await? {
                let trashed_with = tx
                    .find_element(derivative_id, element.site_id, TrashFilter::Only)
                    .await?
                    .is_some_and(|d| d.date_deleted == Some(deleted_at));
                if trashed_with {
                    tx.restore(derivative_id).await?;
                }
            }
        }

        self.rejoin_structure(tx, element_type.as_ref(), element, id).await?;
        element.date_deleted = None;
        element.deleted_with_owner = false;
        for row in &mut rows {
            row.date_deleted = None;
            row.deleted_with_owner = false;
            row.position = element.position;
        }
        Ok(Some(rows))
    }

    async fn rejoin_structure(
        &self,
        tx: &mut dyn StoreTx,
        element_type: &dyn ElementType,
        element: &mut Element,
        id: DbId,
    ) -> Result<(), ElementError> {
        if !element.is_canonical() {
            return Ok(());
        }
        let Some(settings) = element_type.structure(element) else {
            return Ok(());
        };
        let mut tree = tx
            .load_structure(settings.structure_id, settings.max_levels)
            .await?;
        if tree.place(id, Placement::LastChildOf(None), StructureMode::Insert)? {
            tx.save_structure(&mut tree).await?;
        }
        element.position = tree.position(id);
        Ok(())
    }
}
