use serde_json::json;
use vellum_core::element::Element;
use vellum_core::element_type::{ElementType, SupportedSite};
use vellum_core::types::SiteId;
use vellum_db::StoreTx;
use vellum_events::{ElementEvent, EventKind, HookDecision};

use super::{propagation_targets, saved_id, site_ids, ElementService};
use crate::error::ElementError;
use crate::unit_of_work::UnitOfWork;

/// Switches for a single save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    pub run_validation: bool,
    /// Replicate the change into the element's other supported sites.
    pub propagate: bool,
    pub update_search_index: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            run_validation: true,
            propagate: true,
            update_search_index: true,
        }
    }
}

impl SaveOptions {
    pub fn without_validation(mut self) -> Self {
        self.run_validation = false;
        self
    }

    pub fn without_propagation(mut self) -> Self {
        self.propagate = false;
        self
    }

    pub fn without_search_index(mut self) -> Self {
        self.update_search_index = false;
        self
    }
}

/// What a save attempt ended in, short of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SaveOutcome {
    Saved,
    /// Validation failed; the errors are on the element.
    Invalid,
    Vetoed(String),
}

impl ElementService {
    /// Save `element` into its site and, optionally, propagate it.
    ///
    /// Returns `Ok(false)` when validation fails (the field errors are
    /// attached to the element) or a hook vetoes the save. Either way
    /// nothing is written. Any error rolls the whole save back, including
    /// site rows already written for other sites, and leaves `element` as
    /// it was before the call.
    pub async fn save(
        &self,
        uow: &mut UnitOfWork,
        element: &mut Element,
        options: SaveOptions,
    ) -> Result<bool, ElementError> {
        Ok(self.save_element(uow, element, options).await? == SaveOutcome::Saved)
    }

    pub(crate) async fn save_element(
        &self,
        uow: &mut UnitOfWork,
        element: &mut Element,
        options: SaveOptions,
    ) -> Result<SaveOutcome, ElementError> {
        let element_type = self.element_type(element)?;
        let is_new = element.is_new();

        if let HookDecision::Veto(reason) = self.hooks.before_save(element, is_new).await {
            tracing::info!(element_id = ?element.id, reason = %reason, "Element save vetoed");
            return Ok(SaveOutcome::Vetoed(reason));
        }

        let supported = self.supported_sites(element_type.as_ref(), element)?;
        element.clear_errors();
        let before = element.clone();

        let mut tx = self.store.begin().await?;
        if options.run_validation {
            let scenario = element.scenario;
            let errors = match self
                .validate(tx.as_mut(), element_type.as_ref(), element, scenario)
                .await
            {
                Ok(errors) => errors,
                Err(e) => {
                    self.rollback(tx).await;
                    return Err(e);
                }
            };
            if !errors.is_empty() {
                self.rollback(tx).await;
                tracing::debug!(element_id = ?element.id, errors = %errors, "Element failed validation");
                element.set_errors(errors);
                return Ok(SaveOutcome::Invalid);
            }
        }

        let propagated = match self
            .write_element(tx.as_mut(), uow, element_type.as_ref(), element, &supported, options.propagate)
            .await
        {
            Ok(propagated) => propagated,
            Err(e) => {
                self.rollback(tx).await;
                *element = before;
                return Err(e);
            }
        };
        if let Err(e) = tx.commit().await {
            *element = before;
            return Err(e.into());
        }

        self.after_save(uow, element_type.as_ref(), element, propagated, is_new, options)
            .await;
        Ok(SaveOutcome::Saved)
    }

    /// Write the element row, its own site row, its structure position and
    /// change records, then propagate. Returns the other sites' instances
    /// that were written.
    pub(crate) async fn write_element(
        &self,
        tx: &mut dyn StoreTx,
        uow: &UnitOfWork,
        element_type: &dyn ElementType,
        element: &mut Element,
        supported: &[SupportedSite],
        propagate: bool,
    ) -> Result<Vec<Element>, ElementError> {
        let is_new = element.is_new();
        if is_new {
            tx.insert_element(element).await?;
        } else {
            // A propagation echo keeps the timestamp it was given.
            tx.update_element(element, !element.propagating).await?;
        }
        tx.upsert_site_row(element).await?;
        self.place_in_structure(tx, element_type, element).await?;

        if !is_new && self.tracks_changes(element_type, element) {
            let changes = self.change_records(uow, element, element.propagating);
            if !changes.is_empty() {
                tx.record_changes(&changes).await?;
            }
        }

        element.new_site_ids.clear();
        let mut propagated = Vec::new();
        if propagate && element_type.is_localized() {
            for target in propagation_targets(supported, element.site_id) {
                if let Some(site_element) = self
                    .propagate_to_site(tx, uow, element_type, element, target, is_new)
                    .await?
                {
                    propagated.push(site_element);
                }
            }
        }

        if !is_new && !element.propagating {
            self.prune_unsupported_sites(tx, element, supported).await?;
        }
        Ok(propagated)
    }

    /// Delete site rows for sites the element no longer supports.
    async fn prune_unsupported_sites(
        &self,
        tx: &mut dyn StoreTx,
        element: &Element,
        supported: &[SupportedSite],
    ) -> Result<(), ElementError> {
        let id = saved_id(element)?;
        let keep = site_ids(supported);
        let stale: Vec<SiteId> = tx
            .site_ids_for_element(id)
            .await?
            .into_iter()
            .filter(|site| !keep.contains(site))
            .collect();
        if !stale.is_empty() {
            let deleted = tx.delete_site_rows(id, &stale).await?;
            tracing::debug!(element_id = id, ?stale, deleted, "Removed unsupported site rows");
        }
        Ok(())
    }

    async fn after_save(
        &self,
        uow: &mut UnitOfWork,
        element_type: &dyn ElementType,
        element: &mut Element,
        mut propagated: Vec<Element>,
        is_new: bool,
        options: SaveOptions,
    ) {
        self.begin_tags(uow);
        self.collect_tags(uow, element_type, element);
        self.flush_tags(uow).await;

        let changed = is_new || element.is_dirty() || propagated.iter().any(Element::is_dirty);
        if options.update_search_index && changed && element.is_canonical() {
            let mut instances: Vec<&Element> = vec![&*element];
            instances.extend(propagated.iter());
            self.update_search_index(uow, element_type, &instances).await;
        }

        element.mark_as_clean();
        for site_element in &mut propagated {
            site_element.mark_as_clean();
        }

        tracing::info!(
            element_id = ?element.id,
            site_id = element.site_id,
            type_tag = %element.type_tag,
            is_new,
            propagated = propagated.len(),
            "Element saved"
        );
        self.publish(
            uow,
            ElementEvent::for_element(EventKind::Saved, element).with_payload(json!({
                "is_new": is_new,
                "new_site_ids": element.new_site_ids,
            })),
        );
        self.hooks.after_save(element, is_new).await;
    }
}
