use serde_json::json;
use vellum_core::element::{Element, ValidationScenario};
use vellum_core::element_type::ElementType;
use vellum_core::query::TrashFilter;
use vellum_core::types::DbId;
use vellum_db::{OwnedFilter, StoreTx};
use vellum_events::{ElementEvent, EventKind};

use super::duplicate::{Derivative, DuplicateOverrides, Duplicated};
use super::{saved_id, ElementService};
use crate::error::ElementError;
use crate::unit_of_work::UnitOfWork;

impl ElementService {
    /// Create a draft of a canonical element.
    ///
    /// The draft is a duplicate that points back at its canonical element;
    /// it keeps its own owned elements and never joins a structure.
    pub async fn create_draft(
        &self,
        uow: &mut UnitOfWork,
        canonical: &Element,
        name: &str,
    ) -> Result<Element, ElementError> {
        let canonical_id = self.require_canonical(canonical)?;
        let mut tx = self.store.begin().await?;
        let result = async {
            let draft_id = tx.create_draft(canonical_id, uow.actor_id, name).await?;
            let overrides = DuplicateOverrides::new().as_derivative(Derivative::Draft {
                draft_id,
                canonical_id,
            });
            self.duplicate_in_tx(tx.as_mut(), uow, canonical.clone(), overrides)
                .await
                .map(|duplicated| (draft_id, duplicated))
        }
        .await;
        let (draft_id, duplicated) = match result {
            Ok(created) => created,
            Err(e) => {
                self.rollback(tx).await;
                return Err(e);
            }
        };
        tx.commit().await?;

        let element = self
            .derivative_created(uow, duplicated, json!({ "draft_id": draft_id, "canonical_id": canonical_id }))
            .await;
        tracing::info!(element_id = ?element.id, canonical_id, draft_id, "Draft created");
        Ok(element)
    }

    /// Snapshot a canonical element as its next revision.
    pub async fn create_revision(
        &self,
        uow: &mut UnitOfWork,
        canonical: &Element,
        notes: Option<&str>,
    ) -> Result<Element, ElementError> {
        let canonical_id = self.require_canonical(canonical)?;
        let mut tx = self.store.begin().await?;
        let result = async {
            let (revision_id, num) = tx.create_revision(canonical_id, uow.actor_id, notes).await?;
            let overrides = DuplicateOverrides::new().as_derivative(Derivative::Revision {
                revision_id,
                canonical_id,
            });
            self.duplicate_in_tx(tx.as_mut(), uow, canonical.clone(), overrides)
                .await
                .map(|duplicated| (revision_id, num, duplicated))
        }
        .await;
        let (revision_id, num, duplicated) = match result {
            Ok(created) => created,
            Err(e) => {
                self.rollback(tx).await;
                return Err(e);
            }
        };
        tx.commit().await?;

        let element = self
            .derivative_created(
                uow,
                duplicated,
                json!({ "revision_id": revision_id, "canonical_id": canonical_id, "num": num }),
            )
            .await;
        tracing::info!(element_id = ?element.id, canonical_id, revision_id, num, "Revision created");
        Ok(element)
    }

    /// Merge a draft into its canonical element and delete the draft.
    ///
    /// Every site row of the draft overwrites the matching canonical row,
    /// and the draft's owned elements replace the canonical element's.
    /// Returns the updated canonical element in the draft's site.
    pub async fn apply_draft(
        &self,
        uow: &mut UnitOfWork,
        draft: &Element,
    ) -> Result<Element, ElementError> {
        let draft_element_id = saved_id(draft)?;
        let canonical_id = match (draft.draft_id, draft.canonical_id) {
            (Some(_), Some(canonical_id)) => canonical_id,
            _ => {
                return Err(ElementError::StructuralInconsistency(format!(
                    "element {draft_element_id} is not a draft"
                )))
            }
        };
        let element_type = self.element_type(draft)?;

        let mut tx = self.store.begin().await?;
        let instances = match self
            .apply_draft_in_tx(tx.as_mut(), uow, element_type.as_ref(), draft, draft_element_id, canonical_id)
            .await
        {
            Ok(instances) => instances,
            Err(e) => {
                self.rollback(tx).await;
                return Err(e);
            }
        };
        tx.commit().await?;

        if let Err(e) = self.search.delete_element(draft_element_id).await {
            tracing::error!(error = %e, element_id = draft_element_id, "Failed to drop draft search keywords");
        }
        uow.placeholders.remove(canonical_id, draft.site_id);
        self.after_write(uow, &instances).await;

        let mut canonical = instances
            .iter()
            .find(|i| i.site_id == draft.site_id)
            .cloned()
            .ok_or(ElementError::NotFound {
                entity: "Element",
                id: canonical_id,
            })?;
        canonical.mark_as_clean();

        tracing::info!(element_id = canonical_id, draft_element_id, "Draft applied");
        self.publish(
            uow,
            ElementEvent::for_element(EventKind::Saved, &canonical)
                .with_payload(json!({ "is_new": false, "applied_draft_id": draft_element_id })),
        );
        self.hooks.after_save(&canonical, false).await;
        Ok(canonical)
    }

    async fn apply_draft_in_tx(
        &self,
        tx: &mut dyn StoreTx,
        uow: &UnitOfWork,
        element_type: &dyn ElementType,
        draft: &Element,
        draft_element_id: DbId,
        canonical_id: DbId,
    ) -> Result<Vec<Element>, ElementError> {
        let mut canonical = tx
            .find_element(canonical_id, draft.site_id, TrashFilter::Exclude)
            .await?
            .ok_or(ElementError::NotFound {
                entity: "Element",
                id: canonical_id,
            })?;
        canonical.set_enabled(draft.enabled());
        tx.update_element(&mut canonical, true).await?;

        let mut instances = Vec::new();
        for site in self.supported_sites(element_type, &canonical)? {
            let Some(draft_row) = tx
                .find_element(draft_element_id, site.site_id, TrashFilter::Exclude)
                .await?
            else {
                continue;
            };
            let existing = tx
                .find_element(canonical_id, site.site_id, TrashFilter::Include)
                .await?;
            let is_new_site = existing.is_none();
            let mut row = existing.unwrap_or_else(|| canonical.clone_for_site(site.site_id));
            row.set_enabled(canonical.enabled());
            row.date_updated = canonical.date_updated;
            row.set_title(draft_row.title().map(str::to_string));
            row.set_slug(draft_row.slug().map(str::to_string));
            row.set_uri(draft_row.uri().map(str::to_string));
            row.set_enabled_for_site(draft_row.enabled_for_site());
            row.set_field_values(draft_row.field_values().clone());

            let errors = self
                .validate(tx, element_type, &row, ValidationScenario::Essentials)
                .await?;
            if !errors.is_empty() {
                return Err(ElementError::ValidationFailed {
                    element_id: Some(canonical_id),
                    errors,
                });
            }
            tx.upsert_site_row(&mut row).await?;
            if !is_new_site && self.tracks_changes(element_type, &row) {
                let changes = self.change_records(uow, &row, false);
                if !changes.is_empty() {
                    tx.record_changes(&changes).await?;
                }
            }
            instances.push(row);
        }

        for owned_id in tx.owned_element_ids(canonical_id, OwnedFilter::Live).await? {
            tx.hard_delete(owned_id).await?;
        }
        for owned_id in tx.owned_element_ids(draft_element_id, OwnedFilter::Live).await? {
            let Some(mut owned) = tx
                .find_element(owned_id, draft.site_id, TrashFilter::Exclude)
                .await?
            else {
                continue;
            };
            owned.owner_id = Some(canonical_id);
            tx.update_element(&mut owned, false).await?;
        }
        tx.hard_delete(draft_element_id).await?;
        Ok(instances)
    }

    fn require_canonical(&self, element: &Element) -> Result<DbId, ElementError> {
        let id = saved_id(element)?;
        if !element.is_canonical() {
            return Err(ElementError::StructuralInconsistency(format!(
                "element {id} is already a draft or revision"
            )));
        }
        Ok(id)
    }

    /// Post-commit work shared by new drafts and revisions.
    async fn derivative_created(
        &self,
        uow: &mut UnitOfWork,
        duplicated: Duplicated,
        payload: serde_json::Value,
    ) -> Element {
        let Duplicated {
            mut element,
            instances,
        } = duplicated;
        self.after_write(uow, &instances).await;
        element.mark_as_clean();
        self.publish(
            uow,
            ElementEvent::for_element(EventKind::Saved, &element)
                .with_payload(json!({ "is_new": true, "derivative": payload })),
        );
        element
    }
}
