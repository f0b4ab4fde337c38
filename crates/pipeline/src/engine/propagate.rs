use serde_json::json;
use vellum_core::element::{Element, ValidationScenario};
use vellum_core::element_type::{ElementType, SupportedSite};
use vellum_core::query::TrashFilter;
use vellum_core::types::SiteId;
use vellum_db::StoreTx;
use vellum_events::{ElementEvent, EventKind};

use super::{propagation_targets, saved_id, ElementService};
use crate::error::ElementError;
use crate::unit_of_work::UnitOfWork;

/// Whether `target` was updated more recently than `source`.
fn is_newer(target: &Element, source: &Element) -> bool {
    matches!(
        (source.site_date_updated, target.site_date_updated),
        (Some(source_date), Some(target_date)) if source_date < target_date
    )
}

impl ElementService {
    /// Propagate `element`'s current state into one other site, or into
    /// every other supported site when `target_site` is `None`.
    ///
    /// Sites without a row for the element get a full copy. Existing rows
    /// only receive the title and the dirty fields whose translation key
    /// matches. Returns `true` when any site row was written.
    pub async fn propagate(
        &self,
        uow: &mut UnitOfWork,
        element: &mut Element,
        target_site: Option<SiteId>,
    ) -> Result<bool, ElementError> {
        let element_type = self.element_type(element)?;
        let id = saved_id(element)?;
        let supported = self.supported_sites(element_type.as_ref(), element)?;
        let targets: Vec<SupportedSite> = match target_site {
            Some(site_id) if site_id == element.site_id => Vec::new(),
            Some(site_id) => vec![*supported
                .iter()
                .find(|s| s.site_id == site_id)
                .ok_or(ElementError::UnsupportedSite {
                    element_id: Some(id),
                    site_id,
                })?],
            None => propagation_targets(&supported, element.site_id),
        };

        element.new_site_ids.clear();
        let mut tx = self.store.begin().await?;
        let mut written = Vec::new();
        for target in targets {
            match self
                .propagate_to_site(tx.as_mut(), uow, element_type.as_ref(), element, target, false)
                .await
            {
                Ok(Some(site_element)) => written.push(site_element),
                Ok(None) => {}
                Err(e) => {
                    self.rollback(tx).await;
                    return Err(e);
                }
            }
        }
        tx.commit().await?;

        if written.is_empty() {
            return Ok(false);
        }
        self.begin_tags(uow);
        self.collect_tags(uow, element_type.as_ref(), element);
        self.flush_tags(uow).await;

        let changed: Vec<&Element> = written.iter().filter(|e| e.is_dirty()).collect();
        self.update_search_index(uow, element_type.as_ref(), &changed).await;

        let site_ids: Vec<SiteId> = written.iter().map(|e| e.site_id).collect();
        tracing::debug!(element_id = id, ?site_ids, "Element propagated");
        self.publish(
            uow,
            ElementEvent::for_element(EventKind::Propagated, element).with_payload(json!({
                "site_ids": site_ids,
                "new_site_ids": element.new_site_ids,
            })),
        );
        Ok(true)
    }

    /// Bring one target site's row in line with `source`.
    ///
    /// A missing row is created from a clone of the source, starting with
    /// the site's default enabled state. An existing row receives the
    /// title when both sites share a title translation key, and each dirty
    /// field whose translation key matches between the two sites; other
    /// localized content is never touched.
    ///
    /// While resaving in bulk, a target row updated more recently than the
    /// source is skipped when `skip_newer_site_updates` is on. Returns the
    /// written instance, or `None` when the site was skipped.
    pub(crate) async fn propagate_to_site(
        &self,
        tx: &mut dyn StoreTx,
        uow: &UnitOfWork,
        element_type: &dyn ElementType,
        source: &mut Element,
        target: SupportedSite,
        source_is_new: bool,
    ) -> Result<Option<Element>, ElementError> {
        let source_id = saved_id(source)?;
        let source_site = self.sites.require(source.site_id)?;
        let target_site = self.sites.require(target.site_id)?;

        let existing = tx
            .find_element(source_id, target.site_id, TrashFilter::Include)
            .await?;
        let is_new_site = existing.is_none();
        let mut site_element = match existing {
            Some(existing) => {
                if source.resaving && self.config.skip_newer_site_updates && is_newer(&existing, source) {
                    tracing::warn!(
                        element_id = source_id,
                        site_id = target.site_id,
                        "Skipping propagation into a site with newer changes"
                    );
                    return Ok(None);
                }
                let mut site_element = existing;
                if element_type.has_titles()
                    && element_type
                        .title_translation()
                        .shares_between(source_site, target_site)
                {
                    site_element.set_title(source.title().map(str::to_string));
                }
                if element_type.has_content() {
                    for field in element_type.field_layout(source) {
                        if !source.is_field_dirty(&field.handle)
                            || !field.translation.shares_between(source_site, target_site)
                        {
                            continue;
                        }
                        if let Some(value) = source.field_value(&field.handle) {
                            site_element.set_field_value(field.handle.clone(), value.clone());
                        }
                    }
                }
                site_element
            }
            None => {
                let mut clone = source.clone_for_site(target.site_id);
                clone.set_enabled_for_site(target.enabled_by_default);
                source.new_site_ids.push(target.site_id);
                clone
            }
        };

        site_element.propagating = true;
        site_element.scenario = ValidationScenario::Essentials;
        let errors = self
            .validate(tx, element_type, &site_element, ValidationScenario::Essentials)
            .await?;
        if !errors.is_empty() {
            return Err(ElementError::ValidationFailed {
                element_id: Some(source_id),
                errors,
            });
        }

        tx.upsert_site_row(&mut site_element).await?;
        if !source_is_new && !is_new_site && self.tracks_changes(element_type, &site_element) {
            let changes = self.change_records(uow, &site_element, true);
            if !changes.is_empty() {
                tx.record_changes(&changes).await?;
            }
        }

        tracing::debug!(
            element_id = source_id,
            site_id = target.site_id,
            new_site = is_new_site,
            "Propagated element to site"
        );
        Ok(Some(site_element))
    }
}
