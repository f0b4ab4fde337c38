use chrono::Utc;
use serde_json::json;
use vellum_core::cache_tags::invalidate_element;
use vellum_core::element::Element;
use vellum_core::element_type::ElementType;
use vellum_core::query::TrashFilter;
use vellum_core::types::{DbId, SiteId};
use vellum_db::{OwnedFilter, StoreTx};
use vellum_events::{ElementEvent, EventKind, HookDecision};

use super::{saved_id, ElementService};
use crate::error::ElementError;
use crate::unit_of_work::UnitOfWork;

impl ElementService {
    /// Delete `element`.
    ///
    /// A soft delete moves the element, its owned elements and its drafts
    /// and revisions to the trash with one timestamp so that a restore can
    /// bring back exactly that set. A hard delete removes all of it for
    /// good. Either way the element leaves its structure first, its
    /// children moving up a level.
    ///
    /// Returns `Ok(false)` when a hook vetoes the delete.
    pub async fn delete(
        &self,
        uow: &mut UnitOfWork,
        element: &Element,
        hard: bool,
    ) -> Result<bool, ElementError> {
        let element_type = self.element_type(element)?;
        let id = saved_id(element)?;

        if let HookDecision::Veto(reason) = self.hooks.before_delete(element, hard).await {
            tracing::info!(element_id = id, reason = %reason, "Element delete vetoed");
            return Ok(false);
        }

        // Readers must not see the element once the delete starts.
        invalidate_element(
            self.cache.as_ref(),
            element,
            &element_type.extra_cache_tags(element),
        )
        .await;

        let mut tx = self.store.begin().await?;
        let (removed, cascaded) = match self
            .delete_in_tx(tx.as_mut(), element_type.as_ref(), element, id, hard)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                self.rollback(tx).await;
                return Err(e);
            }
        };
        tx.commit().await?;

        for owned in &cascaded {
            let extra = self
                .types
                .get(&owned.type_tag)
                .map(|t| t.extra_cache_tags(owned))
                .unwrap_or_default();
            invalidate_element(self.cache.as_ref(), owned, &extra).await;
        }

        if hard {
            for removed_id in &removed {
                if let Err(e) = self.search.delete_element(*removed_id).await {
                    tracing::error!(error = %e, element_id = removed_id, "Failed to drop search keywords");
                }
            }
        }
        uow.placeholders.remove(id, element.site_id);

        tracing::info!(
            element_id = id,
            type_tag = %element.type_tag,
            hard,
            cascaded = removed.len().saturating_sub(1),
            "Element deleted"
        );
        self.publish(
            uow,
            ElementEvent::for_element(EventKind::Deleted, element).with_payload(json!({ "hard": hard })),
        );
        self.hooks.after_delete(element, hard).await;
        Ok(true)
    }

    /// Returns the ids of every element the delete removed or trashed,
    /// and the owned elements it took along as loaded in the element's
    /// site. Drafts and revisions carry no cache tags and are not loaded.
    async fn delete_in_tx(
        &self,
        tx: &mut dyn StoreTx,
        element_type: &dyn ElementType,
        element: &Element,
        id: DbId,
        hard: bool,
    ) -> Result<(Vec<DbId>, Vec<Element>), ElementError> {
        self.remove_from_structure(tx, element_type, element, id).await?;

        let owned = tx.owned_element_ids(id, OwnedFilter::Live).await?;
        let derivatives = tx.derivative_ids(id).await?;
        let cascaded = owned_elements(tx, owned.clone(), element.site_id, hard).await?;
        let mut affected = Vec::with_capacity(owned.len() + derivatives.len() + 1);
        affected.push(id);

        if hard {
            if !tx.hard_delete(id).await? {
                return Err(ElementError::NotFound {
                    entity: "Element",
                    id,
                });
            }
            affected.extend(owned);
            affected.extend(derivatives);
            return Ok((affected, cascaded));
        }

        let deleted_at = Utc::now();
        if !tx.soft_delete(id, deleted_at, false).await? {
            return Err(ElementError::NotFound {
                entity: "Element",
                id,
            });
        }
        for owned_id in owned {
            if tx.soft_delete(owned_id, deleted_at, true).await? {
                affected.push(owned_id);
            }
        }
        for derivative_id in derivatives {
            if tx.soft_delete(derivative_id, deleted_at, false).await? {
                affected.push(derivative_id);
            }
        }
        Ok((affected, cascaded))
    }
}

/// Load `owned_ids` in `site_id`, following their own owned elements when
/// `recursive`. Elements without a row in the site are left out.
async fn owned_elements(
    tx: &mut dyn StoreTx,
    owned_ids: Vec<DbId>,
    site_id: SiteId,
    recursive: bool,
) -> Result<Vec<Element>, ElementError> {
    let mut found = Vec::new();
    let mut pending = owned_ids;
    while let Some(owned_id) = pending.pop() {
        if recursive {
            pending.extend(tx.owned_element_ids(owned_id, OwnedFilter::Live).await?);
        }
        if let Some(owned) = tx.find_element(owned_id, site_id, TrashFilter::Include).await? {
            found.push(owned);
        }
    }
    Ok(found)
}
