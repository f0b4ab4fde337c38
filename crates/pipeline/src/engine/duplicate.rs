use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::json;
use vellum_core::element::{ContentMap, Element, FieldErrors, ValidationScenario, ATTR_URI};
use vellum_core::element_type::ElementType;
use vellum_core::query::{ElementQuery, TrashFilter};
use vellum_core::types::{DbId, SiteId};
use vellum_db::StoreTx;
use vellum_events::{ElementEvent, EventKind};

use super::{saved_id, ElementService};
use crate::error::ElementError;
use crate::unit_of_work::UnitOfWork;

type DuplicateFuture<'a> = Pin<Box<dyn Future<Output = Result<Duplicated, ElementError>> + Send + 'a>>;

/// Which derivative a duplicate becomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Derivative {
    Draft { draft_id: DbId, canonical_id: DbId },
    Revision { revision_id: DbId, canonical_id: DbId },
}

/// Attribute overrides applied to a duplicate.
#[derive(Debug, Clone, Default)]
pub struct DuplicateOverrides {
    /// Title for the duplicate in the source element's site.
    pub title: Option<String>,
    /// Slug for the duplicate in the source element's site.
    pub slug: Option<String>,
    pub enabled: Option<bool>,
    pub owner_id: Option<DbId>,
    /// Place the duplicate under this parent instead of after its source.
    pub new_parent_id: Option<DbId>,
    /// Field values for the duplicate in the source element's site.
    pub fields: ContentMap,
    pub(crate) derivative: Option<Derivative>,
}

impl DuplicateOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn owned_by(mut self, owner_id: DbId) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn under_parent(mut self, parent_id: DbId) -> Self {
        self.new_parent_id = Some(parent_id);
        self
    }

    pub fn with_field(mut self, handle: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(handle.into(), value);
        self
    }

    pub(crate) fn as_derivative(mut self, derivative: Derivative) -> Self {
        self.derivative = Some(derivative);
        self
    }

    /// Overrides that hold in every site.
    fn apply_shared(&self, clone: &mut Element) {
        if let Some(enabled) = self.enabled {
            clone.set_enabled(enabled);
        }
        if let Some(owner_id) = self.owner_id {
            clone.owner_id = Some(owner_id);
        }
        match self.derivative {
            Some(Derivative::Draft {
                draft_id,
                canonical_id,
            }) => {
                clone.draft_id = Some(draft_id);
                clone.canonical_id = Some(canonical_id);
            }
            Some(Derivative::Revision {
                revision_id,
                canonical_id,
            }) => {
                clone.revision_id = Some(revision_id);
                clone.canonical_id = Some(canonical_id);
            }
            None => {}
        }
    }

    /// Overrides for the source element's own site.
    fn apply_main(&self, clone: &mut Element) {
        self.apply_shared(clone);
        if let Some(title) = &self.title {
            clone.set_title(Some(title.clone()));
        }
        if let Some(slug) = &self.slug {
            clone.set_slug(Some(slug.clone()));
        }
        clone.new_parent_id = self.new_parent_id;
        clone.set_field_values(self.fields.clone());
    }
}

/// A duplicate and every site row written for it and its owned elements.
pub(crate) struct Duplicated {
    pub element: Element,
    pub instances: Vec<Element>,
}

/// Seed a duplicate from `source`: new identity, no derivative links.
fn fresh_clone(source: &Element, source_id: DbId) -> Element {
    let mut clone = source.clone_as_new();
    clone.draft_id = None;
    clone.revision_id = None;
    clone.canonical_id = None;
    clone.duplicate_of = Some(source_id);
    clone.scenario = ValidationScenario::Essentials;
    clone
}

impl ElementService {
    /// Duplicate `source` into a new element.
    ///
    /// The duplicate is validated with the essentials rules; if only its
    /// URI clashes it is saved disabled instead. It is placed right after
    /// its source in the structure (or under `new_parent_id`), copied into
    /// every other site the source exists in with that site's own content,
    /// and its owned elements are duplicated along with it.
    pub async fn duplicate(
        &self,
        uow: &mut UnitOfWork,
        source: &Element,
        overrides: DuplicateOverrides,
    ) -> Result<Element, ElementError> {
        let source_id = saved_id(source)?;
        let mut tx = self.store.begin().await?;
        let duplicated = match self
            .duplicate_in_tx(tx.as_mut(), uow, source.clone(), overrides)
            .await
        {
            Ok(duplicated) => duplicated,
            Err(e) => {
                self.rollback(tx).await;
                return Err(e);
            }
        };
        tx.commit().await?;

        let Duplicated {
            mut element,
            instances,
        } = duplicated;
        self.after_write(uow, &instances).await;
        element.mark_as_clean();

        tracing::info!(
            element_id = ?element.id,
            source_id,
            type_tag = %element.type_tag,
            sites = instances.iter().filter(|i| i.id == element.id).count(),
            "Element duplicated"
        );
        self.publish(
            uow,
            ElementEvent::for_element(EventKind::Duplicated, &element)
                .with_payload(json!({ "source_id": source_id })),
        );
        Ok(element)
    }

    /// Cache tags and search index for rows written in a committed
    /// transaction, grouped by their element type.
    pub(crate) async fn after_write(&self, uow: &mut UnitOfWork, instances: &[Element]) {
        self.begin_tags(uow);
        for instance in instances {
            if let Some(element_type) = self.types.get(&instance.type_tag) {
                self.collect_tags(uow, element_type.as_ref(), instance);
            }
        }
        self.flush_tags(uow).await;

        for instance in instances.iter().filter(|i| i.is_canonical()) {
            if let Some(element_type) = self.types.get(&instance.type_tag) {
                self.update_search_index(uow, element_type.as_ref(), &[instance])
                    .await;
            }
        }
    }

    pub(crate) fn duplicate_in_tx<'a>(
        &'a self,
        tx: &'a mut dyn StoreTx,
        uow: &'a UnitOfWork,
        source: Element,
        overrides: DuplicateOverrides,
    ) -> DuplicateFuture<'a> {
        Box::pin(async move {
            let element_type = self.element_type(&source)?;
            let source_id = saved_id(&source)?;

            let mut clone = fresh_clone(&source, source_id);
            overrides.apply_main(&mut clone);
            let supported = self.supported_sites(element_type.as_ref(), &clone)?;
            self.check_duplicate(tx, element_type.as_ref(), &mut clone, false)
                .await?;

            tx.insert_element(&mut clone).await?;
            tx.upsert_site_row(&mut clone).await?;
            let new_id = saved_id(&clone)?;
            self.place_duplicate(tx, element_type.as_ref(), source_id, &mut clone)
                .await?;

            // Owned elements duplicated from one site carry their own rows
            // into every site they exist in, so a later site that shares
            // them must not duplicate them again.
            let mut copied: BTreeMap<DbId, DbId> = BTreeMap::new();
            let mut instances = Vec::new();
            self.duplicate_owned(tx, uow, source_id, clone.site_id, new_id, &mut copied, &mut instances)
                .await?;

            clone.new_site_ids.clear();
            let mut site_rows = Vec::new();
            if element_type.is_localized() {
                for site in supported.iter().filter(|s| s.site_id != clone.site_id) {
                    let Some(source_in_site) = tx
                        .find_element(source_id, site.site_id, TrashFilter::Exclude)
                        .await?
                    else {
                        continue;
                    };
                    let mut site_clone = fresh_clone(&source_in_site, source_id);
                    site_clone.id = clone.id;
                    site_clone.uid = clone.uid;
                    site_clone.date_created = clone.date_created;
                    site_clone.date_updated = clone.date_updated;
                    site_clone.position = clone.position;
                    site_clone.set_enabled(clone.enabled());
                    overrides.apply_shared(&mut site_clone);
                    site_clone.propagating = true;
                    self.check_duplicate(tx, element_type.as_ref(), &mut site_clone, true)
                        .await?;
                    tx.upsert_site_row(&mut site_clone).await?;
                    clone.new_site_ids.push(site.site_id);
                    site_rows.push(site_clone);

                    self.duplicate_owned(tx, uow, source_id, site.site_id, new_id, &mut copied, &mut instances)
                        .await?;
                }
            }

            let mut all = Vec::with_capacity(instances.len() + site_rows.len() + 1);
            all.push(clone.clone());
            all.extend(site_rows);
            all.extend(instances);
            Ok(Duplicated {
                element: clone,
                instances: all,
            })
        })
    }

    /// Essentials validation for a duplicate. A duplicate whose only
    /// problem is its URI is disabled (per site for site rows) and checked
    /// again.
    async fn check_duplicate(
        &self,
        tx: &mut dyn StoreTx,
        element_type: &dyn ElementType,
        clone: &mut Element,
        site_row: bool,
    ) -> Result<(), ElementError> {
        let mut errors: FieldErrors = self
            .validate(tx, element_type, clone, ValidationScenario::Essentials)
            .await?;
        if errors.only(ATTR_URI) {
            if site_row {
                clone.set_enabled_for_site(false);
            } else {
                clone.set_enabled(false);
            }
            errors = self
                .validate(tx, element_type, clone, ValidationScenario::Essentials)
                .await?;
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ElementError::ValidationFailed {
                element_id: None,
                errors,
            })
        }
    }

    /// Duplicate the live elements `owner_id` owns in `site_id` onto
    /// `new_owner_id`, skipping any already duplicated from another site.
    #[allow(clippy::too_many_arguments)]
    async fn duplicate_owned(
        &self,
        tx: &mut dyn StoreTx,
        uow: &UnitOfWork,
        owner_id: DbId,
        site_id: SiteId,
        new_owner_id: DbId,
        copied: &mut BTreeMap<DbId, DbId>,
        instances: &mut Vec<Element>,
    ) -> Result<(), ElementError> {
        let owned = tx
            .query(&ElementQuery::new(site_id).owned_by(owner_id))
            .await?;
        for child in owned {
            let child_id = saved_id(&child)?;
            if copied.contains_key(&child_id) {
                continue;
            }
            let duplicated = self
                .duplicate_in_tx(&mut *tx, uow, child, DuplicateOverrides::new().owned_by(new_owner_id))
                .await?;
            copied.insert(child_id, saved_id(&duplicated.element)?);
            instances.extend(duplicated.instances);
        }
        Ok(())
    }
}
