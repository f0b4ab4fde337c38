//! Eager-load plan resolution.
//!
//! [`EagerLoader`] takes a set of already fetched elements and a list of
//! `with` paths, and attaches the related elements (or their counts) onto
//! each source. Every plan issues one target query per source group,
//! however many sources the group holds, and nested plans run once over the
//! unique targets of their parent.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use vellum_core::eager::{compile_plans, EagerLoadPlan, EagerLoadSpec};
use vellum_core::element::Element;
use vellum_core::element_type::TypeRegistry;
use vellum_core::query::{ElementQuery, StatusFilter};
use vellum_core::types::{DbId, SiteId};
use vellum_db::ContentStore;

use crate::error::ElementError;

type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ElementError>> + Send + 'a>>;

pub struct EagerLoader {
    store: Arc<dyn ContentStore>,
    types: TypeRegistry,
}

impl EagerLoader {
    pub fn new(store: Arc<dyn ContentStore>, types: TypeRegistry) -> Self {
        Self { store, types }
    }

    /// Compile `specs` and attach the results to `elements`.
    pub async fn load<I, S>(&self, elements: &mut [Element], specs: I) -> Result<(), ElementError>
    where
        I: IntoIterator<Item = S>,
        S: Into<EagerLoadSpec>,
    {
        let plans = compile_plans(specs)?;
        self.resolve(elements, &plans).await
    }

    /// Run already compiled plans against `elements`.
    pub fn resolve<'a>(
        &'a self,
        elements: &'a mut [Element],
        plans: &'a [EagerLoadPlan],
    ) -> ResolveFuture<'a> {
        Box::pin(async move {
            if elements.is_empty() {
                return Ok(());
            }
            for plan in plans {
                for indexes in source_groups(elements).into_values() {
                    self.resolve_group(elements, &indexes, plan).await?;
                }
            }
            Ok(())
        })
    }

    async fn resolve_group(
        &self,
        elements: &mut [Element],
        indexes: &[usize],
        plan: &EagerLoadPlan,
    ) -> Result<(), ElementError> {
        let sources: Vec<usize> = indexes
            .iter()
            .copied()
            .filter(|&i| plan.applies_to(&elements[i]))
            .collect();
        let Some(&first) = sources.first() else {
            return Ok(());
        };
        let source_type = self.types.require(&elements[first].type_tag)?;
        let group_site = elements[first].site_id;

        let source_elements: Vec<Element> = sources.iter().map(|&i| elements[i].clone()).collect();
        let Some(map) = source_type.relation_map(&source_elements, &plan.handle) else {
            tracing::debug!(handle = %plan.handle, type_tag = source_type.type_tag(), "No relation map; skipping");
            return Ok(());
        };
        let criteria = plan.criteria.layered_over(&map.criteria);
        let target_site: SiteId = criteria.site_id.unwrap_or(group_site);

        let mut targets_by_source: HashMap<DbId, Vec<DbId>> = HashMap::new();
        for (source_id, target_id) in &map.pairs {
            targets_by_source.entry(*source_id).or_default().push(*target_id);
        }
        let unique: BTreeSet<DbId> = map.pairs.iter().map(|(_, target)| *target).collect();

        let mut query = ElementQuery::new(target_site)
            .of_type(map.target_type.clone())
            .ids(unique.iter().copied())
            .status(criteria.status.unwrap_or(StatusFilter::Live));

        if !plan.needs_elements() {
            let found: BTreeSet<DbId> = if unique.is_empty() {
                BTreeSet::new()
            } else {
                self.store.query_ids(&query).await?.into_iter().collect()
            };
            tracing::debug!(
                handle = %plan.handle,
                alias = %plan.alias,
                site_id = target_site,
                sources = sources.len(),
                targets = found.len(),
                "Eager-counted relation"
            );
            for &i in &sources {
                let count = elements[i]
                    .id
                    .and_then(|id| targets_by_source.get(&id))
                    .map_or(0, |ids| ids.iter().filter(|t| found.contains(t)).count());
                elements[i].set_eager_loaded_count(plan.alias.clone(), count);
            }
            return Ok(());
        }

        let mut targets = if unique.is_empty() {
            Vec::new()
        } else {
            for order in &criteria.order_by {
                query = query.order_by(order.clone());
            }
            self.store.query(&query).await?
        };
        tracing::debug!(
            handle = %plan.handle,
            alias = %plan.alias,
            site_id = target_site,
            sources = sources.len(),
            targets = targets.len(),
            "Eager-loaded relation"
        );

        if !plan.nested.is_empty() {
            self.resolve(&mut targets, &plan.nested).await?;
        }

        let query_order: BTreeMap<DbId, usize> = targets
            .iter()
            .enumerate()
            .filter_map(|(pos, t)| t.id.map(|id| (id, pos)))
            .collect();
        let by_id: HashMap<DbId, &Element> = targets
            .iter()
            .filter_map(|t| t.id.map(|id| (id, t)))
            .collect();

        for &i in &sources {
            let mut ids: Vec<DbId> = elements[i]
                .id
                .and_then(|id| targets_by_source.get(&id))
                .cloned()
                .unwrap_or_default();
            ids.retain(|id| by_id.contains_key(id));
            // Only the caller's order replaces the map's pair order.
            if plan.criteria.has_custom_order() {
                ids.sort_by_key(|id| query_order.get(id).copied().unwrap_or(usize::MAX));
            }
            let total = ids.len();
            let offset = criteria.offset.unwrap_or(0).max(0) as usize;
            let related: Vec<Element> = ids
                .into_iter()
                .skip(offset)
                .take(criteria.limit.map_or(usize::MAX, |l| l.max(0) as usize))
                .filter_map(|id| by_id.get(&id).map(|t| (*t).clone()))
                .collect();
            if plan.count {
                elements[i].set_eager_loaded_count(plan.alias.clone(), total);
            }
            elements[i].set_eager_loaded_elements(plan.alias.clone(), related);
        }
        Ok(())
    }
}

/// Indexes of `elements` grouped by type and site, so that no relation is
/// resolved across sites.
fn source_groups(elements: &[Element]) -> BTreeMap<(String, SiteId), Vec<usize>> {
    let mut groups: BTreeMap<(String, SiteId), Vec<usize>> = BTreeMap::new();
    for (i, element) in elements.iter().enumerate() {
        groups
            .entry((element.type_tag.clone(), element.site_id))
            .or_default()
            .push(i);
    }
    groups
}
