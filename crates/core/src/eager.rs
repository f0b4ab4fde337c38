//! Eager-load plan compilation.
//!
//! Callers describe related elements to fetch alongside a root set with
//! dot paths (`"author.photo"`), optional aliases (`"author as writer"`)
//! and per-path criteria. [`compile_plans`] folds those into a tree of
//! [`EagerLoadPlan`]s, one per top-level alias, so a relation shared by
//! several deeper paths is fetched once.

use std::sync::{Arc, LazyLock};

use crate::element::Element;
use crate::error::CoreError;
use crate::query::{OrderBy, StatusFilter};
use crate::types::SiteId;

static HANDLE_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[a-zA-Z][a-zA-Z0-9_:]*$").expect("valid regex"));

static ALIASED_HANDLE_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^([a-zA-Z][a-zA-Z0-9_:]*)\s+as\s+([a-zA-Z][a-zA-Z0-9_]*)$")
        .expect("valid regex")
});

/// Predicate restricting which source elements a plan applies to.
pub type WhenFn = Arc<dyn Fn(&Element) -> bool + Send + Sync>;

// ---------------------------------------------------------------------------
// Criteria
// ---------------------------------------------------------------------------

/// Extra filter/sort/limit applied to a relation's target query.
///
/// `offset` and `limit` apply per source element, not to the batched query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EagerCriteria {
    pub order_by: Vec<OrderBy>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<StatusFilter>,
    /// Fetch targets from this site instead of the source elements' site.
    pub site_id: Option<SiteId>,
    /// `Some(true)` attaches a count instead of elements.
    pub count: Option<bool>,
}

impl EagerCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count() -> Self {
        Self {
            count: Some(true),
            ..Self::default()
        }
    }

    pub fn with_order(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_status(mut self, status: StatusFilter) -> Self {
        self.status = Some(status);
        self
    }

    pub fn in_site(mut self, site_id: SiteId) -> Self {
        self.site_id = Some(site_id);
        self
    }

    /// Whether the criteria ask for a custom order.
    pub fn has_custom_order(&self) -> bool {
        !self.order_by.is_empty()
    }

    /// Layer `self` over `defaults`: any value set here wins.
    pub fn layered_over(&self, defaults: &EagerCriteria) -> EagerCriteria {
        EagerCriteria {
            order_by: if self.order_by.is_empty() {
                defaults.order_by.clone()
            } else {
                self.order_by.clone()
            },
            offset: self.offset.or(defaults.offset),
            limit: self.limit.or(defaults.limit),
            status: self.status.or(defaults.status),
            site_id: self.site_id.or(defaults.site_id),
            count: self.count.or(defaults.count),
        }
    }

    fn absorb(&mut self, other: EagerCriteria) {
        *self = other.layered_over(self);
    }
}

// ---------------------------------------------------------------------------
// Specs and plans
// ---------------------------------------------------------------------------

/// One caller-supplied eager-load request.
#[derive(Clone)]
pub struct EagerLoadSpec {
    pub path: String,
    pub criteria: EagerCriteria,
    pub when: Option<WhenFn>,
}

impl EagerLoadSpec {
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            criteria: EagerCriteria::default(),
            when: None,
        }
    }

    pub fn with_criteria(mut self, criteria: EagerCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn when(mut self, when: impl Fn(&Element) -> bool + Send + Sync + 'static) -> Self {
        self.when = Some(Arc::new(when));
        self
    }
}

impl From<&str> for EagerLoadSpec {
    fn from(path: &str) -> Self {
        Self::path(path)
    }
}

impl From<String> for EagerLoadSpec {
    fn from(path: String) -> Self {
        Self::path(path)
    }
}

impl From<(&str, EagerCriteria)> for EagerLoadSpec {
    fn from((path, criteria): (&str, EagerCriteria)) -> Self {
        Self::path(path).with_criteria(criteria)
    }
}

impl std::fmt::Debug for EagerLoadSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EagerLoadSpec")
            .field("path", &self.path)
            .field("criteria", &self.criteria)
            .field("when", &self.when.is_some())
            .finish()
    }
}

/// A compiled eager-load plan for one relation handle.
#[derive(Clone)]
pub struct EagerLoadPlan {
    pub handle: String,
    pub alias: String,
    pub criteria: EagerCriteria,
    /// Materialize full target elements.
    pub all: bool,
    /// Attach a count of targets.
    pub count: bool,
    pub when: Option<WhenFn>,
    pub nested: Vec<EagerLoadPlan>,
}

impl EagerLoadPlan {
    pub fn new(handle: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            alias: alias.into(),
            criteria: EagerCriteria::default(),
            all: false,
            count: false,
            when: None,
            nested: Vec::new(),
        }
    }

    /// Whether `element` passes this plan's `when` predicate.
    pub fn applies_to(&self, element: &Element) -> bool {
        self.when.as_ref().map_or(true, |when| when(element))
    }

    /// Whether targets must be materialized: explicitly requested, or
    /// needed as the root set of nested plans.
    pub fn needs_elements(&self) -> bool {
        self.all || !self.nested.is_empty()
    }

    pub fn nested_plan(&self, alias: &str) -> Option<&EagerLoadPlan> {
        self.nested.iter().find(|p| p.alias == alias)
    }
}

impl std::fmt::Debug for EagerLoadPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EagerLoadPlan")
            .field("handle", &self.handle)
            .field("alias", &self.alias)
            .field("criteria", &self.criteria)
            .field("all", &self.all)
            .field("count", &self.count)
            .field("when", &self.when.is_some())
            .field("nested", &self.nested)
            .finish()
    }
}

/// Compile eager-load specs into plans grouped by top-level alias.
pub fn compile_plans<I, S>(specs: I) -> Result<Vec<EagerLoadPlan>, CoreError>
where
    I: IntoIterator<Item = S>,
    S: Into<EagerLoadSpec>,
{
    let mut plans: Vec<EagerLoadPlan> = Vec::new();
    let mut pending_nested: Vec<Vec<EagerLoadSpec>> = Vec::new();

    for spec in specs {
        let spec: EagerLoadSpec = spec.into();
        let segments: Vec<&str> = spec.path.split('.').map(str::trim).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(CoreError::Validation(format!(
                "Invalid eager-load path '{}'",
                spec.path
            )));
        }
        let (handle, alias) = parse_segment(segments[0])?;

        let index = match plans.iter().position(|p| p.alias == alias) {
            Some(index) => {
                if plans[index].handle != handle {
                    return Err(CoreError::Validation(format!(
                        "Eager-load alias '{alias}' is already used for '{}'",
                        plans[index].handle
                    )));
                }
                index
            }
            None => {
                plans.push(EagerLoadPlan::new(handle, alias));
                pending_nested.push(Vec::new());
                plans.len() - 1
            }
        };

        if segments.len() == 1 {
            let plan = &mut plans[index];
            let mut criteria = spec.criteria;
            match criteria.count.take() {
                Some(count) => plan.count = plan.count || count,
                None => plan.all = true,
            }
            if spec.when.is_some() {
                plan.when = spec.when;
            }
            plan.criteria.absorb(criteria);
        } else {
            plans[index].all = true;
            pending_nested[index].push(EagerLoadSpec {
                path: segments[1..].join("."),
                criteria: spec.criteria,
                when: spec.when,
            });
        }
    }

    for (plan, nested) in plans.iter_mut().zip(pending_nested) {
        if !nested.is_empty() {
            plan.nested = compile_plans(nested)?;
        }
    }
    Ok(plans)
}

fn parse_segment(segment: &str) -> Result<(String, String), CoreError> {
    if let Some(caps) = ALIASED_HANDLE_RE.captures(segment) {
        return Ok((caps[1].to_string(), caps[2].to_string()));
    }
    if HANDLE_RE.is_match(segment) {
        return Ok((segment.to_string(), segment.to_string()));
    }
    Err(CoreError::Validation(format!(
        "Invalid eager-load handle '{segment}'"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::OrderColumn;
    use assert_matches::assert_matches;

    #[test]
    fn shared_top_level_alias_yields_one_plan() {
        let plans = compile_plans(["author", "author.photo"]).unwrap();
        assert_eq!(plans.len(), 1);
        let author = &plans[0];
        assert_eq!(author.handle, "author");
        assert!(author.all);
        assert_eq!(author.nested.len(), 1);
        assert_eq!(author.nested[0].handle, "photo");
        assert!(author.nested[0].all);
    }

    #[test]
    fn deep_paths_merge_at_every_level() {
        let plans = compile_plans(["a.b.c", "a.b.d", "a.e"]).unwrap();
        assert_eq!(plans.len(), 1);
        let a = &plans[0];
        assert_eq!(a.nested.len(), 2);
        let b = a.nested_plan("b").unwrap();
        assert_eq!(b.nested.iter().map(|p| p.handle.as_str()).collect::<Vec<_>>(), vec!["c", "d"]);
        assert!(a.nested_plan("e").is_some());
    }

    #[test]
    fn alias_syntax() {
        let plans = compile_plans(["author as writer", "author"]).unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].handle, "author");
        assert_eq!(plans[0].alias, "writer");
        assert_eq!(plans[1].alias, "author");
    }

    #[test]
    fn nested_alias_applies_to_its_level() {
        let plans = compile_plans(["author.photo as avatar"]).unwrap();
        let nested = &plans[0].nested[0];
        assert_eq!(nested.handle, "photo");
        assert_eq!(nested.alias, "avatar");
    }

    #[test]
    fn count_only_does_not_materialize() {
        let plans = compile_plans([("comments", EagerCriteria::count())]).unwrap();
        let plan = &plans[0];
        assert!(plan.count);
        assert!(!plan.all);
        assert!(!plan.needs_elements());
        assert_eq!(plan.criteria.count, None);
    }

    #[test]
    fn count_with_nested_still_materializes() {
        let plans = compile_plans([
            EagerLoadSpec::from(("comments", EagerCriteria::count())),
            EagerLoadSpec::from("comments.author"),
        ])
        .unwrap();
        let plan = &plans[0];
        assert!(plan.count);
        assert!(plan.needs_elements());
    }

    #[test]
    fn criteria_attach_to_the_leaf() {
        let criteria = EagerCriteria::new()
            .with_limit(2)
            .with_order(OrderBy::desc(OrderColumn::DateCreated));
        let plans = compile_plans([("author.photo", criteria.clone())]).unwrap();
        assert_eq!(plans[0].criteria, EagerCriteria::default());
        assert_eq!(plans[0].nested[0].criteria, criteria);
    }

    #[test]
    fn layered_criteria_prefer_plan_values() {
        let defaults = EagerCriteria::new()
            .with_limit(10)
            .with_order(OrderBy::asc(OrderColumn::Title));
        let plan = EagerCriteria::new().with_limit(3);
        let merged = plan.layered_over(&defaults);
        assert_eq!(merged.limit, Some(3));
        assert_eq!(merged.order_by, defaults.order_by);
    }

    #[test]
    fn when_predicate_is_kept() {
        let plans = compile_plans([EagerLoadSpec::path("author").when(|el| el.site_id == 1)]).unwrap();
        let en = Element::new("entry", 1);
        let fr = Element::new("entry", 2);
        assert!(plans[0].applies_to(&en));
        assert!(!plans[0].applies_to(&fr));
    }

    #[test]
    fn invalid_paths_are_rejected() {
        assert_matches!(compile_plans(["author..photo"]), Err(CoreError::Validation(_)));
        assert_matches!(compile_plans(["9lives"]), Err(CoreError::Validation(_)));
        assert_matches!(
            compile_plans(["author as x", "photo as x"]),
            Err(CoreError::Validation(_))
        );
    }
}
