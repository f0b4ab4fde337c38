//! Element type capabilities and the type registry.
//!
//! Each element variant (entries, assets, users, nested blocks, ...)
//! implements [`ElementType`]. The propagation engine and eager loader
//! never branch on a type tag; they look the type up in the
//! [`TypeRegistry`] and ask it.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use serde::{Deserialize, Serialize};

use crate::eager::EagerCriteria;
use crate::element::{Element, FieldErrors, ValidationScenario, ATTR_SLUG, ATTR_TITLE, ATTR_URI};
use crate::error::CoreError;
use crate::site::{Sites, TranslationMethod};
use crate::types::{DbId, SiteId};

static SLUG_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[\p{L}\p{N}][\p{L}\p{N}_\-]*$").expect("valid regex"));

// ---------------------------------------------------------------------------
// Capability types
// ---------------------------------------------------------------------------

/// One site an element may exist in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedSite {
    pub site_id: SiteId,
    /// Whether saves in other sites propagate into this one.
    pub propagate: bool,
    /// The per-site enabled flag a freshly propagated row starts with.
    pub enabled_by_default: bool,
}

impl SupportedSite {
    pub fn new(site_id: SiteId) -> Self {
        Self {
            site_id,
            propagate: true,
            enabled_by_default: true,
        }
    }

    pub fn disabled_by_default(mut self) -> Self {
        self.enabled_by_default = false;
        self
    }

    pub fn without_propagation(mut self) -> Self {
        self.propagate = false;
        self
    }
}

/// A custom field in an element's field layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub handle: String,
    pub translation: TranslationMethod,
    pub required: bool,
    pub searchable: bool,
}

impl FieldDefinition {
    pub fn new(handle: impl Into<String>, translation: TranslationMethod) -> Self {
        Self {
            handle: handle.into(),
            translation,
            required: false,
            searchable: false,
        }
    }

    /// A field whose value is shared by every site.
    pub fn shared(handle: impl Into<String>) -> Self {
        Self::new(handle, TranslationMethod::None)
    }

    /// A field whose value is distinct per site.
    pub fn translatable(handle: impl Into<String>) -> Self {
        Self::new(handle, TranslationMethod::Site)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }
}

/// The structure an element type places its elements in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureSettings {
    pub structure_id: DbId,
    pub max_levels: Option<i32>,
}

/// How a relation handle maps source elements to target elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationMap {
    pub target_type: String,
    /// `(source_id, target_id)` pairs, in the order targets should appear.
    pub pairs: Vec<(DbId, DbId)>,
    /// Default criteria for the target query; plan criteria override them.
    pub criteria: EagerCriteria,
}

impl RelationMap {
    pub fn new(target_type: impl Into<String>, pairs: Vec<(DbId, DbId)>) -> Self {
        Self {
            target_type: target_type.into(),
            pairs,
            criteria: EagerCriteria::default(),
        }
    }

    pub fn with_criteria(mut self, criteria: EagerCriteria) -> Self {
        self.criteria = criteria;
        self
    }
}

// ---------------------------------------------------------------------------
// ElementType
// ---------------------------------------------------------------------------

/// Capabilities of one element variant.
pub trait ElementType: Send + Sync {
    fn type_tag(&self) -> &str;

    /// Whether elements carry custom field content.
    fn has_content(&self) -> bool {
        true
    }

    fn has_titles(&self) -> bool {
        true
    }

    /// Whether elements exist in more than one site.
    fn is_localized(&self) -> bool {
        true
    }

    /// Whether saves record per-attribute change history.
    fn track_changes(&self) -> bool {
        true
    }

    fn title_translation(&self) -> TranslationMethod {
        TranslationMethod::Site
    }

    /// Sites `element` may exist in. May depend on the element itself,
    /// e.g. on which section it belongs to.
    fn supported_sites(&self, element: &Element, sites: &Sites) -> Vec<SupportedSite> {
        let _ = element;
        sites.ids().into_iter().map(SupportedSite::new).collect()
    }

    fn field_layout(&self, element: &Element) -> Vec<FieldDefinition> {
        let _ = element;
        Vec::new()
    }

    fn structure(&self, element: &Element) -> Option<StructureSettings> {
        let _ = element;
        None
    }

    /// Map `sources` through relation `handle`. `None` skips the relation.
    fn relation_map(&self, sources: &[Element], handle: &str) -> Option<RelationMap> {
        let _ = (sources, handle);
        None
    }

    fn extra_cache_tags(&self, element: &Element) -> Vec<String> {
        let _ = element;
        Vec::new()
    }

    /// Type-specific validation on top of the built-in rules.
    fn validate(&self, element: &Element, scenario: ValidationScenario) -> FieldErrors {
        let _ = (element, scenario);
        FieldErrors::new()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, Arc<dyn ElementType>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, element_type: Arc<dyn ElementType>) {
        self.types
            .insert(element_type.type_tag().to_string(), element_type);
    }

    pub fn with(mut self, element_type: Arc<dyn ElementType>) -> Self {
        self.register(element_type);
        self
    }

    pub fn get(&self, type_tag: &str) -> Option<Arc<dyn ElementType>> {
        self.types.get(type_tag).cloned()
    }

    pub fn require(&self, type_tag: &str) -> Result<Arc<dyn ElementType>, CoreError> {
        self.get(type_tag)
            .ok_or_else(|| CoreError::UnknownElementType(type_tag.to_string()))
    }

    pub fn type_tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.types.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.type_tags())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Shared rules
// ---------------------------------------------------------------------------

/// Resolve the sites `element` supports and check it is saved into one.
///
/// Non-localized types only ever live in the primary site.
pub fn resolve_supported_sites(
    element_type: &dyn ElementType,
    element: &Element,
    sites: &Sites,
) -> Result<Vec<SupportedSite>, CoreError> {
    let supported = if element_type.is_localized() {
        element_type.supported_sites(element, sites)
    } else {
        sites
            .primary()
            .map(|s| vec![SupportedSite::new(s.id)])
            .unwrap_or_default()
    };
    if supported.is_empty() {
        return Err(CoreError::NoSupportedSites {
            type_tag: element.type_tag.clone(),
        });
    }
    if !supported.iter().any(|s| s.site_id == element.site_id) {
        return Err(CoreError::UnsupportedSite {
            element_id: element.id,
            site_id: element.site_id,
        });
    }
    Ok(supported)
}

/// Run the built-in rules for `scenario`, then the type's own rules.
///
/// - Every scenario: slug and URI format.
/// - Default and Live: a title for types with titles.
/// - Live: required custom fields.
pub fn validate_element(
    element_type: &dyn ElementType,
    element: &Element,
    scenario: ValidationScenario,
) -> FieldErrors {
    let mut errors = FieldErrors::new();

    if let Some(slug) = element.slug() {
        if !SLUG_RE.is_match(slug) {
            errors.add(ATTR_SLUG, format!("Slug '{slug}' contains invalid characters"));
        }
    }
    if let Some(uri) = element.uri() {
        if uri.starts_with('/') || uri.chars().any(char::is_whitespace) {
            errors.add(ATTR_URI, format!("URI '{uri}' is not a valid path"));
        }
    }

    if scenario != ValidationScenario::Essentials
        && element_type.has_titles()
        && element.title().is_none_or_blank()
    {
        errors.add(ATTR_TITLE, "Title cannot be blank");
    }

    if scenario == ValidationScenario::Live {
        for field in element_type.field_layout(element) {
            if field.required && is_blank(element.field_value(&field.handle)) {
                errors.add(field.handle.clone(), format!("{} cannot be blank", field.handle));
            }
        }
    }

    errors.merge(element_type.validate(element, scenario));
    errors
}

fn is_blank(value: Option<&serde_json::Value>) -> bool {
    match value {
        None | Some(serde_json::Value::Null) => true,
        Some(serde_json::Value::String(s)) => s.trim().is_empty(),
        Some(serde_json::Value::Array(a)) => a.is_empty(),
        Some(serde_json::Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

trait BlankExt {
    fn is_none_or_blank(&self) -> bool;
}

impl BlankExt for Option<&str> {
    fn is_none_or_blank(&self) -> bool {
        self.map_or(true, |s| s.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::Site;
    use assert_matches::assert_matches;
    use serde_json::json;

    struct Article;

    impl ElementType for Article {
        fn type_tag(&self) -> &str {
            "article"
        }

        fn supported_sites(&self, _element: &Element, _sites: &Sites) -> Vec<SupportedSite> {
            vec![SupportedSite::new(1), SupportedSite::new(2).disabled_by_default()]
        }

        fn field_layout(&self, _element: &Element) -> Vec<FieldDefinition> {
            vec![FieldDefinition::translatable("body").required()]
        }
    }

    struct Setting;

    impl ElementType for Setting {
        fn type_tag(&self) -> &str {
            "setting"
        }

        fn is_localized(&self) -> bool {
            false
        }

        fn has_titles(&self) -> bool {
            false
        }
    }

    fn sites() -> Sites {
        Sites::new(vec![
            Site::new(1, "en", "en-US").as_primary(),
            Site::new(2, "fr", "fr-FR"),
            Site::new(3, "de", "de-DE"),
        ])
    }

    #[test]
    fn supported_sites_must_include_current_site() {
        let el = Element::new("article", 3);
        let err = resolve_supported_sites(&Article, &el, &sites()).unwrap_err();
        assert_matches!(err, CoreError::UnsupportedSite { site_id: 3, .. });
    }

    #[test]
    fn non_localized_types_live_in_primary_site() {
        let el = Element::new("setting", 1);
        let supported = resolve_supported_sites(&Setting, &el, &sites()).unwrap();
        assert_eq!(supported, vec![SupportedSite::new(1)]);
        let err = resolve_supported_sites(&Setting, &Element::new("setting", 2), &sites());
        assert_matches!(err, Err(CoreError::UnsupportedSite { .. }));
    }

    #[test]
    fn empty_site_list_is_an_error() {
        let err = resolve_supported_sites(&Setting, &Element::new("setting", 1), &Sites::default());
        assert_matches!(err, Err(CoreError::NoSupportedSites { .. }));
    }

    #[test]
    fn essentials_skip_title_and_required_fields() {
        let el = Element::new("article", 1);
        assert!(validate_element(&Article, &el, ValidationScenario::Essentials).is_empty());
        let errors = validate_element(&Article, &el, ValidationScenario::Default);
        assert!(errors.only(ATTR_TITLE));
        let errors = validate_element(&Article, &el, ValidationScenario::Live);
        assert!(errors.has("body"));
    }

    #[test]
    fn required_field_with_value_passes() {
        let el = Element::new("article", 1)
            .with_title("Hi")
            .with_field("body", json!("text"));
        assert!(validate_element(&Article, &el, ValidationScenario::Live).is_empty());
    }

    #[test]
    fn slug_and_uri_format() {
        let mut el = Element::new("setting", 1).with_slug("bad slug");
        el.set_uri(Some("/leading".into()));
        let errors = validate_element(&Setting, &el, ValidationScenario::Essentials);
        assert!(errors.has(ATTR_SLUG));
        assert!(errors.has(ATTR_URI));
    }

    #[test]
    fn registry_lookup() {
        let registry = TypeRegistry::new()
            .with(Arc::new(Article))
            .with(Arc::new(Setting));
        assert_eq!(registry.type_tags(), vec!["article", "setting"]);
        assert!(registry.get("article").is_some());
        assert_matches!(
            registry.require("widget").err(),
            Some(CoreError::UnknownElementType(tag)) if tag == "widget"
        );
    }
}
