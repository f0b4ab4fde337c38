#![allow(dead_code)]

use std::sync::Arc;

use serde_json::json;
use vellum_core::cache_tags::TaggedCache;
use vellum_core::eager::EagerCriteria;
use vellum_core::element::{Element, FieldErrors, ValidationScenario};
use vellum_core::element_type::{
    ElementType, FieldDefinition, RelationMap, StructureSettings, TypeRegistry,
};
use vellum_core::query::{OrderBy, OrderColumn};
use vellum_core::site::{Site, Sites, TranslationMethod};
use vellum_core::types::{DbId, SiteId};
use vellum_db::{MemoryJobQueue, MemorySearchIndex, MemoryStore};
use vellum_events::{EventBus, HookRegistry};
use vellum_pipeline::{Collaborators, EagerLoader, EngineConfig, ElementService, SaveOptions, UnitOfWork};

pub const EN: SiteId = 1;
pub const FR: SiteId = 2;
pub const ENTRY_STRUCTURE: DbId = 100;

// ---------------------------------------------------------------------------
// Element types
// ---------------------------------------------------------------------------

/// Ids stored in a relation field, in field order.
fn related_ids(element: &Element, handle: &str) -> Vec<DbId> {
    element
        .field_value(handle)
        .and_then(|v| v.as_array())
        .map(|ids| ids.iter().filter_map(|id| id.as_i64()).collect())
        .unwrap_or_default()
}

fn relation_pairs(sources: &[Element], handle: &str) -> Vec<(DbId, DbId)> {
    sources
        .iter()
        .filter_map(|s| s.id.map(|id| (id, related_ids(s, handle))))
        .flat_map(|(id, targets)| targets.into_iter().map(move |t| (id, t)))
        .collect()
}

/// Entries live in a structure, have a translatable body and a shared hero
/// image, and relate to users through `author`. `editors` reads the same
/// field but defaults to title order.
pub struct EntryType;

impl ElementType for EntryType {
    fn type_tag(&self) -> &str {
        "entry"
    }

    fn field_layout(&self, _element: &Element) -> Vec<FieldDefinition> {
        vec![
            FieldDefinition::translatable("body").required().searchable(),
            FieldDefinition::shared("heroImage"),
            FieldDefinition::shared("author"),
        ]
    }

    fn structure(&self, _element: &Element) -> Option<StructureSettings> {
        Some(StructureSettings {
            structure_id: ENTRY_STRUCTURE,
            max_levels: Some(3),
        })
    }

    fn relation_map(&self, sources: &[Element], handle: &str) -> Option<RelationMap> {
        match handle {
            "author" => Some(RelationMap::new("user", relation_pairs(sources, "author"))),
            "editors" => Some(
                RelationMap::new("user", relation_pairs(sources, "author"))
                    .with_criteria(EagerCriteria::new().with_order(OrderBy::asc(OrderColumn::Title))),
            ),
            _ => None,
        }
    }

    fn extra_cache_tags(&self, _element: &Element) -> Vec<String> {
        vec!["section:blog".to_string()]
    }
}

pub struct UserType;

impl ElementType for UserType {
    fn type_tag(&self) -> &str {
        "user"
    }

    fn is_localized(&self) -> bool {
        false
    }

    fn relation_map(&self, sources: &[Element], handle: &str) -> Option<RelationMap> {
        (handle == "photo").then(|| RelationMap::new("asset", relation_pairs(sources, "photo")))
    }
}

pub struct AssetType;

impl ElementType for AssetType {
    fn type_tag(&self) -> &str {
        "asset"
    }

    fn is_localized(&self) -> bool {
        false
    }

    fn has_content(&self) -> bool {
        false
    }
}

/// Blocks are owned by entries and translated per language.
pub struct BlockType;

impl ElementType for BlockType {
    fn type_tag(&self) -> &str {
        "block"
    }

    fn has_titles(&self) -> bool {
        false
    }

    fn field_layout(&self, _element: &Element) -> Vec<FieldDefinition> {
        vec![FieldDefinition::new("text", TranslationMethod::Language)]
    }

    fn validate(&self, element: &Element, _scenario: ValidationScenario) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if element.owner_id.is_none() {
            errors.add("owner", "Blocks need an owner");
        }
        errors
    }
}

pub fn sites() -> Sites {
    Sites::new(vec![
        Site::new(EN, "en", "en-US").as_primary(),
        Site::new(FR, "fr", "fr-FR"),
    ])
}

pub fn types() -> TypeRegistry {
    TypeRegistry::new()
        .with(Arc::new(EntryType))
        .with(Arc::new(UserType))
        .with(Arc::new(AssetType))
        .with(Arc::new(BlockType))
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: MemoryStore,
    pub cache: Arc<TaggedCache>,
    pub search: Arc<MemorySearchIndex>,
    pub jobs: Arc<MemoryJobQueue>,
    pub events: Arc<EventBus>,
    pub service: ElementService,
}

impl Harness {
    pub fn loader(&self) -> EagerLoader {
        EagerLoader::new(Arc::new(self.store.clone()), types())
    }

    /// Save `element` with default options, asserting it passed validation.
    pub async fn save(&self, uow: &mut UnitOfWork, element: &mut Element) {
        let saved = self
            .service
            .save(uow, element, SaveOptions::default())
            .await
            .expect("save should not error");
        assert!(saved, "save failed validation: {}", element.errors());
    }

    pub async fn find(&self, id: DbId, site_id: SiteId) -> Option<Element> {
        self.service
            .find_element(&mut UnitOfWork::new(), id, site_id)
            .await
            .expect("lookup should not error")
    }
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default(), HookRegistry::new())
}

pub fn harness_with(config: EngineConfig, hooks: HookRegistry) -> Harness {
    let store = MemoryStore::new();
    let cache = Arc::new(TaggedCache::new());
    let search = Arc::new(MemorySearchIndex::new());
    let jobs = Arc::new(MemoryJobQueue::new());
    let events = Arc::new(EventBus::default());
    let service = ElementService::new(
        Arc::new(store.clone()),
        types(),
        sites(),
        Collaborators {
            cache: cache.clone(),
            search: search.clone(),
            jobs: jobs.clone(),
            events: events.clone(),
        },
    )
    .with_config(config)
    .with_hooks(hooks);
    Harness {
        store,
        cache,
        search,
        jobs,
        events,
        service,
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn entry(title: &str) -> Element {
    let slug = title.to_lowercase().replace(' ', "-");
    let mut element = Element::new("entry", EN)
        .with_title(title)
        .with_slug(slug.clone())
        .with_field("body", json!(format!("{title} body")))
        .with_field("heroImage", json!(1));
    element.set_uri(Some(format!("blog/{slug}")));
    element
}

pub fn user(name: &str) -> Element {
    Element::new("user", EN).with_title(name)
}

pub fn asset(name: &str) -> Element {
    Element::new("asset", EN).with_title(name)
}

pub fn block(owner_id: DbId, text: &str) -> Element {
    Element::new("block", EN)
        .owned_by(owner_id)
        .with_field("text", json!(text))
}

pub async fn saved(h: &Harness, mut element: Element) -> Element {
    h.save(&mut UnitOfWork::new(), &mut element).await;
    element
}
