//! In-flight element overrides for a single request.
//!
//! While previewing or editing a draft, uncommitted element instances are
//! registered here so later lookups in the same request resolve to them
//! instead of the stored rows. The registry is request-scoped state: it
//! lives on the unit of work and is dropped with it.

use std::collections::HashMap;

use crate::element::Element;
use crate::types::{DbId, SiteId};

#[derive(Debug, Default)]
pub struct PlaceholderRegistry {
    by_source: HashMap<(DbId, SiteId), Element>,
}

impl PlaceholderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `element` as the stand-in for its canonical element in its
    /// site. Unsaved elements cannot be registered and are ignored.
    pub fn set(&mut self, element: Element) -> bool {
        let Some(source_id) = element.canonical_element_id() else {
            return false;
        };
        self.by_source.insert((source_id, element.site_id), element);
        true
    }

    pub fn get(&self, source_id: DbId, site_id: SiteId) -> Option<&Element> {
        self.by_source.get(&(source_id, site_id))
    }

    pub fn remove(&mut self, source_id: DbId, site_id: SiteId) -> Option<Element> {
        self.by_source.remove(&(source_id, site_id))
    }

    /// Swap `element` for its placeholder when one is registered.
    pub fn resolve(&self, element: Element) -> Element {
        match element
            .id
            .and_then(|id| self.by_source.get(&(id, element.site_id)))
        {
            Some(placeholder) => placeholder.clone(),
            None => element,
        }
    }

    pub fn len(&self) -> usize {
        self.by_source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_source.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(id: DbId, site_id: SiteId, title: &str) -> Element {
        let mut el = Element::new("entry", site_id).with_title(title);
        el.id = Some(id);
        el.mark_as_clean();
        el
    }

    #[test]
    fn draft_placeholder_overrides_canonical_lookup() {
        let mut registry = PlaceholderRegistry::new();
        let mut draft = stored(50, 1, "Draft title");
        draft.canonical_id = Some(10);
        draft.draft_id = Some(3);
        assert!(registry.set(draft));

        let resolved = registry.resolve(stored(10, 1, "Live title"));
        assert_eq!(resolved.title(), Some("Draft title"));
    }

    #[test]
    fn placeholders_are_per_site() {
        let mut registry = PlaceholderRegistry::new();
        registry.set(stored(10, 1, "EN edit"));
        let fr = registry.resolve(stored(10, 2, "FR"));
        assert_eq!(fr.title(), Some("FR"));
        assert!(registry.get(10, 1).is_some());
    }

    #[test]
    fn unsaved_elements_are_ignored() {
        let mut registry = PlaceholderRegistry::new();
        assert!(!registry.set(Element::new("entry", 1)));
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_and_clear() {
        let mut registry = PlaceholderRegistry::new();
        registry.set(stored(10, 1, "a"));
        registry.set(stored(11, 1, "b"));
        assert!(registry.remove(10, 1).is_some());
        assert_eq!(registry.len(), 1);
        registry.clear();
        assert!(registry.is_empty());
    }
}
