//! Element cache tags.
//!
//! Rendered output and query results that depend on elements are cached
//! under *tags*. [`CacheTagLedger`] collects the tags touched during a unit
//! of work; the `invalidate_*` helpers compute the canonical tag names and
//! hand them to a [`TagInvalidator`].
//!
//! Tag names:
//!
//! | Tag | Covers |
//! |-----|--------|
//! | `element` | every element |
//! | `element:<type>` | every element of a type |
//! | `element:<type>:<id>` | one element |

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::element::Element;
use crate::types::DbId;

pub const TAG_ALL: &str = "element";

pub fn type_tag(type_tag: &str) -> String {
    format!("{TAG_ALL}:{type_tag}")
}

pub fn element_tag(type_tag: &str, id: DbId) -> String {
    format!("{TAG_ALL}:{type_tag}:{id}")
}

/// Tags to invalidate when `element` changes.
///
/// Drafts and revisions are never cache-tagged, so they yield nothing.
pub fn tags_for_element(element: &Element, extra: &[String]) -> Vec<String> {
    if !element.is_canonical() {
        return Vec::new();
    }
    let mut tags = vec![TAG_ALL.to_string(), type_tag(&element.type_tag)];
    if let Some(id) = element.id {
        tags.push(element_tag(&element.type_tag, id));
    }
    tags.extend(extra.iter().cloned());
    tags
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Collects cache tags during a unit of work.
///
/// Collection nests: starting while already collecting parks the current
/// set and begins a fresh one; stopping returns the inner set and merges it
/// into the parked outer set.
#[derive(Debug, Default)]
pub struct CacheTagLedger {
    current: Option<BTreeSet<String>>,
    stack: Vec<BTreeSet<String>>,
}

impl CacheTagLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_collecting(&mut self) {
        if let Some(current) = self.current.take() {
            self.stack.push(current);
        }
        self.current = Some(BTreeSet::new());
    }

    pub fn is_collecting(&self) -> bool {
        self.current.is_some()
    }

    /// Add tags to the active set. A no-op when not collecting.
    pub fn collect<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(current) = self.current.as_mut() {
            current.extend(tags.into_iter().map(Into::into));
        }
    }

    /// Collect the tags describing a fetched element.
    pub fn collect_element(&mut self, element: &Element) {
        if self.is_collecting() {
            let tags = tags_for_element(element, &[]);
            self.collect(tags);
        }
    }

    pub fn stop_collecting(&mut self) -> BTreeSet<String> {
        let tags = self.current.take().unwrap_or_default();
        if let Some(mut parent) = self.stack.pop() {
            parent.extend(tags.iter().cloned());
            self.current = Some(parent);
        }
        tags
    }
}

// ---------------------------------------------------------------------------
// Invalidation
// ---------------------------------------------------------------------------

/// The underlying cache's tag-based invalidation primitive.
#[async_trait]
pub trait TagInvalidator: Send + Sync {
    async fn invalidate_tags(&self, tags: &[String]);
}

pub async fn invalidate_all(cache: &dyn TagInvalidator) {
    cache.invalidate_tags(&[TAG_ALL.to_string()]).await;
}

pub async fn invalidate_type(cache: &dyn TagInvalidator, type_tag_name: &str) {
    cache.invalidate_tags(&[type_tag(type_tag_name)]).await;
}

pub async fn invalidate_element(cache: &dyn TagInvalidator, element: &Element, extra: &[String]) {
    let tags = tags_for_element(element, extra);
    if !tags.is_empty() {
        cache.invalidate_tags(&tags).await;
    }
}

/// A small in-process tagged cache.
///
/// Entries are stored with the tags they depend on; invalidating any of
/// those tags evicts the entry. Every invalidation batch is also recorded
/// so callers can inspect what was flushed.
#[derive(Debug, Default)]
pub struct TaggedCache {
    inner: Mutex<TaggedCacheInner>,
}

#[derive(Debug, Default)]
struct TaggedCacheInner {
    entries: HashMap<String, (serde_json::Value, BTreeSet<String>)>,
    invalidations: Vec<Vec<String>>,
}

impl TaggedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<I, S>(&self, key: impl Into<String>, value: serde_json::Value, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags = tags.into_iter().map(Into::into).collect();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.entries.insert(key.into(), (value, tags));
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.entries.get(key).map(|(value, _)| value.clone())
    }

    /// Every invalidation batch received, oldest first.
    pub fn invalidations(&self) -> Vec<Vec<String>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.invalidations.clone()
    }

    /// All distinct tags invalidated so far.
    pub fn invalidated_tags(&self) -> BTreeSet<String> {
        self.invalidations().into_iter().flatten().collect()
    }
}

#[async_trait]
impl TagInvalidator for TaggedCache {
    async fn invalidate_tags(&self, tags: &[String]) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .entries
            .retain(|_, (_, entry_tags)| !tags.iter().any(|t| entry_tags.contains(t)));
        inner.invalidations.push(tags.to_vec());
    }
}
