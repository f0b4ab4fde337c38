//! Search index keywords and the indexer seam.
//!
//! Saves either index synchronously or enqueue an index job, depending on
//! the configured mode and execution context.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::element::{Element, ATTR_SLUG, ATTR_TITLE};
use crate::error::CoreError;
use crate::types::{DbId, SiteId};

// ---------------------------------------------------------------------------
// Keywords
// ---------------------------------------------------------------------------

/// Keywords for one attribute or field of one element in one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchKeywords {
    pub element_id: DbId,
    pub site_id: SiteId,
    /// Attribute name, or `field:<handle>` for custom fields.
    pub attribute: String,
    pub keywords: String,
}

/// Lowercase `text`, strip punctuation, and collapse whitespace.
pub fn normalize_keywords(text: &str) -> String {
    text.split_whitespace()
        .map(|t| {
            t.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Turn user input into a PostgreSQL `tsquery` joining terms with `&`.
///
/// Returns `None` when nothing searchable remains.
pub fn build_tsquery(query: &str) -> Option<String> {
    let terms: Vec<String> = normalize_keywords(query)
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" & "))
    }
}

/// Flatten a field value into indexable text.
pub fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(value_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        serde_json::Value::Object(map) => map
            .values()
            .map(value_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}

/// Build keyword rows for a saved element.
///
/// `field_handles` limits custom fields to the searchable ones. Returns an
/// empty list for unsaved elements.
pub fn keywords_for_element(element: &Element, field_handles: &[String]) -> Vec<SearchKeywords> {
    let Some(element_id) = element.id else {
        return Vec::new();
    };
    let row = |attribute: String, text: &str| SearchKeywords {
        element_id,
        site_id: element.site_id,
        attribute,
        keywords: normalize_keywords(text),
    };

    let mut rows = Vec::new();
    if let Some(title) = element.title() {
        rows.push(row(ATTR_TITLE.to_string(), title));
    }
    if let Some(slug) = element.slug() {
        rows.push(row(ATTR_SLUG.to_string(), &slug.replace('-', " ")));
    }
    for handle in field_handles {
        if let Some(value) = element.field_value(handle) {
            rows.push(row(format!("field:{handle}"), &value_text(value)));
        }
    }
    rows
}

// ---------------------------------------------------------------------------
// Indexer
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SearchIndexer: Send + Sync {
    /// Replace the keywords stored for the element's site.
    async fn index_element(&self, element: &Element, field_handles: &[String]) -> Result<(), CoreError>;

    /// Drop every keyword row for `element_id` in all sites.
    async fn delete_element(&self, element_id: DbId) -> Result<(), CoreError>;
}
