//! Sites and per-field translation rules.
//!
//! A field's [`TranslationMethod`] produces a *translation key* for each
//! site. Two sites that produce the same key share the field's value, so
//! propagation copies it between them; sites with different keys keep
//! independently edited values.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{DbId, SiteId};

static TEMPLATE_TOKEN_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\{site\.(\w+)\}").expect("valid regex"));

// ---------------------------------------------------------------------------
// Site
// ---------------------------------------------------------------------------

/// A site an element can be localized into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub handle: String,
    /// BCP-47 language tag, e.g. `"en-US"`.
    pub language: String,
    pub group_id: DbId,
    pub primary: bool,
}

impl Site {
    pub fn new(id: SiteId, handle: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            id,
            handle: handle.into(),
            language: language.into(),
            group_id: 1,
            primary: false,
        }
    }

    pub fn in_group(mut self, group_id: DbId) -> Self {
        self.group_id = group_id;
        self
    }

    pub fn as_primary(mut self) -> Self {
        self.primary = true;
        self
    }
}

/// The set of sites configured for an install.
#[derive(Debug, Clone, Default)]
pub struct Sites {
    sites: Vec<Site>,
}

impl Sites {
    pub fn new(sites: Vec<Site>) -> Self {
        Self { sites }
    }

    pub fn get(&self, id: SiteId) -> Option<&Site> {
        self.sites.iter().find(|s| s.id == id)
    }

    /// Look up a site, failing with [`CoreError::NotFound`] when it is unknown.
    pub fn require(&self, id: SiteId) -> Result<&Site, CoreError> {
        self.get(id).ok_or(CoreError::NotFound { entity: "site", id })
    }

    /// The primary site, falling back to the first configured site.
    pub fn primary(&self) -> Option<&Site> {
        self.sites
            .iter()
            .find(|s| s.primary)
            .or_else(|| self.sites.first())
    }

    pub fn ids(&self) -> Vec<SiteId> {
        self.sites.iter().map(|s| s.id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Site> {
        self.sites.iter()
    }

    pub fn is_multi_site(&self) -> bool {
        self.sites.len() > 1
    }
}

// ---------------------------------------------------------------------------
// Translation
// ---------------------------------------------------------------------------

/// How a value is shared across sites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "template", rename_all = "snake_case")]
pub enum TranslationMethod {
    /// Shared by every site.
    None,
    /// Distinct per site.
    Site,
    /// Shared by sites in the same site group.
    SiteGroup,
    /// Shared by sites with the same language.
    Language,
    /// Shared by sites rendering the same key from a template such as
    /// `"{site.group}-{site.language}"`.
    Custom(String),
}

impl TranslationMethod {
    /// Compute the translation key this method produces for `site`.
    pub fn translation_key(&self, site: &Site) -> String {
        match self {
            Self::None => "1".to_string(),
            Self::Site => site.id.to_string(),
            Self::SiteGroup => site.group_id.to_string(),
            Self::Language => site.language.clone(),
            Self::Custom(template) => render_key_template(template, site),
        }
    }

    /// Returns `true` when `a` and `b` share values under this method.
    pub fn shares_between(&self, a: &Site, b: &Site) -> bool {
        self.translation_key(a) == self.translation_key(b)
    }

    /// Returns `true` if the value is distinct for at least some sites.
    pub fn is_translatable(&self) -> bool {
        !matches!(self, Self::None)
    }
}

fn render_key_template(template: &str, site: &Site) -> String {
    TEMPLATE_TOKEN_RE
        .replace_all(template, |caps: &regex::Captures| match &caps[1] {
            "id" => site.id.to_string(),
            "handle" => site.handle.clone(),
            "language" => site.language.clone(),
            "group" => site.group_id.to_string(),
            other => format!("{{site.{other}}}"),
        })
        .into_owned()
}
