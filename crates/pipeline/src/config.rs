//! Engine configuration loaded from environment variables.

use vellum_core::jobs::DEFAULT_SEARCH_JOB_PRIORITY;

/// How saves refresh the search index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchIndexMode {
    /// Index synchronously from console contexts, queue a job otherwise.
    #[default]
    Auto,
    Sync,
    Queue,
}

impl std::str::FromStr for SearchIndexMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "sync" => Ok(Self::Sync),
            "queue" => Ok(Self::Queue),
            other => Err(format!("unknown search index mode '{other}'")),
        }
    }
}

/// Behaviour switches for the element engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Record changed attributes and fields after updates.
    pub track_changes: bool,
    /// Default for bulk operations: log and skip failing elements.
    pub continue_on_error: bool,
    /// During bulk resaves, leave alone sites updated more recently than
    /// the source site.
    pub skip_newer_site_updates: bool,
    pub search_index_mode: SearchIndexMode,
    /// Priority of queued search index jobs. Lower runs sooner.
    pub search_job_priority: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            track_changes: true,
            continue_on_error: false,
            skip_newer_site_updates: true,
            search_index_mode: SearchIndexMode::Auto,
            search_job_priority: DEFAULT_SEARCH_JOB_PRIORITY,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                            | Default |
    /// |------------------------------------|---------|
    /// | `ELEMENTS_TRACK_CHANGES`           | `true`  |
    /// | `ELEMENTS_CONTINUE_ON_ERROR`       | `false` |
    /// | `ELEMENTS_SKIP_NEWER_SITE_UPDATES` | `true`  |
    /// | `ELEMENTS_SEARCH_INDEX_MODE`       | `auto`  |
    /// | `ELEMENTS_SEARCH_JOB_PRIORITY`     | `2048`  |
    ///
    /// Unparseable values fall back to the default with a warning.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            track_changes: env_or("ELEMENTS_TRACK_CHANGES", defaults.track_changes),
            continue_on_error: env_or("ELEMENTS_CONTINUE_ON_ERROR", defaults.continue_on_error),
            skip_newer_site_updates: env_or(
                "ELEMENTS_SKIP_NEWER_SITE_UPDATES",
                defaults.skip_newer_site_updates,
            ),
            search_index_mode: env_or("ELEMENTS_SEARCH_INDEX_MODE", defaults.search_index_mode),
            search_job_priority: env_or("ELEMENTS_SEARCH_JOB_PRIORITY", defaults.search_job_priority),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring unparseable config value");
            default
        }),
        Err(_) => default,
    }
}
