//! Request-scoped state threaded through every engine call.

use vellum_core::cache_tags::CacheTagLedger;
use vellum_core::placeholders::PlaceholderRegistry;
use vellum_core::types::DbId;

/// Where the current request is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionContext {
    /// A web request: keep transactions short and defer slow work.
    #[default]
    Interactive,
    /// A console command or worker, where waiting is fine.
    Console,
}

/// State for one logical request.
///
/// Holds the cache tag ledger and the placeholder registry. Neither is
/// safe to share between requests; create one unit of work per request
/// and drop it at the end.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    /// The user performing the work, recorded on change records and events.
    pub actor_id: Option<DbId>,
    pub context: ExecutionContext,
    pub ledger: CacheTagLedger,
    pub placeholders: PlaceholderRegistry,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn console() -> Self {
        Self {
            context: ExecutionContext::Console,
            ..Self::default()
        }
    }

    pub fn with_actor(mut self, actor_id: DbId) -> Self {
        self.actor_id = Some(actor_id);
        self
    }
}
