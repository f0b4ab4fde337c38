//! Element lifecycle hooks.
//!
//! Hooks run around saves, deletes and restores. A `before_*` hook may
//! veto the operation; the engine then returns without writing anything.
//! `after_*` hooks run once the transaction has committed.

use std::sync::Arc;

use async_trait::async_trait;
use vellum_core::element::Element;

/// What a `before_*` hook wants to happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    Proceed,
    Veto(String),
}

impl HookDecision {
    pub fn is_veto(&self) -> bool {
        matches!(self, Self::Veto(_))
    }
}

#[async_trait]
pub trait ElementHook: Send + Sync {
    async fn before_save(&self, element: &Element, is_new: bool) -> HookDecision {
        let _ = (element, is_new);
        HookDecision::Proceed
    }

    async fn after_save(&self, element: &Element, is_new: bool) {
        let _ = (element, is_new);
    }

    async fn before_delete(&self, element: &Element, hard: bool) -> HookDecision {
        let _ = (element, hard);
        HookDecision::Proceed
    }

    async fn after_delete(&self, element: &Element, hard: bool) {
        let _ = (element, hard);
    }

    async fn before_restore(&self, element: &Element) -> HookDecision {
        let _ = element;
        HookDecision::Proceed
    }

    async fn after_restore(&self, element: &Element) {
        let _ = element;
    }
}

/// Registered hooks, run in registration order. The first veto wins.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn ElementHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn ElementHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub async fn before_save(&self, element: &Element, is_new: bool) -> HookDecision {
        for hook in &self.hooks {
            let decision = hook.before_save(element, is_new).await;
            if decision.is_veto() {
                return decision;
            }
        }
        HookDecision::Proceed
    }

    pub async fn after_save(&self, element: &Element, is_new: bool) {
        for hook in &self.hooks {
            hook.after_save(element, is_new).await;
        }
    }

    pub async fn before_delete(&self, element: &Element, hard: bool) -> HookDecision {
        for hook in &self.hooks {
            let decision = hook.before_delete(element, hard).await;
            if decision.is_veto() {
                return decision;
            }
        }
        HookDecision::Proceed
    }

    pub async fn after_delete(&self, element: &Element, hard: bool) {
        for hook in &self.hooks {
            hook.after_delete(element, hard).await;
        }
    }

    pub async fn before_restore(&self, element: &Element) -> HookDecision {
        for hook in &self.hooks {
            let decision = hook.before_restore(element).await;
            if decision.is_veto() {
                return decision;
            }
        }
        HookDecision::Proceed
    }

    pub async fn after_restore(&self, element: &Element) {
        for hook in &self.hooks {
            hook.after_restore(element).await;
        }
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry").field("hooks", &self.hooks.len()).finish()
    }
}
