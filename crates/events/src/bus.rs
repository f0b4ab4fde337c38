//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`ElementEvent`]s. Share
//! it via `Arc<EventBus>`; the engine publishes only after a transaction
//! commits, so subscribers never see events for rolled-back writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use vellum_core::element::Element;
use vellum_core::types::{DbId, SiteId};

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Saved,
    Propagated,
    Duplicated,
    Deleted,
    Restored,
}

impl EventKind {
    /// Dot-separated event name, e.g. `"element.saved"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Saved => "element.saved",
            Self::Propagated => "element.propagated",
            Self::Duplicated => "element.duplicated",
            Self::Deleted => "element.deleted",
            Self::Restored => "element.restored",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ElementEvent
// ---------------------------------------------------------------------------

/// Something that happened to an element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementEvent {
    pub kind: EventKind,
    pub element_id: Option<DbId>,
    pub site_id: Option<SiteId>,
    pub type_tag: Option<String>,
    /// The user that triggered the event.
    pub actor_user_id: Option<DbId>,
    /// Event-specific data, e.g. `{"is_new": true}`.
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl ElementEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            element_id: None,
            site_id: None,
            type_tag: None,
            actor_user_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Build an event describing `element` in its current site.
    pub fn for_element(kind: EventKind, element: &Element) -> Self {
        let mut event = Self::new(kind);
        event.element_id = element.id;
        event.site_id = Some(element.site_id);
        event.type_tag = Some(element.type_tag.clone());
        event
    }

    pub fn with_actor(mut self, user_id: Option<DbId>) -> Self {
        self.actor_user_id = user_id;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
pub struct EventBus {
    sender: broadcast::Sender<ElementEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// With no subscribers the event is dropped.
    pub fn publish(&self, event: ElementEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ElementEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_element_events() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let mut element = Element::new("entry", 2);
        element.id = Some(42);
        bus.publish(
            ElementEvent::for_element(EventKind::Saved, &element)
                .with_actor(Some(7))
                .with_payload(serde_json::json!({"is_new": true})),
        );

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");
        assert_eq!(e1.kind, EventKind::Saved);
        assert_eq!(e1.element_id, Some(42));
        assert_eq!(e1.site_id, Some(2));
        assert_eq!(e1.type_tag.as_deref(), Some("entry"));
        assert_eq!(e1.actor_user_id, Some(7));
        assert_eq!(e1.payload["is_new"], true);
        assert_eq!(e2.kind, EventKind::Saved);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        EventBus::default().publish(ElementEvent::new(EventKind::Deleted));
    }

    #[test]
    fn event_names() {
        assert_eq!(EventKind::Restored.to_string(), "element.restored");
        assert_eq!(EventKind::Propagated.as_str(), "element.propagated");
    }
}
