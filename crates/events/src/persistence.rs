//! Durable event persistence service.
//!
//! [`EventPersistence`] subscribes to the [`EventBus`](crate::bus::EventBus)
//! and writes every received [`ElementEvent`] to the `element_events`
//! table. It runs as a long-lived background task and exits when the bus
//! is dropped.

use tokio::sync::broadcast;
use vellum_core::types::DbId;
use vellum_db::models::event::CreateElementEvent;
use vellum_db::repositories::EventRepo;
use vellum_db::DbPool;

use crate::bus::ElementEvent;

pub struct EventPersistence;

impl EventPersistence {
    /// Run the persistence loop until the channel closes.
    pub async fn run(pool: DbPool, mut receiver: broadcast::Receiver<ElementEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Err(e) = Self::persist(&pool, &event).await {
                        tracing::error!(
                            error = %e,
                            event_type = %event.kind,
                            element_id = ?event.element_id,
                            "Failed to persist event"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event persistence lagged, some events were not persisted");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, persistence shutting down");
                    break;
                }
            }
        }
    }

    async fn persist(pool: &DbPool, event: &ElementEvent) -> Result<DbId, sqlx::Error> {
        EventRepo::insert(pool, &to_row(event)).await
    }
}

fn to_row(event: &ElementEvent) -> CreateElementEvent {
    CreateElementEvent {
        event_type: event.kind.as_str().to_string(),
        element_id: event.element_id,
        site_id: event.site_id,
        type_tag: event.type_tag.clone(),
        actor_id: event.actor_user_id,
        payload: event.payload.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventKind;

    #[test]
    fn row_carries_event_name_and_source() {
        let mut event = ElementEvent::new(EventKind::Duplicated).with_actor(Some(3));
        event.element_id = Some(9);
        event.type_tag = Some("entry".into());
        let row = to_row(&event);
        assert_eq!(row.event_type, "element.duplicated");
        assert_eq!(row.element_id, Some(9));
        assert_eq!(row.type_tag.as_deref(), Some("entry"));
        assert_eq!(row.actor_id, Some(3));
    }
}
