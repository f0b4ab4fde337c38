//! The engine wired to PostgreSQL, with events written to the event log.
//!
//! Needs a live database (`DATABASE_URL`); ignored by default:
//! `cargo test -p vellum-pipeline -- --ignored`.

mod common;

use std::sync::Arc;

use common::{entry, sites, types};
use sqlx::PgPool;
use vellum_core::cache_tags::TaggedCache;
use vellum_db::repositories::EventRepo;
use vellum_db::PgContentStore;
use vellum_pipeline::{Collaborators, ElementService, SaveOptions, UnitOfWork};

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn test_published_events_reach_the_event_log(pool: PgPool) {
    let (collaborators, persistence) = Collaborators::postgres(pool.clone(), Arc::new(TaggedCache::new()));
    let service = ElementService::new(
        Arc::new(PgContentStore::new(pool.clone())),
        types(),
        sites(),
        collaborators,
    );

    let mut element = entry("Logged");
    assert!(service
        .save(&mut UnitOfWork::new(), &mut element, SaveOptions::default())
        .await
        .unwrap());
    let id = element.id.unwrap();

    drop(service);
    persistence.await.unwrap();

    let rows = EventRepo::list_for_element(&pool, id).await.unwrap();
    assert!(rows.iter().any(|r| r.event_type == "element.saved"));
    assert!(rows.iter().all(|r| r.type_tag.as_deref() == Some("entry")));
}
