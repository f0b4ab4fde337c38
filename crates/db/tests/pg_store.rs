//! Integration tests for the PostgreSQL content store.
//!
//! These need a live database (`DATABASE_URL`) and are ignored by default:
//! `cargo test -p vellum-db -- --ignored`.

use std::time::Duration;

use serde_json::json;
use sqlx::PgPool;
use vellum_core::element::{ChangeKind, ChangeRecord, Element};
use vellum_core::jobs::JobDescriptor;
use vellum_core::query::{ElementQuery, TrashFilter};
use vellum_core::search::SearchIndexer;
use vellum_core::structure::StructureMode;
use vellum_db::repositories::{ChangeRepo, JobRepo};
use vellum_db::{ContentStore, OwnedFilter, PgContentStore, PgSearchIndexer};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn save_new(store: &PgContentStore, element: Element) -> Element {
    let mut element = element;
    let mut tx = store.begin().await.unwrap();
    tx.insert_element(&mut element).await.unwrap();
    tx.upsert_site_row(&mut element).await.unwrap();
    tx.commit().await.unwrap();
    element
}

// ---------------------------------------------------------------------------
// Elements and site rows
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn test_insert_and_query_round_trip(pool: PgPool) {
    let store = PgContentStore::new(pool);
    let saved = save_new(
        &store,
        Element::new("entry", 1)
            .with_title("Hello")
            .with_slug("hello")
            .with_field("body", json!("Body text")),
    )
    .await;

    let found = store
        .query(&ElementQuery::new(1).id(saved.id.unwrap()))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].title(), Some("Hello"));
    assert_eq!(found[0].field_value("body"), Some(&json!("Body text")));
    assert_eq!(found[0].uid, saved.uid);
    assert!(!found[0].is_dirty());

    let other_site = store.query(&ElementQuery::new(2)).await.unwrap();
    assert!(other_site.is_empty(), "no row exists in site 2");
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn test_rollback_discards_everything(pool: PgPool) {
    let store = PgContentStore::new(pool);
    let mut element = Element::new("entry", 1).with_title("Gone");
    let mut tx = store.begin().await.unwrap();
    tx.insert_element(&mut element).await.unwrap();
    tx.upsert_site_row(&mut element).await.unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(store.count(&ElementQuery::new(1)).await.unwrap(), 0);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn test_unchanged_site_row_keeps_timestamp(pool: PgPool) {
    let store = PgContentStore::new(pool);
    let mut element = save_new(&store, Element::new("entry", 1).with_title("Same")).await;
    let first = element.site_date_updated;

    let mut tx = store.begin().await.unwrap();
    tx.upsert_site_row(&mut element).await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(element.site_date_updated, first);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn test_soft_delete_restore_and_owned_filter(pool: PgPool) {
    let store = PgContentStore::new(pool);
    let owner = save_new(&store, Element::new("entry", 1).with_title("Owner")).await;
    let owner_id = owner.id.unwrap();
    let block = save_new(&store, Element::new("block", 1).owned_by(owner_id)).await;
    let block_id = block.id.unwrap();

    let mut tx = store.begin().await.unwrap();
    assert!(tx.soft_delete(owner_id, chrono::Utc::now(), false).await.unwrap());
    assert!(tx.soft_delete(block_id, chrono::Utc::now(), true).await.unwrap());
    assert_eq!(
        tx.owned_element_ids(owner_id, OwnedFilter::DeletedWithOwner).await.unwrap(),
        vec![block_id]
    );
    assert!(tx
        .find_element(owner_id, 1, TrashFilter::Exclude)
        .await
        .unwrap()
        .is_none());
    assert!(tx.restore(owner_id).await.unwrap());
    assert!(!tx.restore(owner_id).await.unwrap(), "second restore is a no-op");
    tx.commit().await.unwrap();
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn test_uri_uniqueness_ignores_self_and_trash(pool: PgPool) {
    let store = PgContentStore::new(pool);
    let mut a = Element::new("entry", 1).with_title("A");
    a.set_uri(Some("news/a".into()));
    let a = save_new(&store, a).await;

    let mut tx = store.begin().await.unwrap();
    assert!(tx.uri_taken(1, "news/a", None).await.unwrap());
    assert!(!tx.uri_taken(1, "news/a", a.id).await.unwrap());
    assert!(!tx.uri_taken(2, "news/a", None).await.unwrap());
    tx.soft_delete(a.id.unwrap(), chrono::Utc::now(), false).await.unwrap();
    assert!(!tx.uri_taken(1, "news/a", None).await.unwrap());
}

// ---------------------------------------------------------------------------
// Structures
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn test_structure_write_back(pool: PgPool) {
    let store = PgContentStore::new(pool);
    let parent = save_new(&store, Element::new("entry", 1).with_title("P")).await.id.unwrap();
    let child = save_new(&store, Element::new("entry", 1).with_title("C")).await.id.unwrap();

    let mut tx = store.begin().await.unwrap();
    let mut tree = tx.load_structure(5, Some(3)).await.unwrap();
    tree.append_to_root(parent, StructureMode::Insert).unwrap();
    tree.append(child, parent, StructureMode::Insert).unwrap();
    tx.save_structure(&mut tree).await.unwrap();

    tree.remove(parent).unwrap();
    tx.save_structure(&mut tree).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let reloaded = tx.load_structure(5, None).await.unwrap();
    reloaded.check_invariants().unwrap();
    assert_eq!(reloaded.ordered(), vec![child]);
    assert_eq!(reloaded.position(child).unwrap().level, 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn test_concurrent_structure_writers_are_serialized(pool: PgPool) {
    let store = PgContentStore::new(pool);
    let first = save_new(&store, Element::new("entry", 1).with_title("A")).await.id.unwrap();
    let second = save_new(&store, Element::new("entry", 1).with_title("B")).await.id.unwrap();

    let mut tx = store.begin().await.unwrap();
    let mut tree = tx.load_structure(6, None).await.unwrap();
    tree.append_to_root(first, StructureMode::Insert).unwrap();
    tx.save_structure(&mut tree).await.unwrap();

    let other = store.clone();
    let waiting = tokio::spawn(async move {
        let mut tx = other.begin().await.unwrap();
        let mut tree = tx.load_structure(6, None).await.unwrap();
        tree.append_to_root(second, StructureMode::Insert).unwrap();
        tx.save_structure(&mut tree).await.unwrap();
        tx.commit().await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!waiting.is_finished(), "second writer waits for the first to commit");

    tx.commit().await.unwrap();
    waiting.await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let reloaded = tx.load_structure(6, None).await.unwrap();
    reloaded.check_invariants().unwrap();
    assert_eq!(reloaded.ordered(), vec![first, second]);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn test_duplicate_lft_is_rejected_at_commit(pool: PgPool) {
    let store = PgContentStore::new(pool.clone());
    let first = save_new(&store, Element::new("entry", 1).with_title("A")).await.id.unwrap();
    let second = save_new(&store, Element::new("entry", 1).with_title("B")).await.id.unwrap();
    let mut tx = store.begin().await.unwrap();
    let mut tree = tx.load_structure(7, None).await.unwrap();
    tree.append_to_root(first, StructureMode::Insert).unwrap();
    tx.save_structure(&mut tree).await.unwrap();
    tx.commit().await.unwrap();

    let mut conn = pool.begin().await.unwrap();
    sqlx::query(
        "INSERT INTO structure_elements (structure_id, element_id, lft, rgt, level) \
         VALUES (7, $1, 2, 3, 1)",
    )
    .bind(second)
    .execute(&mut *conn)
    .await
    .unwrap();
    assert!(conn.commit().await.is_err());
}

// ---------------------------------------------------------------------------
// Change tracking, search, jobs
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn test_change_records_upsert(pool: PgPool) {
    let store = PgContentStore::new(pool.clone());
    let id = save_new(&store, Element::new("entry", 1).with_title("T")).await.id.unwrap();
    let change = ChangeRecord {
        element_id: id,
        site_id: 1,
        kind: ChangeKind::Attribute,
        handle: "title".into(),
        date_updated: chrono::Utc::now(),
        propagated: false,
        user_id: Some(3),
    };
    let mut tx = store.begin().await.unwrap();
    tx.record_changes(&[change.clone(), change]).await.unwrap();
    tx.commit().await.unwrap();

    let mut conn = pool.acquire().await.unwrap();
    let attrs = ChangeRepo::changed_attributes(&mut conn, id).await.unwrap();
    assert_eq!(attrs, vec!["title"]);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn test_search_index_replace_and_search(pool: PgPool) {
    let indexer = PgSearchIndexer::new(pool);
    let mut element = Element::new("entry", 1)
        .with_title("Quarterly Report")
        .with_field("body", json!("Revenue grew"));
    element.id = Some(42);
    indexer.index_element(&element, &["body".to_string()]).await.unwrap();

    assert_eq!(indexer.search(1, "revenue").await.unwrap(), vec![42]);
    assert!(indexer.search(2, "revenue").await.unwrap().is_empty());

    indexer.delete_element(42).await.unwrap();
    assert!(indexer.search(1, "quarterly").await.unwrap().is_empty());
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn test_job_claim_order_and_retry(pool: PgPool) {
    let low = JobRepo::push(&pool, &JobDescriptor::new("a", json!({})).with_priority(100))
        .await
        .unwrap();
    let urgent = JobRepo::push(&pool, &JobDescriptor::new("b", json!({})).with_priority(1))
        .await
        .unwrap();

    let first = JobRepo::claim_next(&pool).await.unwrap().unwrap();
    assert_eq!(first.id, urgent, "lower priority value runs first");
    assert!(JobRepo::fail(&pool, first.id, "boom", 2).await.unwrap());

    let second = JobRepo::claim_next(&pool).await.unwrap().unwrap();
    assert_eq!(second.id, urgent, "retried job is claimable again");
    assert!(!JobRepo::fail(&pool, second.id, "boom", 2).await.unwrap());

    let third = JobRepo::claim_next(&pool).await.unwrap().unwrap();
    assert_eq!(third.id, low);
    JobRepo::complete(&pool, third.id).await.unwrap();
    assert!(JobRepo::claim_next(&pool).await.unwrap().is_none());
}
