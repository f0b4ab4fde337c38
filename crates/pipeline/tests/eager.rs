//! Eager loading against the in-memory store, counting the queries issued.

mod common;

use common::{asset, entry, harness, saved, user, Harness, EN, FR};
use serde_json::json;
use vellum_core::eager::{EagerCriteria, EagerLoadSpec};
use vellum_core::element::Element;
use vellum_core::query::{OrderBy, OrderColumn};
use vellum_core::types::DbId;
use vellum_db::QueryShape;

struct Blog {
    entries: Vec<Element>,
    alice: DbId,
    bob: DbId,
}

/// Two users with photos and three entries: two by Alice, one by both.
async fn blog(h: &Harness) -> Blog {
    let alice_photo = saved(h, asset("alice.jpg")).await.id.unwrap();
    let bob_photo = saved(h, asset("bob.jpg")).await.id.unwrap();
    let alice = saved(h, user("Alice").with_field("photo", json!([alice_photo])))
        .await
        .id
        .unwrap();
    let bob = saved(h, user("Bob").with_field("photo", json!([bob_photo])))
        .await
        .id
        .unwrap();

    let mut entries = Vec::new();
    for (title, authors) in [
        ("First", json!([alice])),
        ("Second", json!([alice])),
        ("Third", json!([bob, alice])),
    ] {
        entries.push(saved(h, entry(title).with_field("author", authors)).await);
    }
    Blog {
        entries,
        alice,
        bob,
    }
}

fn ids(elements: &[Element]) -> Vec<DbId> {
    elements.iter().filter_map(|e| e.id).collect()
}

#[tokio::test]
async fn test_nested_paths_batch_one_query_per_level() {
    let h = harness();
    let Blog {
        mut entries,
        alice,
        bob,
    } = blog(&h).await;
    h.store.clear_query_log();

    h.loader()
        .load(&mut entries, ["author", "author.photo"])
        .await
        .unwrap();

    let log = h.store.query_log();
    assert_eq!(log.len(), 2, "one query for authors, one for photos: {log:?}");
    assert_eq!(log[0].query.type_tag.as_deref(), Some("user"));
    assert_eq!(log[0].query.ids.as_ref().map(Vec::len), Some(2), "unique author ids");
    assert_eq!(log[1].query.type_tag.as_deref(), Some("asset"));
    assert!(log.iter().all(|q| q.shape == QueryShape::Elements));

    let first_authors = entries[0].eager_loaded_elements("author").unwrap();
    assert_eq!(ids(first_authors), vec![alice]);
    let photos = first_authors[0].eager_loaded_elements("photo").unwrap();
    assert_eq!(photos[0].title(), Some("alice.jpg"));

    let third_authors = entries[2].eager_loaded_elements("author").unwrap();
    assert_eq!(ids(third_authors), vec![bob, alice], "map order is kept");
}

#[tokio::test]
async fn test_count_only_plan_attaches_counts() {
    let h = harness();
    let Blog { mut entries, .. } = blog(&h).await;
    h.store.clear_query_log();

    h.loader()
        .load(
            &mut entries,
            [EagerLoadSpec::path("author").with_criteria(EagerCriteria::count())],
        )
        .await
        .unwrap();

    let log = h.store.query_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].shape, QueryShape::Ids, "targets are counted, not loaded");

    let counts: Vec<_> = entries
        .iter()
        .map(|e| e.eager_loaded_count("author"))
        .collect();
    assert_eq!(counts, vec![Some(1), Some(1), Some(2)]);
    assert!(entries[0].eager_loaded_elements("author").is_none());
}

#[tokio::test]
async fn test_limit_applies_per_source() {
    let h = harness();
    let Blog {
        mut entries,
        alice,
        bob,
    } = blog(&h).await;

    h.loader()
        .load(
            &mut entries,
            [("author", EagerCriteria::new().with_limit(1))],
        )
        .await
        .unwrap();

    for entry in &entries {
        assert_eq!(entry.eager_loaded_elements("author").unwrap().len(), 1);
    }
    assert_eq!(ids(entries[2].eager_loaded_elements("author").unwrap()), vec![bob]);
    assert_eq!(ids(entries[0].eager_loaded_elements("author").unwrap()), vec![alice]);
}

#[tokio::test]
async fn test_custom_order_uses_query_order() {
    let h = harness();
    let Blog {
        mut entries,
        alice,
        bob,
    } = blog(&h).await;

    h.loader()
        .load(
            &mut entries,
            [(
                "author",
                EagerCriteria::new().with_order(OrderBy::asc(OrderColumn::Title)),
            )],
        )
        .await
        .unwrap();

    assert_eq!(
        ids(entries[2].eager_loaded_elements("author").unwrap()),
        vec![alice, bob]
    );
}

#[tokio::test]
async fn test_map_default_order_keeps_pair_order() {
    let h = harness();
    let Blog {
        mut entries,
        alice,
        bob,
    } = blog(&h).await;
    h.store.clear_query_log();

    h.loader().load(&mut entries, ["editors"]).await.unwrap();

    let log = h.store.query_log();
    assert_eq!(log[0].query.order_by.len(), 1, "map order still reaches the query");
    assert_eq!(
        ids(entries[2].eager_loaded_elements("editors").unwrap()),
        vec![bob, alice]
    );
}

#[tokio::test]
async fn test_aliases_and_conditions() {
    let h = harness();
    let Blog { mut entries, .. } = blog(&h).await;

    h.loader()
        .load(
            &mut entries,
            [EagerLoadSpec::path("author as writers").when(|e| e.title() == Some("Third"))],
        )
        .await
        .unwrap();

    assert!(entries[0].eager_loaded_elements("writers").is_none());
    assert_eq!(entries[2].eager_loaded_elements("writers").unwrap().len(), 2);
}

#[tokio::test]
async fn test_sources_in_different_sites_are_loaded_separately() {
    let h = harness();
    let Blog { entries, .. } = blog(&h).await;
    let entry_id = entries[0].id.unwrap();
    let mut mixed = vec![
        h.find(entry_id, EN).await.unwrap(),
        h.find(entry_id, FR).await.unwrap(),
    ];
    h.store.clear_query_log();

    h.loader().load(&mut mixed, ["author"]).await.unwrap();

    let sites: Vec<_> = h.store.query_log().iter().map(|q| q.query.site_id).collect();
    assert_eq!(sites, vec![EN, FR]);
    // Users only exist in the primary site.
    assert_eq!(mixed[0].eager_loaded_elements("author").unwrap().len(), 1);
    assert!(mixed[1].eager_loaded_elements("author").unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_relations_are_skipped() {
    let h = harness();
    let Blog { mut entries, .. } = blog(&h).await;
    h.store.clear_query_log();

    h.loader().load(&mut entries, ["comments"]).await.unwrap();

    assert!(h.store.query_log().is_empty());
    assert!(entries.iter().all(|e| !e.has_eager_loaded("comments")));
}

#[tokio::test]
async fn test_invalid_paths_are_rejected() {
    let h = harness();
    let mut entries: Vec<Element> = Vec::new();
    assert!(h.loader().load(&mut entries, ["author..photo"]).await.is_err());
}
