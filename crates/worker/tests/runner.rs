//! Job runner and search index handler against the in-memory store.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use vellum_core::element::Element;
use vellum_core::element_type::{ElementType, FieldDefinition, TypeRegistry};
use vellum_core::jobs::{JobDescriptor, SearchIndexPayload};
use vellum_core::types::{DbId, SiteId};
use vellum_db::{ContentStore, MemorySearchIndex, MemoryStore};
use vellum_worker::{
    ClaimedJob, IndexOutcome, JobRunner, JobSource, SearchIndexHandler, WorkerConfig, WorkerError,
};

const SITE: SiteId = 1;

struct EntryType;

impl ElementType for EntryType {
    fn type_tag(&self) -> &str {
        "entry"
    }

    fn field_layout(&self, _element: &Element) -> Vec<FieldDefinition> {
        vec![
            FieldDefinition::translatable("body").searchable(),
            FieldDefinition::translatable("notes"),
        ]
    }
}

/// An in-process queue that remembers how each job ended.
#[derive(Default)]
struct QueueSource {
    waiting: Mutex<VecDeque<ClaimedJob>>,
    completed: Mutex<Vec<DbId>>,
    failures: Mutex<BTreeMap<DbId, String>>,
}

impl QueueSource {
    fn with_jobs(jobs: Vec<JobDescriptor>) -> Self {
        let source = Self::default();
        source.waiting.lock().unwrap().extend(
            jobs.into_iter()
                .enumerate()
                .map(|(i, descriptor)| ClaimedJob {
                    id: i as DbId + 1,
                    descriptor,
                    attempts: 0,
                }),
        );
        source
    }
}

#[async_trait]
impl JobSource for QueueSource {
    async fn claim_next(&self) -> Result<Option<ClaimedJob>, WorkerError> {
        Ok(self.waiting.lock().unwrap().pop_front().map(|mut job| {
            job.attempts += 1;
            job
        }))
    }

    async fn complete(&self, id: DbId) -> Result<(), WorkerError> {
        self.completed.lock().unwrap().push(id);
        Ok(())
    }

    async fn fail(&self, id: DbId, error: &str, _max_attempts: i32) -> Result<bool, WorkerError> {
        self.failures.lock().unwrap().insert(id, error.to_string());
        Ok(false)
    }
}

async fn stored_entry(store: &MemoryStore, title: &str) -> Element {
    let mut tx = store.begin().await.unwrap();
    let mut element = Element::new("entry", SITE)
        .with_title(title)
        .with_field("body", json!("Searchable Words"))
        .with_field("notes", json!("private"));
    tx.insert_element(&mut element).await.unwrap();
    tx.upsert_site_row(&mut element).await.unwrap();
    tx.commit().await.unwrap();
    element
}

fn index_job(element_id: DbId, field_handles: Option<Vec<String>>) -> JobDescriptor {
    SearchIndexPayload {
        element_type: "entry".into(),
        element_id,
        site_id: SITE,
        field_handles,
    }
    .into_job(2048)
    .unwrap()
}

fn handler(store: &MemoryStore, search: &Arc<MemorySearchIndex>) -> SearchIndexHandler {
    SearchIndexHandler::new(
        Arc::new(store.clone()),
        TypeRegistry::new().with(Arc::new(EntryType)),
        search.clone(),
    )
}

fn attributes(search: &MemorySearchIndex, element_id: DbId) -> Vec<String> {
    search
        .keywords(element_id, SITE)
        .into_iter()
        .map(|k| k.attribute)
        .collect()
}

#[tokio::test]
async fn test_index_job_uses_searchable_fields() {
    let store = MemoryStore::new();
    let search = Arc::new(MemorySearchIndex::new());
    let id = stored_entry(&store, "Hello World").await.id.unwrap();

    let outcome = handler(&store, &search).handle(&index_job(id, None)).await.unwrap();

    assert_eq!(outcome, IndexOutcome::Indexed);
    let keywords = search.keywords(id, SITE);
    let body = keywords.iter().find(|k| k.attribute == "field:body").unwrap();
    assert_eq!(body.keywords, "searchable words");
    assert!(!attributes(&search, id).contains(&"field:notes".to_string()));
}

#[tokio::test]
async fn test_index_job_honours_explicit_handles() {
    let store = MemoryStore::new();
    let search = Arc::new(MemorySearchIndex::new());
    let id = stored_entry(&store, "Notes").await.id.unwrap();

    handler(&store, &search)
        .handle(&index_job(id, Some(vec!["notes".into()])))
        .await
        .unwrap();

    let attrs = attributes(&search, id);
    assert!(attrs.contains(&"field:notes".to_string()));
    assert!(!attrs.contains(&"field:body".to_string()));
}

#[tokio::test]
async fn test_missing_element_drops_its_keywords() {
    let store = MemoryStore::new();
    let search = Arc::new(MemorySearchIndex::new());
    let element = stored_entry(&store, "Gone").await;
    let id = element.id.unwrap();
    let handler = handler(&store, &search);
    handler.handle(&index_job(id, None)).await.unwrap();

    let mut tx = store.begin().await.unwrap();
    tx.hard_delete(id).await.unwrap();
    tx.commit().await.unwrap();

    let outcome = handler.handle(&index_job(id, None)).await.unwrap();
    assert_eq!(outcome, IndexOutcome::Removed);
    assert!(search.keywords(id, SITE).is_empty());
}

#[tokio::test]
async fn test_trashed_element_keeps_its_keywords() {
    let store = MemoryStore::new();
    let search = Arc::new(MemorySearchIndex::new());
    let id = stored_entry(&store, "Trashed").await.id.unwrap();
    let handler = handler(&store, &search);
    handler.handle(&index_job(id, None)).await.unwrap();

    let mut tx = store.begin().await.unwrap();
    tx.soft_delete(id, chrono::Utc::now(), false).await.unwrap();
    tx.commit().await.unwrap();

    let outcome = handler.handle(&index_job(id, None)).await.unwrap();
    assert_eq!(outcome, IndexOutcome::Skipped);
    assert!(!search.keywords(id, SITE).is_empty());
}

#[tokio::test]
async fn test_malformed_payload_is_an_error() {
    let store = MemoryStore::new();
    let search = Arc::new(MemorySearchIndex::new());
    let job = JobDescriptor::new("update_search_index", json!({ "element_id": "x" }));

    let err = handler(&store, &search).handle(&job).await.unwrap_err();
    assert_matches!(err, WorkerError::Core(_));
}

#[tokio::test]
async fn test_run_once_completes_and_fails_jobs() {
    let store = MemoryStore::new();
    let search = Arc::new(MemorySearchIndex::new());
    let id = stored_entry(&store, "Queued").await.id.unwrap();
    let source = Arc::new(QueueSource::with_jobs(vec![
        index_job(id, None),
        JobDescriptor::new("send_newsletter", json!({})),
    ]));
    let runner = JobRunner::new(source.clone(), handler(&store, &search), WorkerConfig::default());

    assert!(runner.run_once().await.unwrap());
    assert!(runner.run_once().await.unwrap());
    assert!(!runner.run_once().await.unwrap(), "queue is drained");

    assert_eq!(*source.completed.lock().unwrap(), vec![1]);
    let failures = source.failures.lock().unwrap();
    assert!(failures[&2].contains("send_newsletter"));
    assert!(!search.keywords(id, SITE).is_empty());
}

#[tokio::test]
async fn test_run_drains_the_queue_then_stops_on_cancel() {
    let store = MemoryStore::new();
    let search = Arc::new(MemorySearchIndex::new());
    let first = stored_entry(&store, "First").await.id.unwrap();
    let second = stored_entry(&store, "Second").await.id.unwrap();
    let source = Arc::new(QueueSource::with_jobs(vec![
        index_job(first, None),
        index_job(second, None),
    ]));
    let config = WorkerConfig {
        poll_interval: Duration::from_millis(10),
        ..WorkerConfig::default()
    };
    let runner = JobRunner::new(source.clone(), handler(&store, &search), config);

    let cancel = CancellationToken::new();
    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { runner.run(cancel).await })
    };
    while source.completed.lock().unwrap().len() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("runner stops after cancel")
        .unwrap();

    assert!(!search.keywords(first, SITE).is_empty());
    assert!(!search.keywords(second, SITE).is_empty());
}
