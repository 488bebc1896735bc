//! Write-behind journal tests.

use crate::agent::domain::AgentId;
use crate::error::{Classify, ErrorClass};
use crate::persistence::adapters::memory::InMemoryDocumentStore;
use crate::persistence::domain::{Collection, Document, DocumentKey, EntityRef};
use crate::persistence::ports::{
    DocumentStore, DocumentStoreError, DocumentStoreResult, SnapshotSource,
};
use crate::persistence::services::{Journal, JournalError, JournalReport};
use crate::task::domain::TaskId;
use async_trait::async_trait;
use mockable::DefaultClock;
use mockall::mock;
use rstest::rstest;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

mock! {
    Store {}

    #[async_trait]
    impl DocumentStore for Store {
        async fn put(&self, document: Document) -> DocumentStoreResult<()>;
        async fn get(&self, key: &DocumentKey) -> DocumentStoreResult<Option<Document>>;
        async fn delete(&self, key: &DocumentKey) -> DocumentStoreResult<bool>;
        async fn list(&self, collection: Collection) -> DocumentStoreResult<Vec<Document>>;
    }
}

/// Snapshot source backed by a plain map; absent entries read as deleted.
#[derive(Default)]
struct MapSource {
    bodies: Mutex<HashMap<EntityRef, Value>>,
    broken: Mutex<Option<EntityRef>>,
}

impl MapSource {
    fn set(&self, entity: EntityRef, body: Value) {
        self.bodies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity, body);
    }

    fn remove(&self, entity: EntityRef) {
        self.bodies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&entity);
    }

    fn break_on(&self, entity: EntityRef) {
        *self.broken.lock().unwrap_or_else(PoisonError::into_inner) = Some(entity);
    }
}

impl SnapshotSource for MapSource {
    fn snapshot(&self, entity: EntityRef) -> DocumentStoreResult<Option<Value>> {
        if *self.broken.lock().unwrap_or_else(PoisonError::into_inner) == Some(entity) {
            return Err(DocumentStoreError::snapshot(std::io::Error::other(
                "component state unreadable",
            )));
        }
        Ok(self
            .bodies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&entity)
            .cloned())
    }
}

struct Harness {
    store: InMemoryDocumentStore,
    source: Arc<MapSource>,
    journal: Journal,
}

fn harness() -> Harness {
    let store = InMemoryDocumentStore::new();
    let source = Arc::new(MapSource::default());
    let journal = Journal::spawn(
        Arc::new(store.clone()),
        Arc::clone(&source) as Arc<dyn SnapshotSource>,
        Arc::new(DefaultClock),
    );
    Harness {
        store,
        source,
        journal,
    }
}

async fn body_of(store: &InMemoryDocumentStore, entity: EntityRef) -> Option<Value> {
    store
        .get(&entity.key())
        .await
        .expect("in-memory store does not fail")
        .map(|document| document.body)
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn flush_waits_for_recorded_writes() -> eyre::Result<()> {
    let harness = harness();
    let agent = EntityRef::Agent(AgentId::new());
    harness.source.set(agent, json!({ "state": "idle" }));

    harness.journal.record(agent);
    let report = harness.journal.flush().await?;

    assert_eq!(report, JournalReport { written: 1, deleted: 0 });
    assert_eq!(
        body_of(&harness.store, agent).await,
        Some(json!({ "state": "idle" }))
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn writes_snapshot_state_at_write_time() -> eyre::Result<()> {
    let harness = harness();
    let task = EntityRef::Task(TaskId::new());
    harness.source.set(task, json!({ "status": "pending" }));
    harness.journal.record(task);
    harness.source.set(task, json!({ "status": "assigned" }));
    harness.journal.record(task);

    harness.journal.flush().await?;

    assert_eq!(
        body_of(&harness.store, task).await,
        Some(json!({ "status": "assigned" }))
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn vanished_entities_and_forget_delete_documents() -> eyre::Result<()> {
    let harness = harness();
    let first = EntityRef::Task(TaskId::new());
    let second = EntityRef::Task(TaskId::new());
    harness.source.set(first, json!({}));
    harness.source.set(second, json!({}));
    harness.journal.record(first);
    harness.journal.record(second);
    harness.journal.flush().await?;

    harness.source.remove(first);
    harness.journal.record(first);
    harness.journal.forget(second);
    let report = harness.journal.flush().await?;

    assert_eq!(report, JournalReport { written: 0, deleted: 2 });
    assert_eq!(body_of(&harness.store, first).await, None);
    assert_eq!(body_of(&harness.store, second).await, None);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn store_failures_surface_on_next_flush_only() {
    let mut store = MockStore::new();
    store.expect_put().times(2).returning(|_| {
        Err(DocumentStoreError::persistence(std::io::Error::other(
            "connection refused",
        )))
    });
    let source = Arc::new(MapSource::default());
    let agent = EntityRef::Agent(AgentId::new());
    source.set(agent, json!({}));
    let journal = Journal::spawn(
        Arc::new(store),
        Arc::clone(&source) as Arc<dyn SnapshotSource>,
        Arc::new(DefaultClock),
    );

    journal.record(agent);
    journal.record(agent);
    let failed = journal.flush().await;
    let settled = journal.flush().await;

    let Err(JournalError::WritesFailed { failed: count, .. }) = &failed else {
        panic!("expected failed writes, got {failed:?}");
    };
    assert_eq!(*count, 2);
    assert_eq!(failed.as_ref().map_err(Classify::class).err(), Some(ErrorClass::Unavailable));
    assert_eq!(settled.ok(), Some(JournalReport::default()));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn unreadable_source_is_internal_and_skips_the_write() {
    let harness = harness();
    let agent = EntityRef::Agent(AgentId::new());
    harness.source.set(agent, json!({}));
    harness.source.break_on(agent);

    harness.journal.record(agent);
    let result = harness.journal.flush().await;

    assert_eq!(
        result.as_ref().map_err(Classify::class).err(),
        Some(ErrorClass::Internal)
    );
    assert_eq!(body_of(&harness.store, agent).await, None);
}
