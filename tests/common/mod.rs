#![allow(dead_code)]

use async_trait::async_trait;
use memostore::{
    Adapter, AdapterCapabilities, AdapterError, AdapterResult, BatchSaveResult, ModelSchema, RawPayload,
    RecordArray, RelationshipMeta, Snapshot, SnapshotRecordArray, Store, StoreConfig,
};
use serde_json::{Value as JsonValue, json};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

type FindFn = Box<dyn Fn(&str, &str) -> AdapterResult<RawPayload> + Send + Sync>;
type FindManyFn = Box<dyn Fn(&str, &[String]) -> AdapterResult<RawPayload> + Send + Sync>;
type LinkFn = Box<dyn Fn(&str) -> AdapterResult<RawPayload> + Send + Sync>;
type FindAllFn = Box<dyn Fn(&str, Option<&JsonValue>) -> AdapterResult<RawPayload> + Send + Sync>;
type QueryFn = Box<dyn Fn(&str, &JsonValue) -> AdapterResult<RawPayload> + Send + Sync>;
type SaveFn = Box<dyn Fn(&str, &Snapshot) -> AdapterResult<Option<RawPayload>> + Send + Sync>;
type BatchFn = Box<dyn Fn(&str, &[Snapshot]) -> BatchSaveResult + Send + Sync>;

/// Scripted adapter: every call is logged, answers come from the handlers
/// installed by the test. An optional gate holds every answer until the
/// test releases it.
#[derive(Default)]
pub struct MockAdapter {
    capabilities: AdapterCapabilities,
    calls: Mutex<Vec<String>>,
    gate: Option<Arc<Notify>>,
    started: Arc<Notify>,
    find_record: Option<FindFn>,
    find_many: Option<FindManyFn>,
    find_has_many: Option<LinkFn>,
    find_belongs_to: Option<LinkFn>,
    find_all: Option<FindAllFn>,
    query: Option<QueryFn>,
    query_record: Option<QueryFn>,
    save: Option<SaveFn>,
    batch_save: Option<BatchFn>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capabilities(mut self, capabilities: AdapterCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn on_find_record(
        mut self,
        handler: impl Fn(&str, &str) -> AdapterResult<RawPayload> + Send + Sync + 'static,
    ) -> Self {
        self.find_record = Some(Box::new(handler));
        self
    }

    pub fn on_find_many(
        mut self,
        handler: impl Fn(&str, &[String]) -> AdapterResult<RawPayload> + Send + Sync + 'static,
    ) -> Self {
        self.find_many = Some(Box::new(handler));
        self
    }

    pub fn on_find_has_many(
        mut self,
        handler: impl Fn(&str) -> AdapterResult<RawPayload> + Send + Sync + 'static,
    ) -> Self {
        self.find_has_many = Some(Box::new(handler));
        self
    }

    pub fn on_find_belongs_to(
        mut self,
        handler: impl Fn(&str) -> AdapterResult<RawPayload> + Send + Sync + 'static,
    ) -> Self {
        self.find_belongs_to = Some(Box::new(handler));
        self
    }

    pub fn on_find_all(
        mut self,
        handler: impl Fn(&str, Option<&JsonValue>) -> AdapterResult<RawPayload> + Send + Sync + 'static,
    ) -> Self {
        self.find_all = Some(Box::new(handler));
        self
    }

    pub fn on_query(
        mut self,
        handler: impl Fn(&str, &JsonValue) -> AdapterResult<RawPayload> + Send + Sync + 'static,
    ) -> Self {
        self.query = Some(Box::new(handler));
        self
    }

    pub fn on_query_record(
        mut self,
        handler: impl Fn(&str, &JsonValue) -> AdapterResult<RawPayload> + Send + Sync + 'static,
    ) -> Self {
        self.query_record = Some(Box::new(handler));
        self
    }

    /// Handler for the per-record saves; the first argument is the
    /// operation name (`createRecord`, `updateRecord`, `deleteRecord`).
    pub fn on_save(
        mut self,
        handler: impl Fn(&str, &Snapshot) -> AdapterResult<Option<RawPayload>> + Send + Sync + 'static,
    ) -> Self {
        self.save = Some(Box::new(handler));
        self
    }

    /// Handler for the batched saves (`createRecords`, ...).
    pub fn on_batch_save(
        mut self,
        handler: impl Fn(&str, &[Snapshot]) -> BatchSaveResult + Send + Sync + 'static,
    ) -> Self {
        self.batch_save = Some(Box::new(handler));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of logged calls starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    /// Resolves once some call reached the adapter.
    pub async fn started(&self) {
        self.started.notified().await;
    }

    async fn enter(&self, call: String) {
        self.calls.lock().unwrap().push(call);
        self.started.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
    }

    fn unsupported<T>(name: &'static str) -> AdapterResult<T> {
        Err(AdapterError::Unsupported(name))
    }

    async fn save_one(&self, operation: &'static str, model: &str, snapshot: &Snapshot) -> AdapterResult<Option<RawPayload>> {
        self.enter(format!("{} {} {}", operation, model, snapshot.id().unwrap_or("-")))
            .await;
        match &self.save {
            Some(handler) => handler(operation, snapshot),
            None => Ok(None),
        }
    }

    async fn save_many(&self, operation: &'static str, model: &str, snapshots: &[Snapshot]) -> BatchSaveResult {
        self.enter(format!("{} {} x{}", operation, model, snapshots.len()))
            .await;
        match &self.batch_save {
            Some(handler) => handler(operation, snapshots),
            None => Ok(snapshots.iter().map(|_| Ok(None)).collect()),
        }
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn capabilities(&self) -> AdapterCapabilities {
        self.capabilities
    }

    async fn find_record(&self, _store: &Store, model: &str, id: &str, _snapshot: &Snapshot) -> AdapterResult<RawPayload> {
        self.enter(format!("findRecord {} {}", model, id)).await;
        match &self.find_record {
            Some(handler) => handler(model, id),
            None => Err(AdapterError::NotFound(format!("{} {}", model, id))),
        }
    }

    async fn find_many(
        &self,
        _store: &Store,
        model: &str,
        ids: &[String],
        _snapshots: &[Snapshot],
    ) -> AdapterResult<RawPayload> {
        self.enter(format!("findMany {} {}", model, ids.join(","))).await;
        match &self.find_many {
            Some(handler) => handler(model, ids),
            None => Self::unsupported("findMany"),
        }
    }

    async fn find_has_many(
        &self,
        _store: &Store,
        _snapshot: &Snapshot,
        link: &str,
        _relationship: &RelationshipMeta,
    ) -> AdapterResult<RawPayload> {
        self.enter(format!("findHasMany {}", link)).await;
        match &self.find_has_many {
            Some(handler) => handler(link),
            None => Self::unsupported("findHasMany"),
        }
    }

    async fn find_belongs_to(
        &self,
        _store: &Store,
        _snapshot: &Snapshot,
        link: &str,
        _relationship: &RelationshipMeta,
    ) -> AdapterResult<RawPayload> {
        self.enter(format!("findBelongsTo {}", link)).await;
        match &self.find_belongs_to {
            Some(handler) => handler(link),
            None => Self::unsupported("findBelongsTo"),
        }
    }

    async fn find_all(
        &self,
        _store: &Store,
        model: &str,
        since_token: Option<&JsonValue>,
        _snapshots: &SnapshotRecordArray,
    ) -> AdapterResult<RawPayload> {
        self.enter(format!("findAll {}", model)).await;
        match &self.find_all {
            Some(handler) => handler(model, since_token),
            None => Self::unsupported("findAll"),
        }
    }

    async fn query(
        &self,
        _store: &Store,
        model: &str,
        query: &JsonValue,
        _array: Option<&RecordArray>,
        _options: Option<&JsonValue>,
    ) -> AdapterResult<RawPayload> {
        self.enter(format!("query {} {}", model, query)).await;
        match &self.query {
            Some(handler) => handler(model, query),
            None => Self::unsupported("query"),
        }
    }

    async fn query_record(
        &self,
        _store: &Store,
        model: &str,
        query: &JsonValue,
        _options: Option<&JsonValue>,
    ) -> AdapterResult<RawPayload> {
        self.enter(format!("queryRecord {} {}", model, query)).await;
        match &self.query_record {
            Some(handler) => handler(model, query),
            None => Self::unsupported("queryRecord"),
        }
    }

    async fn create_record(&self, _store: &Store, model: &str, snapshot: &Snapshot) -> AdapterResult<Option<RawPayload>> {
        self.save_one("createRecord", model, snapshot).await
    }

    async fn update_record(&self, _store: &Store, model: &str, snapshot: &Snapshot) -> AdapterResult<Option<RawPayload>> {
        self.save_one("updateRecord", model, snapshot).await
    }

    async fn delete_record(&self, _store: &Store, model: &str, snapshot: &Snapshot) -> AdapterResult<Option<RawPayload>> {
        self.save_one("deleteRecord", model, snapshot).await
    }

    async fn create_records(&self, _store: &Store, model: &str, snapshots: &[Snapshot]) -> BatchSaveResult {
        self.save_many("createRecords", model, snapshots).await
    }

    async fn update_records(&self, _store: &Store, model: &str, snapshots: &[Snapshot]) -> BatchSaveResult {
        self.save_many("updateRecords", model, snapshots).await
    }

    async fn delete_records(&self, _store: &Store, model: &str, snapshots: &[Snapshot]) -> BatchSaveResult {
        self.save_many("deleteRecords", model, snapshots).await
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// post { title, body, comments <-> comment.post, author <-> person.posts }
pub fn blog_models() -> Vec<ModelSchema> {
    vec![
        ModelSchema::new("post")
            .attr("title")
            .attr("body")
            .relationship(RelationshipMeta::has_many("comments", "comment").inverse("post"))
            .relationship(RelationshipMeta::belongs_to("author", "person").inverse("posts")),
        ModelSchema::new("comment").attr("body").belongs_to("post", "post"),
        ModelSchema::new("person").attr("name").has_many("posts", "post"),
    ]
}

pub fn blog_store(adapter: Arc<MockAdapter>) -> Store {
    Store::builder()
        .models(blog_models())
        .adapter(adapter)
        .config(StoreConfig::new("test"))
        .build()
        .unwrap()
}

pub fn post_doc(id: &str, title: &str) -> JsonValue {
    json!({
        "data": { "type": "post", "id": id, "attributes": { "title": title } }
    })
}

pub fn person_doc(id: &str, name: &str) -> JsonValue {
    json!({
        "data": { "type": "person", "id": id, "attributes": { "name": name } }
    })
}

/// Acknowledge a save by echoing the snapshot, assigning `id` when the
/// record has none.
pub fn echo(snapshot: &Snapshot, id: &str) -> JsonValue {
    let mut doc = snapshot.serialize().unwrap();
    if snapshot.id().is_none() {
        doc["data"]["id"] = json!(id);
    }
    doc
}
