// ============================================================================
// Store
// ============================================================================
//
// The store owns everything: identity map, relationship graph, transactions
// and record arrays. `Store` is a cheap clonable handle; records and arrays
// hold weak references back to it.
//
// Lock order:
//
//   record arrays  ->  store state  ->  one record  ->  one array's content
//
// No lock is held across an `.await`, and at most one record lock is held
// at a time. Array notification happens after the state lock is released,
// so filter predicates may read through the store.
//
// ============================================================================

pub mod builder;
pub mod config;
pub(crate) mod identity_map;
mod mutation;
mod push;

pub use builder::StoreBuilder;
pub use config::{CommitMode, IdMismatchPolicy, StoreConfig};
pub use push::PushResult;

use crate::adapter::{AdapterRegistry, RegisteredAdapter};
use crate::core::{ClientId, Result, StoreError};
use crate::finders::{self, FindOptions};
use crate::payload::{Serializer, SerializerRegistry};
use crate::record::{Record, Snapshot, SnapshotRef};
use crate::record_array::{ManyArray, RecordArray, RecordArrayKind, RecordArrayManager, RecordFilter};
use crate::relationships::graph::RelationshipGraph;
use crate::relationships::{RelationshipPayloadsManager, WriteMode};
use crate::schema::{ModelSchema, RelationshipKind, RelationshipMeta, SchemaRegistry};
use crate::transaction::{
    CommitReport, Transaction, TransactionId, TransactionInfo, TransactionManager, commit_transaction,
};
use futures::future::try_join_all;
use identity_map::IdentityMap;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{Level, event};

/// Bulk-load bookkeeping per model.
#[derive(Debug, Default)]
pub(crate) struct TypeMeta {
    pub has_loaded_all: bool,
    pub since_token: Option<JsonValue>,
}

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub destroyed: bool,
    pub identity: IdentityMap,
    pub transactions: TransactionManager,
    pub type_meta: HashMap<String, TypeMeta>,
}

pub(crate) struct StoreInner {
    config: StoreConfig,
    schema: Arc<SchemaRegistry>,
    adapters: AdapterRegistry,
    serializers: SerializerRegistry,
    payloads: RelationshipPayloadsManager,
    lifetime: CancellationToken,
    arrays: Mutex<RecordArrayManager>,
    state: Mutex<StoreState>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        self.lifetime.cancel();
    }
}

/// Handle onto one entity cache.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    pub(crate) fn new(
        config: StoreConfig,
        schema: SchemaRegistry,
        adapters: AdapterRegistry,
        serializers: SerializerRegistry,
    ) -> Self {
        let schema = Arc::new(schema);
        Self {
            inner: Arc::new(StoreInner {
                config,
                payloads: RelationshipPayloadsManager::new(schema.clone()),
                schema,
                adapters,
                serializers,
                lifetime: CancellationToken::new(),
                arrays: Mutex::new(RecordArrayManager::new()),
                state: Mutex::new(StoreState::default()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<StoreInner>) -> Self {
        Self { inner }
    }

    fn downgrade(&self) -> Weak<StoreInner> {
        Arc::downgrade(&self.inner)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn label(&self) -> &str {
        &self.inner.config.label
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.inner.schema
    }

    pub fn model(&self, name: &str) -> Result<&ModelSchema> {
        self.inner.schema.model(name)
    }

    pub fn serializer_for(&self, model: &str) -> &Arc<dyn Serializer> {
        self.inner.serializers.serializer_for(model)
    }

    pub fn adapter_for(&self, model: &str) -> Result<RegisteredAdapter> {
        self.inner.adapters.adapter_for(model)
    }

    pub fn relationship_payloads(&self) -> &RelationshipPayloadsManager {
        &self.inner.payloads
    }

    pub(crate) fn lifetime(&self) -> &CancellationToken {
        &self.inner.lifetime
    }

    pub(crate) fn lock_state(&self) -> Result<MutexGuard<'_, StoreState>> {
        let state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if state.destroyed {
            return Err(StoreError::StoreDestroyed);
        }
        Ok(state)
    }

    fn lock_arrays(&self) -> MutexGuard<'_, RecordArrayManager> {
        self.inner
            .arrays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn graph<'a>(&'a self, state: &'a StoreState) -> RelationshipGraph<'a> {
        RelationshipGraph::new(&self.inner.schema, &state.identity)
    }

    /// Bring record arrays up to date. Must be called without the state
    /// lock held.
    pub(crate) fn notify_arrays(&self, changed: &[Record]) {
        if changed.is_empty() {
            return;
        }
        let filtered = self.lock_arrays().record_did_change(changed);
        RecordArrayManager::apply_filters(&filtered, changed);
    }

    /// The record for `(model, id)`, creating an empty placeholder if the
    /// identity map has none.
    pub(crate) fn record_for_in(&self, state: &mut StoreState, model: &str, id: &str) -> Record {
        if let Some(record) = state.identity.lookup(model, id) {
            return record.clone();
        }
        let record = Record::new(model, Some(id.to_string()), self.downgrade(), &self.inner.lifetime);
        state.identity.insert(record.clone());
        record
    }

    fn relationship_of(&self, owner: &Record, name: &str) -> Result<RelationshipMeta> {
        self.schema()
            .relationship(owner.model_name(), name)
            .cloned()
            .ok_or_else(|| {
                StoreError::Misuse(format!(
                    "Model '{}' has no relationship named '{}'",
                    owner.model_name(),
                    name
                ))
            })
    }

    // ------------------------------------------------------------------
    // Finding
    // ------------------------------------------------------------------

    pub async fn find_record(&self, model: &str, id: &str) -> Result<Record> {
        self.find_record_with(model, id, FindOptions::default()).await
    }

    /// Resolve one record, from the cache when it is loaded and no reload
    /// was asked for.
    pub async fn find_record_with(&self, model: &str, id: &str, options: FindOptions) -> Result<Record> {
        let schema = self.model(model)?;
        if id.is_empty() {
            return Err(StoreError::Misuse(format!(
                "You cannot pass an empty id to find_record for '{}'",
                model
            )));
        }
        let adapter = self.adapter_for(model)?;
        let reload = options.reload || self.config().reload_on_find;

        let record = {
            let mut state = self.lock_state()?;
            let record = self.record_for_in(&mut state, model, id);
            let mut data = record.lock();
            if data.state.is_loaded() {
                if !reload {
                    drop(data);
                    return Ok(record);
                }
                data.is_reloading = true;
            } else {
                data.state = data.state.loading()?;
            }
            drop(data);
            record
        };

        finders::find(self, &adapter, schema, id, &record, &options).await
    }

    /// Resolve several records of one model, keeping the order of `ids`.
    ///
    /// With an adapter that coalesces finds, every record not yet loaded
    /// is fetched in one `find_many` call. Records the server did not
    /// return are left out of the result.
    pub async fn find_many(&self, model: &str, ids: &[&str]) -> Result<Vec<Record>> {
        let schema = self.model(model)?;
        let adapter = self.adapter_for(model)?;

        if !adapter.capabilities().coalesce_find_requests {
            return try_join_all(ids.iter().map(|id| self.find_record(model, id))).await;
        }

        let (records, to_fetch) = {
            let mut state = self.lock_state()?;
            let mut records = Vec::with_capacity(ids.len());
            let mut to_fetch: Vec<Record> = Vec::new();
            for id in ids {
                let record = self.record_for_in(&mut state, model, id);
                {
                    let mut data = record.lock();
                    if !data.state.is_loaded() && !to_fetch.contains(&record) {
                        data.state = data.state.loading()?;
                        drop(data);
                        to_fetch.push(record.clone());
                    }
                }
                records.push(record);
            }
            (records, to_fetch)
        };

        if !to_fetch.is_empty() {
            let fetch_ids: Vec<String> = to_fetch.iter().filter_map(Record::id).collect();
            finders::find_many(self, &adapter, schema, &fetch_ids, &to_fetch).await?;
        }

        Ok(records
            .into_iter()
            .filter(|record| record.is_loaded() && !record.is_unloaded())
            .collect())
    }

    pub async fn find_all(&self, model: &str) -> Result<RecordArray> {
        self.find_all_with(model, FindOptions::default()).await
    }

    /// The live array of `model`, fetched from the adapter unless a full
    /// fetch already completed.
    pub async fn find_all_with(&self, model: &str, options: FindOptions) -> Result<RecordArray> {
        let schema = self.model(model)?;
        let adapter = self.adapter_for(model)?;
        if !options.reload && self.has_loaded_all(model) {
            return self.live_array(model);
        }
        let since = self.since_token(model);
        finders::find_all(self, &adapter, schema, since, &options).await
    }

    pub async fn query(&self, model: &str, query: JsonValue) -> Result<RecordArray> {
        self.query_with(model, query, FindOptions::default()).await
    }

    pub async fn query_with(&self, model: &str, query: JsonValue, options: FindOptions) -> Result<RecordArray> {
        let schema = self.model(model)?;
        let adapter = self.adapter_for(model)?;
        finders::query(self, &adapter, schema, query, None, &options).await
    }

    pub async fn query_record(&self, model: &str, query: JsonValue) -> Result<Option<Record>> {
        let schema = self.model(model)?;
        let adapter = self.adapter_for(model)?;
        finders::query_record(self, &adapter, schema, query, &FindOptions::default()).await
    }

    /// Load a has-many relationship of `owner`.
    ///
    /// Through the relationship link when the server supplied one, in
    /// which case the answer becomes the canonical linkage and the response
    /// meta is kept; otherwise the known linkage is resolved record by record.
    pub async fn fetch_has_many(&self, owner: &Record, name: &str) -> Result<ManyArray> {
        let meta = self.relationship_of(owner, name)?;
        if !meta.kind.is_many() {
            return Err(StoreError::Misuse(format!(
                "'{}.{}' is not a has-many relationship",
                owner.model_name(),
                name
            )));
        }

        if let Some(link) = owner.link(name) {
            let adapter = self.adapter_for(owner.model_name())?;
            return finders::find_has_many(self, &adapter, owner, &link, &meta).await;
        }

        let ids: Vec<String> = self
            .related_records(owner, name)?
            .iter()
            .filter(|record| !record.is_loaded())
            .filter_map(Record::id)
            .collect();
        if !ids.is_empty() {
            let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
            self.find_many(&meta.related_type, &ids).await?;
        }
        let records = self
            .related_records(owner, name)?
            .into_iter()
            .filter(Record::is_loaded)
            .collect();
        Ok(ManyArray::new(records, None))
    }

    /// Load a belongs-to relationship of `owner`; see [`Store::fetch_has_many`].
    pub async fn fetch_belongs_to(&self, owner: &Record, name: &str) -> Result<Option<Record>> {
        let meta = self.relationship_of(owner, name)?;
        if meta.kind.is_many() {
            return Err(StoreError::Misuse(format!(
                "'{}.{}' is not a belongs-to relationship",
                owner.model_name(),
                name
            )));
        }

        if let Some(link) = owner.link(name) {
            let adapter = self.adapter_for(owner.model_name())?;
            let target = finders::find_belongs_to(self, &adapter, owner, &link, &meta).await?;
            if target.is_none() {
                self.set_canonical_linkage(owner, &meta, &[])?;
            }
            return Ok(target);
        }

        match self.related_record(owner, name)? {
            Some(target) if !target.is_loaded() => match target.id() {
                Some(id) => self.find_record(&meta.related_type, &id).await.map(Some),
                None => Ok(Some(target)),
            },
            other => Ok(other),
        }
    }

    /// Make `records` the acknowledged linkage of `owner.meta`, mirroring
    /// each member's inverse additively.
    pub(crate) fn set_canonical_linkage(&self, owner: &Record, meta: &RelationshipMeta, records: &[Record]) -> Result<()> {
        let members: Vec<ClientId> = records.iter().map(Record::client_id).collect();
        {
            let state = self.lock_state()?;
            self.graph(&state).replace(owner, meta, &members, WriteMode::Canonical);
        }
        self.notify_arrays(std::slice::from_ref(owner));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Peeking
    // ------------------------------------------------------------------

    /// A loaded record for `(model, id)`, without any adapter call.
    pub fn peek_record(&self, model: &str, id: &str) -> Option<Record> {
        let state = self.lock_state().ok()?;
        state
            .identity
            .lookup(model, id)
            .filter(|record| record.lock().is_visible())
            .cloned()
    }

    /// The live array of every loaded record of `model`.
    pub fn peek_all(&self, model: &str) -> Result<RecordArray> {
        self.live_array(model)
    }

    pub fn has_record_for_id(&self, model: &str, id: &str) -> bool {
        self.peek_record(model, id).is_some()
    }

    /// A `find_all` for `model` has completed.
    pub fn has_loaded_all(&self, model: &str) -> bool {
        self.lock_state()
            .map(|state| {
                state
                    .type_meta
                    .get(model)
                    .is_some_and(|meta| meta.has_loaded_all)
            })
            .unwrap_or(false)
    }

    /// The `since` token from the last `find_all` response of `model`.
    pub fn since_token(&self, model: &str) -> Option<JsonValue> {
        let state = self.lock_state().ok()?;
        state.type_meta.get(model)?.since_token.clone()
    }

    pub(crate) fn did_load_all(&self, model: &str, since: Option<JsonValue>) {
        if let Ok(mut state) = self.lock_state() {
            let meta = state.type_meta.entry(model.to_string()).or_default();
            meta.has_loaded_all = true;
            if since.is_some() {
                meta.since_token = since;
            }
        }
    }

    // ------------------------------------------------------------------
    // Record arrays
    // ------------------------------------------------------------------

    pub(crate) fn live_array(&self, model: &str) -> Result<RecordArray> {
        self.model(model)?;
        let mut arrays = self.lock_arrays();
        if let Some(array) = arrays.live_array(model) {
            return Ok(array);
        }
        let records: Vec<Record> = self
            .lock_state()?
            .identity
            .records_of(model)
            .into_iter()
            .filter(|record| record.lock().is_visible())
            .collect();
        let array = RecordArray::new(model, RecordArrayKind::Live, self.downgrade(), records);
        arrays.register_live(array.clone());
        Ok(array)
    }

    pub(crate) fn populated_array(&self, model: &str, query: JsonValue) -> Result<RecordArray> {
        let array = RecordArray::new(
            model,
            RecordArrayKind::AdapterPopulated { query },
            self.downgrade(),
            Vec::new(),
        );
        self.lock_arrays().register_populated(&array);
        Ok(array)
    }

    /// A live view of the loaded records of `model` matching `predicate`.
    pub fn filter(
        &self,
        model: &str,
        predicate: impl Fn(&Record) -> bool + Send + Sync + 'static,
    ) -> Result<RecordArray> {
        self.filter_with(model, RecordFilter::new(predicate))
    }

    /// Like [`Store::filter`], kept ordered by `ordering`.
    pub fn filter_sorted(
        &self,
        model: &str,
        predicate: impl Fn(&Record) -> bool + Send + Sync + 'static,
        ordering: impl Fn(&Record, &Record) -> Ordering + Send + Sync + 'static,
    ) -> Result<RecordArray> {
        self.filter_with(model, RecordFilter::new(predicate).sorted_by(ordering))
    }

    pub fn filter_with(&self, model: &str, filter: RecordFilter) -> Result<RecordArray> {
        self.model(model)?;
        let array = RecordArray::new(model, RecordArrayKind::Filtered(filter), self.downgrade(), Vec::new());
        self.lock_arrays().register_filtered(&array);
        let candidates = self.lock_state()?.identity.records_of(model);
        RecordArrayManager::refilter(&array, candidates);
        Ok(array)
    }

    /// Ask the server for matching records, then hand back the live filter
    /// over everything loaded.
    pub async fn filter_with_query(
        &self,
        model: &str,
        query: JsonValue,
        predicate: impl Fn(&Record) -> bool + Send + Sync + 'static,
    ) -> Result<RecordArray> {
        self.query(model, query).await?;
        self.filter(model, predicate)
    }

    pub(crate) async fn update_array(&self, array: &RecordArray) -> Result<RecordArray> {
        let model = array.model_name();
        match array.kind() {
            RecordArrayKind::Live => self.find_all_with(model, FindOptions::reload()).await,
            RecordArrayKind::AdapterPopulated { query } => {
                let schema = self.model(model)?;
                let adapter = self.adapter_for(model)?;
                finders::query(
                    self,
                    &adapter,
                    schema,
                    query.clone(),
                    Some(array.clone()),
                    &FindOptions::default(),
                )
                .await
            }
            RecordArrayKind::Filtered(_) => {
                let candidates = self.lock_state()?.identity.records_of(model);
                RecordArrayManager::refilter(array, candidates);
                Ok(array.clone())
            }
        }
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Open an explicit transaction.
    pub fn transaction(&self) -> Result<Transaction> {
        let id = self.lock_state()?.transactions.begin();
        Ok(Transaction::new(id, self.clone()))
    }

    /// The transaction dirty records join implicitly, opened on demand.
    pub fn default_transaction(&self) -> Result<Transaction> {
        let id = self.lock_state()?.transactions.default_id();
        Ok(Transaction::new(id, self.clone()))
    }

    /// Commit the default transaction.
    pub async fn commit(&self) -> Result<CommitReport> {
        let current = self.lock_state()?.transactions.current_default();
        match current {
            Some(id) => commit_transaction(self, id).await,
            None => Ok(CommitReport::default()),
        }
    }

    /// Roll back every record of the default transaction.
    pub fn rollback(&self) {
        let current = self
            .lock_state()
            .ok()
            .and_then(|state| state.transactions.current_default());
        if let Some(id) = current {
            self.rollback_transaction(id);
        }
    }

    pub fn dirty_records(&self) -> Vec<Record> {
        let Ok(state) = self.lock_state() else {
            return Vec::new();
        };
        // every dirty record belongs to exactly one open transaction
        state
            .transactions
            .open_ids()
            .into_iter()
            .flat_map(|id| state.transactions.members(id))
            .filter_map(|client_id| state.identity.get(&client_id).cloned())
            .collect()
    }

    pub fn open_transactions(&self) -> Vec<TransactionInfo> {
        let Ok(state) = self.lock_state() else {
            return Vec::new();
        };
        state
            .transactions
            .open_ids()
            .into_iter()
            .filter_map(|id| state.transactions.info(id))
            .collect()
    }

    pub(crate) fn transaction_info(&self, id: TransactionId) -> Option<TransactionInfo> {
        self.lock_state().ok()?.transactions.info(id)
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Tear the store down. Pending adapter continuations are discarded,
    /// every record is unloaded and every array emptied.
    pub fn destroy(&self) {
        self.inner.lifetime.cancel();
        let mut arrays = self.lock_arrays();
        arrays.clear();

        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if state.destroyed {
            return;
        }
        state.destroyed = true;
        let records = state.identity.clear();
        for record in &records {
            let mut data = record.lock();
            data.unloaded = true;
            data.transaction = None;
        }
        state.transactions.clear();
        state.type_meta.clear();
        event!(Level::INFO, label = %self.label(), records = records.len(), "store destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .destroyed
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn snapshot_record(&self, record: &Record, adapter_options: Option<JsonValue>) -> Result<Snapshot> {
        let state = self.lock_state()?;
        Ok(self.snapshot_in(&state, record, adapter_options))
    }

    /// Snapshot taken under an already held state lock. Only relationships
    /// whose linkage is known are included.
    pub(crate) fn snapshot_in(
        &self,
        state: &StoreState,
        record: &Record,
        adapter_options: Option<JsonValue>,
    ) -> Snapshot {
        let (mut snapshot, relationships) = {
            let data = record.lock();
            let snapshot = Snapshot::new(
                record.model_name().to_string(),
                data.id.clone(),
                record.client_id(),
                data.current_attributes(),
                adapter_options,
            );
            let relationships: Vec<(String, RelationshipKind, Vec<ClientId>)> = data
                .relationships
                .iter()
                .filter(|(_, relationship)| relationship.has_data)
                .map(|(name, relationship)| (name.clone(), relationship.kind, relationship.current.members()))
                .collect();
            (snapshot, relationships)
        };

        for (name, kind, members) in relationships {
            let refs: Vec<SnapshotRef> = members
                .iter()
                .filter_map(|client_id| state.identity.get(client_id))
                .map(|related| SnapshotRef {
                    model_name: related.model_name().to_string(),
                    id: related.id(),
                    client_id: related.client_id(),
                })
                .collect();
            snapshot = match kind {
                RelationshipKind::BelongsTo => snapshot.with_belongs_to(name, refs.into_iter().next()),
                RelationshipKind::HasMany => snapshot.with_has_many(name, refs),
            };
        }
        snapshot
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("label", &self.inner.config.label)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
