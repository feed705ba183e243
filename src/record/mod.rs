// ============================================================================
// Records
// ============================================================================
//
// A `Record` is a cheap handle onto one cached entity. The identity map
// owns the entity; handles compare by identity, so two handles are equal
// exactly when they refer to the same cached entity.
//
// Attributes are kept in three layers:
//
//   canonical  last server-acknowledged values
//   in_flight  values handed to the adapter by a running commit
//   pending    local edits not yet committed
//
// and read through the overlay canonical ⊕ in_flight ⊕ pending.
//
// ============================================================================

pub mod snapshot;
pub mod state;

pub use snapshot::{Snapshot, SnapshotRecordArray, SnapshotRef};
pub use state::{DirtyPhase, RecordState};

use crate::core::{Attributes, ClientId, Result, StoreError, ValidationErrors, overlay};
use crate::relationships::RelationshipState;
use crate::schema::RelationshipMeta;
use crate::store::{Store, StoreInner};
use crate::transaction::{CommitReport, Transaction, TransactionId};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio_util::sync::CancellationToken;

/// Mutable state of one record. Guarded by the record lock.
#[derive(Debug, Default)]
pub(crate) struct RecordData {
    pub id: Option<String>,
    pub state: RecordState,
    pub canonical: Attributes,
    pub in_flight: Attributes,
    pub pending: Attributes,
    pub relationships: BTreeMap<String, RelationshipState>,
    /// Local linkage handed to the adapter by a running commit
    pub in_flight_relationships: BTreeMap<String, Vec<ClientId>>,
    /// A relationship was written locally while a commit was running
    pub pending_relationship_edits: bool,
    pub errors: ValidationErrors,
    pub transaction: Option<TransactionId>,
    pub is_reloading: bool,
    pub has_loaded_data: bool,
    pub unloaded: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RecordData {
    pub fn current_attributes(&self) -> Attributes {
        overlay(&overlay(&self.canonical, &self.in_flight), &self.pending)
    }

    pub fn attribute(&self, key: &str) -> Option<&JsonValue> {
        self.pending
            .get(key)
            .or_else(|| self.in_flight.get(key))
            .or_else(|| self.canonical.get(key))
    }

    /// Uncommitted attribute edits or locally modified linkage
    pub fn has_local_changes(&self) -> bool {
        !self.pending.is_empty() || self.relationships.values().any(RelationshipState::is_modified)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipState> {
        self.relationships.get(name)
    }

    pub fn relationship_mut(&mut self, meta: &RelationshipMeta) -> &mut RelationshipState {
        self.relationships
            .entry(meta.name.clone())
            .or_insert_with(|| RelationshipState::new(meta.kind))
    }

    /// Whether record arrays should list this record
    pub fn is_visible(&self) -> bool {
        !self.unloaded
            && !matches!(
                self.state,
                RecordState::Empty | RecordState::Loading | RecordState::DeletedSaved
            )
    }

    /// Move pending edits into the in-flight layer for a commit.
    pub fn begin_flight(&mut self) {
        self.in_flight = overlay(&self.in_flight, &self.pending);
        self.pending = Attributes::new();
        self.in_flight_relationships = self
            .relationships
            .iter()
            .map(|(name, state)| (name.clone(), state.current.members()))
            .collect();
        self.pending_relationship_edits = false;
    }

    /// Hand in-flight values back to the pending layer after a failed commit.
    pub fn abort_flight(&mut self) {
        self.pending = overlay(&self.in_flight, &self.pending);
        self.in_flight = Attributes::new();
        self.in_flight_relationships.clear();
    }
}

pub(crate) struct RecordInner {
    client_id: ClientId,
    model_name: String,
    store: Weak<StoreInner>,
    /// Cancelled when the record leaves the identity map
    lifetime: CancellationToken,
    data: Mutex<RecordData>,
}

/// Handle onto one cached entity.
#[derive(Clone)]
pub struct Record {
    inner: Arc<RecordInner>,
}

impl Record {
    pub(crate) fn new(
        model_name: &str,
        id: Option<String>,
        store: Weak<StoreInner>,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(RecordInner {
                client_id: ClientId::new(),
                model_name: model_name.to_string(),
                store,
                lifetime: parent.child_token(),
                data: Mutex::new(RecordData {
                    id,
                    ..Default::default()
                }),
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn detached(model_name: &str, id: Option<String>, parent: &CancellationToken) -> Self {
        Self::new(model_name, id, Weak::new(), parent)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RecordData> {
        self.inner.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lifetime(&self) -> &CancellationToken {
        &self.inner.lifetime
    }

    /// The owning store, unless it has been dropped.
    pub fn store(&self) -> Result<Store> {
        self.inner
            .store
            .upgrade()
            .map(Store::from_inner)
            .ok_or(StoreError::StoreDestroyed)
    }

    // ------------------------------------------------------------------
    // Identity & state
    // ------------------------------------------------------------------

    pub fn client_id(&self) -> ClientId {
        self.inner.client_id
    }

    pub fn model_name(&self) -> &str {
        &self.inner.model_name
    }

    pub fn id(&self) -> Option<String> {
        self.lock().id.clone()
    }

    pub fn state(&self) -> RecordState {
        self.lock().state
    }

    pub fn state_name(&self) -> &'static str {
        self.state().state_name()
    }

    pub fn is_empty(&self) -> bool {
        self.state().is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.state().is_loading()
    }

    pub fn is_loaded(&self) -> bool {
        self.state().is_loaded()
    }

    pub fn is_dirty(&self) -> bool {
        self.state().is_dirty()
    }

    pub fn is_new(&self) -> bool {
        self.state().is_new()
    }

    pub fn is_deleted(&self) -> bool {
        self.state().is_deleted()
    }

    /// A commit for this record is waiting on the adapter
    pub fn is_saving(&self) -> bool {
        self.state().is_in_flight()
    }

    pub fn is_valid(&self) -> bool {
        self.state().is_valid()
    }

    pub fn is_reloading(&self) -> bool {
        self.lock().is_reloading
    }

    /// The record has left the identity map
    pub fn is_unloaded(&self) -> bool {
        self.lock().unloaded
    }

    pub fn has_dirty_attributes(&self) -> bool {
        let data = self.lock();
        !data.pending.is_empty() || !data.in_flight.is_empty()
    }

    pub fn errors(&self) -> ValidationErrors {
        self.lock().errors.clone()
    }

    /// When server data last reached this record
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.lock().updated_at
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    pub fn get(&self, key: &str) -> Option<JsonValue> {
        self.lock().attribute(key).cloned()
    }

    pub fn attributes(&self) -> Attributes {
        self.lock().current_attributes()
    }

    pub fn canonical_attributes(&self) -> Attributes {
        self.lock().canonical.clone()
    }

    /// `key -> (last acknowledged value, current value)` for every
    /// attribute with an uncommitted or in-flight change.
    pub fn changed_attributes(&self) -> BTreeMap<String, (Option<JsonValue>, JsonValue)> {
        let data = self.lock();
        overlay(&data.in_flight, &data.pending)
            .into_iter()
            .map(|(key, value)| {
                let before = data.canonical.get(&key).cloned();
                (key, (before, value))
            })
            .collect()
    }

    pub fn set(&self, key: &str, value: JsonValue) -> Result<()> {
        self.store()?.set_attribute(self, key, value)
    }

    // ------------------------------------------------------------------
    // Relationships
    // ------------------------------------------------------------------

    pub fn belongs_to(&self, name: &str) -> Result<Option<Record>> {
        self.store()?.related_record(self, name)
    }

    pub fn has_many(&self, name: &str) -> Result<Vec<Record>> {
        self.store()?.related_records(self, name)
    }

    pub fn set_belongs_to(&self, name: &str, target: Option<&Record>) -> Result<()> {
        self.store()?.set_belongs_to(self, name, target)
    }

    pub fn add_to_has_many(&self, name: &str, member: &Record) -> Result<()> {
        self.store()?.add_to_has_many(self, name, member)
    }

    pub fn remove_from_has_many(&self, name: &str, member: &Record) -> Result<()> {
        self.store()?.remove_from_has_many(self, name, member)
    }

    /// Remote URL the server supplied for lazily loading a relationship
    pub fn link(&self, relationship: &str) -> Option<String> {
        self.lock()
            .relationship(relationship)
            .and_then(|state| state.link.clone())
    }

    pub fn relationship_meta(&self, relationship: &str) -> Option<JsonValue> {
        self.lock()
            .relationship(relationship)
            .and_then(|state| state.meta.clone())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Mark the record deleted; the server learns about it on commit.
    pub fn delete_record(&self) -> Result<()> {
        self.store()?.delete_record(self)
    }

    /// Delete and commit in one step.
    pub async fn destroy_record(&self) -> Result<CommitReport> {
        self.delete_record()?;
        self.save().await
    }

    /// Discard local changes. A record whose commit is in flight is left
    /// untouched.
    pub fn rollback(&self) {
        if let Ok(store) = self.store() {
            store.rollback_record(self);
        }
    }

    /// Commit this record in a transaction of its own.
    pub async fn save(&self) -> Result<CommitReport> {
        self.store()?.save_record(self).await
    }

    pub async fn reload(&self) -> Result<Record> {
        self.store()?.reload_record(self).await
    }

    pub fn unload(&self) {
        if let Ok(store) = self.store() {
            store.unload_record(self);
        }
    }

    pub fn transaction(&self) -> Option<Transaction> {
        self.store().ok()?.transaction_of(self)
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        self.store()?.snapshot_record(self, None)
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Record {}

impl Hash for Record {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.client_id.hash(state);
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Record");
        debug
            .field("model_name", &self.inner.model_name)
            .field("client_id", &self.inner.client_id);
        // never block a formatter on the record lock
        if let Ok(data) = self.inner.data.try_lock() {
            debug
                .field("id", &data.id)
                .field("state", &data.state.state_name());
        }
        debug.finish()
    }
}
