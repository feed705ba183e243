// ============================================================================
// Adapter Contract
// ============================================================================
//
// The single mandatory collaborator of a store: one async method per
// remote operation, each answering with a raw, wire-specific payload.
// Only `capabilities` and `find_record` are required; every other method
// reports `AdapterError::Unsupported` unless implemented.
//
// Capabilities are declared, not probed: the store reads them once when
// the adapter is registered.
//
// ============================================================================

use crate::core::{AdapterError, AdapterResult, Result, StoreError};
use crate::payload::RawPayload;
use crate::record::{Snapshot, SnapshotRecordArray};
use crate::record_array::RecordArray;
use crate::schema::RelationshipMeta;
use crate::store::Store;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// How an adapter's `query` is called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryConvention {
    /// `query` receives the array it is answering for
    PopulatesRecordArray,
    /// `query` receives no array; the store creates one from the response
    #[default]
    ReturnsPayload,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterCapabilities {
    pub query_convention: QueryConvention,
    /// Saves of one (model, dirty type) group go through one batched call
    pub batch_saves: bool,
    /// `Store::find_many` goes through one `find_many` call instead of one
    /// `find_record` per id
    pub coalesce_find_requests: bool,
}

impl AdapterCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query_convention(mut self, convention: QueryConvention) -> Self {
        self.query_convention = convention;
        self
    }

    pub fn batch_saves(mut self, enabled: bool) -> Self {
        self.batch_saves = enabled;
        self
    }

    pub fn coalesce_find_requests(mut self, enabled: bool) -> Self {
        self.coalesce_find_requests = enabled;
        self
    }
}

/// Per-record outcome of a batched save.
pub type BatchSaveResult = AdapterResult<Vec<AdapterResult<Option<RawPayload>>>>;

#[async_trait]
pub trait Adapter: Send + Sync {
    fn capabilities(&self) -> AdapterCapabilities;

    async fn find_record(
        &self,
        store: &Store,
        model: &str,
        id: &str,
        snapshot: &Snapshot,
    ) -> AdapterResult<RawPayload>;

    async fn find_many(
        &self,
        _store: &Store,
        _model: &str,
        _ids: &[String],
        _snapshots: &[Snapshot],
    ) -> AdapterResult<RawPayload> {
        Err(AdapterError::Unsupported("findMany"))
    }

    async fn find_has_many(
        &self,
        _store: &Store,
        _snapshot: &Snapshot,
        _link: &str,
        _relationship: &RelationshipMeta,
    ) -> AdapterResult<RawPayload> {
        Err(AdapterError::Unsupported("findHasMany"))
    }

    async fn find_belongs_to(
        &self,
        _store: &Store,
        _snapshot: &Snapshot,
        _link: &str,
        _relationship: &RelationshipMeta,
    ) -> AdapterResult<RawPayload> {
        Err(AdapterError::Unsupported("findBelongsTo"))
    }

    async fn find_all(
        &self,
        _store: &Store,
        _model: &str,
        _since_token: Option<&JsonValue>,
        _snapshots: &SnapshotRecordArray,
    ) -> AdapterResult<RawPayload> {
        Err(AdapterError::Unsupported("findAll"))
    }

    /// `array` is `Some` only for adapters declaring
    /// [`QueryConvention::PopulatesRecordArray`].
    async fn query(
        &self,
        _store: &Store,
        _model: &str,
        _query: &JsonValue,
        _array: Option<&RecordArray>,
        _options: Option<&JsonValue>,
    ) -> AdapterResult<RawPayload> {
        Err(AdapterError::Unsupported("query"))
    }

    async fn query_record(
        &self,
        _store: &Store,
        _model: &str,
        _query: &JsonValue,
        _options: Option<&JsonValue>,
    ) -> AdapterResult<RawPayload> {
        Err(AdapterError::Unsupported("queryRecord"))
    }

    async fn create_record(
        &self,
        _store: &Store,
        _model: &str,
        _snapshot: &Snapshot,
    ) -> AdapterResult<Option<RawPayload>> {
        Err(AdapterError::Unsupported("createRecord"))
    }

    async fn update_record(
        &self,
        _store: &Store,
        _model: &str,
        _snapshot: &Snapshot,
    ) -> AdapterResult<Option<RawPayload>> {
        Err(AdapterError::Unsupported("updateRecord"))
    }

    async fn delete_record(
        &self,
        _store: &Store,
        _model: &str,
        _snapshot: &Snapshot,
    ) -> AdapterResult<Option<RawPayload>> {
        Err(AdapterError::Unsupported("deleteRecord"))
    }

    /// One result per snapshot, in snapshot order.
    async fn create_records(
        &self,
        _store: &Store,
        _model: &str,
        _snapshots: &[Snapshot],
    ) -> BatchSaveResult {
        Err(AdapterError::Unsupported("createRecords"))
    }

    async fn update_records(
        &self,
        _store: &Store,
        _model: &str,
        _snapshots: &[Snapshot],
    ) -> BatchSaveResult {
        Err(AdapterError::Unsupported("updateRecords"))
    }

    async fn delete_records(
        &self,
        _store: &Store,
        _model: &str,
        _snapshots: &[Snapshot],
    ) -> BatchSaveResult {
        Err(AdapterError::Unsupported("deleteRecords"))
    }
}

/// An adapter together with the capabilities it declared at registration.
#[derive(Clone)]
pub struct RegisteredAdapter {
    adapter: Arc<dyn Adapter>,
    capabilities: AdapterCapabilities,
}

impl RegisteredAdapter {
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        let capabilities = adapter.capabilities();
        Self {
            adapter,
            capabilities,
        }
    }

    pub fn adapter(&self) -> &dyn Adapter {
        self.adapter.as_ref()
    }

    pub fn capabilities(&self) -> AdapterCapabilities {
        self.capabilities
    }
}

impl fmt::Debug for RegisteredAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredAdapter")
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Default adapter plus per-model overrides.
#[derive(Debug, Clone, Default)]
pub struct AdapterRegistry {
    default: Option<RegisteredAdapter>,
    per_model: HashMap<String, RegisteredAdapter>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_default(&mut self, adapter: Arc<dyn Adapter>) {
        self.default = Some(RegisteredAdapter::new(adapter));
    }

    pub fn register(&mut self, model: impl Into<String>, adapter: Arc<dyn Adapter>) {
        self.per_model
            .insert(model.into(), RegisteredAdapter::new(adapter));
    }

    pub fn registered_models(&self) -> impl Iterator<Item = &str> {
        self.per_model.keys().map(String::as_str)
    }

    /// The adapter serving `model`; none registered is caller misuse.
    pub fn adapter_for(&self, model: &str) -> Result<RegisteredAdapter> {
        self.per_model
            .get(model)
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| {
                StoreError::Misuse(format!("No adapter was found for '{}'", model))
            })
    }
}

/// Map an `Unsupported` adapter answer to caller misuse; everything else is
/// passed through as an adapter error.
pub(crate) fn required(result: AdapterResult<RawPayload>) -> Result<AdapterResult<RawPayload>> {
    match result {
        Err(AdapterError::Unsupported(operation)) => Err(StoreError::Misuse(format!(
            "The adapter does not implement '{}'",
            operation
        ))),
        other => Ok(other),
    }
}
