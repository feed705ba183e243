use crate::core::{Attributes, ClientId, Result};
use crate::payload::{RelationshipPayload, ResourceIdentifier, ResourceObject};
use crate::record::Record;
use crate::store::Store;
use chrono::{DateTime, Utc};
use serde_json::{Value as JsonValue, json};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Reference to a related record as seen by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRef {
    pub model_name: String,
    /// `None` for a related record the server has not seen yet
    pub id: Option<String>,
    pub client_id: ClientId,
}

impl SnapshotRef {
    fn identifier(&self) -> Option<ResourceIdentifier> {
        Some(ResourceIdentifier::new(self.model_name.clone(), self.id.clone()?))
    }
}

/// Immutable view of one record handed to adapters.
///
/// Taking one is cheap: the attribute map is a persistent structure, so the
/// snapshot shares its nodes with the record until either side changes.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    model_name: String,
    id: Option<String>,
    client_id: ClientId,
    attributes: Attributes,
    belongs_to: BTreeMap<String, Option<SnapshotRef>>,
    has_many: BTreeMap<String, Vec<SnapshotRef>>,
    adapter_options: Option<JsonValue>,
    taken_at: DateTime<Utc>,
}

impl Snapshot {
    pub(crate) fn new(
        model_name: String,
        id: Option<String>,
        client_id: ClientId,
        attributes: Attributes,
        adapter_options: Option<JsonValue>,
    ) -> Self {
        Self {
            model_name,
            id,
            client_id,
            attributes,
            belongs_to: BTreeMap::new(),
            has_many: BTreeMap::new(),
            adapter_options,
            taken_at: Utc::now(),
        }
    }

    pub(crate) fn with_belongs_to(mut self, name: String, target: Option<SnapshotRef>) -> Self {
        self.belongs_to.insert(name, target);
        self
    }

    pub(crate) fn with_has_many(mut self, name: String, members: Vec<SnapshotRef>) -> Self {
        self.has_many.insert(name, members);
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn attr(&self, key: &str) -> Option<&JsonValue> {
        self.attributes.get(key)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// `None` when the relationship is unknown to the snapshot;
    /// `Some(None)` when it is known and empty.
    pub fn belongs_to(&self, name: &str) -> Option<Option<&SnapshotRef>> {
        self.belongs_to.get(name).map(Option::as_ref)
    }

    pub fn has_many(&self, name: &str) -> Option<&[SnapshotRef]> {
        self.has_many.get(name).map(Vec::as_slice)
    }

    pub fn adapter_options(&self) -> Option<&JsonValue> {
        self.adapter_options.as_ref()
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// The snapshot in canonical resource form. Related records without an
    /// id are left out of the linkage.
    pub fn to_resource(&self) -> ResourceObject {
        let mut resource = ResourceObject {
            model_name: self.model_name.clone(),
            id: self.id.clone(),
            attributes: self
                .attributes
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            relationships: BTreeMap::new(),
        };
        for (name, target) in &self.belongs_to {
            let identifier = target.as_ref().and_then(SnapshotRef::identifier);
            resource
                .relationships
                .insert(name.clone(), RelationshipPayload::one(identifier));
        }
        for (name, members) in &self.has_many {
            let identifiers = members.iter().filter_map(SnapshotRef::identifier).collect();
            resource
                .relationships
                .insert(name.clone(), RelationshipPayload::many(identifiers));
        }
        resource
    }

    /// `{ "data": resource }`
    pub fn serialize(&self) -> Result<JsonValue> {
        let resource = serde_json::to_value(self.to_resource())?;
        Ok(json!({ "data": resource }))
    }
}

/// The records of a live array, snapshotted only when an adapter asks.
pub struct SnapshotRecordArray {
    model_name: String,
    records: Vec<Record>,
    store: Store,
    adapter_options: Option<JsonValue>,
    meta: Option<JsonValue>,
    snapshots: OnceLock<Vec<Snapshot>>,
}

impl SnapshotRecordArray {
    pub(crate) fn new(
        store: &Store,
        model_name: impl Into<String>,
        records: Vec<Record>,
        meta: Option<JsonValue>,
        adapter_options: Option<JsonValue>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            records,
            store: store.clone(),
            adapter_options,
            meta,
            snapshots: OnceLock::new(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn meta(&self) -> Option<&JsonValue> {
        self.meta.as_ref()
    }

    pub fn adapter_options(&self) -> Option<&JsonValue> {
        self.adapter_options.as_ref()
    }

    pub fn is_computed(&self) -> bool {
        self.snapshots.get().is_some()
    }

    /// Snapshots of every record; computed on first call.
    pub fn snapshots(&self) -> &[Snapshot] {
        self.snapshots.get_or_init(|| {
            self.records
                .iter()
                .filter_map(|record| {
                    self.store
                        .snapshot_record(record, self.adapter_options.clone())
                        .ok()
                })
                .collect()
        })
    }
}

impl std::fmt::Debug for SnapshotRecordArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotRecordArray")
            .field("model_name", &self.model_name)
            .field("len", &self.records.len())
            .field("computed", &self.is_computed())
            .finish()
    }
}
