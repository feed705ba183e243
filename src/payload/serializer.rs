//! Serializer contract and the default canonical-document normalizer.

use super::{Payload, RawPayload};
use crate::core::{Result, StoreError};
use crate::schema::ModelSchema;
use crate::store::Store;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Which coordinator operation produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    FindRecord,
    FindMany,
    FindHasMany,
    FindBelongsTo,
    FindAll,
    Query,
    QueryRecord,
    CreateRecord,
    UpdateRecord,
    DeleteRecord,
    Push,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::FindRecord => "findRecord",
            RequestType::FindMany => "findMany",
            RequestType::FindHasMany => "findHasMany",
            RequestType::FindBelongsTo => "findBelongsTo",
            RequestType::FindAll => "findAll",
            RequestType::Query => "query",
            RequestType::QueryRecord => "queryRecord",
            RequestType::CreateRecord => "createRecord",
            RequestType::UpdateRecord => "updateRecord",
            RequestType::DeleteRecord => "deleteRecord",
            RequestType::Push => "push",
        }
    }

    pub fn is_save(&self) -> bool {
        matches!(
            self,
            RequestType::CreateRecord | RequestType::UpdateRecord | RequestType::DeleteRecord
        )
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Converts an adapter's raw response into the canonical [`Payload`].
///
/// Implementations must be total over every well-formed response for the
/// given request type.
pub trait Serializer: Send + Sync {
    fn normalize_response(
        &self,
        store: &Store,
        model: &ModelSchema,
        raw: RawPayload,
        id: Option<&str>,
        request_type: RequestType,
    ) -> Result<Payload>;
}

/// Accepts documents that are already in canonical shape.
///
/// Save acknowledgments may be empty objects; they normalize to an empty
/// document.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonApiSerializer;

impl Serializer for JsonApiSerializer {
    fn normalize_response(
        &self,
        _store: &Store,
        model: &ModelSchema,
        raw: RawPayload,
        _id: Option<&str>,
        request_type: RequestType,
    ) -> Result<Payload> {
        if request_type.is_save() && raw.as_object().is_some_and(|map| map.is_empty()) {
            return Ok(Payload::empty());
        }
        serde_json::from_value(raw).map_err(|err| {
            StoreError::ShapeViolation(format!(
                "The '{}' response for '{}' is not a valid document: {}",
                request_type,
                model.name(),
                err
            ))
        })
    }
}

/// Default serializer plus per-model overrides.
#[derive(Clone)]
pub struct SerializerRegistry {
    default: Arc<dyn Serializer>,
    per_model: HashMap<String, Arc<dyn Serializer>>,
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self {
            default: Arc::new(JsonApiSerializer),
            per_model: HashMap::new(),
        }
    }
}

impl SerializerRegistry {
    pub fn set_default(&mut self, serializer: Arc<dyn Serializer>) {
        self.default = serializer;
    }

    pub fn register(&mut self, model: impl Into<String>, serializer: Arc<dyn Serializer>) {
        self.per_model.insert(model.into(), serializer);
    }

    pub fn registered_models(&self) -> impl Iterator<Item = &str> {
        self.per_model.keys().map(String::as_str)
    }

    pub fn serializer_for(&self, model: &str) -> &Arc<dyn Serializer> {
        self.per_model.get(model).unwrap_or(&self.default)
    }
}

/// Normalize through the model's serializer and check the result against
/// the store's schema before anything is pushed.
pub fn normalize_response_helper(
    store: &Store,
    model: &ModelSchema,
    raw: RawPayload,
    id: Option<&str>,
    request_type: RequestType,
) -> Result<Payload> {
    let serializer = store.serializer_for(model.name());
    let payload = serializer.normalize_response(store, model, raw, id, request_type)?;

    let schema = store.schema();
    let primary = payload.primary_resources().iter().map(|resource| (resource, true));
    let included = payload.included.iter().map(|resource| (resource, false));
    for (resource, is_primary) in primary.chain(included) {
        if !schema.contains(&resource.model_name) {
            return Err(StoreError::ShapeViolation(format!(
                "The '{}' response contains a resource of unknown type '{}'",
                request_type, resource.model_name
            )));
        }
        // a save acknowledgment may leave the id to the record that was sent
        let id_optional = is_primary && request_type.is_save();
        if !id_optional && resource.id.as_deref().is_none_or(str::is_empty) {
            return Err(StoreError::ShapeViolation(format!(
                "The '{}' response contains a '{}' resource without an id",
                request_type, resource.model_name
            )));
        }
    }
    Ok(payload)
}
