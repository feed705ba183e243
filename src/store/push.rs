// ============================================================================
// Push
// ============================================================================
//
// Ingests canonical payloads into the identity map. Included resources go
// first, so primary resources link to records that already hold data.
// Every resource lands in the record for its (type, id), creating an empty
// placeholder for identifiers the cache has not seen.
//
// ============================================================================

use super::{Store, StoreState};
use crate::core::{ClientId, Result, StoreError};
use crate::payload::{
    Payload, PrimaryData, RawPayload, RelationshipData, RelationshipPayload, RequestType,
    ResourceIdentifier, ResourceObject, normalize_response_helper,
};
use crate::record::Record;
use crate::relationships::WriteMode;
use crate::schema::{ModelSchema, RelationshipKind};
use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::info_span;

/// Records produced by a push, shaped like the payload's primary data.
#[derive(Debug, Clone, PartialEq)]
pub enum PushResult {
    Single(Option<Record>),
    Many(Vec<Record>),
}

impl PushResult {
    pub fn single(self) -> Option<Record> {
        match self {
            PushResult::Single(record) => record,
            PushResult::Many(records) => records.into_iter().next(),
        }
    }

    pub fn many(self) -> Vec<Record> {
        match self {
            PushResult::Single(record) => record.into_iter().collect(),
            PushResult::Many(records) => records,
        }
    }

    pub fn is_many(&self) -> bool {
        matches!(self, PushResult::Many(_))
    }
}

impl Store {
    /// Ingest a canonical payload.
    pub fn push(&self, payload: Payload) -> Result<PushResult> {
        let mut changed = Vec::new();
        let result = {
            let mut state = self.lock_state()?;
            self.push_locked(&mut state, payload, &mut changed)
        };
        self.notify_arrays(&changed);
        result
    }

    /// Normalize a raw document through `model`'s serializer, then push it.
    pub fn push_raw(&self, model: &str, raw: RawPayload) -> Result<PushResult> {
        let schema = self.model(model)?;
        let payload = normalize_response_helper(self, schema, raw, None, RequestType::Push)?;
        self.push(payload)
    }

    /// Load one record from a flat object such as
    /// `{"id": "1", "title": "Rails", "author": "7", "comments": ["1", "2"]}`.
    ///
    /// Keys naming a declared relationship are read as linkage ids; every
    /// other key except `id` is an attribute.
    pub fn load(&self, model: &str, data: JsonValue) -> Result<Record> {
        let schema = self.model(model)?;
        let resource = resource_from_flat(schema, data)?;
        self.push(Payload::single(resource))?
            .single()
            .ok_or_else(|| StoreError::ShapeViolation(format!("Loading a '{}' produced no record", model)))
    }

    pub(crate) fn push_locked(
        &self,
        state: &mut StoreState,
        payload: Payload,
        changed: &mut Vec<Record>,
    ) -> Result<PushResult> {
        let span = info_span!(
            "store.push",
            label = %self.label(),
            included = payload.included.len(),
            many = payload.is_collection()
        );
        let _enter = span.enter();

        let Payload { data, included, .. } = payload;
        for resource in included {
            self.push_resource(state, resource, changed)?;
        }

        match data {
            None => Ok(PushResult::Single(None)),
            Some(PrimaryData::Single(resource)) => {
                let record = self.push_resource(state, *resource, changed)?;
                Ok(PushResult::Single(Some(record)))
            }
            Some(PrimaryData::Many(resources)) => {
                let records = resources
                    .into_iter()
                    .map(|resource| self.push_resource(state, resource, changed))
                    .collect::<Result<Vec<_>>>()?;
                Ok(PushResult::Many(records))
            }
        }
    }

    fn push_resource(
        &self,
        state: &mut StoreState,
        resource: ResourceObject,
        changed: &mut Vec<Record>,
    ) -> Result<Record> {
        let model = self.model(&resource.model_name)?;
        let id = resource
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                StoreError::ShapeViolation(format!(
                    "You must include an 'id' for '{}' in an object passed to 'push'",
                    resource.model_name
                ))
            })?;

        let record = self.record_for_in(state, model.name(), &id);
        {
            let mut data = record.lock();
            data.state = data.state.did_load()?;
            for (key, value) in resource.attributes {
                data.canonical.insert(key, value);
            }
            data.has_loaded_data = true;
            data.is_reloading = false;
            data.updated_at = Some(Utc::now());
        }

        for (name, relationship) in resource.relationships {
            let Some(meta) = model.relationship_named(&name) else {
                log::debug!(
                    "ignoring relationship '{}' pushed for '{}': not declared on the model",
                    name,
                    model.name()
                );
                continue;
            };

            {
                let mut data = record.lock();
                let entry = data.relationship_mut(meta);
                if let Some(link) = relationship.related_link() {
                    entry.link = Some(link.to_string());
                }
                if relationship.meta.is_some() {
                    entry.meta = relationship.meta.clone();
                }
            }

            let Some(linkage) = relationship.data else {
                continue;
            };
            let identifiers = match (meta.kind, linkage) {
                (RelationshipKind::BelongsTo, RelationshipData::One(identifier)) => {
                    identifier.into_iter().collect()
                }
                (RelationshipKind::HasMany, RelationshipData::Many(identifiers)) => identifiers,
                (kind, _) => {
                    return Err(StoreError::ShapeViolation(format!(
                        "'{}.{}' is a {} relationship but the payload has linkage of the other shape",
                        model.name(),
                        name,
                        kind
                    )));
                }
            };

            let members = identifiers
                .iter()
                .map(|identifier| self.resolve_identifier(state, identifier))
                .collect::<Result<Vec<ClientId>>>()?;
            self.graph(state)
                .replace(&record, meta, &members, WriteMode::Canonical);
        }

        changed.push(record.clone());
        Ok(record)
    }

    fn resolve_identifier(&self, state: &mut StoreState, identifier: &ResourceIdentifier) -> Result<ClientId> {
        if !self.schema().contains(&identifier.model_name) {
            return Err(StoreError::ShapeViolation(format!(
                "The payload links to a resource of unknown type '{}'",
                identifier.model_name
            )));
        }
        Ok(self
            .record_for_in(state, &identifier.model_name, &identifier.id)
            .client_id())
    }
}

fn id_string(value: JsonValue) -> Result<String> {
    match value {
        JsonValue::String(id) if !id.is_empty() => Ok(id),
        JsonValue::Number(id) => Ok(id.to_string()),
        other => Err(StoreError::Misuse(format!("'{}' is not a valid id", other))),
    }
}

fn resource_from_flat(model: &ModelSchema, data: JsonValue) -> Result<ResourceObject> {
    let JsonValue::Object(map) = data else {
        return Err(StoreError::Misuse(format!(
            "Loading a '{}' requires an object",
            model.name()
        )));
    };

    let mut resource = ResourceObject {
        model_name: model.name().to_string(),
        ..Default::default()
    };
    for (key, value) in map {
        if key == "id" {
            resource.id = Some(id_string(value)?);
            continue;
        }
        let Some(meta) = model.relationship_named(&key) else {
            resource.attributes.insert(key, value);
            continue;
        };
        let payload = match (meta.kind, value) {
            (RelationshipKind::BelongsTo, JsonValue::Null) => RelationshipPayload::one(None),
            (RelationshipKind::BelongsTo, id) => RelationshipPayload::one(Some(ResourceIdentifier::new(
                meta.related_type.clone(),
                id_string(id)?,
            ))),
            (RelationshipKind::HasMany, JsonValue::Array(ids)) => RelationshipPayload::many(
                ids.into_iter()
                    .map(|id| Ok(ResourceIdentifier::new(meta.related_type.clone(), id_string(id)?)))
                    .collect::<Result<Vec<_>>>()?,
            ),
            (RelationshipKind::HasMany, _) => {
                return Err(StoreError::Misuse(format!(
                    "'{}.{}' expects an array of ids",
                    model.name(),
                    key
                )));
            }
        };
        resource.relationships.insert(key, payload);
    }

    if resource.id.is_none() {
        return Err(StoreError::Misuse(format!(
            "Loading a '{}' requires an 'id'",
            model.name()
        )));
    }
    Ok(resource)
}
