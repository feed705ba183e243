// ============================================================================
// Canonical Payload
// ============================================================================
//
// The normalized document shape every serializer produces and the identity
// map ingests:
//
//   { data: null | resource | [resource], included?: [resource], meta?, links? }
//
// ============================================================================

pub mod serializer;

pub use serializer::{
    JsonApiSerializer, RequestType, Serializer, SerializerRegistry, normalize_response_helper,
};

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

/// Raw, wire-specific adapter response.
pub type RawPayload = JsonValue;

/// `{ type, id }` reference to one resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    #[serde(rename = "type")]
    pub model_name: String,
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
}

impl ResourceIdentifier {
    pub fn new(model_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            id: id.into(),
        }
    }
}

/// Linkage carried by one relationship entry.
///
/// `null` and a single identifier both map to `One`; an array maps to `Many`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationshipData {
    Many(Vec<ResourceIdentifier>),
    One(Option<ResourceIdentifier>),
}

impl RelationshipData {
    pub fn identifiers(&self) -> Vec<&ResourceIdentifier> {
        match self {
            RelationshipData::Many(ids) => ids.iter().collect(),
            RelationshipData::One(id) => id.iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related: Option<String>,
    #[serde(rename = "self", default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
}

/// One entry of a resource's `relationships` object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipPayload {
    /// `None` when the key was absent; `Some(One(None))` for an explicit `null`.
    #[serde(
        default,
        deserialize_with = "present_relationship_data",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<RelationshipData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<RelationshipLinks>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<JsonValue>,
}

impl RelationshipPayload {
    pub fn one(identifier: Option<ResourceIdentifier>) -> Self {
        Self {
            data: Some(RelationshipData::One(identifier)),
            ..Default::default()
        }
    }

    pub fn many(identifiers: Vec<ResourceIdentifier>) -> Self {
        Self {
            data: Some(RelationshipData::Many(identifiers)),
            ..Default::default()
        }
    }

    pub fn related_link(&self) -> Option<&str> {
        self.links.as_ref()?.related.as_deref()
    }
}

/// One entity in canonical form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceObject {
    #[serde(rename = "type")]
    pub model_name: String,
    #[serde(
        default,
        deserialize_with = "optional_id_from_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, JsonValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, RelationshipPayload>,
}

impl ResourceObject {
    pub fn new(model_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn attribute(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn relationship(mut self, name: impl Into<String>, payload: RelationshipPayload) -> Self {
        self.relationships.insert(name.into(), payload);
        self
    }

    pub fn identifier(&self) -> Option<ResourceIdentifier> {
        Some(ResourceIdentifier::new(
            self.model_name.clone(),
            self.id.clone()?,
        ))
    }
}

/// Primary data of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryData {
    Many(Vec<ResourceObject>),
    Single(Box<ResourceObject>),
}

/// Canonical normalized document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub data: Option<PrimaryData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included: Vec<ResourceObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<JsonValue>,
}

impl Payload {
    /// A document whose primary data is explicitly `null`
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(resource: ResourceObject) -> Self {
        Self {
            data: Some(PrimaryData::Single(Box::new(resource))),
            ..Default::default()
        }
    }

    pub fn many(resources: Vec<ResourceObject>) -> Self {
        Self {
            data: Some(PrimaryData::Many(resources)),
            ..Default::default()
        }
    }

    pub fn with_included(mut self, included: Vec<ResourceObject>) -> Self {
        self.included = included;
        self
    }

    pub fn with_meta(mut self, meta: JsonValue) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.data, Some(PrimaryData::Many(_)))
    }

    /// Id of a single primary resource
    pub fn primary_id(&self) -> Option<&str> {
        match &self.data {
            Some(PrimaryData::Single(resource)) => resource.id.as_deref(),
            _ => None,
        }
    }

    pub fn primary_resources(&self) -> &[ResourceObject] {
        match &self.data {
            Some(PrimaryData::Many(resources)) => resources,
            Some(PrimaryData::Single(resource)) => std::slice::from_ref(&**resource),
            None => &[],
        }
    }

    pub fn primary_resources_mut(&mut self) -> &mut [ResourceObject] {
        match &mut self.data {
            Some(PrimaryData::Many(resources)) => resources,
            Some(PrimaryData::Single(resource)) => std::slice::from_mut(&mut **resource),
            None => &mut [],
        }
    }
}

/// True when an adapter response carries anything at all.
///
/// Arrays always count (an empty collection is a valid answer); objects
/// need at least one key.
pub fn payload_is_not_blank(raw: &RawPayload) -> bool {
    match raw {
        JsonValue::Array(_) => true,
        JsonValue::Object(map) => !map.is_empty(),
        JsonValue::Null => false,
        _ => true,
    }
}

fn id_from_json<E: de::Error>(value: JsonValue) -> Result<String, E> {
    match value {
        JsonValue::String(id) => Ok(id),
        JsonValue::Number(id) => Ok(id.to_string()),
        other => Err(E::custom(format!("expected a string or number id, got {}", other))),
    }
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    id_from_json(JsonValue::deserialize(deserializer)?)
}

fn optional_id_from_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match JsonValue::deserialize(deserializer)? {
        JsonValue::Null => Ok(None),
        value => id_from_json(value).map(Some),
    }
}

fn present_relationship_data<'de, D>(deserializer: D) -> Result<Option<RelationshipData>, D::Error>
where
    D: Deserializer<'de>,
{
    RelationshipData::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_relationship_null_is_distinct_from_absent() {
        let resource: ResourceObject = serde_json::from_value(json!({
            "type": "comment",
            "id": 1,
            "relationships": {
                "post": { "data": null },
                "author": { "links": { "related": "/comments/1/author" } }
            }
        }))
        .unwrap();

        assert_eq!(resource.id.as_deref(), Some("1"));
        assert_eq!(
            resource.relationships["post"].data,
            Some(RelationshipData::One(None))
        );
        assert_eq!(resource.relationships["author"].data, None);
        assert_eq!(
            resource.relationships["author"].related_link(),
            Some("/comments/1/author")
        );
    }

    #[test]
    fn test_primary_data_shapes() {
        let many: Payload =
            serde_json::from_value(json!({"data": [{"type": "post", "id": "1"}]})).unwrap();
        assert!(many.is_collection());
        assert_eq!(many.primary_resources().len(), 1);

        let single: Payload =
            serde_json::from_value(json!({"data": {"type": "post", "id": "2"}})).unwrap();
        assert!(!single.is_collection());
        assert_eq!(single.primary_id(), Some("2"));

        let none: Payload = serde_json::from_value(json!({"data": null})).unwrap();
        assert!(!none.has_data());
        assert!(none.primary_resources().is_empty());
    }

    #[test]
    fn test_blank_detection() {
        assert!(!payload_is_not_blank(&json!(null)));
        assert!(!payload_is_not_blank(&json!({})));
        assert!(payload_is_not_blank(&json!([])));
        assert!(payload_is_not_blank(&json!({"data": null})));
    }
}
