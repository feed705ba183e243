use serde_json::{Map, Value as JsonValue};

/// Attribute map of one record.
///
/// A persistent map, so snapshots and layered views are cheap clones.
pub type Attributes = im::OrdMap<String, JsonValue>;

/// Build an attribute map from a JSON object.
pub fn attributes_from_map(map: &Map<String, JsonValue>) -> Attributes {
    map.iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Build an attribute map from any JSON value; non-objects yield an empty map.
pub fn attributes_from_json(value: &JsonValue) -> Attributes {
    value.as_object().map(attributes_from_map).unwrap_or_default()
}

pub fn attributes_to_json(attributes: &Attributes) -> JsonValue {
    let map: Map<String, JsonValue> = attributes
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    JsonValue::Object(map)
}

/// Overlay `top` onto `base`; keys in `top` win.
pub fn overlay(base: &Attributes, top: &Attributes) -> Attributes {
    if top.is_empty() {
        return base.clone();
    }
    top.clone().union(base.clone())
}
