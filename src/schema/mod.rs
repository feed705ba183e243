// ============================================================================
// Model Schema Registry
// ============================================================================
//
// Static description of every model type known to a store: attribute names
// and relationship declarations. The registry is validated once when the
// store is built, and inverse relationships are resolved into a direct
// lookup table so payload reconciliation never has to search for them.
//
// ============================================================================

use crate::core::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationshipKind {
    BelongsTo,
    HasMany,
}

impl RelationshipKind {
    pub fn is_many(&self) -> bool {
        matches!(self, RelationshipKind::HasMany)
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationshipKind::BelongsTo => write!(f, "belongsTo"),
            RelationshipKind::HasMany => write!(f, "hasMany"),
        }
    }
}

/// One relationship field declared on a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipMeta {
    pub name: String,
    pub kind: RelationshipKind,
    /// Model type on the other end
    pub related_type: String,
    /// Model type that declares this relationship (set on registration)
    pub parent_type: String,
    /// Name of the reciprocal relationship on `related_type`
    pub inverse: Option<String>,
}

impl RelationshipMeta {
    pub fn belongs_to(name: impl Into<String>, related_type: impl Into<String>) -> Self {
        Self::new(name, RelationshipKind::BelongsTo, related_type)
    }

    pub fn has_many(name: impl Into<String>, related_type: impl Into<String>) -> Self {
        Self::new(name, RelationshipKind::HasMany, related_type)
    }

    fn new(name: impl Into<String>, kind: RelationshipKind, related_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            related_type: related_type.into(),
            parent_type: String::new(),
            inverse: None,
        }
    }

    /// Declare the reciprocal relationship on the related type
    pub fn inverse(mut self, name: impl Into<String>) -> Self {
        self.inverse = Some(name.into());
        self
    }

    pub fn has_inverse(&self) -> bool {
        self.inverse.is_some()
    }
}

/// Declaration of one model type.
///
/// ```
/// use memostore::schema::{ModelSchema, RelationshipMeta};
///
/// let post = ModelSchema::new("post")
///     .attr("title")
///     .relationship(RelationshipMeta::has_many("comments", "comment").inverse("post"));
/// assert!(post.relationship_named("comments").is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSchema {
    name: String,
    attributes: Vec<String>,
    relationships: Vec<RelationshipMeta>,
}

impl ModelSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn attr(mut self, name: impl Into<String>) -> Self {
        self.attributes.push(name.into());
        self
    }

    pub fn belongs_to(self, name: impl Into<String>, related_type: impl Into<String>) -> Self {
        self.relationship(RelationshipMeta::belongs_to(name, related_type))
    }

    pub fn has_many(self, name: impl Into<String>, related_type: impl Into<String>) -> Self {
        self.relationship(RelationshipMeta::has_many(name, related_type))
    }

    pub fn relationship(mut self, mut meta: RelationshipMeta) -> Self {
        meta.parent_type = self.name.clone();
        self.relationships.push(meta);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    pub fn relationships(&self) -> &[RelationshipMeta] {
        &self.relationships
    }

    pub fn relationship_named(&self, name: &str) -> Option<&RelationshipMeta> {
        self.relationships.iter().find(|rel| rel.name == name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|attr| attr == name)
    }
}

/// Validated, immutable table of every model a store knows about.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    models: BTreeMap<String, ModelSchema>,
    /// (model, relationship) -> index into that model's relationship list
    index: HashMap<(String, String), usize>,
}

impl SchemaRegistry {
    /// Validate the given models and resolve their inverse relationships.
    ///
    /// Declaring an inverse on one side is enough; the reciprocal side is
    /// filled in here.
    pub fn new(models: impl IntoIterator<Item = ModelSchema>) -> Result<Self> {
        let mut by_name: BTreeMap<String, ModelSchema> = BTreeMap::new();
        for model in models {
            if model.name.is_empty() {
                return Err(StoreError::Schema("Model name cannot be empty".to_string()));
            }
            let mut fields = HashSet::new();
            for field in model
                .attributes
                .iter()
                .chain(model.relationships.iter().map(|rel| &rel.name))
            {
                if !fields.insert(field.as_str()) {
                    return Err(StoreError::Schema(format!(
                        "Field '{}' is declared twice on model '{}'",
                        field, model.name
                    )));
                }
            }
            if by_name.contains_key(&model.name) {
                return Err(StoreError::Schema(format!(
                    "Model '{}' is registered twice",
                    model.name
                )));
            }
            by_name.insert(model.name.clone(), model);
        }

        let mut reciprocal: Vec<(String, String, String)> = Vec::new();
        for model in by_name.values() {
            for rel in &model.relationships {
                let target = by_name.get(&rel.related_type).ok_or_else(|| {
                    StoreError::Schema(format!(
                        "Relationship '{}.{}' points at unknown model '{}'",
                        model.name, rel.name, rel.related_type
                    ))
                })?;

                let Some(inverse_name) = &rel.inverse else {
                    continue;
                };
                let inverse = target.relationship_named(inverse_name).ok_or_else(|| {
                    StoreError::Schema(format!(
                        "Inverse '{}' of '{}.{}' is not declared on '{}'",
                        inverse_name, model.name, rel.name, target.name
                    ))
                })?;
                if inverse.related_type != model.name {
                    return Err(StoreError::Schema(format!(
                        "Inverse '{}.{}' points at '{}', expected '{}'",
                        target.name, inverse.name, inverse.related_type, model.name
                    )));
                }
                match &inverse.inverse {
                    Some(back) if back != &rel.name => {
                        return Err(StoreError::Schema(format!(
                            "'{}.{}' and '{}.{}' disagree about their inverse",
                            model.name, rel.name, target.name, inverse.name
                        )));
                    }
                    Some(_) => {}
                    None => reciprocal.push((
                        target.name.clone(),
                        inverse.name.clone(),
                        rel.name.clone(),
                    )),
                }
            }
        }

        for (model_name, rel_name, inverse_name) in reciprocal {
            if let Some(rel) = by_name
                .get_mut(&model_name)
                .and_then(|model| model.relationships.iter_mut().find(|rel| rel.name == rel_name))
            {
                rel.inverse = Some(inverse_name);
            }
        }

        let mut index = HashMap::new();
        for model in by_name.values() {
            for (position, rel) in model.relationships.iter().enumerate() {
                index.insert((model.name.clone(), rel.name.clone()), position);
            }
        }

        Ok(Self {
            models: by_name,
            index,
        })
    }

    /// Look up a model; an unknown model is caller misuse.
    pub fn model(&self, name: &str) -> Result<&ModelSchema> {
        self.models
            .get(name)
            .ok_or_else(|| StoreError::Misuse(format!("No model was found for '{}'", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn relationship(&self, model: &str, name: &str) -> Option<&RelationshipMeta> {
        let position = self.index.get(&(model.to_string(), name.to_string()))?;
        self.models.get(model)?.relationships.get(*position)
    }

    /// The relationship on the related type that mirrors `model.name`.
    pub fn inverse_of(&self, model: &str, name: &str) -> Option<&RelationshipMeta> {
        let rel = self.relationship(model, name)?;
        let inverse = rel.inverse.as_deref()?;
        self.relationship(&rel.related_type, inverse)
    }
}
