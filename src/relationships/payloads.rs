// ============================================================================
// Relationship Payload Manager
// ============================================================================
//
// Given a payload that answers one side of a relationship, inject the
// linkage for the inverse side so a single push leaves both sides wired.
// The transforms take a payload by value and return a new one; nothing is
// shared or mutated behind the caller's back.
//
// ============================================================================

use crate::payload::{
    Payload, PrimaryData, RelationshipData, RelationshipPayload, ResourceIdentifier,
    ResourceObject,
};
use crate::schema::{RelationshipKind, RelationshipMeta, SchemaRegistry};
use std::sync::Arc;

/// Resolved pair of a relationship and its declared inverse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipInfo {
    pub lhs_model: String,
    pub lhs_relationship: String,
    pub lhs_kind: RelationshipKind,
    pub rhs_model: String,
    pub rhs_relationship: String,
    pub rhs_kind: RelationshipKind,
}

#[derive(Debug, Clone)]
pub struct RelationshipPayloadsManager {
    schema: Arc<SchemaRegistry>,
}

impl RelationshipPayloadsManager {
    pub fn new(schema: Arc<SchemaRegistry>) -> Self {
        Self { schema }
    }

    /// `None` when the relationship is unknown or declares no inverse.
    pub fn relationship_info(&self, model: &str, relationship: &str) -> Option<RelationshipInfo> {
        let lhs = self.schema.relationship(model, relationship)?;
        let rhs = self.schema.inverse_of(model, relationship)?;
        Some(RelationshipInfo {
            lhs_model: lhs.parent_type.clone(),
            lhs_relationship: lhs.name.clone(),
            lhs_kind: lhs.kind,
            rhs_model: rhs.parent_type.clone(),
            rhs_relationship: rhs.name.clone(),
            rhs_kind: rhs.kind,
        })
    }

    /// Point every resource of a has-many response back at `owner`.
    pub fn ensure_inverse_on_has_many(
        &self,
        payload: Payload,
        owner: &ResourceIdentifier,
        relationship: &RelationshipMeta,
    ) -> Payload {
        if matches!(&payload.data, Some(PrimaryData::Many(resources)) if resources.is_empty()) {
            return payload;
        }
        self.ensure_inverse(payload, owner, relationship)
    }

    /// Point the resource of a belongs-to response back at `owner`.
    pub fn ensure_inverse_on_belongs_to(
        &self,
        payload: Payload,
        owner: &ResourceIdentifier,
        relationship: &RelationshipMeta,
    ) -> Payload {
        self.ensure_inverse(payload, owner, relationship)
    }

    fn ensure_inverse(
        &self,
        payload: Payload,
        owner: &ResourceIdentifier,
        relationship: &RelationshipMeta,
    ) -> Payload {
        let Some(info) = self.relationship_info(&owner.model_name, &relationship.name) else {
            return payload;
        };

        let data = payload.data.map(|data| match data {
            PrimaryData::Many(resources) => PrimaryData::Many(
                resources
                    .into_iter()
                    .map(|resource| inject_inverse(resource, &info, owner))
                    .collect(),
            ),
            PrimaryData::Single(resource) => {
                PrimaryData::Single(Box::new(inject_inverse(*resource, &info, owner)))
            }
        });

        Payload { data, ..payload }
    }
}

fn inject_inverse(
    mut resource: ResourceObject,
    info: &RelationshipInfo,
    owner: &ResourceIdentifier,
) -> ResourceObject {
    let mut entry = resource
        .relationships
        .remove(&info.rhs_relationship)
        .unwrap_or_default();

    let data = match (info.rhs_kind, entry.data.take()) {
        // server-supplied linkage for a single reference wins
        (RelationshipKind::BelongsTo, Some(existing)) => Some(existing),
        (RelationshipKind::BelongsTo, None) => Some(RelationshipData::One(Some(owner.clone()))),
        (RelationshipKind::HasMany, Some(RelationshipData::Many(mut members))) => {
            if !members.contains(owner) {
                members.push(owner.clone());
            }
            Some(RelationshipData::Many(members))
        }
        (RelationshipKind::HasMany, Some(RelationshipData::One(member))) => {
            let mut members: Vec<ResourceIdentifier> = member.into_iter().collect();
            if !members.contains(owner) {
                members.push(owner.clone());
            }
            Some(RelationshipData::Many(members))
        }
        // A pushed array is the whole canonical collection; writing `[owner]`
        // would drop the members the cache already knows. The owner joins
        // through the owner-side linkage write instead.
        (RelationshipKind::HasMany, None) => None,
    };

    if data.is_some() || entry != RelationshipPayload::default() {
        resource
            .relationships
            .insert(info.rhs_relationship.clone(), RelationshipPayload { data, ..entry });
    }
    resource
}
