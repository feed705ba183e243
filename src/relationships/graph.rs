// ============================================================================
// Relationship Graph
// ============================================================================
//
// Keeps linkage mutual inside the identity map. Every write to one side of
// a relationship with a declared inverse is mirrored on the other side:
//
//   comment.post = P    <=>   P.comments contains comment
//
// Writes target either the canonical or the local side (see `WriteMode`).
// Record locks are taken one at a time; the caller holds the store lock.
//
// ============================================================================

use super::state::WriteMode;
use crate::core::{ClientId, Result, StoreError};
use crate::record::Record;
use crate::schema::{RelationshipKind, RelationshipMeta, SchemaRegistry};
use crate::store::identity_map::IdentityMap;

pub(crate) struct RelationshipGraph<'a> {
    schema: &'a SchemaRegistry,
    identity: &'a IdentityMap,
}

impl<'a> RelationshipGraph<'a> {
    pub fn new(schema: &'a SchemaRegistry, identity: &'a IdentityMap) -> Self {
        Self { schema, identity }
    }

    /// Resolve a relationship declared on `record`'s model.
    pub fn meta(&self, record: &Record, name: &str) -> Result<&'a RelationshipMeta> {
        self.schema
            .relationship(record.model_name(), name)
            .ok_or_else(|| {
                StoreError::Misuse(format!(
                    "Model '{}' has no relationship named '{}'",
                    record.model_name(),
                    name
                ))
            })
    }

    fn inverse(&self, meta: &RelationshipMeta) -> Option<&'a RelationshipMeta> {
        self.schema.inverse_of(&meta.parent_type, &meta.name)
    }

    /// Link `target` into `owner.meta`, and `owner` into the inverse side.
    pub fn link(&self, owner: &Record, meta: &RelationshipMeta, target: &Record, mode: WriteMode) {
        self.attach(owner, meta, target.client_id(), mode);
        if let Some(inverse) = self.inverse(meta) {
            self.attach(target, inverse, owner.client_id(), mode);
        }
    }

    pub fn unlink(&self, owner: &Record, meta: &RelationshipMeta, target: &Record, mode: WriteMode) {
        owner.lock().relationship_mut(meta).remove(target.client_id(), mode);
        if let Some(inverse) = self.inverse(meta) {
            target
                .lock()
                .relationship_mut(inverse)
                .remove(owner.client_id(), mode);
        }
    }

    /// Make `members` the complete linkage of `owner.meta` on the given side.
    ///
    /// Members that are not in the identity map are ignored.
    pub fn replace(&self, owner: &Record, meta: &RelationshipMeta, members: &[ClientId], mode: WriteMode) {
        let existing = {
            let mut data = owner.lock();
            let state = data.relationship_mut(meta);
            state.has_data = true;
            state.linkage(mode).members()
        };

        for stale in existing.iter().filter(|id| !members.contains(id)) {
            if let Some(target) = self.identity.get(stale) {
                self.unlink(owner, meta, target, mode);
            } else {
                owner.lock().relationship_mut(meta).remove(*stale, mode);
            }
        }

        let members: Vec<ClientId> = match meta.kind {
            // a single reference keeps only the last member given
            RelationshipKind::BelongsTo => members.last().copied().into_iter().collect(),
            RelationshipKind::HasMany => members.to_vec(),
        };
        for id in members.iter().filter(|id| !existing.contains(id)) {
            if let Some(target) = self.identity.get(id) {
                self.link(owner, meta, target, mode);
            }
        }

        owner.lock().relationship_mut(meta).reorder(&members, mode);
    }

    /// Drop `record` from every relationship that references it.
    pub fn disconnect(&self, record: &Record) {
        let links: Vec<(String, Vec<ClientId>)> = {
            let data = record.lock();
            data.relationships
                .iter()
                .map(|(name, state)| {
                    let mut members = state.canonical.members();
                    for id in state.current.members() {
                        if !members.contains(&id) {
                            members.push(id);
                        }
                    }
                    (name.clone(), members)
                })
                .collect()
        };

        for (name, members) in links {
            let Some(inverse) = self.schema.inverse_of(record.model_name(), &name) else {
                continue;
            };
            for id in members {
                if let Some(target) = self.identity.get(&id) {
                    target.lock().relationship_mut(inverse).forget(record.client_id());
                }
            }
        }
    }

    /// Restore the local side of every relationship of `record` to its
    /// canonical linkage, repairing inverses that local writes touched.
    pub fn rollback(&self, record: &Record) {
        for (meta, canonical) in self.linkages(record, WriteMode::Canonical) {
            self.replace(record, meta, &canonical, WriteMode::Local);
        }
    }

    /// Current linkage per relationship, as `(meta, members)`.
    pub fn linkages(&self, record: &Record, mode: WriteMode) -> Vec<(&'a RelationshipMeta, Vec<ClientId>)> {
        let data = record.lock();
        data.relationships
            .iter()
            .filter_map(|(name, state)| {
                let meta = self.schema.relationship(record.model_name(), name)?;
                Some((meta, state.linkage(mode).members()))
            })
            .collect()
    }

    fn attach(&self, owner: &Record, meta: &RelationshipMeta, target: ClientId, mode: WriteMode) {
        let displaced = {
            let mut data = owner.lock();
            let state = data.relationship_mut(meta);
            let displaced = match meta.kind {
                RelationshipKind::BelongsTo => state.linkage(mode).one().filter(|id| *id != target),
                RelationshipKind::HasMany => None,
            };
            state.add(target, mode);
            displaced
        };

        // the previous target of a single reference no longer points back here
        let Some(displaced) = displaced else {
            return;
        };
        if let (Some(previous), Some(inverse)) = (self.identity.get(&displaced), self.inverse(meta)) {
            previous
                .lock()
                .relationship_mut(inverse)
                .remove(owner.client_id(), mode);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ModelSchema;
    use tokio_util::sync::CancellationToken;

    fn schema() -> SchemaRegistry {
        SchemaRegistry::new(vec![
            ModelSchema::new("post")
                .relationship(RelationshipMeta::has_many("comments", "comment").inverse("post")),
            ModelSchema::new("comment").belongs_to("post", "post"),
        ])
        .unwrap()
    }

    fn record(identity: &mut IdentityMap, model: &str, id: &str) -> Record {
        let record = Record::detached(model, Some(id.to_string()), &CancellationToken::new());
        identity.insert(record.clone());
        record
    }

    fn members(record: &Record, name: &str, mode: WriteMode) -> Vec<ClientId> {
        record
            .lock()
            .relationships
            .get(name)
            .map(|state| state.linkage(mode).members())
            .unwrap_or_default()
    }

    #[test]
    fn test_link_is_mutual() {
        let schema = schema();
        let mut identity = IdentityMap::default();
        let post = record(&mut identity, "post", "1");
        let comment = record(&mut identity, "comment", "10");

        let graph = RelationshipGraph::new(&schema, &identity);
        let meta = graph.meta(&comment, "post").unwrap();
        graph.link(&comment, meta, &post, WriteMode::Canonical);

        assert_eq!(members(&post, "comments", WriteMode::Local), vec![comment.client_id()]);
        assert_eq!(members(&comment, "post", WriteMode::Local), vec![post.client_id()]);
    }

    #[test]
    fn test_replacing_belongs_to_leaves_previous_inverse() {
        let schema = schema();
        let mut identity = IdentityMap::default();
        let first = record(&mut identity, "post", "1");
        let second = record(&mut identity, "post", "2");
        let comment = record(&mut identity, "comment", "10");

        let graph = RelationshipGraph::new(&schema, &identity);
        let meta = graph.meta(&comment, "post").unwrap();
        graph.link(&comment, meta, &first, WriteMode::Canonical);
        graph.replace(&comment, meta, &[second.client_id()], WriteMode::Local);

        assert!(members(&first, "comments", WriteMode::Local).is_empty());
        assert_eq!(members(&first, "comments", WriteMode::Canonical), vec![comment.client_id()]);
        assert_eq!(members(&second, "comments", WriteMode::Local), vec![comment.client_id()]);

        graph.rollback(&comment);
        assert_eq!(members(&first, "comments", WriteMode::Local), vec![comment.client_id()]);
        assert!(members(&second, "comments", WriteMode::Local).is_empty());
    }

    #[test]
    fn test_disconnect_removes_from_related_records() {
        let schema = schema();
        let mut identity = IdentityMap::default();
        let post = record(&mut identity, "post", "1");
        let comment = record(&mut identity, "comment", "10");

        let graph = RelationshipGraph::new(&schema, &identity);
        let meta = graph.meta(&post, "comments").unwrap();
        graph.replace(&post, meta, &[comment.client_id()], WriteMode::Canonical);
        graph.disconnect(&comment);

        assert!(members(&post, "comments", WriteMode::Canonical).is_empty());
        assert!(members(&post, "comments", WriteMode::Local).is_empty());
    }

    #[test]
    fn test_unknown_relationship_is_misuse() {
        let schema = schema();
        let mut identity = IdentityMap::default();
        let post = record(&mut identity, "post", "1");
        let graph = RelationshipGraph::new(&schema, &identity);
        assert!(matches!(graph.meta(&post, "author"), Err(StoreError::Misuse(_))));
    }
}
