// ============================================================================
// Identity Map
// ============================================================================
//
// One record per (model, id), and one record per client id. Records without
// a server id are reachable by client id only until they are re-keyed.
//
// ============================================================================

use crate::core::{ClientId, Result, StoreError};
use crate::record::Record;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct IdentityMap {
    by_client_id: HashMap<ClientId, Record>,
    by_id: HashMap<String, HashMap<String, ClientId>>,
    /// Records per model, in insertion order
    by_model: HashMap<String, Vec<ClientId>>,
}

impl IdentityMap {
    pub fn insert(&mut self, record: Record) {
        let client_id = record.client_id();
        if let Some(id) = record.id() {
            self.by_id
                .entry(record.model_name().to_string())
                .or_default()
                .insert(id, client_id);
        }
        self.by_model
            .entry(record.model_name().to_string())
            .or_default()
            .push(client_id);
        self.by_client_id.insert(client_id, record);
    }

    pub fn get(&self, client_id: &ClientId) -> Option<&Record> {
        self.by_client_id.get(client_id)
    }

    pub fn lookup(&self, model: &str, id: &str) -> Option<&Record> {
        let client_id = self.by_id.get(model)?.get(id)?;
        self.by_client_id.get(client_id)
    }

    pub fn contains(&self, record: &Record) -> bool {
        self.by_client_id
            .get(&record.client_id())
            .is_some_and(|existing| existing == record)
    }

    /// Assign a server id to a record. The caller updates the record itself.
    pub fn set_id(&mut self, record: &Record, id: &str) -> Result<()> {
        let ids = self.by_id.entry(record.model_name().to_string()).or_default();
        match ids.get(id) {
            Some(existing) if *existing != record.client_id() => Err(StoreError::ShapeViolation(format!(
                "The id '{}' is already used by another '{}' record",
                id,
                record.model_name()
            ))),
            _ => {
                ids.retain(|_, client_id| *client_id != record.client_id());
                ids.insert(id.to_string(), record.client_id());
                Ok(())
            }
        }
    }

    pub fn remove(&mut self, record: &Record) -> Option<Record> {
        let client_id = record.client_id();
        let removed = self.by_client_id.remove(&client_id)?;
        if let Some(ids) = self.by_id.get_mut(record.model_name()) {
            ids.retain(|_, existing| *existing != client_id);
        }
        if let Some(members) = self.by_model.get_mut(record.model_name()) {
            members.retain(|existing| *existing != client_id);
        }
        Some(removed)
    }

    pub fn records_of(&self, model: &str) -> Vec<Record> {
        self.by_model
            .get(model)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|client_id| self.by_client_id.get(client_id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn clear(&mut self) -> Vec<Record> {
        self.by_id.clear();
        self.by_model.clear();
        self.by_client_id.drain().map(|(_, record)| record).collect()
    }
}
