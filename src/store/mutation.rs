// ============================================================================
// Local Mutation & Commit Bookkeeping
// ============================================================================
//
// Everything that changes a record outside of a push: application writes,
// deletes, rollbacks, unloads, and the per-record outcome of a commit.
//
// Each operation keeps the dirty/transaction invariant: a record is a
// member of exactly one open transaction while dirty, and of none while
// clean (see `sync_membership`).
//
// ============================================================================

use super::{Store, StoreState};
use crate::core::{Attributes, ClientId, Result, StoreError, ValidationErrors, overlay};
use crate::finders::FindOptions;
use crate::payload::{Payload, PrimaryData};
use crate::record::{DirtyPhase, Record, RecordData, RecordState};
use crate::relationships::graph::RelationshipGraph;
use crate::relationships::{Linkage, WriteMode};
use crate::schema::{RelationshipKind, RelationshipMeta};
use crate::transaction::{CommitReport, DirtyType, Transaction, TransactionId, commit_transaction};
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::slice;

/// An untouched record returns to clean once its last local change is undone.
fn settle(data: &mut RecordData) {
    if data.state == RecordState::Updated(DirtyPhase::Uncommitted) && !data.has_local_changes() {
        data.state = RecordState::Clean;
    }
}

impl Store {
    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create a new record in the default transaction. An `id` key assigns
    /// a client-chosen id; every other key is an attribute.
    pub fn create_record(&self, model: &str, attributes: JsonValue) -> Result<Record> {
        self.create_record_in(None, model, attributes)
    }

    pub(crate) fn create_record_in(
        &self,
        transaction: Option<TransactionId>,
        model: &str,
        attributes: JsonValue,
    ) -> Result<Record> {
        let schema = self.model(model)?;
        let map = match attributes {
            JsonValue::Object(map) => map,
            JsonValue::Null => Default::default(),
            other => {
                return Err(StoreError::Misuse(format!(
                    "create_record for '{}' expects an object of attributes, got {}",
                    model, other
                )));
            }
        };

        let mut id = None;
        let mut pending = Attributes::new();
        for (key, value) in map {
            if key == "id" {
                id = match value {
                    JsonValue::String(id) => Some(id),
                    JsonValue::Number(id) => Some(id.to_string()),
                    JsonValue::Null => None,
                    other => {
                        return Err(StoreError::Misuse(format!("'{}' is not a valid id", other)));
                    }
                };
            } else if schema.relationship_named(&key).is_some() {
                return Err(StoreError::Misuse(format!(
                    "'{}.{}' is a relationship; set it on the created record instead",
                    model, key
                )));
            } else {
                pending.insert(key, value);
            }
        }

        let record = {
            let mut state = self.lock_state()?;
            if let Some(id) = &id
                && state.identity.lookup(model, id).is_some()
            {
                return Err(StoreError::Misuse(format!(
                    "The id '{}' has already been used with another '{}' record",
                    id, model
                )));
            }

            let record = Record::new(model, id, self.downgrade(), self.lifetime());
            let transaction = match transaction {
                Some(transaction) => transaction,
                None => state.transactions.default_id(),
            };
            state.transactions.enroll(transaction, record.client_id())?;
            {
                let mut data = record.lock();
                data.state = RecordState::Created(DirtyPhase::Uncommitted);
                data.pending = pending;
                data.transaction = Some(transaction);
            }
            state.identity.insert(record.clone());
            record
        };

        self.notify_arrays(slice::from_ref(&record));
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Attribute & relationship writes
    // ------------------------------------------------------------------

    pub(crate) fn set_attribute(&self, record: &Record, key: &str, value: JsonValue) -> Result<()> {
        {
            let mut state = self.lock_state()?;
            {
                let mut data = record.lock();
                if data.attribute(key) == Some(&value) {
                    return Ok(());
                }
                data.state = data.state.did_set_property()?;

                let acknowledged = data.in_flight.get(key).or_else(|| data.canonical.get(key));
                if acknowledged == Some(&value) {
                    data.pending.remove(key);
                } else {
                    data.pending.insert(key.to_string(), value);
                }

                // an empty rejection is cleared by any write
                data.errors.remove(key);
                if !data.state.is_valid() && data.errors.is_empty() {
                    data.state = data.state.became_valid();
                }
                settle(&mut data);
            }
            self.sync_membership(&mut state, record)?;
        }
        self.notify_arrays(slice::from_ref(record));
        Ok(())
    }

    pub(crate) fn set_belongs_to(&self, record: &Record, name: &str, target: Option<&Record>) -> Result<()> {
        let targets: Vec<Record> = target.cloned().into_iter().collect();
        let members: Vec<ClientId> = targets.iter().map(Record::client_id).collect();
        self.write_relationship(
            record,
            name,
            RelationshipKind::BelongsTo,
            &targets,
            |current| current.one() == target.map(Record::client_id),
            |graph, meta| graph.replace(record, meta, &members, WriteMode::Local),
        )
    }

    pub(crate) fn add_to_has_many(&self, record: &Record, name: &str, member: &Record) -> Result<()> {
        self.write_relationship(
            record,
            name,
            RelationshipKind::HasMany,
            slice::from_ref(member),
            |current| current.contains(member.client_id()),
            |graph, meta| graph.link(record, meta, member, WriteMode::Local),
        )
    }

    pub(crate) fn remove_from_has_many(&self, record: &Record, name: &str, member: &Record) -> Result<()> {
        self.write_relationship(
            record,
            name,
            RelationshipKind::HasMany,
            slice::from_ref(member),
            |current| !current.contains(member.client_id()),
            |graph, meta| graph.unlink(record, meta, member, WriteMode::Local),
        )
    }

    /// Shared path of local relationship writes. Only `record` becomes
    /// dirty; the mirrored inverse side does not.
    fn write_relationship(
        &self,
        record: &Record,
        name: &str,
        kind: RelationshipKind,
        targets: &[Record],
        is_noop: impl FnOnce(&Linkage) -> bool,
        write: impl FnOnce(&RelationshipGraph<'_>, &RelationshipMeta),
    ) -> Result<()> {
        {
            let mut state = self.lock_state()?;
            let graph = self.graph(&state);
            let meta = graph.meta(record, name)?;
            if meta.kind != kind {
                return Err(StoreError::Misuse(format!(
                    "'{}.{}' is a {} relationship",
                    record.model_name(),
                    name,
                    meta.kind
                )));
            }
            for target in targets {
                if target.model_name() != meta.related_type {
                    return Err(StoreError::Misuse(format!(
                        "'{}.{}' expects a '{}' record, got a '{}'",
                        record.model_name(),
                        name,
                        meta.related_type,
                        target.model_name()
                    )));
                }
                if !state.identity.contains(target) {
                    return Err(StoreError::Misuse(format!(
                        "Cannot link '{}.{}' to a record that is no longer in the store",
                        record.model_name(),
                        name
                    )));
                }
            }

            {
                let mut data = record.lock();
                let current = data
                    .relationship(name)
                    .map(|relationship| relationship.current.clone())
                    .unwrap_or_else(|| Linkage::empty(kind));
                if is_noop(&current) {
                    return Ok(());
                }
                data.state = data.state.did_set_property()?;
                if data.state.is_in_flight() {
                    data.pending_relationship_edits = true;
                }
            }

            write(&graph, meta);
            settle(&mut record.lock());
            self.sync_membership(&mut state, record)?;
        }
        self.notify_arrays(slice::from_ref(record));
        Ok(())
    }

    pub(crate) fn related_record(&self, record: &Record, name: &str) -> Result<Option<Record>> {
        let state = self.lock_state()?;
        let meta = self.graph(&state).meta(record, name)?;
        if meta.kind.is_many() {
            return Err(StoreError::Misuse(format!(
                "'{}.{}' is a has-many relationship",
                record.model_name(),
                name
            )));
        }
        let member = record
            .lock()
            .relationship(name)
            .and_then(|relationship| relationship.current.one());
        Ok(member.and_then(|client_id| state.identity.get(&client_id).cloned()))
    }

    pub(crate) fn related_records(&self, record: &Record, name: &str) -> Result<Vec<Record>> {
        let state = self.lock_state()?;
        let meta = self.graph(&state).meta(record, name)?;
        if !meta.kind.is_many() {
            return Err(StoreError::Misuse(format!(
                "'{}.{}' is a belongs-to relationship",
                record.model_name(),
                name
            )));
        }
        let members = record
            .lock()
            .relationship(name)
            .map(|relationship| relationship.current.members())
            .unwrap_or_default();
        Ok(members
            .iter()
            .filter_map(|client_id| state.identity.get(client_id).cloned())
            .collect())
    }

    // ------------------------------------------------------------------
    // Delete, rollback, unload
    // ------------------------------------------------------------------

    pub(crate) fn delete_record(&self, record: &Record) -> Result<()> {
        {
            let mut state = self.lock_state()?;
            let next = {
                let mut data = record.lock();
                data.state = data.state.delete()?;
                data.state
            };
            if next == RecordState::DeletedSaved {
                // never reached the server
                self.remove_record_locked(&mut state, record);
            } else {
                self.sync_membership(&mut state, record)?;
            }
        }
        self.notify_arrays(slice::from_ref(record));
        Ok(())
    }

    /// Take a record out of the identity map and every relationship.
    pub(crate) fn remove_record_locked(&self, state: &mut StoreState, record: &Record) {
        self.graph(state).disconnect(record);
        state.identity.remove(record);
        let transaction = {
            let mut data = record.lock();
            data.unloaded = true;
            data.transaction.take()
        };
        if let Some(transaction) = transaction {
            state.transactions.withdraw(transaction, record.client_id());
        }
        record.lifetime().cancel();
    }

    pub(crate) fn rollback_record(&self, record: &Record) {
        if let Ok(mut state) = self.lock_state() {
            self.rollback_locked(&mut state, record);
        }
        self.notify_arrays(slice::from_ref(record));
    }

    pub(crate) fn rollback_transaction(&self, transaction: TransactionId) {
        let mut changed = Vec::new();
        if let Ok(mut state) = self.lock_state() {
            for client_id in state.transactions.members(transaction) {
                let Some(record) = state.identity.get(&client_id).cloned() else {
                    continue;
                };
                self.rollback_locked(&mut state, &record);
                changed.push(record);
            }
        }
        self.notify_arrays(&changed);
    }

    fn rollback_locked(&self, state: &mut StoreState, record: &Record) {
        let current = record.lock().state;
        if current.is_in_flight() {
            log::debug!("skipping rollback of {:?}: its commit is in flight", record);
            return;
        }
        if !current.is_dirty() {
            return;
        }

        self.graph(state).rollback(record);
        let next = {
            let mut data = record.lock();
            data.pending = Attributes::new();
            data.errors.clear();
            data.pending_relationship_edits = false;
            match data.state.rollback() {
                Ok(next) => {
                    data.state = next;
                    next
                }
                Err(err) => {
                    log::warn!("rollback of {:?} failed: {}", record, err);
                    return;
                }
            }
        };

        if next == RecordState::DeletedSaved {
            self.remove_record_locked(state, record);
        } else if let Err(err) = self.sync_membership(state, record) {
            log::warn!("rollback of {:?} left it outside any transaction: {}", record, err);
        }
    }

    /// Drop a record from the cache, discarding local changes. A record
    /// whose commit is in flight is kept.
    pub(crate) fn unload_record(&self, record: &Record) {
        if let Ok(mut state) = self.lock_state() {
            self.unload_locked(&mut state, record);
        }
        self.notify_arrays(slice::from_ref(record));
    }

    /// Unload every record of `model`.
    pub fn unload_all(&self, model: &str) {
        let mut changed = Vec::new();
        if let Ok(mut state) = self.lock_state() {
            for record in state.identity.records_of(model) {
                self.unload_locked(&mut state, &record);
                changed.push(record);
            }
            if let Some(meta) = state.type_meta.get_mut(model) {
                meta.has_loaded_all = false;
            }
        }
        self.notify_arrays(&changed);
    }

    fn unload_locked(&self, state: &mut StoreState, record: &Record) {
        if !state.identity.contains(record) {
            return;
        }
        {
            let mut data = record.lock();
            if data.state.is_in_flight() {
                log::warn!("not unloading {:?}: its commit is in flight", record);
                return;
            }
            data.state = RecordState::Empty;
            data.pending = Attributes::new();
            data.errors.clear();
        }
        self.remove_record_locked(state, record);
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Keep transaction membership in step with dirtiness: a dirty record
    /// nobody placed joins the default transaction, a clean one leaves.
    pub(crate) fn sync_membership(&self, state: &mut StoreState, record: &Record) -> Result<()> {
        let (dirty, transaction) = {
            let data = record.lock();
            (data.state.is_dirty(), data.transaction)
        };
        match (dirty, transaction) {
            (true, None) => {
                let default = state.transactions.default_id();
                state.transactions.enroll(default, record.client_id())?;
                record.lock().transaction = Some(default);
            }
            (false, Some(transaction)) => {
                state.transactions.withdraw(transaction, record.client_id());
                record.lock().transaction = None;
            }
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn move_to_transaction(&self, record: &Record, target: TransactionId) -> Result<()> {
        let mut state = self.lock_state()?;
        self.move_locked(&mut state, record, target)
    }

    fn move_locked(&self, state: &mut StoreState, record: &Record, target: TransactionId) -> Result<()> {
        if !state.identity.contains(record) {
            return Err(StoreError::Misuse(format!(
                "{:?} is no longer in the store",
                record
            )));
        }
        let (current_state, current) = {
            let data = record.lock();
            (data.state, data.transaction)
        };
        if !current_state.is_dirty() {
            return Err(StoreError::Misuse(format!(
                "Only dirty records can join a transaction; {:?} is {}",
                record, current_state
            )));
        }
        if current_state.is_in_flight() {
            return Err(StoreError::InvalidTransition {
                state: current_state.state_name(),
                operation: "move",
            });
        }
        if current == Some(target) {
            return Ok(());
        }

        state.transactions.enroll(target, record.client_id())?;
        if let Some(current) = current {
            state.transactions.withdraw(current, record.client_id());
        }
        record.lock().transaction = Some(target);
        Ok(())
    }

    pub(crate) fn transaction_of(&self, record: &Record) -> Option<Transaction> {
        let transaction = record.lock().transaction?;
        Some(Transaction::new(transaction, self.clone()))
    }

    /// Commit one record on its own. An invalid record is resubmitted as is.
    pub(crate) async fn save_record(&self, record: &Record) -> Result<CommitReport> {
        let transaction = {
            let mut state = self.lock_state()?;
            {
                let mut data = record.lock();
                if data.state.is_in_flight() {
                    return Err(StoreError::InvalidTransition {
                        state: data.state.state_name(),
                        operation: "save",
                    });
                }
                if !data.state.is_dirty() {
                    return Ok(CommitReport::default());
                }
                if !data.state.is_valid() {
                    data.state = data.state.became_valid();
                    data.errors.clear();
                }
            }
            let transaction = state.transactions.begin();
            self.move_locked(&mut state, record, transaction)?;
            transaction
        };
        commit_transaction(self, transaction).await
    }

    pub(crate) async fn reload_record(&self, record: &Record) -> Result<Record> {
        let id = record.id().ok_or_else(|| {
            StoreError::Misuse(format!("Cannot reload {:?}: it has no id yet", record))
        })?;
        self.find_record_with(record.model_name(), &id, FindOptions::reload())
            .await
    }

    // ------------------------------------------------------------------
    // Fetch & commit outcomes
    // ------------------------------------------------------------------

    /// A fetch for `record` failed or did not return it. A record that
    /// never held data is evicted; a loaded one keeps its last known data.
    pub(crate) fn record_fetch_failed(&self, record: &Record) {
        let Ok(mut state) = self.lock_state() else {
            return;
        };
        let evict = {
            let mut data = record.lock();
            data.is_reloading = false;
            data.state = data.state.not_found();
            !data.has_loaded_data && data.state.is_empty() && !data.unloaded
        };
        if evict && state.identity.contains(record) {
            self.remove_record_locked(&mut state, record);
        }
        drop(state);
        self.notify_arrays(slice::from_ref(record));
    }

    /// Apply a save acknowledgment.
    pub(crate) fn did_save_record(
        &self,
        state: &mut StoreState,
        record: &Record,
        payload: Option<Payload>,
        dirty_type: DirtyType,
        changed: &mut Vec<Record>,
    ) -> Result<()> {
        if record.lock().unloaded {
            return Ok(());
        }

        let server_id = payload
            .as_ref()
            .and_then(|payload| payload.primary_id())
            .map(str::to_string);
        match (record.id(), server_id) {
            (None, Some(id)) => {
                if let Err(err) = state.identity.set_id(record, &id) {
                    self.record_commit_failed(record);
                    return Err(err);
                }
                record.lock().id = Some(id);
            }
            (None, None) if dirty_type == DirtyType::Created => {
                self.record_commit_failed(record);
                return Err(StoreError::ShapeViolation(format!(
                    "Your adapter did not return an id for the new '{}' record",
                    record.model_name()
                )));
            }
            (Some(id), Some(returned)) if id != returned => {
                log::warn!(
                    "Saving '{}' with id '{}' returned a payload with id '{}'; keeping '{}'",
                    record.model_name(),
                    id,
                    returned,
                    id
                );
            }
            _ => {}
        }

        let committed_relationships = {
            let mut data = record.lock();
            let in_flight = std::mem::take(&mut data.in_flight);
            data.canonical = overlay(&data.canonical, &in_flight);
            data.errors.clear();
            data.state = data.state.did_commit()?;
            data.has_loaded_data = true;
            data.updated_at = Some(Utc::now());
            if !data.state.is_deleted() && (!data.pending.is_empty() || data.pending_relationship_edits) {
                // edits made while the save was running
                data.state = data.state.did_set_property()?;
            }
            data.pending_relationship_edits = false;
            std::mem::take(&mut data.in_flight_relationships)
        };

        if dirty_type == DirtyType::Deleted {
            self.remove_record_locked(state, record);
            changed.push(record.clone());
            if let Some(mut payload) = payload {
                payload.data = None;
                self.push_locked(state, payload, changed)?;
            }
            return Ok(());
        }

        for (name, members) in committed_relationships {
            if let Some(meta) = self.schema().relationship(record.model_name(), &name) {
                self.graph(state)
                    .replace(record, meta, &members, WriteMode::Canonical);
            }
        }
        self.sync_membership(state, record)?;
        changed.push(record.clone());

        if let Some(mut payload) = payload {
            if let Some(PrimaryData::Single(resource)) = &mut payload.data
                && resource.id.is_none()
            {
                resource.id = record.id();
            }
            self.push_locked(state, payload, changed)?;
        }
        Ok(())
    }

    /// The adapter rejected the save with field errors.
    pub(crate) fn record_was_invalid(&self, record: &Record, errors: ValidationErrors) {
        let mut data = record.lock();
        if data.unloaded {
            return;
        }
        data.abort_flight();
        match data.state.became_invalid() {
            Ok(next) => data.state = next,
            Err(err) => log::warn!("cannot mark {:?} invalid: {}", record, err),
        }
        data.errors = errors;
    }

    /// The save did not reach the server; local changes stay pending.
    pub(crate) fn record_commit_failed(&self, record: &Record) {
        let mut data = record.lock();
        if data.unloaded {
            return;
        }
        data.abort_flight();
        match data.state.commit_failed() {
            Ok(next) => data.state = next,
            Err(err) => log::warn!("cannot fail the commit of {:?}: {}", record, err),
        }
    }
}
