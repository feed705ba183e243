use super::commit::{CommitReport, commit_transaction};
use super::{TransactionId, TransactionInfo, TransactionState};
use crate::core::Result;
use crate::record::Record;
use crate::store::Store;
use serde_json::Value as JsonValue;
use std::fmt;

/// Handle onto one open transaction of a store.
///
/// A transaction closes once it holds no records; a closed handle reports
/// `TransactionState::Closed` and accepts nothing.
#[derive(Clone)]
pub struct Transaction {
    id: TransactionId,
    store: Store,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, store: Store) -> Self {
        Self { id, store }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.store
            .lock_state()
            .map(|state| state.transactions.state(self.id))
            .unwrap_or(TransactionState::Closed)
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Member records, in the order they joined
    pub fn records(&self) -> Vec<Record> {
        let Ok(state) = self.store.lock_state() else {
            return Vec::new();
        };
        state
            .transactions
            .members(self.id)
            .iter()
            .filter_map(|client_id| state.identity.get(client_id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// Move a dirty record here from whatever transaction holds it.
    pub fn add(&self, record: &Record) -> Result<()> {
        self.store.move_to_transaction(record, self.id)
    }

    /// Create a new record directly in this transaction.
    pub fn create_record(&self, model: &str, attributes: JsonValue) -> Result<Record> {
        self.store.create_record_in(Some(self.id), model, attributes)
    }

    pub async fn commit(&self) -> Result<CommitReport> {
        commit_transaction(&self.store, self.id).await
    }

    /// Discard the local changes of every member not currently in flight.
    pub fn rollback(&self) {
        self.store.rollback_transaction(self.id);
    }

    pub fn info(&self) -> Option<TransactionInfo> {
        self.store.transaction_info(self.id)
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Transaction {}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction").field("id", &self.id).finish()
    }
}
