// ============================================================================
// Transaction Manager
// ============================================================================
//
// Owns every open transaction of a store, including the implicit default
// transaction that dirty records join when nobody placed them elsewhere.
// A transaction is dropped once it becomes empty, unless a commit is still
// waiting on the adapter; it is then dropped when the commit settles.
//
// ============================================================================

use super::state::{TransactionEntry, TransactionId, TransactionState};
use crate::core::{ClientId, Result, StoreError};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct TransactionManager {
    transactions: HashMap<TransactionId, TransactionEntry>,
    default: Option<TransactionId>,
}

impl TransactionManager {
    pub fn begin(&mut self) -> TransactionId {
        let transaction_id = TransactionId::next();
        self.transactions
            .insert(transaction_id, TransactionEntry::new(transaction_id));
        transaction_id
    }

    /// The default transaction, opened on demand.
    pub fn default_id(&mut self) -> TransactionId {
        match self.default {
            Some(id) if self.transactions.contains_key(&id) => id,
            _ => {
                let id = self.begin();
                self.default = Some(id);
                id
            }
        }
    }

    /// The default transaction if it is currently open.
    pub fn current_default(&self) -> Option<TransactionId> {
        self.default.filter(|id| self.transactions.contains_key(id))
    }

    pub fn state(&self, txn_id: TransactionId) -> TransactionState {
        self.transactions
            .get(&txn_id)
            .map(TransactionEntry::state)
            .unwrap_or(TransactionState::Closed)
    }

    pub fn members(&self, txn_id: TransactionId) -> Vec<ClientId> {
        self.transactions
            .get(&txn_id)
            .map(|txn| txn.members().to_vec())
            .unwrap_or_default()
    }

    pub fn enroll(&mut self, txn_id: TransactionId, member: ClientId) -> Result<()> {
        let transaction = self.transactions.get_mut(&txn_id).ok_or_else(|| {
            StoreError::Misuse(format!("Transaction {} is closed", txn_id))
        })?;
        transaction.enroll(member)
    }

    pub fn withdraw(&mut self, txn_id: TransactionId, member: ClientId) {
        let Some(transaction) = self.transactions.get_mut(&txn_id) else {
            return;
        };
        transaction.withdraw(member);
        if transaction.is_empty() && transaction.state() == TransactionState::Active {
            self.close(txn_id);
        }
    }

    pub fn begin_commit(&mut self, txn_id: TransactionId) {
        if let Some(transaction) = self.transactions.get_mut(&txn_id) {
            transaction.begin_commit();
        }
    }

    pub fn end_commit(&mut self, txn_id: TransactionId) {
        let Some(transaction) = self.transactions.get_mut(&txn_id) else {
            return;
        };
        transaction.end_commit();
        if transaction.is_empty() {
            self.close(txn_id);
        }
    }

    pub fn close(&mut self, txn_id: TransactionId) {
        if let Some(mut transaction) = self.transactions.remove(&txn_id) {
            transaction.close();
        }
        if self.default == Some(txn_id) {
            self.default = None;
        }
    }

    /// Open transactions, oldest first
    pub fn open_ids(&self) -> Vec<TransactionId> {
        let mut ids: Vec<TransactionId> = self.transactions.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn info(&self, txn_id: TransactionId) -> Option<TransactionInfo> {
        self.transactions.get(&txn_id).map(|txn| TransactionInfo {
            id: txn.id(),
            state: txn.state(),
            member_count: txn.members().len(),
            is_default: self.default == Some(txn_id),
            duration: txn.duration(),
        })
    }

    pub fn clear(&mut self) {
        for (_, mut transaction) in self.transactions.drain() {
            transaction.close();
        }
        self.default = None;
    }
}

/// Point-in-time view of one open transaction.
#[derive(Debug, Clone)]
pub struct TransactionInfo {
    pub id: TransactionId,
    pub state: TransactionState,
    pub member_count: usize,
    pub is_default: bool,
    pub duration: Duration,
}
