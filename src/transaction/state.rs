// ============================================================================
// Transaction State Management
// ============================================================================
//
// A transaction is a set of dirty records. It moves through:
//
//   Active ──commit──> Committing ──settled──> Active (members left)
//     │                                 └────> Closed (emptied)
//     └──rollback / emptied──> Closed
//
// A closed transaction accepts no members.
//
// ============================================================================

use crate::core::{ClientId, Result, StoreError};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static ISSUED: AtomicU64 = AtomicU64::new(1);

/// Handle id of a transaction. Unique across every store in the process,
/// so transactions of two stores never compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    pub(crate) fn next() -> Self {
        Self(ISSUED.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting members
    Active,

    /// A commit is waiting on the adapter
    Committing,

    /// Emptied or rolled back; gone from the store
    Closed,
}

impl TransactionState {
    pub fn is_open(&self) -> bool {
        !matches!(self, TransactionState::Closed)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committing => write!(f, "COMMITTING"),
            TransactionState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Bookkeeping for one open transaction.
#[derive(Debug)]
pub(crate) struct TransactionEntry {
    id: TransactionId,
    state: TransactionState,
    /// Members in enrollment order
    members: Vec<ClientId>,
    start_time: Instant,
}

impl TransactionEntry {
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            members: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn members(&self) -> &[ClientId] {
        &self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn enroll(&mut self, member: ClientId) -> Result<()> {
        if !self.state.is_open() {
            return Err(StoreError::Misuse(format!(
                "Cannot add a record: transaction {} is {}",
                self.id, self.state
            )));
        }
        if !self.members.contains(&member) {
            self.members.push(member);
        }
        Ok(())
    }

    pub fn withdraw(&mut self, member: ClientId) -> bool {
        let before = self.members.len();
        self.members.retain(|id| *id != member);
        before != self.members.len()
    }

    pub fn begin_commit(&mut self) {
        if self.state.is_open() {
            self.state = TransactionState::Committing;
        }
    }

    pub fn end_commit(&mut self) {
        if self.state == TransactionState::Committing {
            self.state = TransactionState::Active;
        }
    }

    pub fn close(&mut self) {
        self.members.clear();
        self.state = TransactionState::Closed;
    }
}
