// ============================================================================
// Transactions
// ============================================================================
//
// A transaction is the unit of commit and rollback: a set of dirty records.
// Records that become dirty join the store's default transaction unless
// they were created in, or moved to, an explicit one.
//
// - change:  what kind of pending change a record carries
// - state:   transaction ids and lifecycle
// - manager: every open transaction of a store
// - commit:  adapter round trip and outcome bookkeeping
// - handle:  the public `Transaction` API
//
// ============================================================================

pub mod change;
pub mod commit;
pub mod handle;
pub(crate) mod manager;
pub mod state;

pub use change::DirtyType;
pub use commit::CommitReport;
pub(crate) use commit::commit_transaction;
pub use handle::Transaction;
pub use manager::TransactionInfo;
pub(crate) use manager::TransactionManager;
pub use state::{TransactionId, TransactionState};
