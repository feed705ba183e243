// ============================================================================
// Commit
// ============================================================================
//
// Commits one transaction in three steps:
//
//   1. under the store lock: move every uncommitted member in flight,
//      snapshot it, and group it by (model, dirty type)
//   2. without locks: run the adapter saves, one batched call or one call
//      per record per group, then normalize every acknowledgment
//   3. under the store lock: apply the outcomes in response order
//
// Invalid and in-flight members are left where they are.
//
// ============================================================================

use super::{DirtyType, TransactionId};
use crate::adapter::{BatchSaveResult, RegisteredAdapter};
use crate::core::{AdapterError, AdapterResult, Result, StoreError, ValidationErrors};
use crate::finders::guard;
use crate::payload::{Payload, RawPayload, normalize_response_helper, payload_is_not_blank};
use crate::record::{Record, Snapshot};
use crate::store::{CommitMode, Store};
use futures::future::join_all;
use tracing::{Instrument, Level, event, info_span};

/// Per-record outcome of a commit.
#[derive(Debug, Clone, Default)]
pub struct CommitReport {
    /// Acknowledged by the adapter
    pub saved: Vec<Record>,
    /// Rejected with field errors; local edits kept
    pub invalid: Vec<Record>,
    /// Not saved; back to uncommitted
    pub failed: Vec<Record>,
}

impl CommitReport {
    pub fn is_success(&self) -> bool {
        self.invalid.is_empty() && self.failed.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.saved.is_empty() && self.invalid.is_empty() && self.failed.is_empty()
    }
}

struct SaveGroup {
    model: String,
    dirty_type: DirtyType,
    adapter: RegisteredAdapter,
    records: Vec<Record>,
    snapshots: Vec<Snapshot>,
}

enum Outcome {
    Saved(Option<Payload>),
    Invalid(ValidationErrors),
    /// `None` when the record failed along with the rest of its batch
    Failed(Option<StoreError>),
}

/// Commit the uncommitted members of `transaction`.
pub(crate) async fn commit_transaction(store: &Store, transaction: TransactionId) -> Result<CommitReport> {
    let span = info_span!("store.commit", label = %store.label(), transaction = %transaction);
    async {
        let groups = prepare(store, transaction)?;
        if groups.is_empty() {
            store.lock_state()?.transactions.end_commit(transaction);
            return Ok(CommitReport::default());
        }
        event!(
            Level::DEBUG,
            groups = groups.len(),
            records = groups.iter().map(|group| group.records.len()).sum::<usize>(),
            "saving"
        );

        let responses = guard(store.lifetime(), "commit", run_groups(store, &groups)).await?;
        let outcomes: Vec<(Record, DirtyType, Outcome)> = groups
            .into_iter()
            .zip(responses)
            .flat_map(|(group, response)| normalize_group(store, group, response))
            .collect();
        apply(store, transaction, outcomes)
    }
    .instrument(span)
    .await
}

/// Step 1: move uncommitted members in flight and group them.
fn prepare(store: &Store, transaction: TransactionId) -> Result<Vec<SaveGroup>> {
    let mut state = store.lock_state()?;
    if !state.transactions.state(transaction).is_open() {
        return Err(StoreError::Misuse(format!("Transaction {} is closed", transaction)));
    }

    let candidates: Vec<Record> = state
        .transactions
        .members(transaction)
        .iter()
        .filter_map(|client_id| state.identity.get(client_id).cloned())
        .filter(|record| record.lock().state.is_uncommitted())
        .collect();

    // resolve adapters before anything moves in flight
    let mut groups: Vec<SaveGroup> = Vec::new();
    let mut grouped: Vec<(usize, Record)> = Vec::with_capacity(candidates.len());
    for record in candidates {
        let Some(dirty_type) = record.lock().state.dirty_type() else {
            continue;
        };
        let position = match groups
            .iter()
            .position(|group| group.model == record.model_name() && group.dirty_type == dirty_type)
        {
            Some(position) => position,
            None => {
                groups.push(SaveGroup {
                    model: record.model_name().to_string(),
                    dirty_type,
                    adapter: store.adapter_for(record.model_name())?,
                    records: Vec::new(),
                    snapshots: Vec::new(),
                });
                groups.len() - 1
            }
        };
        grouped.push((position, record));
    }

    state.transactions.begin_commit(transaction);
    for (position, record) in grouped {
        {
            let mut data = record.lock();
            data.state = data.state.will_commit()?;
            data.begin_flight();
        }
        let snapshot = store.snapshot_in(&state, &record, None);
        let group = &mut groups[position];
        group.records.push(record);
        group.snapshots.push(snapshot);
    }
    Ok(groups)
}

/// Step 2a: run the adapter saves of every group.
async fn run_groups(store: &Store, groups: &[SaveGroup]) -> Vec<Result<Vec<AdapterResult<Option<RawPayload>>>>> {
    match store.config().commit_mode {
        CommitMode::Concurrent => join_all(groups.iter().map(|group| run_group(store, group))).await,
        CommitMode::Sequential => {
            let mut responses = Vec::with_capacity(groups.len());
            for group in groups {
                responses.push(run_group(store, group).await);
            }
            responses
        }
    }
}

async fn run_group(store: &Store, group: &SaveGroup) -> Result<Vec<AdapterResult<Option<RawPayload>>>> {
    let adapter = group.adapter.adapter();
    let model = group.model.as_str();

    if !group.adapter.capabilities().batch_saves {
        let saves = group.snapshots.iter().map(move |snapshot| async move {
            match group.dirty_type {
                DirtyType::Created => adapter.create_record(store, model, snapshot).await,
                DirtyType::Updated => adapter.update_record(store, model, snapshot).await,
                DirtyType::Deleted => adapter.delete_record(store, model, snapshot).await,
            }
        });
        return Ok(join_all(saves).await);
    }

    let response: BatchSaveResult = match group.dirty_type {
        DirtyType::Created => adapter.create_records(store, model, &group.snapshots).await,
        DirtyType::Updated => adapter.update_records(store, model, &group.snapshots).await,
        DirtyType::Deleted => adapter.delete_records(store, model, &group.snapshots).await,
    };
    match response {
        Ok(results) if results.len() == group.snapshots.len() => Ok(results),
        Ok(results) => Err(StoreError::ShapeViolation(format!(
            "'{}' for '{}' returned {} results for {} records",
            group.dirty_type.batch_operation(),
            model,
            results.len(),
            group.snapshots.len()
        ))),
        Err(AdapterError::Unsupported(operation)) => Err(StoreError::Misuse(format!(
            "The adapter for '{}' declares batched saves but does not implement '{}'",
            model, operation
        ))),
        // a failed batch fails every record in it
        Err(err) => Ok(vec![Err(err); group.snapshots.len()]),
    }
}

/// Step 2b: turn adapter answers into outcomes, normalizing acknowledgments
/// through the model's serializer.
fn normalize_group(
    store: &Store,
    group: SaveGroup,
    response: Result<Vec<AdapterResult<Option<RawPayload>>>>,
) -> Vec<(Record, DirtyType, Outcome)> {
    let dirty_type = group.dirty_type;
    let results = match response {
        Ok(results) => results,
        Err(err) => {
            let mut err = Some(err);
            return group
                .records
                .into_iter()
                .map(|record| (record, dirty_type, Outcome::Failed(err.take())))
                .collect();
        }
    };

    group
        .records
        .into_iter()
        .zip(results)
        .map(|(record, result)| {
            let outcome = match result {
                Ok(Some(raw)) if payload_is_not_blank(&raw) => {
                    match store.model(&group.model).and_then(|schema| {
                        let id = record.id();
                        normalize_response_helper(store, schema, raw, id.as_deref(), dirty_type.request_type())
                    }) {
                        Ok(payload) => Outcome::Saved(Some(payload)),
                        Err(err) => Outcome::Failed(Some(err)),
                    }
                }
                Ok(_) => Outcome::Saved(None),
                Err(AdapterError::Invalid(errors)) => Outcome::Invalid(errors),
                Err(AdapterError::Unsupported(operation)) => Outcome::Failed(Some(StoreError::Misuse(format!(
                    "The adapter for '{}' does not implement '{}'",
                    group.model, operation
                )))),
                Err(err) => Outcome::Failed(Some(StoreError::Adapter(err))),
            };
            (record, dirty_type, outcome)
        })
        .collect()
}

/// Step 3: apply outcomes in response order. The first failure is
/// returned once every outcome is applied.
fn apply(
    store: &Store,
    transaction: TransactionId,
    outcomes: Vec<(Record, DirtyType, Outcome)>,
) -> Result<CommitReport> {
    let mut report = CommitReport::default();
    let mut first_error: Option<StoreError> = None;
    let mut changed = Vec::new();

    {
        let mut state = store
            .lock_state()
            .map_err(|_| StoreError::Cancelled("commit".to_string()))?;
        for (record, dirty_type, outcome) in outcomes {
            match outcome {
                Outcome::Saved(payload) => {
                    match store.did_save_record(&mut state, &record, payload, dirty_type, &mut changed) {
                        Ok(()) => report.saved.push(record),
                        Err(err) => {
                            first_error.get_or_insert(err);
                            report.failed.push(record);
                        }
                    }
                }
                Outcome::Invalid(errors) => {
                    store.record_was_invalid(&record, errors);
                    changed.push(record.clone());
                    report.invalid.push(record);
                }
                Outcome::Failed(err) => {
                    store.record_commit_failed(&record);
                    if let Some(err) = err {
                        first_error.get_or_insert(err);
                    }
                    changed.push(record.clone());
                    report.failed.push(record);
                }
            }
        }
        state.transactions.end_commit(transaction);
    }
    store.notify_arrays(&changed);

    event!(
        Level::DEBUG,
        saved = report.saved.len(),
        invalid = report.invalid.len(),
        failed = report.failed.len(),
        "commit settled"
    );
    match first_error {
        Some(err) => Err(err),
        None => Ok(report),
    }
}
