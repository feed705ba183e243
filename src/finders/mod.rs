// ============================================================================
// Request Coordinator
// ============================================================================
//
// Turns find/query operations into adapter calls and reconciles the
// responses into the identity map:
//
//   snapshot ─> adapter ─> guard ─> normalize ─> (inverse repair) ─> push
//
// Every adapter future runs under a liveness guard; a response that
// arrives after the store (or the owning record) is gone is discarded.
//
// ============================================================================

mod guard;

pub(crate) use guard::guard;

use crate::adapter::{QueryConvention, RegisteredAdapter, required};
use crate::core::{Result, StoreError};
use crate::payload::{
    Payload, PrimaryData, RawPayload, RequestType, ResourceIdentifier, normalize_response_helper,
    payload_is_not_blank,
};
use crate::record::{Record, SnapshotRecordArray};
use crate::record_array::{ManyArray, RecordArray};
use crate::schema::{ModelSchema, RelationshipMeta};
use crate::store::{IdMismatchPolicy, Store};
use serde_json::Value as JsonValue;
use tracing::{Instrument, Level, event, info_span};

/// Options accepted by the store's find and query operations.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Fetch even when the cache could answer
    pub reload: bool,
    /// Passed through to the adapter untouched
    pub adapter_options: Option<JsonValue>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reload() -> Self {
        Self {
            reload: true,
            ..Self::default()
        }
    }

    pub fn adapter_options(mut self, options: JsonValue) -> Self {
        self.adapter_options = Some(options);
        self
    }
}

fn ensure_not_blank(raw: &RawPayload, request_type: RequestType, model: &str) -> Result<()> {
    if payload_is_not_blank(raw) {
        Ok(())
    } else {
        Err(StoreError::ShapeViolation(format!(
            "You made a '{}' request for a '{}', but the adapter's response did not have any data",
            request_type, model
        )))
    }
}

fn owner_identifier(owner: &Record) -> Result<ResourceIdentifier> {
    let id = owner.id().ok_or_else(|| {
        StoreError::Misuse(format!(
            "Cannot load a relationship of a '{}' record that has no id",
            owner.model_name()
        ))
    })?;
    Ok(ResourceIdentifier::new(owner.model_name(), id))
}

/// Fetch one record by id and push the response.
///
/// On adapter failure the record is marked not found (and evicted if it
/// never had data) before the error is returned.
pub async fn find(
    store: &Store,
    adapter: &RegisteredAdapter,
    model: &ModelSchema,
    id: &str,
    record: &Record,
    options: &FindOptions,
) -> Result<Record> {
    let span = info_span!("store.find_record", label = %store.label(), model = %model.name(), id = %id);
    let result = async {
        let snapshot = store.snapshot_record(record, options.adapter_options.clone())?;
        let raw = guard(
            store.lifetime(),
            "findRecord",
            adapter.adapter().find_record(store, model.name(), id, &snapshot),
        )
        .await??;

        ensure_not_blank(&raw, RequestType::FindRecord, model.name())?;
        let payload = normalize_response_helper(store, model, raw, Some(id), RequestType::FindRecord)?;
        if !matches!(payload.data, Some(PrimaryData::Single(_))) {
            return Err(StoreError::ShapeViolation(format!(
                "The 'findRecord' response for '{}' must have a single resource as primary data",
                model.name()
            )));
        }

        if let Some(returned) = payload.primary_id()
            && returned != id
            && store.config().id_mismatch == IdMismatchPolicy::Warn
        {
            log::warn!(
                target: "ds.store.findRecord.id-mismatch",
                "You requested a record of type '{}' with id '{}' but the adapter returned a payload with primary data having an id of '{}'",
                model.name(),
                id,
                returned
            );
        }

        store
            .push(payload)?
            .single()
            .ok_or_else(|| StoreError::ShapeViolation("The 'findRecord' response was empty".into()))
    }
    .instrument(span)
    .await;

    match result {
        Ok(found) => {
            if &found != record {
                // the adapter answered for a different id
                store.record_fetch_failed(record);
            }
            Ok(found)
        }
        Err(err) => {
            if !err.is_cancelled() {
                event!(Level::DEBUG, error = %err, "find_record failed");
                store.record_fetch_failed(record);
            }
            Err(err)
        }
    }
}

/// Fetch several records of one model in a single adapter call.
///
/// Requested records the response does not mention are treated as not
/// found.
pub async fn find_many(
    store: &Store,
    adapter: &RegisteredAdapter,
    model: &ModelSchema,
    ids: &[String],
    records: &[Record],
) -> Result<Vec<Record>> {
    let span = info_span!("store.find_many", label = %store.label(), model = %model.name(), count = ids.len());
    let result = async {
        let snapshots = records
            .iter()
            .map(|record| store.snapshot_record(record, None))
            .collect::<Result<Vec<_>>>()?;
        let raw = required(
            guard(
                store.lifetime(),
                "findMany",
                adapter.adapter().find_many(store, model.name(), ids, &snapshots),
            )
            .await?,
        )??;

        ensure_not_blank(&raw, RequestType::FindMany, model.name())?;
        let payload = normalize_response_helper(store, model, raw, None, RequestType::FindMany)?;
        if !payload.is_collection() {
            return Err(StoreError::ShapeViolation(format!(
                "The 'findMany' response for '{}' must have an array as primary data",
                model.name()
            )));
        }
        Ok(store.push(payload)?.many())
    }
    .instrument(span)
    .await;

    match result {
        Ok(found) => {
            let missing: Vec<&Record> = records.iter().filter(|record| !found.contains(record)).collect();
            if !missing.is_empty() {
                let missing_ids: Vec<String> = missing.iter().filter_map(|record| record.id()).collect();
                log::warn!(
                    "Expected to find records of type '{}' with ids [{}] but they were missing from the response",
                    model.name(),
                    missing_ids.join(", ")
                );
                for record in missing {
                    store.record_fetch_failed(record);
                }
            }
            Ok(found)
        }
        Err(err) => {
            if !err.is_cancelled() {
                for record in records {
                    store.record_fetch_failed(record);
                }
            }
            Err(err)
        }
    }
}

/// Load a has-many relationship through its link.
///
/// Each returned record is made to point back at `owner` before the push.
pub async fn find_has_many(
    store: &Store,
    adapter: &RegisteredAdapter,
    owner: &Record,
    link: &str,
    relationship: &RelationshipMeta,
) -> Result<ManyArray> {
    let span = info_span!(
        "store.find_has_many",
        label = %store.label(),
        model = %owner.model_name(),
        relationship = %relationship.name
    );
    async {
        let owner_ref = owner_identifier(owner)?;
        let related = store.model(&relationship.related_type)?;
        let snapshot = store.snapshot_record(owner, None)?;
        let raw = required(
            guard(
                owner.lifetime(),
                "findHasMany",
                adapter.adapter().find_has_many(store, &snapshot, link, relationship),
            )
            .await?,
        )??;

        ensure_not_blank(&raw, RequestType::FindHasMany, related.name())?;
        let payload = normalize_response_helper(store, related, raw, None, RequestType::FindHasMany)?;
        if !payload.is_collection() {
            return Err(StoreError::ShapeViolation(format!(
                "The 'findHasMany' response for '{}.{}' must have an array as primary data",
                owner.model_name(),
                relationship.name
            )));
        }

        let payload = store
            .relationship_payloads()
            .ensure_inverse_on_has_many(payload, &owner_ref, relationship);
        let meta = payload.meta.clone();
        let records = store.push(payload)?.many();
        store.set_canonical_linkage(owner, relationship, &records)?;
        Ok(ManyArray::new(records, meta))
    }
    .instrument(span)
    .await
}

/// Load a belongs-to relationship through its link. `None` when the
/// response has no primary data; nothing is pushed in that case.
pub async fn find_belongs_to(
    store: &Store,
    adapter: &RegisteredAdapter,
    owner: &Record,
    link: &str,
    relationship: &RelationshipMeta,
) -> Result<Option<Record>> {
    let span = info_span!(
        "store.find_belongs_to",
        label = %store.label(),
        model = %owner.model_name(),
        relationship = %relationship.name
    );
    async {
        let owner_ref = owner_identifier(owner)?;
        let related = store.model(&relationship.related_type)?;
        let snapshot = store.snapshot_record(owner, None)?;
        let raw = required(
            guard(
                owner.lifetime(),
                "findBelongsTo",
                adapter.adapter().find_belongs_to(store, &snapshot, link, relationship),
            )
            .await?,
        )??;

        let payload = normalize_response_helper(store, related, raw, None, RequestType::FindBelongsTo)?;
        match &payload.data {
            None => return Ok(None),
            Some(PrimaryData::Many(_)) => {
                return Err(StoreError::ShapeViolation(format!(
                    "The 'findBelongsTo' response for '{}.{}' must have a single resource as primary data",
                    owner.model_name(),
                    relationship.name
                )));
            }
            Some(PrimaryData::Single(_)) => {}
        }

        let payload = store
            .relationship_payloads()
            .ensure_inverse_on_belongs_to(payload, &owner_ref, relationship);
        let target = store.push(payload)?.single();
        store.set_canonical_linkage(owner, relationship, target.as_slice())?;
        Ok(target)
    }
    .instrument(span)
    .await
}

/// Fetch every record of a model into its live array.
pub async fn find_all(
    store: &Store,
    adapter: &RegisteredAdapter,
    model: &ModelSchema,
    since_token: Option<JsonValue>,
    options: &FindOptions,
) -> Result<RecordArray> {
    let span = info_span!("store.find_all", label = %store.label(), model = %model.name());
    let array = store.live_array(model.name())?;
    array.set_updating(true);

    let result = async {
        let snapshots = SnapshotRecordArray::new(
            store,
            model.name(),
            array.records(),
            array.meta(),
            options.adapter_options.clone(),
        );
        let raw = required(
            guard(
                store.lifetime(),
                "findAll",
                adapter
                    .adapter()
                    .find_all(store, model.name(), since_token.as_ref(), &snapshots),
            )
            .await?,
        )??;

        ensure_not_blank(&raw, RequestType::FindAll, model.name())?;
        let payload = normalize_response_helper(store, model, raw, None, RequestType::FindAll)?;
        let since = payload
            .meta
            .as_ref()
            .and_then(|meta| meta.get("since"))
            .cloned();
        let meta = payload.meta.clone();
        store.push(payload)?;
        store.did_load_all(model.name(), since);
        Ok(meta)
    }
    .instrument(span)
    .await;

    match result {
        Ok(meta) => {
            array.finish_loading(meta);
            Ok(array)
        }
        Err(err) => {
            array.set_updating(false);
            Err(err)
        }
    }
}

/// Run a server query and fill an adapter-populated array with the answer.
///
/// Adapters declaring `PopulatesRecordArray` receive the array up front;
/// for `ReturnsPayload` adapters the array is created from the response
/// unless an existing one is being refreshed.
pub async fn query(
    store: &Store,
    adapter: &RegisteredAdapter,
    model: &ModelSchema,
    query: JsonValue,
    existing: Option<RecordArray>,
    options: &FindOptions,
) -> Result<RecordArray> {
    let span = info_span!("store.query", label = %store.label(), model = %model.name());
    let convention = adapter.capabilities().query_convention;
    let array = match (existing, convention) {
        (Some(array), _) => Some(array),
        (None, QueryConvention::PopulatesRecordArray) => Some(store.populated_array(model.name(), query.clone())?),
        (None, QueryConvention::ReturnsPayload) => None,
    };
    if let Some(array) = &array {
        array.set_updating(true);
    }

    let result = async {
        let handed = match convention {
            QueryConvention::PopulatesRecordArray => array.as_ref(),
            QueryConvention::ReturnsPayload => None,
        };
        let raw = required(
            guard(
                store.lifetime(),
                "query",
                adapter.adapter().query(
                    store,
                    model.name(),
                    &query,
                    handed,
                    options.adapter_options.as_ref(),
                ),
            )
            .await?,
        )??;

        ensure_not_blank(&raw, RequestType::Query, model.name())?;
        let payload = normalize_response_helper(store, model, raw, None, RequestType::Query)?;
        if matches!(payload.data, Some(PrimaryData::Single(_))) {
            return Err(StoreError::ShapeViolation(format!(
                "The response to 'query' for '{}' returned a single record; use 'query_record' instead",
                model.name()
            )));
        }
        let Payload { meta, links, .. } = payload.clone();
        let records = store.push(payload)?.many();
        Ok((records, meta, links))
    }
    .instrument(span)
    .await;

    match result {
        Ok((records, meta, links)) => {
            let array = match array {
                Some(array) => array,
                None => store.populated_array(model.name(), query)?,
            };
            array.set_content(records, meta, links);
            Ok(array)
        }
        Err(err) => {
            if let Some(array) = &array {
                array.set_updating(false);
            }
            Err(err)
        }
    }
}

/// Run a server query expected to answer with at most one record.
pub async fn query_record(
    store: &Store,
    adapter: &RegisteredAdapter,
    model: &ModelSchema,
    query: JsonValue,
    options: &FindOptions,
) -> Result<Option<Record>> {
    let span = info_span!("store.query_record", label = %store.label(), model = %model.name());
    async {
        let raw = required(
            guard(
                store.lifetime(),
                "queryRecord",
                adapter.adapter().query_record(
                    store,
                    model.name(),
                    &query,
                    options.adapter_options.as_ref(),
                ),
            )
            .await?,
        )??;

        let payload = normalize_response_helper(store, model, raw, None, RequestType::QueryRecord)?;
        if payload.is_collection() {
            return Err(StoreError::ShapeViolation(format!(
                "The response to 'query_record' for '{}' is expected to be a single resource or null",
                model.name()
            )));
        }
        Ok(store.push(payload)?.single())
    }
    .instrument(span)
    .await
}
