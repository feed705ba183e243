// ============================================================================
// MemoStore Library
// ============================================================================
//
// Client-side entity cache. Records are identified once per (model, id),
// loaded through pluggable adapters, linked through a bidirectional
// relationship graph, and saved through transactions.
//
// - schema:        model and relationship declarations
// - payload:       normalized documents and serializers
// - adapter:       the backend boundary
// - store:         identity map, push, mutations, the public `Store` API
// - finders:       adapter round trips for every fetch operation
// - record:        record handles and lifecycle states
// - relationships: canonical/current linkage and inverse bookkeeping
// - record_array:  live, filtered and query-populated record collections
// - transaction:   commit and rollback units
//
// ============================================================================

pub mod adapter;
pub mod core;
pub mod finders;
pub mod payload;
pub mod record;
pub mod record_array;
pub mod relationships;
pub mod schema;
pub mod store;
pub mod transaction;

pub use adapter::{Adapter, AdapterCapabilities, BatchSaveResult, QueryConvention};
pub use core::{AdapterError, AdapterResult, Attributes, ClientId, Result, StoreError, ValidationErrors};
pub use finders::FindOptions;
pub use payload::{
    JsonApiSerializer, Payload, PrimaryData, RawPayload, RelationshipData, RelationshipLinks, RelationshipPayload,
    RequestType, ResourceIdentifier, ResourceObject, Serializer,
};
pub use record::{DirtyPhase, Record, RecordState, Snapshot, SnapshotRecordArray, SnapshotRef};
pub use record_array::{ManyArray, RecordArray, RecordArrayKind, RecordFilter};
pub use schema::{ModelSchema, RelationshipKind, RelationshipMeta, SchemaRegistry};
pub use store::{CommitMode, IdMismatchPolicy, PushResult, Store, StoreBuilder, StoreConfig};
pub use transaction::{CommitReport, DirtyType, Transaction, TransactionId, TransactionInfo, TransactionState};
