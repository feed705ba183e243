// ============================================================================
// Record Arrays
// ============================================================================
//
// Ordered, live views over the identity map:
//
// - Live:             every visible record of one model (`peek_all`, `find_all`)
// - Filtered:         records matching a predicate, optionally sorted
// - AdapterPopulated: the answer to one server query, with its meta/links
//
// Contents are kept current by the `RecordArrayManager` as records are
// pushed, edited, deleted or unloaded.
//
// ============================================================================

pub mod manager;

pub use manager::RecordArrayManager;

use crate::core::{Result, StoreError};
use crate::record::Record;
use crate::store::{Store, StoreInner};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

pub type FilterFn = Arc<dyn Fn(&Record) -> bool + Send + Sync>;
pub type OrderingFn = Arc<dyn Fn(&Record, &Record) -> Ordering + Send + Sync>;

/// Predicate plus optional ordering of a filtered array.
///
/// Both closures run without any store lock held, so they may read
/// records and query the store.
#[derive(Clone)]
pub struct RecordFilter {
    predicate: FilterFn,
    ordering: Option<OrderingFn>,
}

impl RecordFilter {
    pub fn new(predicate: impl Fn(&Record) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
            ordering: None,
        }
    }

    pub fn sorted_by(
        mut self,
        ordering: impl Fn(&Record, &Record) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        self.ordering = Some(Arc::new(ordering));
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        (self.predicate)(record)
    }

    pub fn sort(&self, records: &mut [Record]) {
        if let Some(ordering) = &self.ordering {
            records.sort_by(|a, b| ordering(a, b));
        }
    }

    pub fn is_sorted(&self) -> bool {
        self.ordering.is_some()
    }
}

impl fmt::Debug for RecordFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordFilter")
            .field("sorted", &self.is_sorted())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum RecordArrayKind {
    Live,
    Filtered(RecordFilter),
    AdapterPopulated { query: JsonValue },
}

#[derive(Debug, Default)]
pub(crate) struct ArrayContent {
    pub records: Vec<Record>,
    pub meta: Option<JsonValue>,
    pub links: Option<JsonValue>,
    pub is_updating: bool,
    pub is_loaded: bool,
}

pub(crate) struct RecordArrayInner {
    model_name: String,
    kind: RecordArrayKind,
    store: Weak<StoreInner>,
    content: Mutex<ArrayContent>,
}

/// Handle onto a record array; clones share the same contents.
#[derive(Clone)]
pub struct RecordArray {
    inner: Arc<RecordArrayInner>,
}

impl RecordArray {
    pub(crate) fn new(
        model_name: &str,
        kind: RecordArrayKind,
        store: Weak<StoreInner>,
        records: Vec<Record>,
    ) -> Self {
        Self {
            inner: Arc::new(RecordArrayInner {
                model_name: model_name.to_string(),
                kind,
                store,
                content: Mutex::new(ArrayContent {
                    records,
                    ..Default::default()
                }),
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ArrayContent> {
        self.inner
            .content
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<RecordArrayInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<RecordArrayInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn model_name(&self) -> &str {
        &self.inner.model_name
    }

    pub fn kind(&self) -> &RecordArrayKind {
        &self.inner.kind
    }

    pub fn is_live(&self) -> bool {
        matches!(self.inner.kind, RecordArrayKind::Live)
    }

    pub fn is_filtered(&self) -> bool {
        matches!(self.inner.kind, RecordArrayKind::Filtered(_))
    }

    pub fn is_adapter_populated(&self) -> bool {
        matches!(self.inner.kind, RecordArrayKind::AdapterPopulated { .. })
    }

    /// The server query behind an adapter-populated array
    pub fn query(&self) -> Option<&JsonValue> {
        match &self.inner.kind {
            RecordArrayKind::AdapterPopulated { query } => Some(query),
            _ => None,
        }
    }

    pub(crate) fn filter(&self) -> Option<&RecordFilter> {
        match &self.inner.kind {
            RecordArrayKind::Filtered(filter) => Some(filter),
            _ => None,
        }
    }

    pub fn records(&self) -> Vec<Record> {
        self.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Record> {
        self.lock().records.get(index).cloned()
    }

    pub fn first(&self) -> Option<Record> {
        self.get(0)
    }

    pub fn contains(&self, record: &Record) -> bool {
        self.lock().records.contains(record)
    }

    /// Server ids of the records, in array order
    pub fn ids(&self) -> Vec<Option<String>> {
        self.records().iter().map(Record::id).collect()
    }

    pub fn meta(&self) -> Option<JsonValue> {
        self.lock().meta.clone()
    }

    pub fn links(&self) -> Option<JsonValue> {
        self.lock().links.clone()
    }

    pub fn is_updating(&self) -> bool {
        self.lock().is_updating
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().is_loaded
    }

    /// Re-run whatever produced this array: `find_all` for a live array,
    /// the stored query for an adapter-populated one, the predicate for a
    /// filtered one.
    pub async fn update(&self) -> Result<RecordArray> {
        let store = self
            .inner
            .store
            .upgrade()
            .map(Store::from_inner)
            .ok_or(StoreError::StoreDestroyed)?;
        store.update_array(self).await
    }

    // ------------------------------------------------------------------
    // Content updates
    // ------------------------------------------------------------------

    pub(crate) fn set_updating(&self, updating: bool) {
        self.lock().is_updating = updating;
    }

    pub(crate) fn set_content(&self, records: Vec<Record>, meta: Option<JsonValue>, links: Option<JsonValue>) {
        let mut content = self.lock();
        content.records = records;
        content.meta = meta;
        content.links = links;
        content.is_loaded = true;
        content.is_updating = false;
    }

    pub(crate) fn finish_loading(&self, meta: Option<JsonValue>) {
        let mut content = self.lock();
        if meta.is_some() {
            content.meta = meta;
        }
        content.is_loaded = true;
        content.is_updating = false;
    }

    pub(crate) fn replace_records(&self, records: Vec<Record>) {
        self.lock().records = records;
    }

    pub(crate) fn insert(&self, record: &Record) -> bool {
        let mut content = self.lock();
        if content.records.contains(record) {
            return false;
        }
        content.records.push(record.clone());
        true
    }

    pub(crate) fn remove(&self, record: &Record) -> bool {
        let mut content = self.lock();
        let before = content.records.len();
        content.records.retain(|member| member != record);
        before != content.records.len()
    }

    pub(crate) fn clear(&self) {
        let mut content = self.lock();
        content.records.clear();
        content.is_updating = false;
    }
}

impl PartialEq for RecordArray {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for RecordArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordArray")
            .field("model_name", &self.inner.model_name)
            .field("kind", &self.inner.kind)
            .finish()
    }
}

/// Result of loading a has-many relationship: the related records plus
/// the response's meta.
#[derive(Debug, Clone, Default)]
pub struct ManyArray {
    records: Vec<Record>,
    meta: Option<JsonValue>,
}

impl ManyArray {
    pub fn new(records: Vec<Record>, meta: Option<JsonValue>) -> Self {
        Self { records, meta }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn meta(&self) -> Option<&JsonValue> {
        self.meta.as_ref()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }
}
