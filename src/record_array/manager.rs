// ============================================================================
// Record Array Manager
// ============================================================================
//
// Tracks every record array of a store and brings them up to date when
// records change. Live arrays are held strongly (one per model); filtered
// and adapter-populated arrays are held weakly and pruned once the
// application drops them.
//
// ============================================================================

use super::{RecordArray, RecordArrayInner};
use crate::record::Record;
use std::collections::HashMap;
use std::sync::Weak;

#[derive(Default)]
pub struct RecordArrayManager {
    live: HashMap<String, RecordArray>,
    filtered: HashMap<String, Vec<Weak<RecordArrayInner>>>,
    populated: HashMap<String, Vec<Weak<RecordArrayInner>>>,
}

impl RecordArrayManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_array(&self, model: &str) -> Option<RecordArray> {
        self.live.get(model).cloned()
    }

    pub(crate) fn register_live(&mut self, array: RecordArray) {
        self.live.insert(array.model_name().to_string(), array);
    }

    pub(crate) fn register_filtered(&mut self, array: &RecordArray) {
        self.filtered
            .entry(array.model_name().to_string())
            .or_default()
            .push(array.downgrade());
    }

    pub(crate) fn register_populated(&mut self, array: &RecordArray) {
        let arrays = self.populated.entry(array.model_name().to_string()).or_default();
        if !arrays
            .iter()
            .any(|existing| existing.ptr_eq(&array.downgrade()))
        {
            arrays.push(array.downgrade());
        }
    }

    fn alive(arrays: &mut Vec<Weak<RecordArrayInner>>) -> Vec<RecordArray> {
        arrays.retain(|array| array.strong_count() > 0);
        arrays.iter().filter_map(RecordArray::upgrade).collect()
    }

    pub fn filtered_arrays(&mut self, model: &str) -> Vec<RecordArray> {
        self.filtered.get_mut(model).map(Self::alive).unwrap_or_default()
    }

    pub fn populated_arrays(&mut self, model: &str) -> Vec<RecordArray> {
        self.populated.get_mut(model).map(Self::alive).unwrap_or_default()
    }

    /// Bring the live and adapter-populated arrays up to date with `records`.
    ///
    /// Returns the filtered arrays of the affected models; their predicates
    /// are evaluated by [`RecordArrayManager::apply_filters`] once the
    /// registry lock is released.
    pub(crate) fn record_did_change(&mut self, records: &[Record]) -> Vec<RecordArray> {
        let mut filtered: Vec<RecordArray> = Vec::new();

        for record in records {
            let visible = record.lock().is_visible();
            let model = record.model_name();

            if let Some(live) = self.live.get(model) {
                if visible {
                    live.insert(record);
                } else {
                    live.remove(record);
                }
            }

            if !visible {
                for array in self.populated_arrays(model) {
                    array.remove(record);
                }
            }

            for array in self.filtered_arrays(model) {
                if !filtered.contains(&array) {
                    filtered.push(array);
                }
            }
        }
        filtered
    }

    /// Re-evaluate the membership of `records` in filtered `arrays`.
    pub(crate) fn apply_filters(arrays: &[RecordArray], records: &[Record]) {
        for array in arrays {
            let Some(filter) = array.filter() else {
                continue;
            };
            let mut resort = false;
            for record in records.iter().filter(|record| record.model_name() == array.model_name()) {
                let visible = record.lock().is_visible();
                let changed = if visible && filter.matches(record) {
                    array.insert(record)
                } else {
                    array.remove(record)
                };
                resort |= changed || array.contains(record);
            }
            if filter.is_sorted() && resort {
                Self::sort(array);
            }
        }
    }

    /// Rebuild a filtered array from scratch over `candidates`.
    pub(crate) fn refilter(array: &RecordArray, candidates: Vec<Record>) {
        let Some(filter) = array.filter() else {
            return;
        };
        let mut records: Vec<Record> = candidates
            .into_iter()
            .filter(|record| record.lock().is_visible())
            .filter(|record| filter.matches(record))
            .collect();
        filter.sort(&mut records);
        array.replace_records(records);
        array.finish_loading(None);
    }

    fn sort(array: &RecordArray) {
        if let Some(filter) = array.filter() {
            let mut records = array.records();
            filter.sort(&mut records);
            array.replace_records(records);
        }
    }

    /// Empty every array; used when the store is destroyed.
    pub(crate) fn clear(&mut self) {
        for array in self.live.values() {
            array.clear();
        }
        let tracked: Vec<Weak<RecordArrayInner>> = self
            .filtered
            .drain()
            .chain(self.populated.drain())
            .flat_map(|(_, arrays)| arrays)
            .collect();
        for array in tracked.iter().filter_map(RecordArray::upgrade) {
            array.clear();
        }
        self.live.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordState;
    use crate::record_array::{RecordArrayKind, RecordFilter};
    use tokio_util::sync::CancellationToken;

    fn loaded(token: &CancellationToken, id: &str, title: &str) -> Record {
        let record = Record::detached("post", Some(id.to_string()), token);
        {
            let mut data = record.lock();
            data.state = RecordState::Clean;
            data.canonical.insert("title".to_string(), serde_json::json!(title));
        }
        record
    }

    #[test]
    fn test_live_array_tracks_visibility() {
        let token = CancellationToken::new();
        let mut manager = RecordArrayManager::new();
        manager.register_live(RecordArray::new("post", RecordArrayKind::Live, Weak::new(), Vec::new()));

        let record = loaded(&token, "1", "a");
        manager.record_did_change(&[record.clone()]);
        assert!(manager.live_array("post").unwrap().contains(&record));

        record.lock().state = RecordState::DeletedSaved;
        manager.record_did_change(&[record.clone()]);
        assert!(manager.live_array("post").unwrap().is_empty());
    }

    #[test]
    fn test_filtered_array_is_sorted_and_pruned() {
        let token = CancellationToken::new();
        let mut manager = RecordArrayManager::new();
        let filter = RecordFilter::new(|record| {
            record
                .get("title")
                .and_then(|title| title.as_str().map(|title| title.starts_with('r')))
                .unwrap_or(false)
        })
        .sorted_by(|a, b| a.id().cmp(&b.id()));
        let array = RecordArray::new("post", RecordArrayKind::Filtered(filter), Weak::new(), Vec::new());
        manager.register_filtered(&array);

        let second = loaded(&token, "2", "rust");
        let first = loaded(&token, "1", "rails");
        let other = loaded(&token, "3", "ember");
        let changed = [second.clone(), first.clone(), other];
        let arrays = manager.record_did_change(&changed);
        assert_eq!(arrays, vec![array.clone()]);
        RecordArrayManager::apply_filters(&arrays, &changed);
        assert_eq!(array.records(), vec![first, second.clone()]);

        second.lock().canonical.insert("title".to_string(), serde_json::json!("go"));
        let arrays = manager.record_did_change(&[second.clone()]);
        RecordArrayManager::apply_filters(&arrays, &[second.clone()]);
        assert_eq!(array.len(), 1);

        drop(array);
        assert!(manager.filtered_arrays("post").is_empty());
    }
}
