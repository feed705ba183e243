/// What to do when `find_record` gets back a different id than it asked for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdMismatchPolicy {
    /// Log a warning and push the response as returned
    #[default]
    Warn,
    /// Push the response as returned without logging
    Ignore,
}

/// How commit runs the save groups of one transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommitMode {
    /// All (model, dirty type) groups at once
    #[default]
    Concurrent,
    /// One group after another, in group order
    Sequential,
}

/// Store configuration
///
/// ```
/// use memostore::{CommitMode, StoreConfig};
///
/// let config = StoreConfig::new("blog").commit_mode(CommitMode::Sequential);
/// assert_eq!(config.label, "blog");
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Name used in log and tracing fields
    pub label: String,

    pub id_mismatch: IdMismatchPolicy,

    pub commit_mode: CommitMode,

    /// Re-fetch records that are already loaded on every `find_record`
    pub reload_on_find: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new("store")
    }
}

impl StoreConfig {
    /// Create a new store configuration
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            id_mismatch: IdMismatchPolicy::Warn,
            commit_mode: CommitMode::Concurrent,
            reload_on_find: false,
        }
    }

    /// Set the label
    pub fn label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Set the id mismatch policy
    pub fn id_mismatch(mut self, policy: IdMismatchPolicy) -> Self {
        self.id_mismatch = policy;
        self
    }

    /// Set the commit mode
    pub fn commit_mode(mut self, mode: CommitMode) -> Self {
        self.commit_mode = mode;
        self
    }

    /// Always re-fetch on `find_record`
    pub fn reload_on_find(mut self, reload: bool) -> Self {
        self.reload_on_find = reload;
        self
    }
}
