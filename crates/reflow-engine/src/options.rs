//! Store configuration
//!
//! `StoreOptions` enumerates everything a host application declares at init:
//! the key registry, default key states restored by `clear`, eviction policy,
//! and the debug/metrics switches. Built fluently:
//!
//! ```ignore
//! let options = StoreOptions::new()
//!     .collection_keys(["report_"])
//!     .initial_key_state("preferred_locale", json!("en"))
//!     .evictable_keys(["report_"])
//!     .sync_multiple_instances();
//! ```

use reflow_core::Value;
use std::collections::{HashMap, HashSet};

/// Default bound for the cache's recency list
pub const DEFAULT_MAX_CACHED_KEYS: usize = 1000;

/// Init-time configuration for a [`Store`](crate::Store)
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Declared individual keys. The registry is the declaration of record
    /// for debug tooling; undeclared keys are still accepted at runtime.
    pub keys: Vec<String>,
    /// Declared collection prefixes
    pub collection_keys: Vec<String>,
    /// Default values restored by `clear`
    pub initial_key_states: HashMap<String, Value>,
    /// Keys (or collection prefixes) eligible for LRU eviction under storage
    /// pressure
    pub evictable_keys: Vec<String>,
    /// Bound of the recency list; 0 disables recency tracking and eviction
    pub max_cached_keys_count: usize,
    /// Mirror writes from other instances of the application into this one
    pub should_sync_multiple_instances: bool,
    /// Log every cache write
    pub debug_set_state: bool,
    /// Time every public write operation
    pub enable_performance_metrics: bool,
    /// Collection member ids whose writes are coerced to deletion
    pub skippable_collection_member_ids: Vec<String>,
    /// Keys whose snapshot entries receive fully merged (not delta) data
    pub fully_merged_snapshot_keys: HashSet<String>,
    /// Collection prefix under which snapshot entries live, if the host uses
    /// snapshot staging in `update`
    pub snapshot_collection_key: Option<String>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            collection_keys: Vec::new(),
            initial_key_states: HashMap::new(),
            evictable_keys: Vec::new(),
            max_cached_keys_count: DEFAULT_MAX_CACHED_KEYS,
            should_sync_multiple_instances: false,
            debug_set_state: false,
            enable_performance_metrics: false,
            skippable_collection_member_ids: Vec::new(),
            fully_merged_snapshot_keys: HashSet::new(),
            snapshot_collection_key: None,
        }
    }
}

impl StoreOptions {
    /// Create options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare individual keys
    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Declare collection prefixes
    pub fn collection_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collection_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Add one default key state restored by `clear`
    pub fn initial_key_state(mut self, key: impl Into<String>, value: Value) -> Self {
        self.initial_key_states.insert(key.into(), value);
        self
    }

    /// Declare keys (or collection prefixes) safe to evict under storage
    /// pressure
    pub fn evictable_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.evictable_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Bound the recency list (0 disables eviction)
    pub fn max_cached_keys_count(mut self, count: usize) -> Self {
        self.max_cached_keys_count = count;
        self
    }

    /// Enable multi-instance sync when the driver supports it
    pub fn sync_multiple_instances(mut self) -> Self {
        self.should_sync_multiple_instances = true;
        self
    }

    /// Log every cache write
    pub fn debug_set_state(mut self) -> Self {
        self.debug_set_state = true;
        self
    }

    /// Time every public write operation
    pub fn enable_performance_metrics(mut self) -> Self {
        self.enable_performance_metrics = true;
        self
    }

    /// Coerce writes to these collection member ids into deletions
    pub fn skippable_collection_member_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skippable_collection_member_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Keys whose snapshot entries receive fully merged data
    pub fn fully_merged_snapshot_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fully_merged_snapshot_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Collection prefix under which snapshot entries live
    pub fn snapshot_collection_key(mut self, key: impl Into<String>) -> Self {
        self.snapshot_collection_key = Some(key.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let options = StoreOptions::new();
        assert_eq!(options.max_cached_keys_count, DEFAULT_MAX_CACHED_KEYS);
        assert!(!options.should_sync_multiple_instances);
        assert!(options.initial_key_states.is_empty());
    }

    #[test]
    fn test_builder_chains() {
        let options = StoreOptions::new()
            .collection_keys(["report_"])
            .initial_key_state("preferred_locale", json!("en"))
            .evictable_keys(["report_"])
            .max_cached_keys_count(10)
            .sync_multiple_instances()
            .skippable_collection_member_ids(["42"]);

        assert_eq!(options.collection_keys, vec!["report_"]);
        assert_eq!(
            options.initial_key_states.get("preferred_locale"),
            Some(&json!("en"))
        );
        assert_eq!(options.max_cached_keys_count, 10);
        assert!(options.should_sync_multiple_instances);
        assert_eq!(options.skippable_collection_member_ids, vec!["42"]);
    }
}
