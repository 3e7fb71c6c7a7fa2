//! The storage driver contract
//!
//! All methods are async and may fail. Implementations must be safe to call
//! concurrently from multiple tasks (`Send + Sync`); the driver is consumed
//! as `Arc<dyn StorageDriver>`.

use async_trait::async_trait;
use reflow_core::{Result, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// Callback invoked when another instance of the application writes a key.
///
/// `None` means the key was removed.
pub type InstanceSyncCallback = Arc<dyn Fn(&str, Option<&Value>) + Send + Sync>;

/// Pluggable blob storage behind the write pipeline
///
/// The pipeline hands `merge_item` both the batched delta and the pre-merged
/// snapshot; the driver picks whichever form it can apply. Backends that
/// natively understand nested-null deletion apply the delta, backends that
/// can only `set` write the snapshot.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Prepare the backend (create directories, open handles, ...)
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Read one key. `None` means the key is absent (or stored as null).
    async fn get_item(&self, key: &str) -> Result<Option<Value>>;

    /// All keys currently persisted
    async fn get_all_keys(&self) -> Result<HashSet<String>>;

    /// Write one key
    async fn set_item(&self, key: &str, value: &Value) -> Result<()>;

    /// Write several keys
    async fn multi_set(&self, pairs: &[(String, Value)]) -> Result<()>;

    /// Merge a delta into one key.
    ///
    /// `delta` retains nested nulls as deletion markers; `pre_merged` is the
    /// already-materialized result. `should_set_value` signals that the key
    /// had no prior value (or the batch contained a top-level null), so the
    /// write must be a plain set of `pre_merged` even on delta-capable
    /// backends.
    async fn merge_item(
        &self,
        key: &str,
        delta: &Value,
        pre_merged: &Value,
        should_set_value: bool,
    ) -> Result<()>;

    /// Merge a delta into each of several keys (nested nulls preserved)
    async fn multi_merge(&self, pairs: &[(String, Value)]) -> Result<()>;

    /// Remove several keys
    async fn remove_items(&self, keys: &[String]) -> Result<()>;

    /// Subscribe to writes made by other instances of the application.
    ///
    /// Optional; returns `false` when the backend has no cross-instance
    /// visibility. The callback receives already-committed state and must be
    /// applied outside the merge queue.
    fn keep_instances_sync(&self, _callback: InstanceSyncCallback) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_is_object_safe() {
        fn accepts(_driver: &dyn StorageDriver) {}
        let _ = accepts as fn(&dyn StorageDriver);
    }

    #[test]
    fn test_driver_is_send_sync() {
        fn assert_send<T: Send + ?Sized>() {}
        fn assert_sync<T: Sync + ?Sized>() {}
        assert_send::<Box<dyn StorageDriver>>();
        assert_sync::<Box<dyn StorageDriver>>();
    }
}
