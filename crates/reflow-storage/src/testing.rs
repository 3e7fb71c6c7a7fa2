//! Recording driver for tests
//!
//! Wraps any driver and captures every call with its payload, so scenario
//! tests can assert things like "exactly one storage read and one storage
//! write happened for this batch of merges".

use crate::driver::{InstanceSyncCallback, StorageDriver};
use crate::memory::MemoryDriver;
use async_trait::async_trait;
use parking_lot::Mutex;
use reflow_core::{Result, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// One captured driver call
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    /// `get_item(key)`
    GetItem {
        /// Requested key
        key: String,
    },
    /// `get_all_keys()`
    GetAllKeys,
    /// `set_item(key, value)`
    SetItem {
        /// Written key
        key: String,
        /// Written value
        value: Value,
    },
    /// `multi_set(pairs)`
    MultiSet {
        /// Written pairs
        pairs: Vec<(String, Value)>,
    },
    /// `merge_item(key, delta, pre_merged, should_set_value)`
    MergeItem {
        /// Target key
        key: String,
        /// Batched delta with nested nulls preserved
        delta: Value,
        /// Materialized result
        pre_merged: Value,
        /// Whether the driver must fall back to a plain set
        should_set_value: bool,
    },
    /// `multi_merge(pairs)`
    MultiMerge {
        /// Merged pairs
        pairs: Vec<(String, Value)>,
    },
    /// `remove_items(keys)`
    RemoveItems {
        /// Removed keys
        keys: Vec<String>,
    },
}

impl DriverCall {
    /// Whether this call mutates storage
    pub fn is_write(&self) -> bool {
        !matches!(self, DriverCall::GetItem { .. } | DriverCall::GetAllKeys)
    }
}

/// Driver decorator that records every call before delegating
pub struct RecordingDriver {
    inner: Arc<dyn StorageDriver>,
    calls: Mutex<Vec<DriverCall>>,
}

impl RecordingDriver {
    /// Record on top of an arbitrary driver
    pub fn new(inner: Arc<dyn StorageDriver>) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Record on top of a fresh in-memory driver
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryDriver::new()))
    }

    /// Snapshot of all captured calls, in order
    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().clone()
    }

    /// Captured writes only
    pub fn writes(&self) -> Vec<DriverCall> {
        self.calls.lock().iter().filter(|c| c.is_write()).cloned().collect()
    }

    /// Captured `merge_item` calls only
    pub fn merge_items(&self) -> Vec<DriverCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, DriverCall::MergeItem { .. }))
            .cloned()
            .collect()
    }

    /// Number of `get_item` reads for `key`
    pub fn reads_of(&self, key: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, DriverCall::GetItem { key: k } if k == key))
            .count()
    }

    /// Forget everything captured so far
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: DriverCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl StorageDriver for RecordingDriver {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn get_item(&self, key: &str) -> Result<Option<Value>> {
        self.record(DriverCall::GetItem { key: key.to_string() });
        self.inner.get_item(key).await
    }

    async fn get_all_keys(&self) -> Result<HashSet<String>> {
        self.record(DriverCall::GetAllKeys);
        self.inner.get_all_keys().await
    }

    async fn set_item(&self, key: &str, value: &Value) -> Result<()> {
        self.record(DriverCall::SetItem {
            key: key.to_string(),
            value: value.clone(),
        });
        self.inner.set_item(key, value).await
    }

    async fn multi_set(&self, pairs: &[(String, Value)]) -> Result<()> {
        self.record(DriverCall::MultiSet {
            pairs: pairs.to_vec(),
        });
        self.inner.multi_set(pairs).await
    }

    async fn merge_item(
        &self,
        key: &str,
        delta: &Value,
        pre_merged: &Value,
        should_set_value: bool,
    ) -> Result<()> {
        self.record(DriverCall::MergeItem {
            key: key.to_string(),
            delta: delta.clone(),
            pre_merged: pre_merged.clone(),
            should_set_value,
        });
        self.inner.merge_item(key, delta, pre_merged, should_set_value).await
    }

    async fn multi_merge(&self, pairs: &[(String, Value)]) -> Result<()> {
        self.record(DriverCall::MultiMerge {
            pairs: pairs.to_vec(),
        });
        self.inner.multi_merge(pairs).await
    }

    async fn remove_items(&self, keys: &[String]) -> Result<()> {
        self.record(DriverCall::RemoveItems {
            keys: keys.to_vec(),
        });
        self.inner.remove_items(keys).await
    }

    fn keep_instances_sync(&self, callback: InstanceSyncCallback) -> bool {
        self.inner.keep_instances_sync(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[test]
    fn test_records_and_delegates() {
        block_on(async {
            let driver = RecordingDriver::in_memory();
            driver.set_item("a", &json!(1)).await.unwrap();
            assert_eq!(driver.get_item("a").await.unwrap(), Some(json!(1)));

            let calls = driver.calls();
            assert_eq!(calls.len(), 2);
            assert!(matches!(&calls[0], DriverCall::SetItem { key, .. } if key == "a"));
            assert_eq!(driver.reads_of("a"), 1);
            assert_eq!(driver.writes().len(), 1);
        });
    }

    #[test]
    fn test_clear_calls() {
        block_on(async {
            let driver = RecordingDriver::in_memory();
            driver.set_item("a", &json!(1)).await.unwrap();
            driver.clear_calls();
            assert!(driver.calls().is_empty());
        });
    }
}
