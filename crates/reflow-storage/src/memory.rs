//! In-memory driver
//!
//! Backs the store with a `RwLock<HashMap>`. Several driver instances can
//! share one [`MemoryBacking`], which models the multi-tab scenario: writes
//! through one instance are delivered to every other instance's
//! `keep_instances_sync` callback.
//!
//! Write failure injection (`fail_next_writes`) exists so the pipeline's
//! evict-and-retry path has something to trip over in tests.

use crate::driver::{InstanceSyncCallback, StorageDriver};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use reflow_core::{apply_merge, Result, StoreError, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared state behind one or more [`MemoryDriver`] instances
#[derive(Default)]
pub struct MemoryBacking {
    map: RwLock<HashMap<String, Value>>,
    listeners: Mutex<Vec<(usize, InstanceSyncCallback)>>,
    next_instance: AtomicUsize,
}

impl MemoryBacking {
    /// Create an empty backing
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(self: &Arc<Self>) -> usize {
        self.next_instance.fetch_add(1, Ordering::Relaxed)
    }

    /// Deliver a committed write to every instance except the writer.
    ///
    /// Callbacks are collected under the lock and invoked outside it.
    fn notify_peers(&self, writer: usize, key: &str, value: Option<&Value>) {
        let callbacks: Vec<InstanceSyncCallback> = self
            .listeners
            .lock()
            .iter()
            .filter(|(instance, _)| *instance != writer)
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in callbacks {
            cb(key, value);
        }
    }
}

/// Process-local storage driver
pub struct MemoryDriver {
    backing: Arc<MemoryBacking>,
    instance: usize,
    fail_writes: AtomicUsize,
}

impl MemoryDriver {
    /// Create a driver with a fresh, private backing
    pub fn new() -> Self {
        Self::attached(MemoryBacking::new())
    }

    /// Create a driver attached to an existing backing ("another tab")
    pub fn attached(backing: Arc<MemoryBacking>) -> Self {
        let instance = backing.register();
        Self {
            backing,
            instance,
            fail_writes: AtomicUsize::new(0),
        }
    }

    /// The shared backing, for attaching further instances
    pub fn backing(&self) -> Arc<MemoryBacking> {
        Arc::clone(&self.backing)
    }

    /// Make the next `n` write operations fail with a storage error
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    fn check_write_allowed(&self) -> Result<()> {
        let remaining = self.fail_writes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_writes.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::storage("injected write failure"));
        }
        Ok(())
    }

    fn store(&self, key: &str, value: Value) {
        if value.is_null() {
            self.backing.map.write().remove(key);
            self.backing.notify_peers(self.instance, key, None);
        } else {
            self.backing
                .map
                .write()
                .insert(key.to_string(), value.clone());
            self.backing.notify_peers(self.instance, key, Some(&value));
        }
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    async fn get_item(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.backing.map.read().get(key).cloned())
    }

    async fn get_all_keys(&self) -> Result<HashSet<String>> {
        Ok(self.backing.map.read().keys().cloned().collect())
    }

    async fn set_item(&self, key: &str, value: &Value) -> Result<()> {
        self.check_write_allowed()?;
        self.store(key, value.clone());
        Ok(())
    }

    async fn multi_set(&self, pairs: &[(String, Value)]) -> Result<()> {
        self.check_write_allowed()?;
        for (key, value) in pairs {
            self.store(key, value.clone());
        }
        Ok(())
    }

    async fn merge_item(
        &self,
        key: &str,
        delta: &Value,
        pre_merged: &Value,
        should_set_value: bool,
    ) -> Result<()> {
        self.check_write_allowed()?;
        let next = if should_set_value {
            pre_merged.clone()
        } else {
            // Delta-capable path: fold the delta into the stored value,
            // honoring nested nulls as deletions.
            let existing = self.backing.map.read().get(key).cloned();
            apply_merge(existing, vec![delta.clone()], true)
        };
        self.store(key, next);
        Ok(())
    }

    async fn multi_merge(&self, pairs: &[(String, Value)]) -> Result<()> {
        self.check_write_allowed()?;
        for (key, delta) in pairs {
            let existing = self.backing.map.read().get(key).cloned();
            let next = apply_merge(existing, vec![delta.clone()], true);
            self.store(key, next);
        }
        Ok(())
    }

    async fn remove_items(&self, keys: &[String]) -> Result<()> {
        self.check_write_allowed()?;
        for key in keys {
            self.backing.map.write().remove(key);
            self.backing.notify_peers(self.instance, key, None);
        }
        Ok(())
    }

    fn keep_instances_sync(&self, callback: InstanceSyncCallback) -> bool {
        self.backing.listeners.lock().push((self.instance, callback));
        true
    }
}
