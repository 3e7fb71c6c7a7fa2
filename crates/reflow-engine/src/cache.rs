//! In-memory cache
//!
//! The cache is the synchronous source of truth between storage round trips.
//! Besides the key→value snapshot it tracks:
//!
//! - the *nullish-key set*: keys confirmed absent in storage, so a repeat
//!   `get` can answer "no value" without another storage read;
//! - the *recency list*: unique keys in least-recently-accessed order,
//!   bounded by `max_recent`; under storage pressure the pipeline evicts the
//!   least recent key that was declared evictable;
//! - the *pending-task map*: named long-running operations (a `clear`, an
//!   outstanding per-key read) that other operations can join instead of
//!   duplicating.
//!
//! All mutations happen under interior locks, so they are atomic between the
//! pipeline's suspension points.

use parking_lot::{Mutex, RwLock};
use reflow_core::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::watch;
use tracing::debug;

/// Outcome of trying to start a named task
pub enum TaskLease {
    /// The caller owns the task and must call `finish_task` when done
    Started,
    /// The task is already running; await the receiver to join it
    Joined(watch::Receiver<bool>),
}

/// Process-wide value cache with recency and pending-task tracking
pub struct StoreCache {
    map: RwLock<HashMap<String, Value>>,
    nullish: RwLock<HashSet<String>>,
    recent: Mutex<VecDeque<String>>,
    max_recent: usize,
    tasks: Mutex<HashMap<String, watch::Sender<bool>>>,
    debug_set_state: bool,
}

impl StoreCache {
    /// Create a cache with the given recency bound (0 disables tracking)
    pub fn new(max_recent: usize, debug_set_state: bool) -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            nullish: RwLock::new(HashSet::new()),
            recent: Mutex::new(VecDeque::new()),
            max_recent,
            tasks: Mutex::new(HashMap::new()),
            debug_set_state,
        }
    }

    /// Current value for a key, touching the recency list on hit
    pub fn get_value(&self, key: &str) -> Option<Value> {
        let value = self.map.read().get(key).cloned();
        if value.is_some() {
            self.touch_recent(key);
        }
        value
    }

    /// Whether we know anything about the key (a value, or confirmed absent)
    pub fn has_cache_for_key(&self, key: &str) -> bool {
        self.map.read().contains_key(key) || self.is_nullish(key)
    }

    /// Whether the key is confirmed absent in storage
    pub fn is_nullish(&self, key: &str) -> bool {
        self.nullish.read().contains(key)
    }

    /// Record that storage holds no value for this key
    pub fn mark_nullish(&self, key: &str) {
        self.nullish.write().insert(key.to_string());
    }

    /// Commit a value, clearing any confirmed-absent marker
    pub fn set_value(&self, key: &str, value: Value) {
        if self.debug_set_state {
            debug!(key, value = %value, "cache write");
        }
        self.nullish.write().remove(key);
        self.map.write().insert(key.to_string(), value);
        self.touch_recent(key);
    }

    /// Remove a key; the key becomes confirmed absent
    pub fn drop_key(&self, key: &str) {
        if self.debug_set_state {
            debug!(key, "cache drop");
        }
        self.map.write().remove(key);
        self.nullish.write().insert(key.to_string());
        self.recent.lock().retain(|k| k != key);
    }

    /// True iff `value` differs structurally from the cached value, or the
    /// key is uncached
    pub fn has_value_changed(&self, key: &str, value: &Value) -> bool {
        match self.map.read().get(key) {
            Some(existing) => existing != value,
            None => true,
        }
    }

    /// Keys currently holding a value
    pub fn cached_keys(&self) -> Vec<String> {
        self.map.read().keys().cloned().collect()
    }

    /// Projection of the cached members of a collection prefix
    pub fn cached_members_of(&self, collection_key: &str) -> HashMap<String, Value> {
        self.map
            .read()
            .iter()
            .filter(|(k, _)| k.len() > collection_key.len() && k.starts_with(collection_key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Least recently accessed key satisfying `pred`
    pub fn least_recent_matching(&self, pred: impl Fn(&str) -> bool) -> Option<String> {
        self.recent.lock().iter().find(|k| pred(k)).cloned()
    }

    fn touch_recent(&self, key: &str) {
        if self.max_recent == 0 {
            return;
        }
        let mut recent = self.recent.lock();
        recent.retain(|k| k != key);
        recent.push_back(key.to_string());
        while recent.len() > self.max_recent {
            recent.pop_front();
        }
    }

    // ========================================================================
    // Pending tasks
    // ========================================================================

    /// Start the named task, or join it if it is already running
    pub fn begin_or_join_task(&self, name: &str) -> TaskLease {
        let mut tasks = self.tasks.lock();
        if let Some(tx) = tasks.get(name) {
            return TaskLease::Joined(tx.subscribe());
        }
        let (tx, _rx) = watch::channel(false);
        tasks.insert(name.to_string(), tx);
        TaskLease::Started
    }

    /// Receiver for the named task, if one is running
    pub fn task_waiter(&self, name: &str) -> Option<watch::Receiver<bool>> {
        self.tasks.lock().get(name).map(|tx| tx.subscribe())
    }

    /// Complete the named task, waking everyone who joined it
    pub fn finish_task(&self, name: &str) {
        if let Some(tx) = self.tasks.lock().remove(name) {
            let _ = tx.send(true);
        }
    }
}

/// Await the completion of a joined task
pub async fn join_task(mut waiter: watch::Receiver<bool>) {
    // An error means the owner dropped the sender, which also means done.
    let _ = waiter.wait_for(|done| *done).await;
}
