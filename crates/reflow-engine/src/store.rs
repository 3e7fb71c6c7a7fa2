//! The write pipeline
//!
//! `Store` is the construction seam of the whole system: it encapsulates the
//! storage driver, the cache, the per-key merge queue, and the subscriber
//! registry, and orchestrates them for every write operation. It is a cheap
//! clone over an `Arc`, safe to share across tasks.
//!
//! The pipeline is optimistic: the cache is updated and subscribers are
//! notified before the durable write is issued, and a storage failure after
//! the broadcast is logged but never rolled back. A failed write first evicts
//! the least-recently-used evictable key and retries once.

use crate::cache::{join_task, StoreCache, TaskLease};
use crate::devtools::{JournalEntry, OpJournal};
use crate::merge_queue::{self, Enqueued, MergeQueue};
use crate::metrics::OpTimer;
use crate::options::StoreOptions;
use crate::subscribers::{SubscriberCallback, SubscriberEvent, SubscriberRegistry};
use reflow_core::{
    apply_merge, check_compatibility, remove_null_values, KeySpace, Result, StoreError, Value,
};
use reflow_storage::StorageDriver;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub use crate::subscribers::ConnectionId;

/// Named pending task registered by `clear`
pub const TASK_CLEAR: &str = "clear";

/// Options for attaching a subscriber through [`Store::connect`]
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Key or collection prefix to observe
    pub key: String,
    /// Replay the current value(s) into the callback on connect
    pub init_with_stored_values: bool,
}

impl ConnectOptions {
    /// Observe `key`, replaying stored values on connect
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            init_with_stored_values: true,
        }
    }

    /// Skip the replay of current values on connect
    pub fn without_stored_values(mut self) -> Self {
        self.init_with_stored_values = false;
        self
    }
}

pub(crate) struct StoreInner {
    pub(crate) driver: Arc<dyn StorageDriver>,
    pub(crate) cache: StoreCache,
    pub(crate) merge_queue: MergeQueue,
    pub(crate) subscribers: SubscriberRegistry,
    pub(crate) key_space: KeySpace,
    pub(crate) journal: OpJournal,
    pub(crate) options: StoreOptions,
}

/// Reactive persistent key-value store
///
/// All operations are async tasks over the cooperative runtime; "concurrent"
/// means interleaved at the driver's suspension points. Mutations of the
/// shared cache are atomic between suspension points.
#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Arc<StoreInner>,
}

impl Store {
    /// Initialize a store over `driver`.
    ///
    /// Prepares the backend, seeds the declared default key states (stored
    /// values win over defaults), and wires multi-instance sync when enabled
    /// and supported by the driver.
    pub async fn init(driver: Arc<dyn StorageDriver>, options: StoreOptions) -> Result<Store> {
        driver.init().await?;

        let key_space = KeySpace::new(
            options.collection_keys.iter().cloned(),
            options.skippable_collection_member_ids.iter().cloned(),
        );
        let cache = StoreCache::new(options.max_cached_keys_count, options.debug_set_state);
        let subscribers = SubscriberRegistry::new(key_space.clone());

        let store = Store {
            inner: Arc::new(StoreInner {
                driver,
                cache,
                merge_queue: MergeQueue::new(),
                subscribers,
                key_space,
                journal: OpJournal::new(),
                options,
            }),
        };

        store.seed_default_key_states().await?;
        if store.inner.options.should_sync_multiple_instances {
            store.wire_instance_sync();
        }
        Ok(store)
    }

    /// Seed the cache with the declared default key states.
    ///
    /// A value already persisted for a default key wins over the default.
    async fn seed_default_key_states(&self) -> Result<()> {
        let defaults: Vec<(String, Value)> = self
            .inner
            .options
            .initial_key_states
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, default) in defaults {
            let stored = self.inner.driver.get_item(&key).await?;
            let seeded = apply_merge(Some(default), stored.into_iter().collect(), true);
            self.inner.cache.set_value(&key, seeded.clone());
            self.inner
                .subscribers
                .schedule_subscriber_update(&key, Some(&seeded), None);
        }
        Ok(())
    }

    /// Mirror committed writes from other instances into this one.
    ///
    /// Deliveries bypass the merge queue by design: they represent state that
    /// is already durable, and the last delivery wins.
    fn wire_instance_sync(&self) {
        let weak = Arc::downgrade(&self.inner);
        let supported = self
            .inner
            .driver
            .keep_instances_sync(Arc::new(move |key, value| {
                let Some(inner) = weak.upgrade() else { return };
                let previous = inner.cache.get_value(key);
                match value {
                    Some(v) => inner.cache.set_value(key, v.clone()),
                    None => inner.cache.drop_key(key),
                }
                inner
                    .subscribers
                    .schedule_subscriber_update(key, value, previous.as_ref());
            }));
        if !supported {
            debug!("storage driver does not support multi-instance sync");
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Current value for `key`, from cache or storage.
    ///
    /// Concurrent cache misses for the same key share one storage read via
    /// the pending-task map. `None` means the key has no value.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        if let Some(value) = self.inner.cache.get_value(key) {
            return Ok(Some(value));
        }
        if self.inner.cache.is_nullish(key) {
            return Ok(None);
        }

        let task = format!("get:{key}");
        match self.inner.cache.begin_or_join_task(&task) {
            TaskLease::Joined(waiter) => {
                join_task(waiter).await;
                Ok(self.inner.cache.get_value(key))
            }
            TaskLease::Started => {
                let read = self.inner.driver.get_item(key).await;
                let result = match read {
                    Ok(Some(value)) if !value.is_null() => {
                        self.inner.cache.set_value(key, value.clone());
                        Ok(Some(value))
                    }
                    Ok(_) => {
                        self.inner.cache.mark_nullish(key);
                        Ok(None)
                    }
                    Err(e) => Err(e),
                };
                self.inner.cache.finish_task(&task);
                result
            }
        }
    }

    /// Read several keys at once
    pub async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, Value>> {
        let mut values = HashMap::new();
        for key in keys {
            if let Some(value) = self.get(key).await? {
                values.insert(key.clone(), value);
            }
        }
        Ok(values)
    }

    /// All current members of a collection, keyed by member key
    pub async fn get_collection(&self, collection_key: &str) -> Result<HashMap<String, Value>> {
        let mut keys: HashSet<String> = self
            .inner
            .driver
            .get_all_keys()
            .await?
            .into_iter()
            .filter(|k| self.inner.key_space.is_member_of(collection_key, k))
            .collect();
        keys.extend(self.inner.cache.cached_members_of(collection_key).into_keys());

        let keys: Vec<String> = keys.into_iter().collect();
        self.multi_get(&keys).await
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Attach a subscriber callback to a key or collection prefix
    pub async fn connect(
        &self,
        options: ConnectOptions,
        callback: SubscriberCallback,
    ) -> Result<ConnectionId> {
        let id = self.inner.subscribers.connect(&options.key, callback.clone());
        if options.init_with_stored_values {
            if self.inner.key_space.is_collection_key(&options.key) {
                let members = self.get_collection(&options.key).await?;
                for (key, value) in members {
                    callback(SubscriberEvent {
                        key: &key,
                        value: Some(&value),
                        previous: None,
                    });
                }
            } else {
                let value = self.get(&options.key).await?;
                callback(SubscriberEvent {
                    key: &options.key,
                    value: value.as_ref(),
                    previous: None,
                });
            }
        }
        Ok(id)
    }

    /// Detach a subscriber
    pub fn disconnect(&self, id: ConnectionId) {
        self.inner.subscribers.disconnect(id);
    }

    /// The current session correlation id
    pub fn session_id(&self) -> String {
        self.inner.subscribers.session_id()
    }

    /// Snapshot of the operation journal
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.inner.journal.entries()
    }

    // ========================================================================
    // set / multiSet
    // ========================================================================

    /// Write one key.
    ///
    /// `None` is a no-op; `Some(Value::Null)` removes the key from cache and
    /// storage. A `set` racing an in-flight merge fold for the same key wins:
    /// the fold's queue entry is dropped before the write proceeds.
    pub async fn set(&self, key: &str, value: impl Into<Option<Value>>) -> Result<()> {
        let timer = OpTimer::start("set", self.inner.options.enable_performance_metrics);
        let result = self.set_inner(key, value.into()).await;
        self.inner.journal.record("set", key);
        timer.finish();
        result
    }

    async fn set_inner(&self, key: &str, value: Option<Value>) -> Result<()> {
        if self.inner.merge_queue.has_pending(key) {
            self.inner.merge_queue.abort(key);
        }

        let value = if self.inner.key_space.is_skippable_member(key) {
            Some(Value::Null)
        } else {
            value
        };
        let Some(value) = value else {
            return Ok(());
        };
        if value.is_null() && !self.inner.cache.has_cache_for_key(key) {
            return Ok(());
        }

        let existing = self.inner.cache.get_value(key);
        let check = check_compatibility(Some(&value), existing.as_ref());
        if !check.is_compatible {
            let dropped = StoreError::incompatible_update(key, check.existing_kind, check.new_kind);
            warn!(error = %dropped, "dropping incompatible set");
            return Ok(());
        }

        let Some(normalized) = remove_null_values(value) else {
            return self.remove_key_with_notify(key).await;
        };

        let has_changed = self.inner.cache.has_value_changed(key, &normalized);
        self.inner.cache.set_value(key, normalized.clone());
        self.inner
            .subscribers
            .broadcast_update(key, Some(&normalized), has_changed);
        if !has_changed {
            return Ok(());
        }

        match self.inner.driver.set_item(key, &normalized).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.evict_storage_and_retry(e, || self.inner.driver.set_item(key, &normalized))
                    .await
            }
        }
    }

    /// Write several keys in one call
    pub async fn multi_set(&self, data: Vec<(String, Value)>) -> Result<()> {
        let timer = OpTimer::start("multiSet", self.inner.options.enable_performance_metrics);
        let result = self.multi_set_inner(data).await.map(|_| ());
        self.inner.journal.record("multiSet", "");
        timer.finish();
        result
    }

    /// Shared body of `multi_set` and `set_collection`.
    ///
    /// Returns the normalized pairs written and the keys removed.
    async fn multi_set_inner(
        &self,
        data: Vec<(String, Value)>,
    ) -> Result<(Vec<(String, Value)>, Vec<String>)> {
        let mut sets: Vec<(String, Value)> = Vec::new();
        let mut removals: Vec<String> = Vec::new();

        for (key, value) in data {
            let value = if self.inner.key_space.is_skippable_member(&key) {
                Value::Null
            } else {
                value
            };
            self.inner.merge_queue.abort(&key);

            let previous = self.inner.cache.get_value(&key);
            match remove_null_values(value) {
                None => {
                    self.inner.cache.drop_key(&key);
                    self.inner
                        .subscribers
                        .schedule_subscriber_update(&key, None, previous.as_ref());
                    removals.push(key);
                }
                Some(normalized) => {
                    self.inner.cache.set_value(&key, normalized.clone());
                    self.inner.subscribers.schedule_subscriber_update(
                        &key,
                        Some(&normalized),
                        previous.as_ref(),
                    );
                    sets.push((key, normalized));
                }
            }
        }

        if !sets.is_empty() {
            if let Err(e) = self.inner.driver.multi_set(&sets).await {
                self.evict_storage_and_retry(e, || self.inner.driver.multi_set(&sets))
                    .await?;
            }
        }
        if !removals.is_empty() {
            self.inner.driver.remove_items(&removals).await?;
        }
        Ok((sets, removals))
    }

    // ========================================================================
    // merge
    // ========================================================================

    /// Merge a delta into one key.
    ///
    /// Deltas arriving while a prior fold's storage read is outstanding are
    /// coalesced into one batch: a single read and at most a single write.
    /// The returned future tracks storage completion of the batch.
    pub async fn merge(&self, key: &str, delta: Value) -> Result<()> {
        let timer = OpTimer::start("merge", self.inner.options.enable_performance_metrics);
        let delta = if self.inner.key_space.is_skippable_member(key) {
            Value::Null
        } else {
            delta
        };

        let result = match self.inner.merge_queue.enqueue(key, delta) {
            Enqueued::New { done, epoch } => {
                let store = self.clone();
                let fold_key = key.to_string();
                tokio::spawn(async move {
                    store.run_merge_fold(&fold_key, epoch).await;
                });
                merge_queue::wait(done).await
            }
            Enqueued::Joined { done } => merge_queue::wait(done).await,
        };
        self.inner.journal.record("merge", key);
        timer.finish();
        result
    }

    /// Fold the queued deltas for `key` against one snapshot read.
    ///
    /// The queue entry is re-checked after the read suspension; a `set` or
    /// `clear` that removed it (or replaced it with a newer batch) aborts
    /// this fold without effect.
    async fn run_merge_fold(&self, key: &str, epoch: u64) {
        let existing = match self.get(key).await {
            Ok(existing) => existing,
            Err(e) => {
                error!(key, error = %e, "merge fold failed to read existing value");
                if let Some((_, done)) = self.inner.merge_queue.take_if_current(key, epoch) {
                    let _ = done.send(Some(Ok(())));
                }
                return;
            }
        };

        let Some((deltas, done)) = self.inner.merge_queue.take_if_current(key, epoch) else {
            // Aborted while the read was outstanding.
            return;
        };

        let outcome = self.apply_merge_batch(key, existing, deltas).await;
        if let Err(e) = &outcome {
            error!(key, error = %e, "merge batch failed to reach storage");
        }
        let _ = done.send(Some(outcome.map_err(Arc::new)));
    }

    async fn apply_merge_batch(
        &self,
        key: &str,
        existing: Option<Value>,
        deltas: Vec<Value>,
    ) -> Result<()> {
        let valid: Vec<Value> = deltas
            .into_iter()
            .filter(|delta| {
                let check = check_compatibility(Some(delta), existing.as_ref());
                if !check.is_compatible {
                    let dropped =
                        StoreError::incompatible_update(key, check.existing_kind, check.new_kind);
                    warn!(error = %dropped, "dropping incompatible merge");
                }
                check.is_compatible
            })
            .collect();
        if valid.is_empty() {
            return Ok(());
        }

        let should_set_value = existing.is_none() || valid.iter().any(Value::is_null);
        let batched = apply_merge(None, valid, false);
        if batched.is_null() {
            return self.remove_key_with_notify(key).await;
        }

        let base = if should_set_value { None } else { existing };
        let pre_merged = apply_merge(base, vec![batched.clone()], true);

        let has_changed = self.inner.cache.has_value_changed(key, &pre_merged);
        self.inner.cache.set_value(key, pre_merged.clone());
        self.inner
            .subscribers
            .broadcast_update(key, Some(&pre_merged), has_changed);
        if !has_changed {
            return Ok(());
        }

        match self
            .inner
            .driver
            .merge_item(key, &batched, &pre_merged, should_set_value)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                self.evict_storage_and_retry(e, || {
                    self.inner
                        .driver
                        .merge_item(key, &batched, &pre_merged, should_set_value)
                })
                .await
            }
        }
    }

    // ========================================================================
    // Collections
    // ========================================================================

    /// Merge deltas into several members of one collection.
    ///
    /// One storage round trip for the existing members (`multi_merge`, nested
    /// nulls preserved) and one for the new members (`multi_set`, nested
    /// nulls stripped, since a fresh write has no fields to delete).
    pub async fn merge_collection(
        &self,
        collection_key: &str,
        members: Vec<(String, Value)>,
    ) -> Result<()> {
        let timer =
            OpTimer::start("mergeCollection", self.inner.options.enable_performance_metrics);
        let result = self
            .collection_batch(collection_key, members, HashSet::new())
            .await;
        self.inner.journal.record("mergeCollection", collection_key);
        timer.finish();
        result
    }

    /// Shared body of `merge_collection` and the collection collapse inside
    /// `update`. Keys in `forced_set` are routed through the set portion
    /// regardless of whether they already exist.
    pub(crate) async fn collection_batch(
        &self,
        collection_key: &str,
        members: Vec<(String, Value)>,
        forced_set: HashSet<String>,
    ) -> Result<()> {
        if !self.inner.key_space.is_collection_key(collection_key) {
            warn!(collection_key, "dropping collection write for undeclared collection");
            return Ok(());
        }
        if members.is_empty() {
            warn!(collection_key, "dropping empty collection write");
            return Ok(());
        }
        if members
            .iter()
            .any(|(key, _)| !self.inner.key_space.is_member_of(collection_key, key))
        {
            warn!(collection_key, "dropping collection write with foreign keys");
            return Ok(());
        }

        let mut removals: Vec<String> = Vec::new();
        let mut writes: Vec<(String, Value)> = Vec::new();
        for (key, value) in members {
            let value = if self.inner.key_space.is_skippable_member(&key) {
                Value::Null
            } else {
                value
            };
            if value.is_null() {
                removals.push(key);
            } else {
                writes.push((key, value));
            }
        }
        for key in &forced_set {
            self.inner.merge_queue.abort(key);
        }

        let persisted = self.inner.driver.get_all_keys().await?;
        let mut existing_pairs: Vec<(String, Value)> = Vec::new();
        let mut new_pairs: Vec<(String, Value)> = Vec::new();
        for (key, value) in writes {
            if persisted.contains(&key) && !forced_set.contains(&key) {
                let cached = self.inner.cache.get_value(&key);
                let check = check_compatibility(Some(&value), cached.as_ref());
                if !check.is_compatible {
                    let dropped =
                        StoreError::incompatible_update(&key, check.existing_kind, check.new_kind);
                    warn!(error = %dropped, "dropping incompatible collection member");
                    continue;
                }
                existing_pairs.push((key, value));
            } else {
                new_pairs.push((key, apply_merge(None, vec![value], true)));
            }
        }

        // Previous values are captured before any mutation so collection
        // subscribers can diff.
        let mut previous: HashMap<String, Value> = HashMap::new();
        for key in existing_pairs
            .iter()
            .map(|(k, _)| k)
            .chain(new_pairs.iter().map(|(k, _)| k))
            .chain(removals.iter())
        {
            if let Some(value) = self.inner.cache.get_value(key) {
                previous.insert(key.clone(), value);
            }
        }

        if !existing_pairs.is_empty() {
            if let Err(e) = self.inner.driver.multi_merge(&existing_pairs).await {
                self.evict_storage_and_retry(e, || self.inner.driver.multi_merge(&existing_pairs))
                    .await?;
            }
        }
        if !new_pairs.is_empty() {
            if let Err(e) = self.inner.driver.multi_set(&new_pairs).await {
                self.evict_storage_and_retry(e, || self.inner.driver.multi_set(&new_pairs))
                    .await?;
            }
        }
        if !removals.is_empty() {
            self.inner.driver.remove_items(&removals).await?;
        }

        let mut events: Vec<(String, Option<Value>)> = Vec::new();
        for (key, delta) in existing_pairs {
            let merged = apply_merge(self.inner.cache.get_value(&key), vec![delta], true);
            self.inner.cache.set_value(&key, merged.clone());
            events.push((key, Some(merged)));
        }
        for (key, value) in new_pairs {
            self.inner.cache.set_value(&key, value.clone());
            events.push((key, Some(value)));
        }
        for key in removals {
            self.inner.cache.drop_key(&key);
            events.push((key, None));
        }

        self.inner.subscribers.schedule_notify_collection_subscribers(
            collection_key,
            &events,
            Some(&previous),
        );
        Ok(())
    }

    /// Replace the entire collection.
    ///
    /// Previously persisted members missing from the input are removed as
    /// part of the combined write.
    pub async fn set_collection(
        &self,
        collection_key: &str,
        members: Vec<(String, Value)>,
    ) -> Result<()> {
        let timer =
            OpTimer::start("setCollection", self.inner.options.enable_performance_metrics);
        let result = self.set_collection_inner(collection_key, members).await;
        self.inner.journal.record("setCollection", collection_key);
        timer.finish();
        result
    }

    async fn set_collection_inner(
        &self,
        collection_key: &str,
        members: Vec<(String, Value)>,
    ) -> Result<()> {
        if !self.inner.key_space.is_collection_key(collection_key) {
            warn!(collection_key, "dropping collection replace for undeclared collection");
            return Ok(());
        }
        if members
            .iter()
            .any(|(key, _)| !self.inner.key_space.is_member_of(collection_key, key))
        {
            warn!(collection_key, "dropping collection replace with foreign keys");
            return Ok(());
        }

        let provided: HashSet<String> = members.iter().map(|(k, _)| k.clone()).collect();
        let mut combined = members;
        for key in self.inner.driver.get_all_keys().await? {
            if self.inner.key_space.is_member_of(collection_key, &key) && !provided.contains(&key) {
                combined.push((key, Value::Null));
            }
        }

        let previous = self.inner.cache.cached_members_of(collection_key);
        let (sets, removed) = self.multi_set_inner(combined).await?;

        let mut events: Vec<(String, Option<Value>)> = sets
            .into_iter()
            .map(|(key, value)| (key, Some(value)))
            .collect();
        events.extend(removed.into_iter().map(|key| (key, None)));
        self.inner.subscribers.schedule_notify_collection_subscribers(
            collection_key,
            &events,
            Some(&previous),
        );
        Ok(())
    }

    // ========================================================================
    // clear
    // ========================================================================

    /// Reset the store.
    ///
    /// Keys in `keys_to_preserve` are left untouched, keys with a declared
    /// default state are rewritten to their default, everything else is
    /// removed. The whole operation is registered as the named pending task
    /// [`TASK_CLEAR`], so concurrent writers can serialize against it.
    ///
    /// A `set` issued immediately after `clear` for a key with a default
    /// state can race the default write and leave the default absent; prefer
    /// `merge` in that situation.
    pub async fn clear(&self, keys_to_preserve: Vec<String>) -> Result<()> {
        let timer = OpTimer::start("clear", self.inner.options.enable_performance_metrics);
        let result = match self.inner.cache.begin_or_join_task(TASK_CLEAR) {
            TaskLease::Joined(waiter) => {
                join_task(waiter).await;
                Ok(())
            }
            TaskLease::Started => {
                let result = self.clear_inner(&keys_to_preserve).await;
                self.inner.cache.finish_task(TASK_CLEAR);
                result
            }
        };
        self.inner.journal.record("clear", "");
        timer.finish();
        result
    }

    async fn clear_inner(&self, keys_to_preserve: &[String]) -> Result<()> {
        let preserve: HashSet<&str> = keys_to_preserve.iter().map(String::as_str).collect();

        let mut all_keys = self.inner.driver.get_all_keys().await?;
        all_keys.extend(self.inner.options.initial_key_states.keys().cloned());

        let mut to_remove: Vec<String> = Vec::new();
        let mut to_reset: Vec<(String, Value)> = Vec::new();
        let mut staged: Vec<(String, Option<Value>, Option<Value>)> = Vec::new();

        for key in all_keys {
            if preserve.contains(key.as_str()) {
                continue;
            }
            // An in-flight fold must not resurrect a key after the reset.
            self.inner.merge_queue.abort(&key);

            let previous = self.inner.cache.get_value(&key);
            if let Some(default) = self.inner.options.initial_key_states.get(&key) {
                if previous.as_ref() != Some(default) {
                    staged.push((key.clone(), Some(default.clone()), previous));
                }
                to_reset.push((key, default.clone()));
            } else {
                if previous.is_some() {
                    staged.push((key.clone(), None, previous));
                }
                to_remove.push(key);
            }
        }

        for key in &to_remove {
            self.inner.cache.drop_key(key);
        }
        if !to_remove.is_empty() {
            self.inner.driver.remove_items(&to_remove).await?;
        }
        self.inner.subscribers.refresh_session_id();
        if !to_reset.is_empty() {
            self.inner.driver.multi_set(&to_reset).await?;
            for (key, value) in &to_reset {
                self.inner.cache.set_value(key, value.clone());
            }
        }

        // Batched notification: collection members are grouped per prefix,
        // everything else is delivered individually.
        let mut per_collection: HashMap<String, (Vec<(String, Option<Value>)>, HashMap<String, Value>)> =
            HashMap::new();
        for (key, value, previous) in staged {
            match self.inner.key_space.collection_key_for(&key) {
                Some(collection_key) => {
                    let entry = per_collection.entry(collection_key.to_string()).or_default();
                    if let Some(prev) = previous {
                        entry.1.insert(key.clone(), prev);
                    }
                    entry.0.push((key, value));
                }
                None => {
                    self.inner.subscribers.schedule_subscriber_update(
                        &key,
                        value.as_ref(),
                        previous.as_ref(),
                    );
                }
            }
        }
        for (collection_key, (members, previous)) in per_collection {
            self.inner.subscribers.schedule_notify_collection_subscribers(
                &collection_key,
                &members,
                Some(&previous),
            );
        }
        Ok(())
    }

    // ========================================================================
    // Failure recovery
    // ========================================================================

    /// Drop the least-recently-used evictable key and retry the failed write
    /// once. With nothing evictable the original error surfaces.
    async fn evict_storage_and_retry<F, Fut>(&self, error: StoreError, retry: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        error!(%error, "storage write failed, evicting least recently used key and retrying");
        let Some(victim) = self
            .inner
            .cache
            .least_recent_matching(|key| self.is_evictable(key))
        else {
            return Err(error);
        };

        self.inner.cache.drop_key(&victim);
        if let Err(remove_error) = self.inner.driver.remove_items(&[victim.clone()]).await {
            warn!(key = %victim, error = %remove_error, "failed to remove evicted key from storage");
        }
        retry().await
    }

    fn is_evictable(&self, key: &str) -> bool {
        self.inner.options.evictable_keys.iter().any(|declared| {
            declared == key
                || (self.inner.key_space.is_collection_key(declared)
                    && self.inner.key_space.is_member_of(declared, key))
        })
    }

    /// Remove `key` from cache and storage, notifying subscribers with "no
    /// value"
    async fn remove_key_with_notify(&self, key: &str) -> Result<()> {
        let has_changed = self.inner.cache.get_value(key).is_some();
        self.inner.cache.drop_key(key);
        self.inner.subscribers.broadcast_update(key, None, has_changed);
        self.inner.driver.remove_items(&[key.to_string()]).await
    }
}
