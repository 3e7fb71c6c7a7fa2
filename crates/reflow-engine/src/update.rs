//! Atomic composition of heterogeneous operations
//!
//! `Store::update` takes a batch of mixed operations and collapses them into
//! the minimum number of key-coherent writes:
//!
//! 1. validate the batch (programmer errors surface before any effect);
//! 2. build a per-key op queue (`set` discards prior queued ops for its key,
//!    a null `merge` resets the queue to a bare deletion marker);
//! 3. fold members of the same declared collection into one collection batch
//!    when two or more are queued;
//! 4. fold each remaining key's ops into a single delta, emitted as `set`
//!    when the first op was the null marker, as `merge` otherwise;
//! 5. stage snapshot-entry patches for the touched keys;
//! 6. execute: `clear` first, then snapshot patches, then the main writes.
//!
//! The method names carried by [`UpdateOperation`] are a wire contract shared
//! with debug tooling.

use crate::metrics::OpTimer;
use crate::store::Store;
use reflow_core::{apply_merge, Result, StoreError, Value};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Operation methods accepted by [`Store::update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateMethod {
    /// Overwrite one key
    Set,
    /// Merge a delta into one key
    Merge,
    /// Merge deltas into members of one collection
    MergeCollection,
    /// Replace one collection
    SetCollection,
    /// Overwrite several keys
    MultiSet,
    /// Reset the store
    Clear,
}

impl UpdateMethod {
    /// Canonical wire name of the method
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateMethod::Set => "set",
            UpdateMethod::Merge => "merge",
            UpdateMethod::MergeCollection => "mergeCollection",
            UpdateMethod::SetCollection => "setCollection",
            UpdateMethod::MultiSet => "multiSet",
            UpdateMethod::Clear => "clear",
        }
    }
}

/// One operation inside an [`Store::update`] batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOperation {
    /// What to do
    pub method: UpdateMethod,
    /// Target key or collection prefix; unused for `multiSet` and `clear`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Payload; an object of member key → value for the collection methods
    /// and `multiSet`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl UpdateOperation {
    /// Overwrite `key` with `value`
    pub fn set(key: impl Into<String>, value: Value) -> Self {
        Self {
            method: UpdateMethod::Set,
            key: Some(key.into()),
            value: Some(value),
        }
    }

    /// Merge `value` into `key`
    pub fn merge(key: impl Into<String>, value: Value) -> Self {
        Self {
            method: UpdateMethod::Merge,
            key: Some(key.into()),
            value: Some(value),
        }
    }

    /// Merge the member map `members` into the collection `key`
    pub fn merge_collection(key: impl Into<String>, members: Value) -> Self {
        Self {
            method: UpdateMethod::MergeCollection,
            key: Some(key.into()),
            value: Some(members),
        }
    }

    /// Replace the collection `key` with the member map `members`
    pub fn set_collection(key: impl Into<String>, members: Value) -> Self {
        Self {
            method: UpdateMethod::SetCollection,
            key: Some(key.into()),
            value: Some(members),
        }
    }

    /// Overwrite every key in the object `data`
    pub fn multi_set(data: Value) -> Self {
        Self {
            method: UpdateMethod::MultiSet,
            key: None,
            value: Some(data),
        }
    }

    /// Reset the store
    pub fn clear() -> Self {
        Self {
            method: UpdateMethod::Clear,
            key: None,
            value: None,
        }
    }
}

fn object_pairs(value: &Value) -> Option<Vec<(String, Value)>> {
    value
        .as_object()
        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

impl Store {
    /// Apply a batch of heterogeneous operations as one composition.
    ///
    /// Within the batch, a `set` on a key discards the ops queued before it,
    /// members of the same declared collection collapse into one collection
    /// write, and a requested `clear` runs before everything else. Snapshot
    /// patches run before the main writes so staged loading-state data lands
    /// ahead of the updates that triggered it.
    pub async fn update(&self, ops: Vec<UpdateOperation>) -> Result<()> {
        let timer = OpTimer::start("update", self.inner.options.enable_performance_metrics);
        let result = self.update_inner(ops).await;
        timer.finish();
        result
    }

    async fn update_inner(&self, ops: Vec<UpdateOperation>) -> Result<()> {
        // Phase 1: validate. Programmer errors surface before any effect.
        for op in &ops {
            match op.method {
                UpdateMethod::Clear => {}
                UpdateMethod::MultiSet => {
                    if !matches!(op.value, Some(Value::Object(_))) {
                        return Err(StoreError::invalid_input(
                            "multiSet value must be a plain object",
                        ));
                    }
                }
                UpdateMethod::MergeCollection | UpdateMethod::SetCollection => {
                    if op.key.as_deref().map_or(true, str::is_empty) {
                        return Err(StoreError::invalid_input(format!(
                            "{} requires a key",
                            op.method.as_str()
                        )));
                    }
                    if !matches!(op.value, Some(Value::Object(_))) {
                        return Err(StoreError::invalid_input(format!(
                            "{} value must be a plain object",
                            op.method.as_str()
                        )));
                    }
                }
                UpdateMethod::Set | UpdateMethod::Merge => {
                    if op.key.as_deref().map_or(true, str::is_empty) {
                        return Err(StoreError::invalid_input(format!(
                            "{} requires a key",
                            op.method.as_str()
                        )));
                    }
                }
            }
        }

        // Phase 5 input is the raw batch, staged before the queue consumes it.
        let snapshot_patches = self.stage_snapshot_updates(&ops);

        // Phase 2: build the per-key op queue. The leading null marker means
        // "start from nothing" and routes the key into the set portion later.
        let mut order: Vec<String> = Vec::new();
        let mut queue: HashMap<String, Vec<Value>> = HashMap::new();
        let mut deferred_set_collections: Vec<(String, Vec<(String, Value)>)> = Vec::new();
        let mut clear_requested = false;

        fn ensure_order(order: &mut Vec<String>, key: &str) {
            if !order.iter().any(|k| k == key) {
                order.push(key.to_string());
            }
        }
        fn enqueue_set(
            order: &mut Vec<String>,
            queue: &mut HashMap<String, Vec<Value>>,
            key: String,
            value: Value,
        ) {
            ensure_order(order, &key);
            queue.insert(key, vec![Value::Null, value]);
        }
        fn enqueue_merge(
            order: &mut Vec<String>,
            queue: &mut HashMap<String, Vec<Value>>,
            key: String,
            value: Value,
        ) {
            ensure_order(order, &key);
            if value.is_null() {
                queue.insert(key, vec![Value::Null]);
            } else {
                queue.entry(key).or_default().push(value);
            }
        }

        for op in ops {
            match op.method {
                UpdateMethod::Clear => clear_requested = true,
                UpdateMethod::Set => {
                    let key = op.key.expect("validated");
                    if let Some(value) = op.value {
                        enqueue_set(&mut order, &mut queue, key, value);
                    }
                }
                UpdateMethod::Merge => {
                    let key = op.key.expect("validated");
                    if let Some(value) = op.value {
                        enqueue_merge(&mut order, &mut queue, key, value);
                    }
                }
                UpdateMethod::MultiSet => {
                    let data = op.value.expect("validated");
                    for (key, value) in object_pairs(&data).expect("validated") {
                        enqueue_set(&mut order, &mut queue, key, value);
                    }
                }
                UpdateMethod::MergeCollection => {
                    let collection_key = op.key.expect("validated");
                    if !self.inner.key_space.is_collection_key(&collection_key) {
                        warn!(%collection_key, "dropping mergeCollection for undeclared collection");
                        continue;
                    }
                    let members = op.value.expect("validated");
                    for (key, value) in object_pairs(&members).expect("validated") {
                        if !self.inner.key_space.is_member_of(&collection_key, &key) {
                            warn!(%key, %collection_key, "dropping member outside its collection");
                            continue;
                        }
                        enqueue_merge(&mut order, &mut queue, key, value);
                    }
                }
                UpdateMethod::SetCollection => {
                    let collection_key = op.key.expect("validated");
                    let members = op.value.expect("validated");
                    deferred_set_collections
                        .push((collection_key, object_pairs(&members).expect("validated")));
                }
            }
        }

        // Phase 3: collapse collections with two or more queued members.
        let mut collection_batches: Vec<(String, Vec<(String, Value)>, HashSet<String>)> =
            Vec::new();
        for prefix in self.inner.key_space.collection_prefixes() {
            let matching: Vec<String> = order
                .iter()
                .filter(|key| {
                    queue.contains_key(key.as_str())
                        && self.inner.key_space.is_member_of(prefix, key.as_str())
                })
                .cloned()
                .collect();
            if matching.len() < 2 {
                continue;
            }
            let mut members: Vec<(String, Value)> = Vec::new();
            let mut forced_set: HashSet<String> = HashSet::new();
            for key in matching {
                let ops = queue.remove(&key).expect("key taken from queue");
                if ops.first().is_some_and(Value::is_null) {
                    forced_set.insert(key.clone());
                }
                members.push((key, apply_merge(None, ops, false)));
            }
            collection_batches.push((prefix.clone(), members, forced_set));
        }

        // Phase 4: fold the remaining keys into single emitted writes.
        let mut per_key: Vec<(String, bool, Value)> = Vec::new();
        for key in &order {
            let Some(ops) = queue.remove(key) else { continue };
            let emit_as_set = ops.first().is_some_and(Value::is_null);
            per_key.push((key.clone(), emit_as_set, apply_merge(None, ops, false)));
        }

        // Phase 6: execute. Clear runs before everything, snapshot patches
        // before the main writes.
        if clear_requested {
            self.clear(Vec::new()).await?;
        }
        for (snapshot_key, patch) in snapshot_patches {
            self.merge(&snapshot_key, patch).await?;
        }
        for (collection_key, members, forced_set) in collection_batches {
            self.collection_batch(&collection_key, members, forced_set).await?;
            self.inner.journal.record("mergeCollection", &collection_key);
        }
        for (key, emit_as_set, folded) in per_key {
            if emit_as_set {
                self.set(&key, folded).await?;
            } else {
                self.merge(&key, folded).await?;
            }
        }
        for (collection_key, members) in deferred_set_collections {
            self.set_collection(&collection_key, members).await?;
        }
        Ok(())
    }

    /// Patch cached snapshot entries whose `data` covers keys touched by the
    /// batch. Keys declared fully-merged receive the materialized value; the
    /// rest receive the raw delta.
    fn stage_snapshot_updates(&self, ops: &[UpdateOperation]) -> Vec<(String, Value)> {
        let Some(snapshot_collection) = &self.inner.options.snapshot_collection_key else {
            return Vec::new();
        };

        let mut patches = Vec::new();
        for (snapshot_key, snapshot) in self.inner.cache.cached_members_of(snapshot_collection) {
            let Some(data) = snapshot.get("data").and_then(Value::as_object) else {
                continue;
            };
            let mut patch = Map::new();
            for op in ops {
                if !matches!(op.method, UpdateMethod::Set | UpdateMethod::Merge) {
                    continue;
                }
                let (Some(key), Some(value)) = (&op.key, &op.value) else {
                    continue;
                };
                if !data.contains_key(key) {
                    continue;
                }
                let payload = if self.inner.options.fully_merged_snapshot_keys.contains(key) {
                    apply_merge(self.inner.cache.get_value(key), vec![value.clone()], true)
                } else {
                    value.clone()
                };
                patch.insert(key.clone(), payload);
            }
            if !patch.is_empty() {
                let mut body = Map::new();
                body.insert("data".to_string(), Value::Object(patch));
                patches.push((snapshot_key, Value::Object(body)));
            }
        }
        patches
    }
}
