//! Per-key merge queue
//!
//! Deltas for a key that arrive while a prior storage read is outstanding are
//! collected here and folded in one batch: one storage read and at most one
//! storage write, no matter how many merges coalesced.
//!
//! Every entry carries an *epoch*. The folder that was scheduled for an entry
//! only consumes it if the epoch still matches; a `set` or `clear` aborts an
//! in-flight fold by removing the entry, and a merge enqueued after the abort
//! creates a fresh entry (new epoch, new fold). The folder re-checks the
//! entry after its read suspension, which is the abort signal.

use parking_lot::Mutex;
use reflow_core::{Result, StoreError, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Shared outcome of a fold; `None` while the fold is in flight
pub type FoldOutcome = Option<std::result::Result<(), Arc<StoreError>>>;

struct QueueEntry {
    epoch: u64,
    deltas: Vec<Value>,
    done: watch::Sender<FoldOutcome>,
}

/// Result of enqueueing a delta
pub enum Enqueued {
    /// First delta for the key; the caller must schedule a fold for `epoch`
    New {
        /// Completion channel shared by every delta in this batch
        done: watch::Receiver<FoldOutcome>,
        /// Identity of the entry the fold may consume
        epoch: u64,
    },
    /// Joined an existing batch
    Joined {
        /// Completion channel of the batch that absorbed the delta
        done: watch::Receiver<FoldOutcome>,
    },
}

/// Per-key FIFO of pending deltas with single-flight folding
#[derive(Default)]
pub struct MergeQueue {
    entries: Mutex<HashMap<String, QueueEntry>>,
    next_epoch: AtomicU64,
}

impl MergeQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta for `key`, creating the entry when none exists
    pub fn enqueue(&self, key: &str, delta: Value) -> Enqueued {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.deltas.push(delta);
            return Enqueued::Joined {
                done: entry.done.subscribe(),
            };
        }
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        let (done, rx) = watch::channel(None);
        entries.insert(
            key.to_string(),
            QueueEntry {
                epoch,
                deltas: vec![delta],
                done,
            },
        );
        Enqueued::New { done: rx, epoch }
    }

    /// Whether a batch is pending for `key`
    pub fn has_pending(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Drop the pending batch for `key`, resolving its waiters.
    ///
    /// Used by `set` and `clear`: the queued deltas are discarded and the
    /// in-flight fold (if any) finds the entry gone when it re-checks.
    pub fn abort(&self, key: &str) {
        if let Some(entry) = self.entries.lock().remove(key) {
            let _ = entry.done.send(Some(Ok(())));
        }
    }

    /// Consume the entry for `key` if it is still the one the fold was
    /// scheduled for. Returns `None` when the entry was aborted (or replaced
    /// by a newer batch).
    pub fn take_if_current(
        &self,
        key: &str,
        epoch: u64,
    ) -> Option<(Vec<Value>, watch::Sender<FoldOutcome>)> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.epoch == epoch => {
                let entry = entries.remove(key).expect("entry just observed");
                Some((entry.deltas, entry.done))
            }
            _ => None,
        }
    }
}

/// Await the completion of a batch and translate its shared outcome
pub async fn wait(mut done: watch::Receiver<FoldOutcome>) -> Result<()> {
    let outcome = match done.wait_for(|o| o.is_some()).await {
        Ok(guard) => guard.clone(),
        // Sender dropped without an outcome: the batch was consumed and its
        // folder has gone away; nothing further will happen.
        Err(_) => return Ok(()),
    };
    match outcome {
        Some(Err(e)) => Err(e.duplicate()),
        _ => Ok(()),
    }
}
