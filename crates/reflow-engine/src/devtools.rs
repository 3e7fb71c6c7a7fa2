//! Operation journal
//!
//! A bounded in-memory log of the write operations that reached storage, in
//! the order they completed. Debug tooling reads it to replay what the
//! pipeline did; the method names are the same strings the `update` payload
//! uses.

use parking_lot::Mutex;
use std::collections::VecDeque;

const DEFAULT_CAPACITY: usize = 512;

/// One journaled operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// Operation method (`set`, `merge`, `mergeCollection`, ...)
    pub method: &'static str,
    /// Key (or collection prefix) the operation targeted
    pub key: String,
}

/// Bounded journal of completed write operations
pub struct OpJournal {
    entries: Mutex<VecDeque<JournalEntry>>,
    capacity: usize,
}

impl OpJournal {
    /// Create a journal with the default capacity
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Append one entry, dropping the oldest past capacity
    pub fn record(&self, method: &'static str, key: &str) {
        let mut entries = self.entries.lock();
        entries.push_back(JournalEntry {
            method,
            key: key.to_string(),
        });
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Snapshot of the journal, oldest first
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().iter().cloned().collect()
    }
}

impl Default for OpJournal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_in_order() {
        let journal = OpJournal::new();
        journal.record("set", "a");
        journal.record("merge", "b");

        let entries = journal.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].method, "set");
        assert_eq!(entries[1].key, "b");
    }

    #[test]
    fn test_capacity_is_bounded() {
        let journal = OpJournal {
            entries: Mutex::new(VecDeque::new()),
            capacity: 2,
        };
        journal.record("set", "a");
        journal.record("set", "b");
        journal.record("set", "c");

        let keys: Vec<_> = journal.entries().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["b", "c"]);
    }
}
