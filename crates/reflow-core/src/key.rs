//! Key space: collection prefixes and member-id parsing
//!
//! A key is an opaque string. A *collection key* is a declared prefix (for
//! example `report_`); any key starting with that prefix is a member of the
//! collection, and its *member id* is the suffix after the prefix.
//! Classification is deterministic from the registered prefixes.

use std::collections::HashSet;

/// Registry of declared keys and collection prefixes
///
/// Built once at init from the store options and never mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct KeySpace {
    collection_prefixes: Vec<String>,
    skippable_member_ids: HashSet<String>,
}

impl KeySpace {
    /// Build a key space from declared collection prefixes and the set of
    /// member ids whose writes are coerced to deletion.
    pub fn new(
        collection_prefixes: impl IntoIterator<Item = String>,
        skippable_member_ids: impl IntoIterator<Item = String>,
    ) -> Self {
        // Longest prefix first so nested prefixes resolve to the most
        // specific collection.
        let mut prefixes: Vec<String> = collection_prefixes.into_iter().collect();
        prefixes.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        prefixes.dedup();
        Self {
            collection_prefixes: prefixes,
            skippable_member_ids: skippable_member_ids.into_iter().collect(),
        }
    }

    /// All declared collection prefixes, most specific first
    pub fn collection_prefixes(&self) -> &[String] {
        &self.collection_prefixes
    }

    /// Check whether `key` is itself a declared collection prefix
    pub fn is_collection_key(&self, key: &str) -> bool {
        self.collection_prefixes.iter().any(|p| p == key)
    }

    /// Check whether `key` is a member of `collection_key`
    ///
    /// Membership requires the shared prefix plus a non-empty member id.
    pub fn is_member_of(&self, collection_key: &str, key: &str) -> bool {
        key.len() > collection_key.len() && key.starts_with(collection_key)
    }

    /// Find the declared collection a key belongs to, if any
    pub fn collection_key_for<'a>(&'a self, key: &str) -> Option<&'a str> {
        self.collection_prefixes
            .iter()
            .map(String::as_str)
            .find(|prefix| self.is_member_of(prefix, key))
    }

    /// Extract the member id of `key` within its declared collection
    pub fn member_id<'a>(&self, key: &'a str) -> Option<&'a str> {
        self.collection_key_for(key)
            .map(|prefix| &key[prefix.len()..])
    }

    /// Check whether writes to `key` must be coerced to deletion
    ///
    /// True when the key is a collection member whose member id was declared
    /// skippable at init.
    pub fn is_skippable_member(&self, key: &str) -> bool {
        match self.member_id(key) {
            Some(id) => self.skippable_member_ids.contains(id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyspace() -> KeySpace {
        KeySpace::new(
            vec!["report_".to_string(), "report_meta_".to_string()],
            vec!["42".to_string()],
        )
    }

    #[test]
    fn test_is_collection_key() {
        let ks = keyspace();
        assert!(ks.is_collection_key("report_"));
        assert!(!ks.is_collection_key("report_1"));
        assert!(!ks.is_collection_key("session"));
    }

    #[test]
    fn test_membership_requires_nonempty_member_id() {
        let ks = keyspace();
        assert!(ks.is_member_of("report_", "report_1"));
        assert!(!ks.is_member_of("report_", "report_"));
        assert!(!ks.is_member_of("report_", "session"));
    }

    #[test]
    fn test_most_specific_prefix_wins() {
        let ks = keyspace();
        assert_eq!(ks.collection_key_for("report_meta_7"), Some("report_meta_"));
        assert_eq!(ks.collection_key_for("report_7"), Some("report_"));
        assert_eq!(ks.collection_key_for("session"), None);
    }

    #[test]
    fn test_member_id() {
        let ks = keyspace();
        assert_eq!(ks.member_id("report_abc"), Some("abc"));
        assert_eq!(ks.member_id("report_meta_7"), Some("7"));
        assert_eq!(ks.member_id("plain"), None);
    }

    #[test]
    fn test_skippable_member() {
        let ks = keyspace();
        assert!(ks.is_skippable_member("report_42"));
        assert!(!ks.is_skippable_member("report_41"));
        // Non-member keys are never skippable, whatever their suffix.
        assert!(!ks.is_skippable_member("42"));
    }
}
