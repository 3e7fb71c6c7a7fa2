//! The merge primitive
//!
//! `apply_merge` folds a sequence of deltas into a base value. A nested null
//! inside an object delta means "delete that field"; the two modes differ in
//! whether the null survives the fold:
//!
//! - `strip_nulls = false` produces a **delta**: nested nulls are kept as
//!   explicit deletion markers, for backends that natively understand them
//!   (the `merge_item` payload, and the per-key batching inside `update`).
//! - `strip_nulls = true` produces a **materialized snapshot**: nested nulls
//!   delete their field, for backends that only `set`, and for the cache.
//!
//! Arrays are replaced wholesale, never concatenated. Scalars replace. A
//! top-level null delta collapses the accumulator to null; a later object
//! delta then replaces it wholesale.

use serde_json::{Map, Value};

/// Fold `deltas` left-to-right on top of `existing`.
///
/// When `existing` is `None`, the fold starts from the first delta. The
/// result can be `Value::Null` (when the last effective delta was null);
/// callers treat that as "remove the key".
pub fn apply_merge(existing: Option<Value>, deltas: Vec<Value>, strip_nulls: bool) -> Value {
    let mut acc = existing;
    for delta in deltas {
        acc = Some(merge_one(acc, delta, strip_nulls));
    }
    acc.unwrap_or(Value::Null)
}

/// Normalize a value the way `set` stores it.
///
/// A top-level null maps to `None` (the key is removed); otherwise nested
/// nulls are stripped out of objects recursively, since a full write has no
/// prior fields to delete.
pub fn remove_null_values(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        other => Some(strip_nested_nulls(other)),
    }
}

fn merge_one(acc: Option<Value>, delta: Value, strip_nulls: bool) -> Value {
    match (acc, delta) {
        (Some(Value::Object(base)), Value::Object(change)) => {
            merge_objects(base, change, strip_nulls)
        }
        // Everything else replaces wholesale: arrays, scalars, null, and
        // objects landing on a non-object accumulator.
        (_, delta) => {
            if strip_nulls {
                strip_nested_nulls(delta)
            } else {
                delta
            }
        }
    }
}

fn merge_objects(mut base: Map<String, Value>, change: Map<String, Value>, strip_nulls: bool) -> Value {
    for (key, value) in change {
        match value {
            Value::Null => {
                if strip_nulls {
                    base.remove(&key);
                } else {
                    base.insert(key, Value::Null);
                }
            }
            Value::Object(nested) => match base.remove(&key) {
                Some(Value::Object(existing)) => {
                    base.insert(key, merge_objects(existing, nested, strip_nulls));
                }
                _ => {
                    let replacement = Value::Object(nested);
                    let replacement = if strip_nulls {
                        strip_nested_nulls(replacement)
                    } else {
                        replacement
                    };
                    base.insert(key, replacement);
                }
            },
            other => {
                base.insert(key, other);
            }
        }
    }
    Value::Object(base)
}

/// Recursively drop null fields from objects.
///
/// Arrays are left untouched: they are replaced wholesale during merges, so
/// nulls inside them are data, not deletion markers.
fn strip_nested_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nested_nulls(v)))
                .collect(),
        ),
        other => other,
    }
}
