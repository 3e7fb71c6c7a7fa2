//! Existing-vs-new shape compatibility
//!
//! A write is only allowed to change a key's shape between "nothing" and one
//! concrete container shape. Merging an array into an object (or the other
//! way around) is a programming mistake on the caller's side; the pipeline
//! logs such updates and drops them rather than corrupting the stored value.

use crate::value::ValueKind;
use serde_json::Value;

/// Outcome of a compatibility check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompatCheck {
    /// Whether the new value may be applied on top of the existing one
    pub is_compatible: bool,
    /// Shape of the existing value
    pub existing_kind: ValueKind,
    /// Shape of the new value
    pub new_kind: ValueKind,
}

/// Check whether `new` may be applied on top of `existing`.
///
/// Compatible iff:
/// - either operand is absent or null, or
/// - both are arrays, or
/// - both are non-array objects.
///
/// Scalars replace anything and anything replaces a scalar; only the
/// array-vs-object pairing is rejected.
pub fn check_compatibility(new: Option<&Value>, existing: Option<&Value>) -> CompatCheck {
    let new_kind = ValueKind::of(new);
    let existing_kind = ValueKind::of(existing);

    let is_compatible = if new_kind.is_nullish() || existing_kind.is_nullish() {
        true
    } else {
        !matches!(
            (existing_kind, new_kind),
            (ValueKind::Array, ValueKind::Object) | (ValueKind::Object, ValueKind::Array)
        )
    };

    CompatCheck {
        is_compatible,
        existing_kind,
        new_kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compatible(new: Option<&Value>, existing: Option<&Value>) -> bool {
        check_compatibility(new, existing).is_compatible
    }

    #[test]
    fn test_nullish_operands_are_always_compatible() {
        let obj = json!({"a": 1});
        let arr = json!([1]);
        assert!(compatible(None, Some(&obj)));
        assert!(compatible(Some(&Value::Null), Some(&arr)));
        assert!(compatible(Some(&obj), None));
        assert!(compatible(Some(&arr), Some(&Value::Null)));
    }

    #[test]
    fn test_matching_containers_are_compatible() {
        assert!(compatible(Some(&json!([2])), Some(&json!([1]))));
        assert!(compatible(Some(&json!({"b": 2})), Some(&json!({"a": 1}))));
    }

    #[test]
    fn test_array_vs_object_is_incompatible() {
        let check = check_compatibility(Some(&json!([1])), Some(&json!({"a": 1})));
        assert!(!check.is_compatible);
        assert_eq!(check.existing_kind, ValueKind::Object);
        assert_eq!(check.new_kind, ValueKind::Array);

        assert!(!compatible(Some(&json!({"a": 1})), Some(&json!([1]))));
    }

    #[test]
    fn test_scalars_replace_containers() {
        assert!(compatible(Some(&json!(1)), Some(&json!({"a": 1}))));
        assert!(compatible(Some(&json!({"a": 1})), Some(&json!("text"))));
        assert!(compatible(Some(&json!(1)), Some(&json!([1, 2]))));
    }
}
