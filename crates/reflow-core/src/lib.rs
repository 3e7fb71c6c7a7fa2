//! Core types for Reflow
//!
//! This crate defines the foundational pieces shared by the storage and
//! engine layers:
//! - ValueKind: JSON shape classification used by the compatibility checker
//! - Compatibility checker: existing-vs-new shape validation
//! - Merge primitive: delta folding with nested-null deletion semantics
//! - KeySpace: collection-prefix registry and member-id parsing
//! - StoreError: unified error type

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compat;
pub mod error;
pub mod key;
pub mod merge;
pub mod value;

pub use compat::{check_compatibility, CompatCheck};
pub use error::{Result, StoreError};
pub use key::KeySpace;
pub use merge::{apply_merge, remove_null_values};
pub use value::ValueKind;

/// The JSON-shaped value stored under every key.
///
/// `Value::Null` is the explicit null ("absent / delete from storage" at the
/// top level, "delete this field" at a nested position inside a merge delta).
/// The JavaScript notion of `undefined` has no representation inside a value;
/// API boundaries model it as `Option` absence instead.
pub use serde_json::Value;
