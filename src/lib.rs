//! # Reflow
//!
//! A reactive persistent key-value store for client applications: an
//! in-memory cache as the synchronous source of truth, a pluggable async
//! storage driver behind it, and a write pipeline that reconciles optimistic
//! cache updates with durable writes.
//!
//! # Quick Start
//!
//! ```no_run
//! use reflow::{StoreOptions, MemoryDriver};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> reflow::Result<()> {
//!     reflow::init(
//!         Arc::new(MemoryDriver::new()),
//!         StoreOptions::new()
//!             .collection_keys(["report_"])
//!             .initial_key_state("preferred_locale", json!("en")),
//!     )
//!     .await?;
//!
//!     reflow::merge("report_1", json!({"title": "hello"})).await?;
//!     assert_eq!(
//!         reflow::get("report_1").await?,
//!         Some(json!({"title": "hello"}))
//!     );
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The free functions in this crate operate on a process-wide default
//! [`Store`] bound by [`init`]; operations issued before `init` completes
//! wait for it. For tests, or for several stores in one process, construct
//! [`Store`] instances directly - the engine has no global state of its own.
//!
//! | Crate | Responsibility |
//! |-------|----------------|
//! | `reflow-core` | value model, merge primitive, key space, errors |
//! | `reflow-storage` | storage driver contract, memory/file drivers |
//! | `reflow-engine` | cache, merge queue, subscribers, write pipeline |

#![warn(missing_docs)]
#![warn(clippy::all)]

mod global;

pub use global::{
    clear, connect, default_store, disconnect, get, init, merge, merge_collection, multi_get,
    multi_set, session_id, set, set_collection, update,
};

pub use reflow_core::{
    apply_merge, check_compatibility, remove_null_values, CompatCheck, KeySpace, Result,
    StoreError, Value, ValueKind,
};
pub use reflow_engine::{
    ConnectOptions, ConnectionId, JournalEntry, Store, StoreOptions, SubscriberCallback,
    SubscriberEvent, UpdateMethod, UpdateOperation,
};
pub use reflow_storage::{FileDriver, MemoryBacking, MemoryDriver, StorageDriver};
