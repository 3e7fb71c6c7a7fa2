//! Write pipeline and merge engine for Reflow
//!
//! This crate orchestrates the layers below it:
//! - [`Store`]: the construction seam binding driver, cache, merge queue and
//!   subscriber registry, with the full write API (`set`, `multi_set`,
//!   `merge`, `merge_collection`, `set_collection`, `clear`, `update`)
//! - [`StoreCache`]: in-memory snapshot, recency tracking, pending tasks
//! - [`MergeQueue`]: per-key delta batching with single-flight folding
//! - [`SubscriberRegistry`]: key and collection subscriber delivery
//! - [`StoreOptions`]: init-time configuration

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod devtools;
pub mod merge_queue;
mod metrics;
pub mod options;
pub mod store;
pub mod subscribers;
pub mod update;

pub use cache::StoreCache;
pub use devtools::{JournalEntry, OpJournal};
pub use merge_queue::MergeQueue;
pub use options::StoreOptions;
pub use store::{ConnectOptions, ConnectionId, Store, TASK_CLEAR};
pub use subscribers::{SubscriberCallback, SubscriberEvent, SubscriberRegistry};
pub use update::{UpdateMethod, UpdateOperation};
