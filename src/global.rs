//! Process-wide default instance
//!
//! The facade binds one `Store` for the whole process. `init` publishes it
//! through a watch channel; every operation first awaits that publication, so
//! calls issued before init are deferred rather than failed.

use reflow_core::{Result, StoreError, Value};
use reflow_engine::{ConnectOptions, ConnectionId, Store, StoreOptions, SubscriberCallback, UpdateOperation};
use reflow_storage::StorageDriver;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;

fn instance_gate() -> &'static watch::Sender<Option<Store>> {
    static GATE: OnceLock<watch::Sender<Option<Store>>> = OnceLock::new();
    GATE.get_or_init(|| watch::channel(None).0)
}

/// Initialize the process-wide store.
///
/// May be called once; operations issued before this completes are queued
/// behind the init task.
pub async fn init(driver: Arc<dyn StorageDriver>, options: StoreOptions) -> Result<()> {
    let store = Store::init(driver, options).await?;
    let gate = instance_gate();
    if gate.borrow().is_some() {
        return Err(StoreError::invalid_input("the default store is already initialized"));
    }
    let _ = gate.send(Some(store));
    Ok(())
}

/// The process-wide store, awaiting [`init`] if it has not completed yet
pub async fn default_store() -> Store {
    let mut ready = instance_gate().subscribe();
    let store = ready
        .wait_for(|published| published.is_some())
        .await
        .expect("the init gate is never closed");
    store.clone().expect("published store observed above")
}

/// Read one key from the default store
pub async fn get(key: &str) -> Result<Option<Value>> {
    default_store().await.get(key).await
}

/// Write one key on the default store
pub async fn set(key: &str, value: impl Into<Option<Value>>) -> Result<()> {
    default_store().await.set(key, value).await
}

/// Write several keys on the default store
pub async fn multi_set(data: Vec<(String, Value)>) -> Result<()> {
    default_store().await.multi_set(data).await
}

/// Merge a delta into one key on the default store
pub async fn merge(key: &str, delta: Value) -> Result<()> {
    default_store().await.merge(key, delta).await
}

/// Merge deltas into members of a collection on the default store
pub async fn merge_collection(collection_key: &str, members: Vec<(String, Value)>) -> Result<()> {
    default_store().await.merge_collection(collection_key, members).await
}

/// Replace a collection on the default store
pub async fn set_collection(collection_key: &str, members: Vec<(String, Value)>) -> Result<()> {
    default_store().await.set_collection(collection_key, members).await
}

/// Reset the default store, preserving the listed keys
pub async fn clear(keys_to_preserve: Vec<String>) -> Result<()> {
    default_store().await.clear(keys_to_preserve).await
}

/// Apply a batch of operations on the default store
pub async fn update(ops: Vec<UpdateOperation>) -> Result<()> {
    default_store().await.update(ops).await
}

/// Attach a subscriber to the default store
pub async fn connect(options: ConnectOptions, callback: SubscriberCallback) -> Result<ConnectionId> {
    default_store().await.connect(options, callback).await
}

/// Detach a subscriber from the default store
pub async fn disconnect(id: ConnectionId) {
    default_store().await.disconnect(id);
}

/// The default store's current session correlation id
pub async fn session_id() -> String {
    default_store().await.session_id()
}

/// Read several keys from the default store
pub async fn multi_get(keys: &[String]) -> Result<HashMap<String, Value>> {
    default_store().await.multi_get(keys).await
}
