//! `clear` tests
//!
//! Preserved keys are untouched, default-state keys come back to their
//! defaults, everything else is removed; subscribers hear about exactly the
//! keys whose visible value changed, and the session id rotates.

use parking_lot::Mutex;
use reflow_core::Value;
use reflow_engine::{ConnectOptions, Store, StoreOptions, SubscriberCallback, SubscriberEvent};
use reflow_storage::testing::{DriverCall, RecordingDriver};
use reflow_storage::{MemoryDriver, StorageDriver};
use serde_json::json;
use std::sync::Arc;

async fn store_with(options: StoreOptions) -> (Store, Arc<RecordingDriver>) {
    let memory = Arc::new(MemoryDriver::new());
    let recorder = Arc::new(RecordingDriver::new(memory as Arc<dyn StorageDriver>));
    let store = Store::init(recorder.clone(), options).await.unwrap();
    recorder.clear_calls();
    (store, recorder)
}

fn capture() -> (SubscriberCallback, Arc<Mutex<Vec<(String, Option<Value>)>>>) {
    let seen: Arc<Mutex<Vec<(String, Option<Value>)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: SubscriberCallback = Arc::new(move |event: SubscriberEvent<'_>| {
        sink.lock().push((event.key.to_string(), event.value.cloned()));
    });
    (callback, seen)
}

/// Preserve keeps a key as-is, defaults are restored, the rest is removed.
#[tokio::test]
async fn test_clear_with_preserve_and_default() {
    let options = StoreOptions::new().initial_key_state("lang", json!("en"));
    let (store, driver) = store_with(options).await;
    store.set("lang", json!("fr")).await.unwrap();
    store.set("session", json!("t")).await.unwrap();
    store.set("pref", json!("dark")).await.unwrap();
    driver.clear_calls();

    store.clear(vec!["pref".to_string()]).await.unwrap();

    assert_eq!(store.get("lang").await.unwrap(), Some(json!("en")));
    assert_eq!(store.get("pref").await.unwrap(), Some(json!("dark")));
    assert_eq!(store.get("session").await.unwrap(), None);

    let calls = driver.calls();
    assert!(calls.iter().any(
        |c| matches!(c, DriverCall::RemoveItems { keys } if keys == &vec!["session".to_string()])
    ));
    assert!(calls.iter().any(|c| matches!(
        c,
        DriverCall::MultiSet { pairs } if pairs == &vec![("lang".to_string(), json!("en"))]
    )));
}

/// Subscribers hear the reset default and the removal, but nothing about a
/// key that already sat at its default.
#[tokio::test]
async fn test_clear_notifies_only_changed_keys() {
    let options = StoreOptions::new()
        .initial_key_state("lang", json!("en"))
        .initial_key_state("theme", json!("light"));
    let (store, _driver) = store_with(options).await;
    store.set("lang", json!("fr")).await.unwrap();
    store.set("session", json!("t")).await.unwrap();
    // "theme" stays at its default.

    let (callback, seen) = capture();
    for key in ["lang", "theme", "session"] {
        store
            .connect(ConnectOptions::new(key).without_stored_values(), callback.clone())
            .await
            .unwrap();
    }

    store.clear(Vec::new()).await.unwrap();

    let events = seen.lock().clone();
    assert!(events.contains(&("lang".to_string(), Some(json!("en")))));
    assert!(events.contains(&("session".to_string(), None)));
    assert!(!events.iter().any(|(key, _)| key == "theme"));
}

/// Collection members removed by clear are announced through the batched
/// collection notification.
#[tokio::test]
async fn test_clear_batches_collection_notifications() {
    let options = StoreOptions::new().collection_keys(["r_"]);
    let (store, _driver) = store_with(options).await;
    store.set("r_1", json!({"a": 1})).await.unwrap();
    store.set("r_2", json!({"b": 2})).await.unwrap();

    let (callback, seen) = capture();
    store
        .connect(ConnectOptions::new("r_").without_stored_values(), callback)
        .await
        .unwrap();

    store.clear(Vec::new()).await.unwrap();

    let events = seen.lock().clone();
    assert!(events.contains(&("r_1".to_string(), None)));
    assert!(events.contains(&("r_2".to_string(), None)));
}

/// The session correlation id rotates on clear.
#[tokio::test]
async fn test_clear_refreshes_session_id() {
    let (store, _driver) = store_with(StoreOptions::new()).await;
    let before = store.session_id();

    store.clear(Vec::new()).await.unwrap();

    assert_ne!(before, store.session_id());
}

/// A merge in flight when clear runs cannot resurrect its key afterwards.
#[tokio::test]
async fn test_clear_aborts_in_flight_merges() {
    let options = StoreOptions::new().initial_key_state("lang", json!("en"));
    let (store, _driver) = store_with(options).await;
    store.set("lang", json!("fr")).await.unwrap();

    let (merge_result, clear_result) = tokio::join!(
        store.merge("lang", json!({"x": 1})),
        store.clear(Vec::new()),
    );
    merge_result.unwrap();
    clear_result.unwrap();

    assert_eq!(store.get("lang").await.unwrap(), Some(json!("en")));
}

/// Clearing twice removes each key once; the second pass finds nothing left
/// to do.
#[tokio::test]
async fn test_repeated_clear_is_idempotent() {
    let (store, driver) = store_with(StoreOptions::new()).await;
    store.set("a", json!(1)).await.unwrap();
    driver.clear_calls();

    let (r1, r2) = tokio::join!(store.clear(Vec::new()), store.clear(Vec::new()));
    r1.unwrap();
    r2.unwrap();

    let removals = driver
        .calls()
        .iter()
        .filter(|c| matches!(c, DriverCall::RemoveItems { .. }))
        .count();
    assert_eq!(removals, 1);
    assert_eq!(store.get("a").await.unwrap(), None);
}
