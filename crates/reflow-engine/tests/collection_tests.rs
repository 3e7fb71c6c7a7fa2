//! Collection write tests
//!
//! `merge_collection` splits members into existing (one `multi_merge`, nested
//! nulls preserved) and new (one `multi_set`, nested nulls stripped);
//! `set_collection` replaces the whole collection, removing members missing
//! from the input.

use parking_lot::Mutex;
use reflow_core::Value;
use reflow_engine::{ConnectOptions, Store, StoreOptions, SubscriberCallback, SubscriberEvent};
use reflow_storage::testing::{DriverCall, RecordingDriver};
use reflow_storage::{MemoryDriver, StorageDriver};
use serde_json::json;
use std::sync::Arc;

async fn collection_store() -> (Store, Arc<RecordingDriver>) {
    let memory = Arc::new(MemoryDriver::new());
    let recorder = Arc::new(RecordingDriver::new(memory as Arc<dyn StorageDriver>));
    let options = StoreOptions::new()
        .collection_keys(["r_"])
        .skippable_collection_member_ids(["42"]);
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

// ============================================================================
// mergeCollection
// ============================================================================

/// Existing members go through `multi_merge` with nested nulls preserved; new
/// members go through `multi_set` with nested nulls stripped.
#[tokio::test]
async fn test_merge_collection_splits_existing_and_new_members() {
    let (store, driver) = collection_store().await;
    store.set("r_1", json!({"a": 1, "gone": 2})).await.unwrap();
    driver.clear_calls();

    store
        .merge_collection(
            "r_",
            vec![
                ("r_1".to_string(), json!({"b": 2, "gone": null})),
                ("r_2".to_string(), json!({"c": 3, "ignored": null})),
            ],
        )
        .await
        .unwrap();

    let calls = driver.calls();
    assert!(calls.iter().any(|c| matches!(
        c,
        DriverCall::MultiMerge { pairs }
            if pairs == &vec![("r_1".to_string(), json!({"b": 2, "gone": null}))]
    )));
    assert!(calls.iter().any(|c| matches!(
        c,
        DriverCall::MultiSet { pairs }
            if pairs == &vec![("r_2".to_string(), json!({"c": 3}))]
    )));

    assert_eq!(store.get("r_1").await.unwrap(), Some(json!({"a": 1, "b": 2})));
    assert_eq!(store.get("r_2").await.unwrap(), Some(json!({"c": 3})));
}

/// Members valued null are removed from storage and cache outright.
#[tokio::test]
async fn test_merge_collection_removes_null_members() {
    let (store, driver) = collection_store().await;
    store.set("r_1", json!({"a": 1})).await.unwrap();
    driver.clear_calls();

    store
        .merge_collection("r_", vec![("r_1".to_string(), Value::Null)])
        .await
        .unwrap();

    assert_eq!(store.get("r_1").await.unwrap(), None);
    assert!(driver
        .calls()
        .iter()
        .any(|c| matches!(c, DriverCall::RemoveItems { keys } if keys == &vec!["r_1".to_string()])));
}

/// A batch containing a key outside the collection is dropped wholesale.
#[tokio::test]
async fn test_merge_collection_rejects_foreign_keys() {
    let (store, driver) = collection_store().await;

    store
        .merge_collection(
            "r_",
            vec![
                ("r_1".to_string(), json!({"a": 1})),
                ("other_1".to_string(), json!({"b": 2})),
            ],
        )
        .await
        .unwrap();

    assert!(driver.writes().is_empty());
    assert_eq!(store.get("r_1").await.unwrap(), None);
}

/// An empty batch and an undeclared collection are both dropped.
#[tokio::test]
async fn test_merge_collection_rejects_empty_and_undeclared() {
    let (store, driver) = collection_store().await;

    store.merge_collection("r_", Vec::new()).await.unwrap();
    store
        .merge_collection("undeclared_", vec![("undeclared_1".to_string(), json!(1))])
        .await
        .unwrap();

    assert!(driver.writes().is_empty());
}

/// An incompatible member is dropped, the rest of the batch still applies.
#[tokio::test]
async fn test_merge_collection_drops_incompatible_members_individually() {
    let (store, driver) = collection_store().await;
    store.set("r_1", json!({"a": 1})).await.unwrap();
    store.set("r_2", json!({"b": 2})).await.unwrap();
    driver.clear_calls();

    store
        .merge_collection(
            "r_",
            vec![
                ("r_1".to_string(), json!([9])),
                ("r_2".to_string(), json!({"b": 3})),
            ],
        )
        .await
        .unwrap();

    assert_eq!(store.get("r_1").await.unwrap(), Some(json!({"a": 1})));
    assert_eq!(store.get("r_2").await.unwrap(), Some(json!({"b": 3})));
}

/// Skippable member ids are coerced to removal inside collection batches.
#[tokio::test]
async fn test_merge_collection_coerces_skippable_members() {
    let (store, _driver) = collection_store().await;
    store.set("r_1", json!({"a": 1})).await.unwrap();

    store
        .merge_collection(
            "r_",
            vec![
                ("r_1".to_string(), json!({"b": 2})),
                ("r_42".to_string(), json!({"evil": true})),
            ],
        )
        .await
        .unwrap();

    assert_eq!(store.get("r_1").await.unwrap(), Some(json!({"a": 1, "b": 2})));
    assert_eq!(store.get("r_42").await.unwrap(), None);
}

/// Collection subscribers receive one event per touched member, with the
/// previous value attached.
#[tokio::test]
async fn test_merge_collection_notifies_with_previous_values() {
    let (store, _driver) = collection_store().await;
    store.set("r_1", json!({"a": 1})).await.unwrap();

    let previous: Arc<Mutex<Vec<(String, Option<Value>)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&previous);
    store
        .connect(
            ConnectOptions::new("r_").without_stored_values(),
            Arc::new(move |event: SubscriberEvent<'_>| {
                sink.lock()
                    .push((event.key.to_string(), event.previous.cloned()));
            }),
        )
        .await
        .unwrap();

    store
        .merge_collection("r_", vec![("r_1".to_string(), json!({"a": 2}))])
        .await
        .unwrap();

    assert_eq!(
        previous.lock().clone(),
        vec![("r_1".to_string(), Some(json!({"a": 1})))]
    );
}

// ============================================================================
// setCollection
// ============================================================================

/// Replacing a collection removes every persisted member missing from the
/// input.
#[tokio::test]
async fn test_set_collection_replaces_the_whole_collection() {
    let (store, driver) = collection_store().await;
    store.set("r_1", json!({"a": 1})).await.unwrap();
    store.set("r_2", json!({"b": 2})).await.unwrap();
    driver.clear_calls();

    store
        .set_collection("r_", vec![("r_1".to_string(), json!({"a": 9}))])
        .await
        .unwrap();

    assert_eq!(store.get("r_1").await.unwrap(), Some(json!({"a": 9})));
    assert_eq!(store.get("r_2").await.unwrap(), None);
    assert!(driver
        .calls()
        .iter()
        .any(|c| matches!(c, DriverCall::RemoveItems { keys } if keys.contains(&"r_2".to_string()))));
}

/// The collection subscribers hear about both the writes and the implied
/// removals.
#[tokio::test]
async fn test_set_collection_notifies_members_and_removals() {
    let (store, _driver) = collection_store().await;
    store.set("r_1", json!({"a": 1})).await.unwrap();
    store.set("r_2", json!({"b": 2})).await.unwrap();

    let (callback, seen) = capture();
    store
        .connect(ConnectOptions::new("r_").without_stored_values(), callback)
        .await
        .unwrap();

    store
        .set_collection("r_", vec![("r_1".to_string(), json!({"a": 9}))])
        .await
        .unwrap();

    let events = seen.lock().clone();
    // Per-key staged updates arrive first, then the batched collection
    // notification repeats the members.
    assert!(events.contains(&("r_1".to_string(), Some(json!({"a": 9})))));
    assert!(events.contains(&("r_2".to_string(), None)));
}

/// A replace containing foreign keys is dropped wholesale.
#[tokio::test]
async fn test_set_collection_rejects_foreign_keys() {
    let (store, driver) = collection_store().await;
    store.set("r_1", json!({"a": 1})).await.unwrap();
    driver.clear_calls();

    store
        .set_collection("r_", vec![("other_1".to_string(), json!(1))])
        .await
        .unwrap();

    assert!(driver.writes().is_empty());
    assert_eq!(store.get("r_1").await.unwrap(), Some(json!({"a": 1})));
}
