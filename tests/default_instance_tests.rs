//! Default-instance facade tests
//!
//! The facade binds one store per process, so the whole lifecycle lives in a
//! single test: operations issued before `init` are deferred, init happens
//! once, and the free functions route to the bound store.

use reflow::{MemoryDriver, StoreOptions, UpdateOperation};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_default_instance_lifecycle() {
    // An operation issued before init parks on the init gate.
    let early_write = tokio::spawn(async { reflow::set("early", json!({"v": 1})).await });
    tokio::task::yield_now().await;
    assert!(!early_write.is_finished());

    reflow::init(
        Arc::new(MemoryDriver::new()),
        StoreOptions::new()
            .collection_keys(["report_"])
            .initial_key_state("preferred_locale", json!("en")),
    )
    .await
    .unwrap();

    // The deferred write completes once the store is bound.
    early_write.await.unwrap().unwrap();
    assert_eq!(reflow::get("early").await.unwrap(), Some(json!({"v": 1})));

    // Defaults were seeded.
    assert_eq!(
        reflow::get("preferred_locale").await.unwrap(),
        Some(json!("en"))
    );

    // The write API routes to the bound store.
    reflow::merge("report_1", json!({"title": "hi"})).await.unwrap();
    reflow::update(vec![UpdateOperation::merge("report_1", json!({"read": true}))])
        .await
        .unwrap();
    assert_eq!(
        reflow::get("report_1").await.unwrap(),
        Some(json!({"title": "hi", "read": true}))
    );

    let session_before = reflow::session_id().await;
    reflow::clear(vec!["early".to_string()]).await.unwrap();
    assert_eq!(reflow::get("early").await.unwrap(), Some(json!({"v": 1})));
    assert_eq!(reflow::get("report_1").await.unwrap(), None);
    assert_ne!(session_before, reflow::session_id().await);

    // A second init is rejected.
    let again = reflow::init(Arc::new(MemoryDriver::new()), StoreOptions::new()).await;
    assert!(again.is_err());
}
