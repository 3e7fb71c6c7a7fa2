//! Subscriber registry
//!
//! Callbacks attach to a single key or to a collection prefix; the write
//! pipeline reports every committed change here before (and independently of)
//! the durable write. Delivery is synchronous and in program order, which is
//! the ordering guarantee the pipeline makes per key.
//!
//! The registry also owns the session id that correlates subscriber-visible
//! state; `clear` refreshes it so stale correlation tokens cannot outlive a
//! reset.

use parking_lot::RwLock;
use reflow_core::{KeySpace, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// A change delivered to a subscriber
pub struct SubscriberEvent<'a> {
    /// The key that changed (always the member key for collection updates)
    pub key: &'a str,
    /// New value; `None` means the key was removed
    pub value: Option<&'a Value>,
    /// Previous value, when the notifier captured one
    pub previous: Option<&'a Value>,
}

/// Subscriber callback type
pub type SubscriberCallback = Arc<dyn Fn(SubscriberEvent<'_>) + Send + Sync>;

/// Handle returned by `connect`, used to disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

struct Connection {
    key: String,
    callback: SubscriberCallback,
}

/// Registry of key and collection subscribers
pub struct SubscriberRegistry {
    connections: RwLock<HashMap<u64, Connection>>,
    next_id: AtomicU64,
    session_id: RwLock<String>,
    key_space: KeySpace,
}

impl SubscriberRegistry {
    /// Create an empty registry over the declared key space
    pub fn new(key_space: KeySpace) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            session_id: RwLock::new(Uuid::new_v4().to_string()),
            key_space,
        }
    }

    /// Attach a callback to a key or collection prefix
    pub fn connect(&self, key: &str, callback: SubscriberCallback) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.write().insert(
            id,
            Connection {
                key: key.to_string(),
                callback,
            },
        );
        ConnectionId(id)
    }

    /// Detach a previously connected callback
    pub fn disconnect(&self, id: ConnectionId) {
        self.connections.write().remove(&id.0);
    }

    /// Notify subscribers of an optimistic write.
    ///
    /// Skipped entirely when the value did not change structurally; callers
    /// still invoke this unconditionally so the decision lives in one place.
    pub fn broadcast_update(&self, key: &str, value: Option<&Value>, has_changed: bool) {
        if !has_changed {
            return;
        }
        self.deliver(key, value, None);
    }

    /// Notify subscribers of a staged update with its previous value
    pub fn schedule_subscriber_update(
        &self,
        key: &str,
        value: Option<&Value>,
        previous: Option<&Value>,
    ) {
        self.deliver(key, value, previous);
    }

    /// Notify collection subscribers of a batch of member changes
    pub fn schedule_notify_collection_subscribers(
        &self,
        _collection_key: &str,
        members: &[(String, Option<Value>)],
        previous: Option<&HashMap<String, Value>>,
    ) {
        for (key, value) in members {
            let prev = previous.and_then(|p| p.get(key));
            self.deliver(key, value.as_ref(), prev);
        }
    }

    /// The current session correlation id
    pub fn session_id(&self) -> String {
        self.session_id.read().clone()
    }

    /// Invalidate correlation tokens after a `clear`
    pub fn refresh_session_id(&self) {
        *self.session_id.write() = Uuid::new_v4().to_string();
    }

    fn deliver(&self, key: &str, value: Option<&Value>, previous: Option<&Value>) {
        // Collect under the lock, invoke outside it: a callback may connect
        // or disconnect.
        let callbacks: Vec<SubscriberCallback> = self
            .connections
            .read()
            .values()
            .filter(|conn| self.matches(&conn.key, key))
            .map(|conn| Arc::clone(&conn.callback))
            .collect();
        for callback in callbacks {
            callback(SubscriberEvent {
                key,
                value,
                previous,
            });
        }
    }

    fn matches(&self, subscribed: &str, changed: &str) -> bool {
        subscribed == changed
            || (self.key_space.is_collection_key(subscribed)
                && self.key_space.is_member_of(subscribed, changed))
    }
}
