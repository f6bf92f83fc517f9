use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

/// Server-to-client frame. `type` drives the client's dispatch table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl RealtimeEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        let payload = match payload {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoutedEvent {
    pub user_id: String,
    pub event: RealtimeEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeStats {
    pub connections: usize,
    pub online_users: usize,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<u64, String>,
    user_index: HashMap<String, HashSet<u64>>,
}

/// Fan-out hub for per-user realtime events. Every live connection holds a
/// receiver on one broadcast channel and keeps only events addressed to its user.
pub struct RealtimeHub {
    sender: broadcast::Sender<RoutedEvent>,
    counter: AtomicU64,
    registry: RwLock<Registry>,
}

pub struct ConnectionGuard {
    hub: Arc<RealtimeHub>,
    connection_id: u64,
}

impl ConnectionGuard {
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.hub.unregister(self.connection_id);
    }
}

impl RealtimeHub {
    pub fn new() -> Arc<Self> {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Arc::new(Self {
            sender,
            counter: AtomicU64::new(1),
            registry: RwLock::new(Registry::default()),
        })
    }

    pub fn connect(
        self: &Arc<Self>,
        user_id: &str,
    ) -> (broadcast::Receiver<RoutedEvent>, ConnectionGuard) {
        let connection_id = self.counter.fetch_add(1, Ordering::Relaxed);
        // subscribe before registering so nothing sent to an "online" user is missed
        let receiver = self.sender.subscribe();
        {
            let mut registry = self.registry.write();
            registry
                .connections
                .insert(connection_id, user_id.to_string());
            registry
                .user_index
                .entry(user_id.to_string())
                .or_default()
                .insert(connection_id);
        }

        tracing::debug!(user_id, connection_id, "realtime connection registered");

        (
            receiver,
            ConnectionGuard {
                hub: Arc::clone(self),
                connection_id,
            },
        )
    }

    fn unregister(&self, connection_id: u64) {
        let mut registry = self.registry.write();
        let Some(user_id) = registry.connections.remove(&connection_id) else {
            return;
        };
        if let Some(set) = registry.user_index.get_mut(&user_id) {
            set.remove(&connection_id);
            if set.is_empty() {
                registry.user_index.remove(&user_id);
            }
        }
        tracing::debug!(user_id = %user_id, connection_id, "realtime connection closed");
    }

    /// Returns whether the user had at least one live connection.
    pub fn send_to_user(&self, user_id: &str, event: RealtimeEvent) -> bool {
        if !self.is_online(user_id) {
            return false;
        }
        self.sender
            .send(RoutedEvent {
                user_id: user_id.to_string(),
                event,
            })
            .is_ok()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.registry.read().user_index.contains_key(user_id)
    }

    pub fn stats(&self) -> RealtimeStats {
        let registry = self.registry.read();
        RealtimeStats {
            connections: registry.connections.len(),
            online_users: registry.user_index.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn events_reach_only_connected_users() {
        let hub = RealtimeHub::new();
        let (mut rx, _guard) = hub.connect("alice");

        assert!(hub.send_to_user("alice", RealtimeEvent::new("ping", json!({}))));
        assert!(!hub.send_to_user("bob", RealtimeEvent::new("ping", json!({}))));

        let routed = rx.recv().await.unwrap();
        assert_eq!(routed.user_id, "alice");
        assert_eq!(routed.event.event_type, "ping");
    }

    #[test]
    fn dropping_guard_unregisters_connection() {
        let hub = RealtimeHub::new();
        let (_rx1, guard1) = hub.connect("alice");
        let (_rx2, guard2) = hub.connect("alice");
        assert_eq!(
            hub.stats(),
            RealtimeStats {
                connections: 2,
                online_users: 1
            }
        );

        drop(guard1);
        assert!(hub.is_online("alice"));
        drop(guard2);
        assert!(!hub.is_online("alice"));
        assert_eq!(hub.stats().connections, 0);
    }

    #[test]
    fn event_payload_is_flattened_next_to_type() {
        let event = RealtimeEvent::new("message.new", json!({ "conversationId": "c1" }));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({ "type": "message.new", "conversationId": "c1" }));

        let wrapped = RealtimeEvent::new("count", json!(3));
        assert_eq!(serde_json::to_value(&wrapped).unwrap(), json!({ "type": "count", "data": 3 }));
    }
}
