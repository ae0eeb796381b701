//! Server→client push channel. One broadcast hub fans out to every connected
//! WebSocket; each connection filters by its subscriptions and joined rooms.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Internal bus payload before per-connection filtering.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub event: String,
    /// Room scope; `None` for system-wide notifications.
    pub library_id: Option<Uuid>,
    pub data: serde_json::Value,
}

/// Wire envelope for every outbound message.
#[derive(Debug, Serialize)]
pub struct ServerMessage<'a> {
    #[serde(rename = "type")]
    pub event: &'a str,
    pub data: &'a serde_json::Value,
    pub timestamp: String,
    pub id: Uuid,
}

impl BusMessage {
    pub fn to_wire(&self) -> String {
        let envelope = ServerMessage {
            event: &self.event,
            data: &self.data,
            timestamp: Utc::now().to_rfc3339(),
            id: Uuid::new_v4(),
        };
        serde_json::to_string(&envelope).unwrap_or_default()
    }
}

/// Messages a client may send over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate {
        token: String,
    },
    Subscribe {
        #[serde(default)]
        events: Vec<String>,
        #[serde(default)]
        filters: SubscriptionFilters,
    },
    Unsubscribe {
        #[serde(default)]
        events: Vec<String>,
    },
    JoinLibrary {
        library_id: Uuid,
    },
    LeaveLibrary {
        library_id: Uuid,
    },
    Ping,
    /// Opaque to this core; routed to the AI collaborator when one is wired.
    AiChatMessage {
        #[serde(default)]
        #[allow(dead_code)]
        message: serde_json::Value,
    },
}

#[derive(Debug, Default, Deserialize)]
pub struct SubscriptionFilters {
    pub library_id: Option<Uuid>,
}

/// Per-connection delivery state.
#[derive(Debug, Default)]
pub struct Subscription {
    pub events: HashSet<String>,
    pub library_filter: Option<Uuid>,
    pub rooms: HashSet<Uuid>,
}

impl Subscription {
    pub fn subscribe(&mut self, events: Vec<String>, filters: SubscriptionFilters) {
        self.events.extend(events);
        if filters.library_id.is_some() {
            self.library_filter = filters.library_id;
        }
    }

    pub fn unsubscribe(&mut self, events: Vec<String>) {
        if events.is_empty() {
            self.events.clear();
            self.library_filter = None;
        } else {
            for event in events {
                self.events.remove(&event);
            }
        }
    }

    /// Event subscriptions deliver matching event names (honoring the library
    /// filter); joined rooms deliver everything for that library.
    pub fn matches(&self, message: &BusMessage) -> bool {
        if let Some(library_id) = message.library_id {
            if self.rooms.contains(&library_id) {
                return true;
            }
        }

        if !self.events.contains(&message.event) {
            return false;
        }
        match (self.library_filter, message.library_id) {
            (Some(filter), Some(library_id)) => filter == library_id,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// Broadcast hub shared by the progress tracker, the upsert path, and the
/// WebSocket handler.
#[derive(Clone)]
pub struct RealtimeBus {
    tx: broadcast::Sender<Arc<BusMessage>>,
}

impl RealtimeBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<BusMessage>> {
        self.tx.subscribe()
    }

    /// At-least-once while connected; a send with no subscribers is not an
    /// error.
    pub fn publish(&self, event: &str, library_id: Option<Uuid>, data: serde_json::Value) {
        let message = Arc::new(BusMessage {
            event: event.to_string(),
            library_id,
            data,
        });
        let receivers = self.tx.send(message).unwrap_or(0);
        tracing::trace!(event, receivers, "bus publish");
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for RealtimeBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(event: &str, library_id: Option<Uuid>) -> BusMessage {
        BusMessage {
            event: event.to_string(),
            library_id,
            data: serde_json::json!({}),
        }
    }

    #[test]
    fn room_membership_delivers_all_library_events() {
        let library = Uuid::new_v4();
        let mut sub = Subscription::default();
        sub.rooms.insert(library);

        assert!(sub.matches(&message("sync_progress", Some(library))));
        assert!(sub.matches(&message("game_added", Some(library))));
        assert!(!sub.matches(&message("sync_progress", Some(Uuid::new_v4()))));
    }

    #[test]
    fn event_subscription_honors_library_filter() {
        let library = Uuid::new_v4();
        let mut sub = Subscription::default();
        sub.subscribe(
            vec!["sync_progress".to_string()],
            SubscriptionFilters {
                library_id: Some(library),
            },
        );

        assert!(sub.matches(&message("sync_progress", Some(library))));
        assert!(!sub.matches(&message("sync_progress", Some(Uuid::new_v4()))));
        assert!(!sub.matches(&message("sync_completed", Some(library))));
        assert!(!sub.matches(&message("sync_progress", None)));
    }

    #[test]
    fn unfiltered_subscription_sees_every_library() {
        let mut sub = Subscription::default();
        sub.subscribe(vec!["system_notification".to_string()], Default::default());

        assert!(sub.matches(&message("system_notification", None)));
        assert!(sub.matches(&message("system_notification", Some(Uuid::new_v4()))));
    }

    #[test]
    fn unsubscribe_with_no_events_clears_everything() {
        let mut sub = Subscription::default();
        sub.subscribe(
            vec!["a".to_string(), "b".to_string()],
            SubscriptionFilters {
                library_id: Some(Uuid::new_v4()),
            },
        );
        sub.unsubscribe(vec!["a".to_string()]);
        assert!(sub.events.contains("b"));

        sub.unsubscribe(Vec::new());
        assert!(sub.events.is_empty());
        assert!(sub.library_filter.is_none());
    }

    #[tokio::test]
    async fn bus_fans_out_to_subscribers() {
        let bus = RealtimeBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish("sync_started", None, serde_json::json!({"x": 1}));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event, "sync_started");
        assert_eq!(received.data["x"], 1);
    }

    #[test]
    fn wire_envelope_shape() {
        let msg = message("pong", None);
        let wire: serde_json::Value = serde_json::from_str(&msg.to_wire()).unwrap();
        assert_eq!(wire["type"], "pong");
        assert!(wire.get("timestamp").is_some());
        assert!(wire.get("id").is_some());
    }

    #[test]
    fn client_message_parsing() {
        let raw = r#"{"type":"subscribe","data":{"events":["sync_progress"],"filters":{"library_id":"6b5cbe12-3bfd-4efd-9a6d-4d4f0f7f3e6a"}}}"#;
        match serde_json::from_str::<ClientMessage>(raw).unwrap() {
            ClientMessage::Subscribe { events, filters } => {
                assert_eq!(events, vec!["sync_progress"]);
                assert!(filters.library_id.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }

        let ping = r#"{"type":"ping"}"#;
        assert!(matches!(
            serde_json::from_str::<ClientMessage>(ping).unwrap(),
            ClientMessage::Ping
        ));
    }
}
