//! Broadcast hub for dispatching room events to connected clients.
//!
//! Uses a single `tokio::sync::broadcast` channel. Each connection
//! subscribes once and filters events locally against its own connection id
//! and joined-room set. Handlers dispatch from inside a room's critical
//! section; `send` never blocks, so broadcast order always matches mutation
//! order.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

/// Capacity of the broadcast channel. Slow receivers that fall behind will
/// skip messages (RecvError::Lagged).
const BROADCAST_CAPACITY: usize = 4096;

/// Where a dispatched event should be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every connection subscribed to the room, minus an optionally
    /// excluded connection (the one whose command caused the event).
    Room {
        room_id: String,
        exclude: Option<String>,
    },
    /// Exactly one connection.
    Connection(String),
}

impl Target {
    /// Whether a connection with this id and joined-room set should forward
    /// the payload.
    pub fn matches(&self, connection_id: &str, joined: &HashSet<String>) -> bool {
        match self {
            Target::Room { room_id, exclude } => {
                joined.contains(room_id) && exclude.as_deref() != Some(connection_id)
            }
            Target::Connection(id) => id == connection_id,
        }
    }
}

/// A payload broadcast to all connected clients.
#[derive(Debug, Clone)]
pub struct BroadcastPayload {
    pub target: Target,
    /// The dispatch event name (e.g. "chat:message").
    pub event_name: &'static str,
    /// Serialized event data.
    pub data: Value,
}

impl BroadcastPayload {
    /// Event for the whole room.
    pub fn to_room(room_id: String, event_name: &'static str, data: Value) -> Self {
        Self {
            target: Target::Room {
                room_id,
                exclude: None,
            },
            event_name,
            data,
        }
    }

    /// Event for the room minus the connection that caused it.
    pub fn to_room_except(
        room_id: String,
        exclude: String,
        event_name: &'static str,
        data: Value,
    ) -> Self {
        Self {
            target: Target::Room {
                room_id,
                exclude: Some(exclude),
            },
            event_name,
            data,
        }
    }

    /// Event for a single connection.
    pub fn to_connection(connection_id: String, event_name: &'static str, data: Value) -> Self {
        Self {
            target: Target::Connection(connection_id),
            event_name,
            data,
        }
    }
}

/// The global broadcast hub. Cloneable, stored in AppState.
#[derive(Clone)]
pub struct RoomBroadcast {
    sender: broadcast::Sender<Arc<BroadcastPayload>>,
}

impl RoomBroadcast {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    /// Subscribe to the broadcast channel. Each gateway connection calls
    /// this once, before its `session:ready` goes out.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<BroadcastPayload>> {
        self.sender.subscribe()
    }

    /// Dispatch an event to all connected clients.
    pub fn dispatch(&self, payload: BroadcastPayload) {
        // send() returns Err when there are no receivers, which is fine.
        let _ = self.sender.send(Arc::new(payload));
    }
}

impl Default for RoomBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(rooms: &[&str]) -> HashSet<String> {
        rooms.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn room_target_requires_membership() {
        let target = Target::Room {
            room_id: "r1".to_string(),
            exclude: None,
        };
        assert!(target.matches("conn_a", &joined(&["r1", "r2"])));
        assert!(!target.matches("conn_a", &joined(&["r2"])));
        assert!(!target.matches("conn_a", &joined(&[])));
    }

    #[test]
    fn room_target_skips_the_excluded_connection() {
        let target = Target::Room {
            room_id: "r1".to_string(),
            exclude: Some("conn_a".to_string()),
        };
        assert!(!target.matches("conn_a", &joined(&["r1"])));
        assert!(target.matches("conn_b", &joined(&["r1"])));
    }

    #[test]
    fn connection_target_matches_exactly_one_connection() {
        let target = Target::Connection("conn_a".to_string());
        // Membership is irrelevant for direct delivery.
        assert!(target.matches("conn_a", &joined(&[])));
        assert!(!target.matches("conn_b", &joined(&["r1"])));
    }

    #[test]
    fn dispatch_reaches_subscribers() {
        let hub = RoomBroadcast::new();
        let mut rx = hub.subscribe();

        hub.dispatch(BroadcastPayload::to_room(
            "r1".to_string(),
            "chat:message",
            serde_json::json!({ "text": "hi" }),
        ));

        let payload = rx.try_recv().unwrap();
        assert_eq!(payload.event_name, "chat:message");
        assert_eq!(
            payload.target,
            Target::Room {
                room_id: "r1".to_string(),
                exclude: None
            }
        );
    }

    #[test]
    fn dispatch_without_receivers_is_not_an_error() {
        let hub = RoomBroadcast::new();
        hub.dispatch(BroadcastPayload::to_connection(
            "conn_a".to_string(),
            "control:muted",
            serde_json::json!({}),
        ));
    }
}
