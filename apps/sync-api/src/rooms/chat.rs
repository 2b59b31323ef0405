//! Chat relay. Messages are minted server-side and fan out to the whole
//! room, sender included. Nothing is persisted.

use serde::Serialize;

use reelsync_common::{id, time};

use crate::error::CommandError;
use crate::gateway::events::EventName;
use crate::gateway::fanout::BroadcastPayload;
use crate::gateway::session::GatewaySession;
use crate::AppState;

/// A chat message as relayed to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    /// Server receive time, unix milliseconds.
    pub timestamp: i64,
}

/// Relay a chat message to every participant of the room.
pub fn send_message(
    state: &AppState,
    session: &GatewaySession,
    room_id: &str,
    text: &str,
) -> Result<(), CommandError> {
    state
        .rooms
        .with_room(room_id, |room| {
            if room.participant(&session.user_id).is_none() {
                return Err(CommandError::NotInRoom);
            }
            let message = ChatMessage {
                id: id::prefixed_ulid(id::prefix::MESSAGE),
                sender_id: session.user_id.clone(),
                sender_name: session.display_name.clone(),
                text: text.to_string(),
                timestamp: time::unix_ms(),
            };
            state.broadcast.dispatch(BroadcastPayload::to_room(
                room.id.clone(),
                EventName::CHAT_MESSAGE,
                serde_json::to_value(&message).unwrap_or_default(),
            ));
            Ok(())
        })
        .ok_or(CommandError::RoomNotFound)?
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::Config;
    use crate::gateway::fanout::Target;
    use crate::rooms::presence::create_room;

    fn test_state() -> AppState {
        AppState::new(Config {
            port: 0,
            heartbeat_interval_ms: 30_000,
        })
    }

    fn session(user_id: &str, display_name: &str) -> GatewaySession {
        GatewaySession::new(
            reelsync_common::id::prefixed_ulid(reelsync_common::id::prefix::CONNECTION),
            user_id.to_string(),
            display_name.to_string(),
        )
    }

    #[test]
    fn message_fans_out_to_the_whole_room() {
        let state = test_state();
        let host = session("u1", "Ana");
        let room_id = create_room(&state, &host, "url", "hash");

        let mut rx = state.broadcast.subscribe();
        send_message(&state, &host, &room_id, "hello all").unwrap();

        let payload = rx.try_recv().unwrap();
        assert_eq!(payload.event_name, EventName::CHAT_MESSAGE);
        // No exclusion: the sender hears its own message back.
        assert_eq!(
            payload.target,
            Target::Room {
                room_id: room_id.clone(),
                exclude: None,
            }
        );
        assert_eq!(payload.data["senderId"], json!("u1"));
        assert_eq!(payload.data["senderName"], json!("Ana"));
        assert_eq!(payload.data["text"], json!("hello all"));
        assert!(payload.data["id"].as_str().unwrap().starts_with("msg_"));
        assert!(payload.data["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn non_member_cannot_chat() {
        let state = test_state();
        let host = session("u1", "Ana");
        let room_id = create_room(&state, &host, "url", "hash");

        let outsider = session("u9", "Zoe");
        let mut rx = state.broadcast.subscribe();
        assert_eq!(
            send_message(&state, &outsider, &room_id, "let me in"),
            Err(CommandError::NotInRoom)
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn chat_against_unknown_room_is_rejected() {
        let state = test_state();
        let host = session("u1", "Ana");
        assert_eq!(
            send_message(&state, &host, "deadbeef", "anyone?"),
            Err(CommandError::RoomNotFound)
        );
    }
}
