//! Gateway opcodes, event types, and wire-format messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rooms::state::{ParticipantStatus, VideoStatePatch};

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_COMMAND: u8 = 3;
pub const OP_ACK: u8 = 4;
pub const OP_HEARTBEAT_ACK: u8 = 6;

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A message sent from the server to the client over WebSocket.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    pub d: Value,
}

impl GatewayMessage {
    /// Build a DISPATCH message (op=0).
    pub fn dispatch(event_name: &str, seq: u64, data: Value) -> Self {
        Self {
            op: OP_DISPATCH,
            t: Some(event_name.to_string()),
            s: Some(seq),
            d: data,
        }
    }

    /// Build an ACK message (op=4) echoing the command's nonce.
    pub fn ack(nonce: Option<u64>, data: Value) -> Self {
        Self {
            op: OP_ACK,
            t: None,
            s: nonce,
            d: data,
        }
    }

    /// Build a HEARTBEAT_ACK message (op=6).
    pub fn heartbeat_ack(seq: u64) -> Self {
        Self {
            op: OP_HEARTBEAT_ACK,
            t: None,
            s: None,
            d: serde_json::json!({ "ack": seq }),
        }
    }
}

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A message received from the client over WebSocket.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub op: u8,
    #[serde(default)]
    pub t: Option<String>,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub d: Value,
}

// ---------------------------------------------------------------------------
// IDENTIFY payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyPayload {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

// ---------------------------------------------------------------------------
// HEARTBEAT payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub seq: u64,
}

// ---------------------------------------------------------------------------
// COMMAND payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomPayload {
    pub video_url: String,
    pub video_hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomPayload {
    pub room_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoomPayload {
    pub room_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusPayload {
    pub room_id: String,
    pub status: ParticipantStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVideoStatePayload {
    pub room_id: String,
    #[serde(flatten)]
    pub patch: VideoStatePatch,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub room_id: String,
    pub text: String,
}

/// Shared payload for host moderation commands (kick, mute).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlTargetPayload {
    pub room_id: String,
    pub participant_id: String,
}

// ---------------------------------------------------------------------------
// Dispatch event types
// ---------------------------------------------------------------------------

/// Event names dispatched to clients.
pub struct EventName;

impl EventName {
    pub const READY: &'static str = "session:ready";
    pub const ROOM_JOINED: &'static str = "room:joined";
    pub const PARTICIPANT_JOINED: &'static str = "room:participant_joined";
    pub const PARTICIPANT_LEFT: &'static str = "room:participant_left";
    pub const HOST_CHANGED: &'static str = "room:host_changed";
    pub const PARTICIPANT_STATUS_CHANGED: &'static str = "room:participant_status_changed";
    pub const VIDEO_STATE_UPDATE: &'static str = "video:state_update";
    pub const CHAT_MESSAGE: &'static str = "chat:message";
    pub const KICKED: &'static str = "control:kicked";
    pub const MUTED: &'static str = "control:muted";
}

// ---------------------------------------------------------------------------
// Command types
// ---------------------------------------------------------------------------

/// Command names accepted in the `t` field of an op=3 message.
pub struct CommandName;

impl CommandName {
    pub const CREATE_ROOM: &'static str = "room:create";
    pub const JOIN_ROOM: &'static str = "room:join";
    pub const LEAVE_ROOM: &'static str = "room:leave";
    pub const UPDATE_STATUS: &'static str = "room:update_status";
    pub const UPDATE_VIDEO_STATE: &'static str = "video:update_state";
    pub const SEND_MESSAGE: &'static str = "chat:send_message";
    pub const KICK: &'static str = "control:kick";
    pub const MUTE: &'static str = "control:mute";
}
