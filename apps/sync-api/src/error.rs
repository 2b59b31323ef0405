//! Errors surfaced by room commands.
//!
//! Only the ack-bearing commands (`room:create`, `room:join`) report
//! failures to the client; everything else logs and drops, matching the
//! fire-and-forget semantics of the room event stream.

/// Why a room command was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// The referenced room does not exist or has already closed.
    RoomNotFound,
    /// The issuer (or the named target) is not a participant of the room.
    NotInRoom,
    /// A host-only command was issued by a non-host participant.
    NotHost,
    /// The command payload was missing fields or malformed.
    InvalidPayload,
}

impl CommandError {
    /// Human-readable message placed in ack payloads and logs.
    pub fn message(&self) -> &'static str {
        match self {
            CommandError::RoomNotFound => "Room not found",
            CommandError::NotInRoom => "Not in room",
            CommandError::NotHost => "Not the host",
            CommandError::InvalidPayload => "Invalid payload",
        }
    }
}
