//! Host moderation commands: kick and mute.

use tracing::info;

use crate::error::CommandError;
use crate::gateway::events::EventName;
use crate::gateway::fanout::BroadcastPayload;
use crate::gateway::session::GatewaySession;
use crate::rooms::presence::{finish_departure, remove_and_broadcast};
use crate::AppState;

/// Remove a participant from the room on the host's behalf.
///
/// The target's connection is told `control:kicked` before the removal
/// events go out, so on its wire the kick always precedes its own
/// `room:participant_left`. The removal itself is the shared departure
/// path, so host migration and room closure behave exactly as they do for
/// a voluntary leave.
pub fn kick(
    state: &AppState,
    session: &GatewaySession,
    room_id: &str,
    participant_id: &str,
) -> Result<(), CommandError> {
    let departure = state
        .rooms
        .with_room(room_id, |room| {
            if room.host_id != session.user_id {
                return Err(CommandError::NotHost);
            }
            let backing = room
                .participant(participant_id)
                .map(|p| p.connection_id.clone())
                .ok_or(CommandError::NotInRoom)?;

            state.broadcast.dispatch(BroadcastPayload::to_connection(
                backing,
                EventName::KICKED,
                serde_json::json!({}),
            ));

            remove_and_broadcast(state, room, participant_id, None)
                .ok_or(CommandError::NotInRoom)
        })
        .ok_or(CommandError::RoomNotFound)??;

    finish_departure(state, room_id, &departure);
    info!(room_id = %room_id, participant_id = %participant_id, "participant kicked");
    Ok(())
}

/// Tell a participant's connection to mute itself. Membership is
/// untouched; this is a signal, not a removal.
pub fn mute(
    state: &AppState,
    session: &GatewaySession,
    room_id: &str,
    participant_id: &str,
) -> Result<(), CommandError> {
    state
        .rooms
        .with_room(room_id, |room| {
            if room.host_id != session.user_id {
                return Err(CommandError::NotHost);
            }
            let backing = room
                .participant(participant_id)
                .map(|p| p.connection_id.clone())
                .ok_or(CommandError::NotInRoom)?;

            state.broadcast.dispatch(BroadcastPayload::to_connection(
                backing,
                EventName::MUTED,
                serde_json::json!({}),
            ));
            Ok(())
        })
        .ok_or(CommandError::RoomNotFound)?
}
