//! Room lifecycle commands: create, join, leave, and status updates.

use serde_json::Value;
use tracing::info;

use crate::error::CommandError;
use crate::gateway::events::EventName;
use crate::gateway::fanout::BroadcastPayload;
use crate::gateway::session::GatewaySession;
use crate::rooms::state::{Departure, Participant, ParticipantStatus, Room};
use crate::AppState;

/// Create a room with the caller as host. Returns the new room code.
///
/// The creator's `room:joined` snapshot is dispatched while the registry
/// entry is still invisible to other connections, so no other room event
/// can precede it.
pub fn create_room(
    state: &AppState,
    session: &GatewaySession,
    video_url: &str,
    video_hash: &str,
) -> String {
    let host = Participant {
        id: session.user_id.clone(),
        display_name: session.display_name.clone(),
        is_host: true,
        status: ParticipantStatus::Connected,
        connection_id: session.connection_id.clone(),
    };

    let room_id = state.rooms.create(video_url, video_hash, host, |room| {
        dispatch_snapshot(state, room, session);
    });

    info!(room_id = %room_id, user_id = %session.user_id, "room created");
    room_id
}

/// Join an existing room, or refresh the caller's entry if the same user is
/// already a participant (reconnects land here).
pub fn join_room(
    state: &AppState,
    session: &GatewaySession,
    room_id: &str,
) -> Result<(), CommandError> {
    state
        .rooms
        .with_room(room_id, |room| {
            let participant = Participant {
                id: session.user_id.clone(),
                display_name: session.display_name.clone(),
                is_host: session.user_id == room.host_id,
                status: ParticipantStatus::Connected,
                connection_id: session.connection_id.clone(),
            };
            let announcement = serde_json::to_value(&participant).unwrap_or_default();
            room.upsert_participant(participant);

            dispatch_snapshot(state, room, session);
            state.broadcast.dispatch(BroadcastPayload::to_room_except(
                room.id.clone(),
                session.connection_id.clone(),
                EventName::PARTICIPANT_JOINED,
                announcement,
            ));
        })
        .ok_or(CommandError::RoomNotFound)?;

    info!(room_id = %room_id, user_id = %session.user_id, "participant joined");
    Ok(())
}

/// Leave a room. Only the connection currently backing the participant may
/// remove it; a stale connection left over from a reconnect is a no-op.
pub fn leave_room(
    state: &AppState,
    session: &GatewaySession,
    room_id: &str,
) -> Result<(), CommandError> {
    let departure = state
        .rooms
        .with_room(room_id, |room| {
            let backing = room
                .participant(&session.user_id)
                .map(|p| p.connection_id.clone());
            if backing.as_deref() != Some(session.connection_id.as_str()) {
                return Err(CommandError::NotInRoom);
            }
            remove_and_broadcast(state, room, &session.user_id, Some(&session.connection_id))
                .ok_or(CommandError::NotInRoom)
        })
        .ok_or(CommandError::RoomNotFound)??;

    finish_departure(state, room_id, &departure);
    info!(room_id = %room_id, user_id = %session.user_id, "participant left");
    Ok(())
}

/// Update the caller's playback status and tell the rest of the room.
pub fn update_status(
    state: &AppState,
    session: &GatewaySession,
    room_id: &str,
    status: ParticipantStatus,
) -> Result<(), CommandError> {
    state
        .rooms
        .with_room(room_id, |room| {
            if !room.set_status(&session.user_id, status) {
                return Err(CommandError::NotInRoom);
            }
            state.broadcast.dispatch(BroadcastPayload::to_room_except(
                room.id.clone(),
                session.connection_id.clone(),
                EventName::PARTICIPANT_STATUS_CHANGED,
                serde_json::json!({
                    "participantId": session.user_id,
                    "status": status,
                }),
            ));
            Ok(())
        })
        .ok_or(CommandError::RoomNotFound)?
}

/// Send the full room snapshot to one connection as `room:joined`.
fn dispatch_snapshot(state: &AppState, room: &Room, session: &GatewaySession) {
    let snapshot = room.snapshot_for(&session.user_id);
    state.broadcast.dispatch(BroadcastPayload::to_connection(
        session.connection_id.clone(),
        EventName::ROOM_JOINED,
        serde_json::to_value(&snapshot).unwrap_or_default(),
    ));
}

/// Remove a participant and dispatch the departure events in order:
/// `room:participant_left` first, then `room:host_changed` if the host
/// mantle moved. Returns `None` if the user was not a participant.
///
/// Must be called inside the room's critical section.
pub(crate) fn remove_and_broadcast(
    state: &AppState,
    room: &mut Room,
    user_id: &str,
    exclude: Option<&str>,
) -> Option<Departure> {
    let departure = room.remove_participant(user_id)?;

    let left = Value::String(user_id.to_string());
    let payload = match exclude {
        Some(connection_id) => BroadcastPayload::to_room_except(
            room.id.clone(),
            connection_id.to_string(),
            EventName::PARTICIPANT_LEFT,
            left,
        ),
        None => BroadcastPayload::to_room(room.id.clone(), EventName::PARTICIPANT_LEFT, left),
    };
    state.broadcast.dispatch(payload);

    if let Departure::HostChanged { new_host_id } = &departure {
        state.broadcast.dispatch(BroadcastPayload::to_room(
            room.id.clone(),
            EventName::HOST_CHANGED,
            serde_json::json!({ "newHostId": new_host_id }),
        ));
        info!(room_id = %room.id, new_host_id = %new_host_id, "host migrated");
    }

    Some(departure)
}

/// Drop the registry entry once a departure has closed the room. Must be
/// called after the room's critical section has been released.
pub(crate) fn finish_departure(state: &AppState, room_id: &str, departure: &Departure) {
    if matches!(departure, Departure::RoomClosed) {
        state.rooms.remove_if_closed(room_id);
        info!(room_id = %room_id, "room closed");
    }
}
