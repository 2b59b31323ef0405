//! Host-fenced playback synchronization.

use crate::error::CommandError;
use crate::gateway::events::EventName;
use crate::gateway::fanout::BroadcastPayload;
use crate::gateway::session::GatewaySession;
use crate::rooms::state::VideoStatePatch;
use crate::AppState;

/// Apply a partial playback-state update and relay the patch to everyone
/// else in the room. Only the current host may drive playback.
///
/// The patch is relayed exactly as received, not as the merged state, so
/// clients apply the same delta the host sent.
pub fn update_state(
    state: &AppState,
    session: &GatewaySession,
    room_id: &str,
    patch: VideoStatePatch,
) -> Result<(), CommandError> {
    state
        .rooms
        .with_room(room_id, |room| {
            if room.host_id != session.user_id {
                return Err(CommandError::NotHost);
            }
            room.video_state.apply(&patch);
            state.broadcast.dispatch(BroadcastPayload::to_room_except(
                room.id.clone(),
                session.connection_id.clone(),
                EventName::VIDEO_STATE_UPDATE,
                serde_json::to_value(&patch).unwrap_or_default(),
            ));
            Ok(())
        })
        .ok_or(CommandError::RoomNotFound)?
}
