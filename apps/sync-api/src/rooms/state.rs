//! Room aggregate: participants, host authority, and the playback clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Presence status of a participant within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Connected,
    Buffering,
    Paused,
}

/// A room member as clients see it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// User id; participants are keyed by this.
    pub id: String,
    pub display_name: String,
    pub is_host: bool,
    pub status: ParticipantStatus,
    /// The connection currently backing this entry. Used for teardown
    /// fencing and targeted delivery, never serialized.
    #[serde(skip)]
    pub connection_id: String,
}

/// The authoritative playback clock for a room.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoState {
    pub is_playing: bool,
    pub progress: f64,
    pub duration: f64,
    pub playback_rate: f64,
}

impl Default for VideoState {
    fn default() -> Self {
        Self {
            is_playing: false,
            progress: 0.0,
            duration: 0.0,
            playback_rate: 1.0,
        }
    }
}

impl VideoState {
    /// Field-wise merge: fields present in the patch overwrite, everything
    /// else is untouched.
    pub fn apply(&mut self, patch: &VideoStatePatch) {
        if let Some(is_playing) = patch.is_playing {
            self.is_playing = is_playing;
        }
        if let Some(progress) = patch.progress {
            self.progress = progress;
        }
        if let Some(duration) = patch.duration {
            self.duration = duration;
        }
        if let Some(playback_rate) = patch.playback_rate {
            self.playback_rate = playback_rate;
        }
    }
}

/// A partial playback update. Absent fields stay absent when the patch is
/// re-serialized, so recipients receive exactly what the host sent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_playing: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_rate: Option<f64>,
}

/// What removing a participant did to the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Departure {
    /// Removed; the room keeps its host and at least one member.
    Left,
    /// The host left and hostship moved to the earliest remaining joiner.
    HostChanged { new_host_id: String },
    /// The last member left; the room is tombstoned.
    RoomClosed,
}

/// Full room view pushed to a connection as `room:joined`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: String,
    pub video_url: String,
    pub video_hash: String,
    /// In join order.
    pub participants: Vec<Participant>,
    pub is_host: bool,
    pub video_state: VideoState,
}

/// A live watch-party room.
///
/// Owned by the registry and only ever mutated under its per-room mutex.
/// The participant list is insertion-ordered; host migration promotes the
/// earliest remaining joiner, so the order is load-bearing.
pub struct Room {
    pub id: String,
    pub video_url: String,
    pub video_hash: String,
    pub host_id: String,
    participants: Vec<Participant>,
    pub video_state: VideoState,
    pub created_at: DateTime<Utc>,
    /// Destruction tombstone. Set under the room lock the instant the last
    /// participant leaves; the registry entry is physically removed after.
    pub closed: bool,
}

impl Room {
    /// Create a room with `host` as its only participant.
    pub fn new(id: String, video_url: String, video_hash: String, mut host: Participant) -> Self {
        host.is_host = true;
        let host_id = host.id.clone();
        Self {
            id,
            video_url,
            video_hash,
            host_id,
            participants: vec![host],
            video_state: VideoState::default(),
            created_at: Utc::now(),
            closed: false,
        }
    }

    /// Members in join order.
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Look up a member by user id.
    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == user_id)
    }

    /// Insert the participant, or overwrite an existing entry with the same
    /// id in place. Overwriting keeps the original list position, so a
    /// rejoining user keeps their spot in the host-migration order.
    pub fn upsert_participant(&mut self, participant: Participant) {
        match self.participants.iter_mut().find(|p| p.id == participant.id) {
            Some(slot) => *slot = participant,
            None => self.participants.push(participant),
        }
    }

    /// Update a member's status. Returns false for non-members.
    pub fn set_status(&mut self, user_id: &str, status: ParticipantStatus) -> bool {
        match self.participants.iter_mut().find(|p| p.id == user_id) {
            Some(p) => {
                p.status = status;
                true
            }
            None => false,
        }
    }

    /// Remove `user_id` from the room, migrating hostship or tombstoning
    /// the room as needed. Returns `None` if the user was not a member.
    pub fn remove_participant(&mut self, user_id: &str) -> Option<Departure> {
        let idx = self.participants.iter().position(|p| p.id == user_id)?;
        self.participants.remove(idx);

        if self.participants.is_empty() {
            self.closed = true;
            return Some(Departure::RoomClosed);
        }

        if self.host_id == user_id {
            // Earliest remaining joiner inherits the room.
            let new_host = &mut self.participants[0];
            new_host.is_host = true;
            self.host_id = new_host.id.clone();
            return Some(Departure::HostChanged {
                new_host_id: self.host_id.clone(),
            });
        }

        Some(Departure::Left)
    }

    /// The `room:joined` view for `user_id`.
    pub fn snapshot_for(&self, user_id: &str) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.id.clone(),
            video_url: self.video_url.clone(),
            video_hash: self.video_hash.clone(),
            participants: self.participants.clone(),
            is_host: user_id == self.host_id,
            video_state: self.video_state.clone(),
        }
    }
}
