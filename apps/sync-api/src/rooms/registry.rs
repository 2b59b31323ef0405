//! Room registry: the single source of truth for live rooms.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;

use super::state::{Participant, Room};

/// Length of a generated room code.
const ROOM_CODE_LEN: usize = 8;

/// Shared registry of all live rooms, keyed by room code.
///
/// Uses `DashMap` for shard-level concurrency and `parking_lot::Mutex` per
/// entry for non-poisoning, fast locking. Every mutation of a room's
/// contents happens inside `with_room`; nothing outside this module holds a
/// `Room` reference across handler invocations.
pub struct RoomRegistry {
    rooms: Arc<DashMap<String, Mutex<Room>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
        }
    }

    /// Create a room with `host` as its only participant and return its id.
    ///
    /// The code is re-rolled until an unoccupied one is found; an existing
    /// room is never overwritten. `on_create` runs exactly once, on the new
    /// room before any other connection can observe it, so the creator's
    /// snapshot is dispatched atomically with the room becoming visible. It
    /// must not call back into the registry.
    pub fn create(
        &self,
        video_url: &str,
        video_hash: &str,
        host: Participant,
        mut on_create: impl FnMut(&Room),
    ) -> String {
        loop {
            let code = room_code();
            if self.try_create(&code, video_url, video_hash, host.clone(), &mut on_create) {
                return code;
            }
        }
    }

    /// One creation attempt at a fixed code. Returns false without touching
    /// the occupant (or running `on_create`) when the code is taken.
    fn try_create(
        &self,
        code: &str,
        video_url: &str,
        video_hash: &str,
        host: Participant,
        on_create: &mut impl FnMut(&Room),
    ) -> bool {
        match self.rooms.entry(code.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let room = Room::new(
                    code.to_string(),
                    video_url.to_string(),
                    video_hash.to_string(),
                    host,
                );
                // Holding the vacant entry's guard keeps the room invisible
                // to other connections until on_create has run.
                let entry = slot.insert(Mutex::new(room));
                let room = entry.lock();
                on_create(&room);
                true
            }
        }
    }

    /// Run `f` under the room's mutex. Returns `None` when the id is
    /// unknown or the room has been tombstoned, so callers racing a final
    /// leave observe NotFound rather than an empty room.
    pub fn with_room<T>(&self, room_id: &str, f: impl FnOnce(&mut Room) -> T) -> Option<T> {
        let entry = self.rooms.get(room_id)?;
        let mut room = entry.lock();
        if room.closed {
            return None;
        }
        Some(f(&mut room))
    }

    /// Physically remove a tombstoned room. A still-open room under the
    /// same code (from a racing re-creation) is left alone.
    pub fn remove_if_closed(&self, room_id: &str) {
        self.rooms.remove_if(room_id, |_, room| room.lock().closed);
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Number of live rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a candidate room code: short, lowercase hex, URL-safe.
fn room_code() -> String {
    const CHARSET: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..ROOM_CODE_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::state::ParticipantStatus;

    fn host(id: &str) -> Participant {
        Participant {
            id: id.to_string(),
            display_name: id.to_string(),
            is_host: true,
            status: ParticipantStatus::Connected,
            connection_id: format!("conn_{id}"),
        }
    }

    #[test]
    fn room_code_is_short_lowercase_hex() {
        for _ in 0..100 {
            let code = room_code();
            assert_eq!(code.len(), ROOM_CODE_LEN);
            assert!(code.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn create_inserts_room_with_single_host() {
        let registry = RoomRegistry::new();
        let room_id = registry.create("https://x/v.mp4", "h1", host("a"), |_| {});

        assert!(registry.contains(&room_id));
        assert_eq!(registry.len(), 1);

        let (count, host_id) = registry
            .with_room(&room_id, |room| (room.participants().len(), room.host_id.clone()))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(host_id, "a");
    }

    #[test]
    fn on_create_sees_the_fully_built_room() {
        let registry = RoomRegistry::new();
        let mut seen = None;
        let room_id = registry.create("https://x/v.mp4", "h1", host("a"), |room| {
            seen = Some((room.id.clone(), room.participants().len()));
        });
        assert_eq!(seen, Some((room_id, 1)));
    }

    #[test]
    fn try_create_never_overwrites_an_occupied_code() {
        let registry = RoomRegistry::new();
        assert!(registry.try_create("aaaa1111", "https://x/first.mp4", "h1", host("a"), &mut |_| {}));

        // Second attempt at the same code must fail and must not run its
        // callback or disturb the existing room.
        let mut ran = false;
        assert!(!registry.try_create(
            "aaaa1111",
            "https://x/second.mp4",
            "h2",
            host("b"),
            &mut |_| ran = true
        ));
        assert!(!ran);

        let url = registry
            .with_room("aaaa1111", |room| room.video_url.clone())
            .unwrap();
        assert_eq!(url, "https://x/first.mp4");
    }

    #[test]
    fn with_room_unknown_id_is_none() {
        let registry = RoomRegistry::new();
        assert!(registry.with_room("missing", |_| ()).is_none());
    }

    #[test]
    fn with_room_refuses_tombstoned_rooms() {
        let registry = RoomRegistry::new();
        let room_id = registry.create("https://x/v.mp4", "h1", host("a"), |_| {});

        registry
            .with_room(&room_id, |room| {
                room.remove_participant("a");
                assert!(room.closed);
            })
            .unwrap();

        // Tombstoned but not yet swept: logically gone already.
        assert!(registry.with_room(&room_id, |_| ()).is_none());
    }

    #[test]
    fn remove_if_closed_only_removes_tombstoned_rooms() {
        let registry = RoomRegistry::new();
        let open = registry.create("https://x/v.mp4", "h1", host("a"), |_| {});
        let closing = registry.create("https://x/v.mp4", "h2", host("b"), |_| {});

        registry.remove_if_closed(&open);
        assert!(registry.contains(&open), "open room must survive the sweep");

        registry
            .with_room(&closing, |room| {
                room.remove_participant("b");
            })
            .unwrap();
        registry.remove_if_closed(&closing);
        assert!(!registry.contains(&closing));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn rooms_are_independent_entries() {
        let registry = RoomRegistry::new();
        let r1 = registry.create("https://x/1.mp4", "h1", host("a"), |_| {});
        let r2 = registry.create("https://x/2.mp4", "h2", host("b"), |_| {});
        assert_ne!(r1, r2);

        registry
            .with_room(&r1, |room| {
                room.remove_participant("a");
            })
            .unwrap();
        registry.remove_if_closed(&r1);

        assert!(registry.with_room(&r2, |_| ()).is_some());
    }
}
