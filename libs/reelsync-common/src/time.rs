use chrono::Utc;

/// Current wall-clock time as milliseconds since the Unix epoch.
///
/// Chat messages and video-state updates are stamped with this on the
/// server so clients never disagree about ordering within a room.
pub fn unix_ms() -> i64 {
    Utc::now().timestamp_millis()
}
