//! Per-connection gateway session state.

use std::sync::atomic::{AtomicU64, Ordering};

/// State for a single WebSocket connection.
pub struct GatewaySession {
    /// Unique connection identifier (`conn_` prefixed ULID).
    pub connection_id: String,
    /// Caller-asserted user ID (cached at IDENTIFY time).
    pub user_id: String,
    /// Display name shown to other participants (cached at IDENTIFY time).
    pub display_name: String,
    /// Monotonically increasing sequence number for dispatch events.
    seq: AtomicU64,
}

impl GatewaySession {
    pub fn new(connection_id: String, user_id: String, display_name: String) -> Self {
        Self {
            connection_id,
            user_id,
            display_name,
            seq: AtomicU64::new(0),
        }
    }

    /// Get the next sequence number for a dispatch event.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }
}
