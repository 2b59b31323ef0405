pub mod config;
pub mod error;
pub mod gateway;
pub mod rooms;
pub mod routes;

use std::sync::Arc;

use config::Config;
use gateway::fanout::RoomBroadcast;
use rooms::registry::RoomRegistry;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: Arc<RoomRegistry>,
    pub broadcast: Arc<RoomBroadcast>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            rooms: Arc::new(RoomRegistry::new()),
            broadcast: Arc::new(RoomBroadcast::new()),
        }
    }
}
