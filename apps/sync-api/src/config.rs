/// Sync API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Heartbeat interval advertised to clients in `session:ready` (ms).
    /// Connections missing a heartbeat for 1.5x this interval are closed.
    pub heartbeat_interval_ms: u64,
}

impl Config {
    /// Load configuration from environment variables. Every variable has a
    /// default, so this never fails.
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4010),
            heartbeat_interval_ms: std::env::var("HEARTBEAT_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30_000),
        }
    }
}
