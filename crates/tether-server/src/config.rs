//! Server configuration.

use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;
use crate::liveness::LivenessConfig;

/// Configuration for the bridge server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Async execution engine knobs.
    pub engine: EngineConfig,
    /// Liveness monitor knobs.
    pub liveness: LivenessConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 50,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            engine: EngineConfig::default(),
            liveness: LivenessConfig::default(),
        }
    }
}
