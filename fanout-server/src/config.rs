use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Route that upgrades to the WebSocket endpoint.
    pub path: String,
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            path: "/ws".to_string(),
            outbound_buffer: 256,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("websocket path must start with '/': {0}")]
    InvalidPath(String),

    #[error("outbound buffer must hold at least one envelope")]
    ZeroBuffer,
}

impl ServerConfig {
    pub fn validated(self) -> Result<Self, ConfigError> {
        if !self.path.starts_with('/') {
            return Err(ConfigError::InvalidPath(self.path));
        }
        if self.outbound_buffer == 0 {
            return Err(ConfigError::ZeroBuffer);
        }
        Ok(self)
    }
}
