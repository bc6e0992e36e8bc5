use std::net::SocketAddr;

use clap::Parser;

use crate::config::{ConfigError, ServerConfig};

/// Real-time chat fanout server speaking JSON envelopes over WebSocket.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Socket address the server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// HTTP path that upgrades to the WebSocket endpoint.
    #[arg(long, default_value = "/ws")]
    pub path: String,

    /// Envelopes queued per connection before new ones are dropped.
    #[arg(long, default_value_t = 256)]
    pub outbound_buffer: usize,
}

impl Cli {
    pub fn into_config(self) -> Result<ServerConfig, ConfigError> {
        ServerConfig {
            listen: self.listen,
            path: self.path,
            outbound_buffer: self.outbound_buffer,
        }
        .validated()
    }
}
