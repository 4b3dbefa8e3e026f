//! Network module - Handles TCP communication with the frame server
//!
//! Provides:
//! - Transport for one-shot request/reply exchanges
//! - Server for receiving frames locally

mod server;
mod transport;

pub use server::*;
pub use transport::*;

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::{DEFAULT_HOST, DEFAULT_PORT};

/// Default size of the reply buffer
pub const DEFAULT_REPLY_BUFFER_SIZE: usize = 1024;

/// Configuration for network operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Host to connect to or bind on
    pub host: String,
    /// Port to connect to or listen on
    pub port: u16,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Reply timeout in milliseconds (none = wait forever)
    pub read_timeout_ms: Option<u64>,
    /// Size of the single reply read
    pub reply_buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 5000,
            read_timeout_ms: None,
            reply_buffer_size: DEFAULT_REPLY_BUFFER_SIZE,
        }
    }
}

impl NetworkConfig {
    pub fn with_read_timeout(mut self, timeout_ms: u64) -> Self {
        self.read_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}
