//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

/// Default HTTP port for the MJPEG stream
pub const DEFAULT_PORT: u16 = 8080;

/// Stream server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Path the stream is served on
    pub path: String,

    /// Maximum concurrent viewers (0 = unlimited)
    pub max_viewers: usize,

    /// Minimum time between two parts sent to one viewer (None = as fast as
    /// frames arrive)
    pub stream_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            path: "/".into(),
            max_viewers: 0, // Unlimited
            stream_interval: None,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the stream path; a leading `/` is added if missing
    pub fn path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        self
    }

    /// Set maximum viewers
    pub fn max_viewers(mut self, max: usize) -> Self {
        self.max_viewers = max;
        self
    }

    /// Set per-viewer pacing
    pub fn stream_interval(mut self, interval: Duration) -> Self {
        self.stream_interval = Some(interval).filter(|d| !d.is_zero());
        self
    }
}
