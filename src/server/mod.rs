//! HTTP server for the MJPEG stream
//!
//! Serves one endpoint: `GET <path>` answers with an unterminated
//! `multipart/x-mixed-replace` response fed by a viewer session on the
//! [`LiveStream`](crate::stream::LiveStream).

pub mod config;
pub mod listener;

pub use config::ServerConfig;
pub use listener::StreamServer;
