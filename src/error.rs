//! Error types
//!
//! Only configuration and resource acquisition errors surface from the
//! pipeline entry points. Per-frame failures are logged where they happen.

use crate::broker::BrokerError;
use crate::capture::CaptureError;
use crate::media::FrameError;

/// Result type alias using the crate [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for pipeline setup and execution
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or missing configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Capture device failure
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// Broker transport failure
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Frame build/decode/encode failure
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A pipeline task panicked or was aborted
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}
