//! Capture sources
//!
//! A capture device yields raw frames on demand. Reads are blocking and are
//! expected to run on a dedicated thread. A device is opened once and closed
//! when dropped.
//!
//! Sources are selected by a location string:
//!
//! | location | source |
//! |---|---|
//! | `0`, `1`, … | local camera by index |
//! | `/dev/video0` | local camera by device path |
//! | `rtsp://…`, `http://…`, file path | network stream or file |
//! | `pattern://640x480` | synthetic test pattern |

pub mod ffmpeg;
#[cfg(feature = "opencv")]
pub mod opencv;
pub mod pattern;

use std::str::FromStr;

use crate::media::{Frame, FrameError};

pub use ffmpeg::FfmpegCapture;
pub use pattern::TestPattern;

/// Error type for capture devices
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// Device or stream could not be opened
    #[error("failed to open video source {uri:?}: {reason}")]
    Open { uri: String, reason: String },

    /// Location string could not be parsed
    #[error("invalid source location {0:?}")]
    InvalidLocation(String),

    /// Reading from the device failed
    #[error("capture read failed: {0}")]
    Read(#[from] std::io::Error),

    /// Device produced a buffer that does not match its shape
    #[error("captured frame rejected: {0}")]
    Frame(#[from] FrameError),

    /// Error from the capture backend
    #[error("capture backend error: {0}")]
    Backend(String),
}

/// Unblocks a pending [`CaptureDevice::read_frame`] from another thread
pub type Interrupt = Box<dyn Fn() + Send + Sync>;

/// A source of raw frames
pub trait CaptureDevice: Send + 'static {
    /// Read one frame
    ///
    /// `Ok(None)` means the device had nothing to deliver this time.
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// Handle that makes a blocked read return early
    ///
    /// Called on shutdown. After it fires, reads fail or return `Ok(None)`
    /// instead of waiting for the source.
    fn interrupter(&self) -> Option<Interrupt> {
        None
    }
}

impl CaptureDevice for Box<dyn CaptureDevice> {
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        (**self).read_frame()
    }

    fn interrupter(&self) -> Option<Interrupt> {
        (**self).interrupter()
    }
}

/// Where frames come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// Local camera by index
    Device(u32),
    /// Stream URL, device path or file
    Uri(String),
    /// Synthetic test pattern
    Pattern { width: u32, height: u32 },
}

impl SourceLocation {
    /// Local video4linux device path for camera sources
    pub fn v4l_path(&self) -> Option<String> {
        match self {
            SourceLocation::Device(index) => Some(format!("/dev/video{index}")),
            SourceLocation::Uri(uri) if uri.starts_with("/dev/video") => Some(uri.clone()),
            _ => None,
        }
    }
}

impl FromStr for SourceLocation {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CaptureError::InvalidLocation(s.to_string()));
        }

        if let Some(size) = s.strip_prefix("pattern://") {
            let (width, height) =
                parse_size(size).ok_or_else(|| CaptureError::InvalidLocation(s.to_string()))?;
            return Ok(SourceLocation::Pattern { width, height });
        }

        if let Ok(index) = s.parse::<u32>() {
            return Ok(SourceLocation::Device(index));
        }

        Ok(SourceLocation::Uri(s.to_string()))
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceLocation::Device(index) => write!(f, "{index}"),
            SourceLocation::Uri(uri) => write!(f, "{uri}"),
            SourceLocation::Pattern { width, height } => {
                write!(f, "pattern://{width}x{height}")
            }
        }
    }
}

/// Parse `WIDTHxHEIGHT`
pub fn parse_size(s: &str) -> Option<(u32, u32)> {
    let (w, h) = s.split_once(['x', 'X'])?;
    let width = w.trim().parse().ok().filter(|&v| v > 0)?;
    let height = h.trim().parse().ok().filter(|&v| v > 0)?;
    Some((width, height))
}

/// Backend used to open camera and stream sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureBackend {
    /// `ffmpeg` subprocess producing raw BGR frames
    #[default]
    Ffmpeg,
    /// OpenCV `VideoCapture`
    #[cfg(feature = "opencv")]
    OpenCv,
}

/// Options for opening a capture device
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Output frame size for the ffmpeg backend
    pub size: (u32, u32),
    /// Backend for camera and stream sources
    pub backend: CaptureBackend,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            size: (640, 480),
            backend: CaptureBackend::default(),
        }
    }
}

/// Open a capture device
///
/// Failure here is a startup error.
pub fn open(
    location: &SourceLocation,
    options: &CaptureOptions,
) -> Result<Box<dyn CaptureDevice>, CaptureError> {
    let device: Box<dyn CaptureDevice> = match (location, options.backend) {
        (SourceLocation::Pattern { width, height }, _) => {
            Box::new(TestPattern::new(*width, *height))
        }
        #[cfg(feature = "opencv")]
        (_, CaptureBackend::OpenCv) => Box::new(opencv::OpenCvCapture::open(location)?),
        (_, CaptureBackend::Ffmpeg) => Box::new(FfmpegCapture::open(location, options.size)?),
    };

    tracing::info!(source = %location, backend = ?options.backend, "Capture device opened");
    Ok(device)
}
