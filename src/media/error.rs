//! Frame error types

/// Error type for building, decoding and encoding frames
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Payload is not a valid frame message
    #[error("malformed frame message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Pixel buffer length does not match the declared shape
    #[error("pixel buffer is {actual} bytes, shape {rows}x{cols}x{channels} needs {expected}")]
    LengthMismatch {
        rows: i64,
        cols: i64,
        channels: i64,
        expected: usize,
        actual: usize,
    },

    /// Declared channel count does not match the pixel type
    #[error("channel count {declared} does not match pixel type with {expected} channels")]
    ChannelMismatch { declared: i64, expected: u8 },

    /// Negative or oversized dimensions
    #[error("invalid frame dimensions {rows}x{cols}")]
    InvalidDimensions { rows: i64, cols: i64 },

    /// Unknown pixel type code
    #[error("invalid pixel type code {0}")]
    InvalidPixelType(i32),

    /// Channel count outside 1..=4
    #[error("unsupported channel count {0}")]
    UnsupportedChannels(i64),

    /// Pixel layout the image encoder cannot handle
    #[error("cannot encode pixel type {0}")]
    UnsupportedEncoding(super::PixelType),

    /// Image encoder failure
    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}
