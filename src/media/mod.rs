//! Frame representation
//!
//! This module provides:
//! - Pixel layout codes compatible with OpenCV matrix types
//! - The frame message carried through the broker
//! - Validation of received frames against their declared shape
//! - JPEG re-encoding for the live stream

pub mod error;
pub mod jpeg;
pub mod message;
pub mod pixel;

pub use error::FrameError;
pub use jpeg::{encode_jpeg, JpegEncoderConfig, DEFAULT_JPEG_QUALITY};
pub use message::{Frame, FrameMessage};
pub use pixel::{Depth, PixelType};
