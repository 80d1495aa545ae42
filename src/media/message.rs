//! Frame message and decoded frame types
//!
//! [`FrameMessage`] is the unit carried by one broker record. It is a flat
//! JSON object:
//!
//! ```text
//! {"pixels": "<base64>", "channels": 3, "rows": 480, "cols": 640, "pixelType": 16}
//! ```
//!
//! The names `mat` and `type` are accepted as aliases for `pixels` and
//! `pixelType`, so messages from older producers decode as well.
//!
//! [`Frame`] is the validated form. Converting a message into a frame checks
//! the shape invariant:
//!
//! ```text
//! len(pixels) == rows * cols * channels * bytes_per_sample(pixelType)
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::error::FrameError;
use super::pixel::PixelType;

/// Wire representation of a captured frame
///
/// Fields are kept as raw integers so a consumer can parse a message before
/// deciding whether it is valid. Producers build messages from a [`Frame`],
/// which guarantees the shape invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMessage {
    #[serde(alias = "mat", with = "base64_bytes")]
    pixels: Bytes,
    channels: i64,
    rows: i64,
    cols: i64,
    #[serde(rename = "pixelType", alias = "type")]
    pixel_type: i32,
}

impl FrameMessage {
    /// Build a message from a validated frame
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            pixels: frame.data.clone(),
            channels: frame.pixel_type.channels() as i64,
            rows: frame.rows as i64,
            cols: frame.cols as i64,
            pixel_type: frame.pixel_type.code(),
        }
    }

    /// Parse a message from a broker payload
    pub fn from_slice(payload: &[u8]) -> Result<Self, FrameError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Serialize for publishing
    pub fn to_bytes(&self) -> Result<Bytes, FrameError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn pixels(&self) -> &Bytes {
        &self.pixels
    }

    pub fn channels(&self) -> i64 {
        self.channels
    }

    pub fn rows(&self) -> i64 {
        self.rows
    }

    pub fn cols(&self) -> i64 {
        self.cols
    }

    /// Raw pixel type code as carried on the wire
    pub fn pixel_type_code(&self) -> i32 {
        self.pixel_type
    }
}

/// A validated pixel matrix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    rows: u32,
    cols: u32,
    pixel_type: PixelType,
    data: Bytes,
}

impl Frame {
    /// Create a frame, checking the buffer length against the shape
    pub fn new(
        rows: u32,
        cols: u32,
        pixel_type: PixelType,
        data: impl Into<Bytes>,
    ) -> Result<Self, FrameError> {
        let data = data.into();
        let expected = expected_len(
            rows as i64,
            cols as i64,
            pixel_type.channels() as i64,
            pixel_type,
        )?;

        if data.len() != expected {
            return Err(FrameError::LengthMismatch {
                rows: rows as i64,
                cols: cols as i64,
                channels: pixel_type.channels() as i64,
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            rows,
            cols,
            pixel_type,
            data,
        })
    }

    /// Reconstruct a frame from a received message
    pub fn from_message(msg: FrameMessage) -> Result<Self, FrameError> {
        let pixel_type = PixelType::from_code(msg.pixel_type)?;

        if msg.channels != pixel_type.channels() as i64 {
            return Err(FrameError::ChannelMismatch {
                declared: msg.channels,
                expected: pixel_type.channels(),
            });
        }

        let expected = expected_len(msg.rows, msg.cols, msg.channels, pixel_type)?;
        if msg.pixels.len() != expected {
            return Err(FrameError::LengthMismatch {
                rows: msg.rows,
                cols: msg.cols,
                channels: msg.channels,
                expected,
                actual: msg.pixels.len(),
            });
        }

        Ok(Self {
            rows: msg.rows as u32,
            cols: msg.cols as u32,
            pixel_type,
            data: msg.pixels,
        })
    }

    /// Decode a broker payload straight into a frame
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        Self::from_message(FrameMessage::from_slice(payload)?)
    }

    /// Serialize into a broker payload
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        FrameMessage::from_frame(self).to_bytes()
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn channels(&self) -> u8 {
        self.pixel_type.channels()
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Length of one row in bytes
    pub fn stride(&self) -> usize {
        self.cols as usize * self.pixel_type.bytes_per_pixel()
    }
}

fn expected_len(
    rows: i64,
    cols: i64,
    channels: i64,
    pixel_type: PixelType,
) -> Result<usize, FrameError> {
    let invalid = || FrameError::InvalidDimensions { rows, cols };

    if rows <= 0 || cols <= 0 || rows > u32::MAX as i64 || cols > u32::MAX as i64 {
        return Err(invalid());
    }
    if channels <= 0 {
        return Err(FrameError::UnsupportedChannels(channels));
    }

    (rows as usize)
        .checked_mul(cols as usize)
        .and_then(|n| n.checked_mul(channels as usize))
        .and_then(|n| n.checked_mul(pixel_type.bytes_per_sample()))
        .ok_or_else(invalid)
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
