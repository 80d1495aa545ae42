//! Pixel storage layout
//!
//! Frames travel with the OpenCV matrix type code, which packs the sample
//! depth in the low 3 bits and `channels - 1` in the bits above:
//!
//! ```text
//! type = depth + ((channels - 1) << 3)
//! ```
//!
//! Keeping that encoding means frames published by OpenCV-based producers
//! can be consumed unchanged.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::error::FrameError;

/// Maximum channel count representable in a type code
pub const MAX_CHANNELS: u8 = 4;

const DEPTH_BITS: i32 = 3;
const DEPTH_MASK: i32 = (1 << DEPTH_BITS) - 1;

/// Per-sample storage type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Depth {
    /// Unsigned 8-bit
    U8,
    /// Signed 8-bit
    I8,
    /// Unsigned 16-bit
    U16,
    /// Signed 16-bit
    I16,
    /// Signed 32-bit
    I32,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
    /// 16-bit float
    F16,
}

impl Depth {
    /// Size of one sample in bytes
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Depth::U8 | Depth::I8 => 1,
            Depth::U16 | Depth::I16 | Depth::F16 => 2,
            Depth::I32 | Depth::F32 => 4,
            Depth::F64 => 8,
        }
    }

    fn code(self) -> i32 {
        match self {
            Depth::U8 => 0,
            Depth::I8 => 1,
            Depth::U16 => 2,
            Depth::I16 => 3,
            Depth::I32 => 4,
            Depth::F32 => 5,
            Depth::F64 => 6,
            Depth::F16 => 7,
        }
    }

    fn from_code(code: i32) -> Self {
        match code & DEPTH_MASK {
            0 => Depth::U8,
            1 => Depth::I8,
            2 => Depth::U16,
            3 => Depth::I16,
            4 => Depth::I32,
            5 => Depth::F32,
            6 => Depth::F64,
            _ => Depth::F16,
        }
    }
}

/// Pixel layout: sample depth times channel count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelType {
    depth: Depth,
    channels: u8,
}

impl PixelType {
    /// 8-bit single channel (grayscale)
    pub const GRAY8: PixelType = PixelType {
        depth: Depth::U8,
        channels: 1,
    };

    /// 8-bit three channel, BGR order
    pub const BGR8: PixelType = PixelType {
        depth: Depth::U8,
        channels: 3,
    };

    /// 8-bit four channel, BGRA order
    pub const BGRA8: PixelType = PixelType {
        depth: Depth::U8,
        channels: 4,
    };

    /// Create a pixel type
    pub fn new(depth: Depth, channels: u8) -> Result<Self, FrameError> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(FrameError::UnsupportedChannels(channels as i64));
        }
        Ok(Self { depth, channels })
    }

    /// Decode an OpenCV matrix type code
    pub fn from_code(code: i32) -> Result<Self, FrameError> {
        if code < 0 {
            return Err(FrameError::InvalidPixelType(code));
        }
        let channels = (code >> DEPTH_BITS) + 1;
        if channels > MAX_CHANNELS as i32 {
            return Err(FrameError::InvalidPixelType(code));
        }
        Ok(Self {
            depth: Depth::from_code(code),
            channels: channels as u8,
        })
    }

    /// Encode as an OpenCV matrix type code
    pub fn code(self) -> i32 {
        self.depth.code() + ((self.channels as i32 - 1) << DEPTH_BITS)
    }

    pub fn depth(self) -> Depth {
        self.depth
    }

    pub fn channels(self) -> u8 {
        self.channels
    }

    /// Bytes per sample (one channel of one pixel)
    pub fn bytes_per_sample(self) -> usize {
        self.depth.bytes_per_sample()
    }

    /// Bytes per pixel (all channels)
    pub fn bytes_per_pixel(self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }
}

impl std::fmt::Display for PixelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}C{}", self.depth, self.channels)
    }
}

impl Serialize for PixelType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for PixelType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i32::deserialize(deserializer)?;
        PixelType::from_code(code).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opencv_codes() {
        assert_eq!(PixelType::GRAY8.code(), 0);
        assert_eq!(PixelType::BGR8.code(), 16);
        assert_eq!(PixelType::BGRA8.code(), 24);
        assert_eq!(PixelType::new(Depth::F32, 1).unwrap().code(), 5);
        assert_eq!(PixelType::new(Depth::U16, 3).unwrap().code(), 18);
    }

    #[test]
    fn test_from_code() {
        let t = PixelType::from_code(16).unwrap();
        assert_eq!(t, PixelType::BGR8);
        assert_eq!(t.bytes_per_pixel(), 3);

        let t = PixelType::from_code(14).unwrap();
        assert_eq!(t.depth(), Depth::F64);
        assert_eq!(t.channels(), 2);
        assert_eq!(t.bytes_per_pixel(), 16);
    }

    #[test]
    fn test_from_code_rejects_out_of_range() {
        assert!(PixelType::from_code(-1).is_err());
        // 5 channels
        assert!(PixelType::from_code(32).is_err());
    }

    #[test]
    fn test_new_rejects_zero_channels() {
        assert!(matches!(
            PixelType::new(Depth::U8, 0),
            Err(FrameError::UnsupportedChannels(0))
        ));
    }

    #[test]
    fn test_serde_as_integer() {
        let json = serde_json::to_string(&PixelType::BGR8).unwrap();
        assert_eq!(json, "16");

        let parsed: PixelType = serde_json::from_str("0").unwrap();
        assert_eq!(parsed, PixelType::GRAY8);

        assert!(serde_json::from_str::<PixelType>("40").is_err());
    }
}
