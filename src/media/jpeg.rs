//! JPEG re-encoding of decoded frames
//!
//! Captured frames use OpenCV channel order (BGR/BGRA). The encoder swaps to
//! RGB, drops alpha, and narrows 16-bit samples to 8 bits before handing the
//! buffer to the `image` crate.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use super::error::FrameError;
use super::message::Frame;
use super::pixel::Depth;

/// Default JPEG quality
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Encodes frames to JPEG at a fixed quality
#[derive(Debug, Clone, Copy)]
pub struct JpegEncoderConfig {
    quality: u8,
}

impl Default for JpegEncoderConfig {
    fn default() -> Self {
        Self {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl JpegEncoderConfig {
    /// Create an encoder config, clamping quality to 1..=100
    pub fn with_quality(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode a frame to JPEG bytes
    pub fn encode(&self, frame: &Frame) -> Result<Bytes, FrameError> {
        let (samples, color) = to_encodable(frame)?;

        let mut out = Vec::with_capacity(samples.len() / 4);
        let mut encoder = JpegEncoder::new_with_quality(&mut out, self.quality);
        encoder.encode(&samples, frame.cols(), frame.rows(), color)?;

        Ok(Bytes::from(out))
    }
}

/// Encode a frame with the default quality
pub fn encode_jpeg(frame: &Frame) -> Result<Bytes, FrameError> {
    JpegEncoderConfig::default().encode(frame)
}

fn to_encodable(frame: &Frame) -> Result<(Vec<u8>, ExtendedColorType), FrameError> {
    let pixel_type = frame.pixel_type();
    let narrowed = match pixel_type.depth() {
        Depth::U8 => frame.data().to_vec(),
        // Keep the high byte of each little-endian sample
        Depth::U16 => frame.data().chunks_exact(2).map(|s| s[1]).collect(),
        _ => return Err(FrameError::UnsupportedEncoding(pixel_type)),
    };

    match pixel_type.channels() {
        1 => Ok((narrowed, ExtendedColorType::L8)),
        3 => Ok((bgr_to_rgb(&narrowed, 3), ExtendedColorType::Rgb8)),
        4 => Ok((bgr_to_rgb(&narrowed, 4), ExtendedColorType::Rgb8)),
        _ => Err(FrameError::UnsupportedEncoding(pixel_type)),
    }
}

fn bgr_to_rgb(samples: &[u8], stride: usize) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(samples.len() / stride * 3);
    for px in samples.chunks_exact(stride) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    rgb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::pixel::PixelType;

    fn decode_dims(jpeg: &[u8]) -> (u32, u32) {
        let img = image::load_from_memory(jpeg).unwrap();
        (img.width(), img.height())
    }

    #[test]
    fn test_encode_gray() {
        let frame = Frame::new(2, 2, PixelType::GRAY8, vec![10u8, 20, 30, 40]).unwrap();
        let jpeg = encode_jpeg(&frame).unwrap();

        assert!(!jpeg.is_empty());
        assert_eq!(&jpeg[0..2], &[0xFF, 0xD8]);
        assert_eq!(decode_dims(&jpeg), (2, 2));
    }

    #[test]
    fn test_encode_bgr_non_square() {
        let frame = Frame::new(3, 5, PixelType::BGR8, vec![128u8; 45]).unwrap();
        let jpeg = encode_jpeg(&frame).unwrap();
        assert_eq!(decode_dims(&jpeg), (5, 3));
    }

    #[test]
    fn test_encode_bgra_drops_alpha() {
        let frame = Frame::new(2, 2, PixelType::BGRA8, vec![200u8; 16]).unwrap();
        let jpeg = encode_jpeg(&frame).unwrap();
        assert_eq!(decode_dims(&jpeg), (2, 2));
    }

    #[test]
    fn test_encode_u16_gray() {
        let pixel_type = PixelType::new(Depth::U16, 1).unwrap();
        let frame = Frame::new(2, 2, pixel_type, vec![0u8, 0x10, 0, 0x80, 0, 0xFF, 0, 0]).unwrap();
        let jpeg = encode_jpeg(&frame).unwrap();
        assert_eq!(decode_dims(&jpeg), (2, 2));
    }

    #[test]
    fn test_encode_rejects_float() {
        let pixel_type = PixelType::new(Depth::F32, 1).unwrap();
        let frame = Frame::new(1, 1, pixel_type, vec![0u8; 4]).unwrap();
        assert!(matches!(
            encode_jpeg(&frame),
            Err(FrameError::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn test_bgr_to_rgb() {
        assert_eq!(bgr_to_rgb(&[1, 2, 3, 4, 5, 6], 3), vec![3, 2, 1, 6, 5, 4]);
        assert_eq!(bgr_to_rgb(&[1, 2, 3, 255], 4), vec![3, 2, 1]);
    }

    #[test]
    fn test_quality_clamped() {
        assert_eq!(JpegEncoderConfig::with_quality(0).quality(), 1);
        assert_eq!(JpegEncoderConfig::with_quality(200).quality(), 100);
    }
}
