//! Consumer configuration

use crate::media::JpegEncoderConfig;

/// Default resync lookback: read the newest frame already written
pub const DEFAULT_LOOKBACK: u32 = 1;

/// Frame consumer configuration
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// How many records behind the high-water mark a partition may lag
    /// after each resync
    pub lookback: u32,

    /// Re-encoding settings for frames pushed to viewers
    pub jpeg: JpegEncoderConfig,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            lookback: DEFAULT_LOOKBACK,
            jpeg: JpegEncoderConfig::default(),
        }
    }
}

impl ConsumerConfig {
    /// Set the resync lookback
    pub fn lookback(mut self, lookback: u32) -> Self {
        self.lookback = lookback;
        self
    }

    /// Set the JPEG quality (clamped to 1..=100)
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg = JpegEncoderConfig::with_quality(quality);
        self
    }
}
