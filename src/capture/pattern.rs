//! Synthetic test pattern source
//!
//! Produces BGR frames with a diagonal gradient that shifts by one step per
//! frame, so a viewer can tell the stream is live without a camera.

use crate::media::{Frame, PixelType};

use super::{CaptureDevice, CaptureError};

/// Moving gradient frame generator
#[derive(Debug)]
pub struct TestPattern {
    width: u32,
    height: u32,
    tick: u32,
}

impl TestPattern {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            tick: 0,
        }
    }

    /// Number of frames produced so far
    pub fn frames_produced(&self) -> u32 {
        self.tick
    }

    fn render(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for y in 0..self.height {
            for x in 0..self.width {
                let v = x.wrapping_add(y).wrapping_add(self.tick) as u8;
                data.extend_from_slice(&[v, v.wrapping_mul(2), 255 - v]);
            }
        }
        data
    }
}

impl CaptureDevice for TestPattern {
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let frame = Frame::new(self.height, self.width, PixelType::BGR8, self.render())?;
        self.tick = self.tick.wrapping_add(1);
        Ok(Some(frame))
    }
}
