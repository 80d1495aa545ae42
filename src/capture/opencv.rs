//! OpenCV `VideoCapture` backend

use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio::{VideoCapture, CAP_ANY};

use crate::media::{Frame, PixelType};

use super::{CaptureDevice, CaptureError, SourceLocation};

/// Capture device backed by OpenCV
pub struct OpenCvCapture {
    capture: VideoCapture,
    mat: Mat,
}

fn backend_error(err: opencv::Error) -> CaptureError {
    CaptureError::Backend(err.to_string())
}

impl OpenCvCapture {
    pub fn open(location: &SourceLocation) -> Result<Self, CaptureError> {
        let open_error = |reason: String| CaptureError::Open {
            uri: location.to_string(),
            reason,
        };

        let capture = match location {
            SourceLocation::Device(index) => VideoCapture::new(*index as i32, CAP_ANY),
            SourceLocation::Uri(uri) => VideoCapture::from_file(uri, CAP_ANY),
            SourceLocation::Pattern { .. } => {
                return Err(open_error("test patterns are not opened through OpenCV".into()))
            }
        }
        .map_err(|e| open_error(e.to_string()))?;

        if !capture.is_opened().map_err(|e| open_error(e.to_string()))? {
            return Err(open_error("device not opened".into()));
        }

        Ok(Self {
            capture,
            mat: Mat::default(),
        })
    }
}

impl CaptureDevice for OpenCvCapture {
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let ok = self.capture.read(&mut self.mat).map_err(backend_error)?;
        if !ok {
            return Ok(None);
        }

        let size = self.mat.size().map_err(backend_error)?;
        if size.width <= 0 || size.height <= 0 {
            return Ok(None);
        }

        let pixel_type = PixelType::from_code(self.mat.typ())?;
        let data = self.mat.data_bytes().map_err(backend_error)?.to_vec();
        let frame = Frame::new(size.height as u32, size.width as u32, pixel_type, data)?;
        Ok(Some(frame))
    }
}

impl Drop for OpenCvCapture {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            tracing::warn!(error = %e, "Failed to release capture device");
        }
    }
}
