//! `ffmpeg` subprocess capture
//!
//! Runs `ffmpeg` to decode the source and scale it to a fixed size, reading
//! raw `bgr24` frames from its stdout. When the process dies (camera glitch,
//! stream hiccup) the next read restarts it, so a transient outage only
//! costs frames.
//!
//! A stalled source leaves the reader blocked on the pipe. The device's
//! interrupt handle kills the child, which closes the pipe and ends the read.

use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::media::{Frame, PixelType};

use super::{CaptureDevice, CaptureError, Interrupt, SourceLocation};

/// Capture device backed by an `ffmpeg` child process
pub struct FfmpegCapture {
    location: SourceLocation,
    size: (u32, u32),
    /// Shared with the interrupt handle so it can kill a stalled child
    child: Arc<Mutex<Option<Child>>>,
    stdout: Option<ChildStdout>,
    interrupted: Arc<AtomicBool>,
    buffer: Vec<u8>,
}

impl FfmpegCapture {
    /// Spawn `ffmpeg` for `location`, scaling output to `size`
    pub fn open(location: &SourceLocation, size: (u32, u32)) -> Result<Self, CaptureError> {
        let frame_bytes = size.0 as usize * size.1 as usize * PixelType::BGR8.bytes_per_pixel();
        let mut capture = Self {
            location: location.clone(),
            size,
            child: Arc::new(Mutex::new(None)),
            stdout: None,
            interrupted: Arc::new(AtomicBool::new(false)),
            buffer: vec![0u8; frame_bytes],
        };

        capture.spawn().map_err(|e| CaptureError::Open {
            uri: location.to_string(),
            reason: e.to_string(),
        })?;

        Ok(capture)
    }

    /// Arguments passed to `ffmpeg`
    pub fn command_args(location: &SourceLocation, size: (u32, u32)) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
        ];

        let input = match location.v4l_path() {
            Some(path) => {
                args.extend(["-f".to_string(), "video4linux2".to_string()]);
                path
            }
            None => {
                let uri = location.to_string();
                if uri.starts_with("rtsp://") {
                    args.extend(["-rtsp_transport".to_string(), "tcp".to_string()]);
                }
                args.extend([
                    "-fflags".to_string(),
                    "nobuffer".to_string(),
                    "-flags".to_string(),
                    "low_delay".to_string(),
                ]);
                uri
            }
        };

        args.extend([
            "-i".to_string(),
            input,
            "-an".to_string(),
            "-vf".to_string(),
            format!("scale={}:{}", size.0, size.1),
            "-pix_fmt".to_string(),
            "bgr24".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-".to_string(),
        ]);
        args
    }

    fn spawn(&mut self) -> std::io::Result<()> {
        if self.interrupted.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "capture interrupted",
            ));
        }

        let mut child = Command::new("ffmpeg")
            .args(Self::command_args(&self.location, self.size))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "ffmpeg stdout not captured")
        })?;

        tracing::debug!(source = %self.location, pid = child.id(), "ffmpeg started");
        self.stdout = Some(stdout);
        *self.child.lock() = Some(child);
        Ok(())
    }

    fn stop(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.lock().take() {
            let _ = child.kill();
            let _ = child.wait();
            tracing::debug!(source = %self.location, "ffmpeg stopped");
        }
    }
}

impl CaptureDevice for FfmpegCapture {
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.stdout.is_none() {
            self.spawn()?;
        }

        let result = match self.stdout.as_mut() {
            Some(stdout) => stdout.read_exact(&mut self.buffer),
            None => return Ok(None),
        };

        if let Err(e) = result {
            // Restart on the next read
            self.stop();
            return Err(e.into());
        }

        let frame = Frame::new(self.size.1, self.size.0, PixelType::BGR8, self.buffer.clone())?;
        Ok(Some(frame))
    }

    fn interrupter(&self) -> Option<Interrupt> {
        let child = Arc::clone(&self.child);
        let interrupted = Arc::clone(&self.interrupted);
        Some(Box::new(move || {
            interrupted.store(true, Ordering::SeqCst);
            if let Some(child) = child.lock().as_mut() {
                let _ = child.kill();
            }
        }))
    }
}

impl Drop for FfmpegCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
