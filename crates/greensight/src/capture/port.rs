//! Camera port: the seam between the capture loops and the host
//! camera stack.
//!
//! The host framework owns frame buffers; the pipeline reads them only
//! through [`TriggeredCamera::with_frame`], whose scoped closure
//! guarantees the buffer is handed back on every exit path. Anything
//! the pipeline keeps must be deep-copied inside the closure.

use image::RgbImage;
use thiserror::Error;

/// Opaque handle to a completed frame request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHandle(pub u64);

/// Messages delivered by the camera stack's wait call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraMessage {
    /// A frame request completed.
    RequestComplete(FrameHandle),
    /// The device timed out; the loop stops and restarts the camera.
    Timeout,
    /// Orderly shutdown request.
    Quit,
    /// Anything else; fatal.
    Unrecognised,
}

/// Borrowed view of a mapped frame buffer.
#[derive(Debug, Clone, Copy)]
pub struct FramePixels<'a> {
    /// Packed RGB rows, `stride` bytes apart.
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// Bytes per row; at least `3 * width`.
    pub stride: usize,
}

impl FramePixels<'_> {
    /// Deep-copy the buffer into an owned image, dropping row padding.
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        let row_bytes = self.width as usize * 3;
        if self.stride < row_bytes {
            return None;
        }
        let needed = self.stride * self.height as usize;
        if self.data.len() < needed.saturating_sub(self.stride - row_bytes) {
            return None;
        }
        let mut out = Vec::with_capacity(row_bytes * self.height as usize);
        for row in 0..self.height as usize {
            let start = row * self.stride;
            out.extend_from_slice(&self.data[start..start + row_bytes]);
        }
        RgbImage::from_raw(self.width, self.height, out)
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open camera: {0}")]
    Open(String),
    #[error("camera stream unavailable")]
    Stream,
    #[error("mapped frame buffer was empty")]
    EmptyFrame,
    #[error("unrecognised camera message")]
    UnrecognisedMessage,
    #[error("capture entered an invalid state: {0}")]
    InvalidState(&'static str),
    #[error("camera fault: {0}")]
    Fatal(String),
}

/// The externally-triggered flight camera (and, with the encoder
/// methods unused, the still camera used during calibration).
pub trait TriggeredCamera {
    fn open(&mut self) -> Result<(), CaptureError>;
    fn configure(&mut self) -> Result<(), CaptureError>;
    fn start(&mut self) -> Result<(), CaptureError>;
    fn stop(&mut self);
    /// Block for the next message, bounded by the device timeout.
    fn wait(&mut self) -> CameraMessage;
    /// Read a completed frame under a scoped buffer mapping. The
    /// buffer is released when the closure returns, on all paths.
    fn with_frame<R>(
        &mut self,
        handle: FrameHandle,
        read: impl FnOnce(FramePixels<'_>) -> R,
    ) -> Result<R, CaptureError>;
    /// Sensor-specific external-trigger-mode setup, run after the
    /// camera stack has started. Default: nothing to do.
    fn run_trigger_mode_setup(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }
}

/// Millisecond monotonic clock, injectable for tests.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Wall monotonic clock counting from its creation.
#[derive(Debug)]
pub struct MonotonicClock(std::time::Instant);

impl MonotonicClock {
    pub fn new() -> Self {
        Self(std::time::Instant::now())
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.0.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_copy_strips_row_padding() {
        // 2x2 RGB with 2 bytes of padding per row.
        let stride = 8;
        let mut data = vec![0u8; stride * 2];
        data[0..6].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        data[stride..stride + 6].copy_from_slice(&[7, 8, 9, 10, 11, 12]);
        let pixels = FramePixels {
            data: &data,
            width: 2,
            height: 2,
            stride,
        };
        let img = pixels.to_rgb_image().unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [1, 2, 3]);
        assert_eq!(img.get_pixel(1, 1).0, [10, 11, 12]);
    }

    #[test]
    fn undersized_buffer_is_rejected() {
        let data = vec![0u8; 4];
        let pixels = FramePixels {
            data: &data,
            width: 4,
            height: 4,
            stride: 12,
        };
        assert!(pixels.to_rgb_image().is_none());
    }
}
