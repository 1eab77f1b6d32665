//! Motion watcher for the monitoring camera.
//!
//! Consumes the low-resolution frame stream, compares each frame to
//! the previous one block-by-block, and emits a single "moved" event.
//! Strictly single-consumer: on emitting the event the watcher tears
//! down its encoder and camera and returns control to the orchestrator.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, trace};

use crate::capture::port::{CameraMessage, CaptureError, FramePixels};

/// The monitoring camera with its video encoder.
pub trait MonitorCamera {
    fn open(&mut self) -> Result<(), CaptureError>;
    fn configure_video(&mut self) -> Result<(), CaptureError>;
    fn start_encoder(&mut self) -> Result<(), CaptureError>;
    fn start(&mut self) -> Result<(), CaptureError>;
    fn stop(&mut self);
    fn stop_encoder(&mut self);
    /// Block for the next message, bounded by the device timeout.
    fn wait(&mut self) -> CameraMessage;
    /// Read the completed frame under a scoped buffer mapping.
    fn with_frame<R>(
        &mut self,
        handle: crate::capture::port::FrameHandle,
        read: impl FnOnce(FramePixels<'_>) -> R,
    ) -> Result<R, CaptureError>;
}

/// Motion policy: what difference constitutes "the ball moved".
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Edge length of the comparison blocks, pixels.
    pub block_size: u32,
    /// Mean absolute per-block intensity change that marks a block as
    /// different (0..255).
    pub block_threshold: f32,
    /// Fraction of blocks that must differ to call motion.
    pub region_fraction: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            block_size: 16,
            block_threshold: 12.0,
            region_fraction: 0.02,
        }
    }
}

/// Block-difference detector against the previous frame.
#[derive(Debug, Default)]
pub struct MotionDetector {
    config: MotionConfig,
    reference: Option<Vec<f32>>,
}

impl MotionDetector {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            reference: None,
        }
    }

    /// Feed one frame's block means; returns `true` on motion. The
    /// frame becomes the new reference either way.
    pub fn process(&mut self, block_means: Vec<f32>) -> bool {
        let moved = match &self.reference {
            Some(reference) if reference.len() == block_means.len() && !reference.is_empty() => {
                let changed = reference
                    .iter()
                    .zip(block_means.iter())
                    .filter(|(a, b)| (*a - *b).abs() > self.config.block_threshold)
                    .count();
                let fraction = changed as f32 / reference.len() as f32;
                trace!(changed, fraction, "block comparison");
                fraction >= self.config.region_fraction
            }
            _ => false,
        };
        self.reference = Some(block_means);
        moved
    }
}

/// Per-block grayscale means of a mapped frame.
pub fn block_means(pixels: &FramePixels<'_>, block_size: u32) -> Vec<f32> {
    let bs = block_size.max(1);
    let blocks_x = pixels.width / bs;
    let blocks_y = pixels.height / bs;
    let mut means = Vec::with_capacity((blocks_x * blocks_y) as usize);
    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            let mut sum = 0u64;
            for y in (by * bs)..((by + 1) * bs) {
                let row = y as usize * pixels.stride;
                for x in (bx * bs)..((bx + 1) * bs) {
                    let p = row + x as usize * 3;
                    // Integer luma approximation.
                    let lum = (pixels.data[p] as u32
                        + 2 * pixels.data[p + 1] as u32
                        + pixels.data[p + 2] as u32)
                        / 4;
                    sum += lum as u64;
                }
            }
            means.push(sum as f32 / (bs * bs) as f32);
        }
    }
    means
}

/// How the watch loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionOutcome {
    /// The ball moved; camera and encoder are torn down.
    Moved,
    /// Quit or run-flag shutdown before any motion.
    Stopped,
}

/// Run the watch loop until motion, quit, or shutdown.
pub fn watch_for_motion<C: MonitorCamera>(
    camera: &mut C,
    config: MotionConfig,
    running: &AtomicBool,
) -> Result<MotionOutcome, CaptureError> {
    camera.open()?;
    camera.configure_video()?;
    camera.start_encoder()?;
    camera.start()?;

    let mut detector = MotionDetector::new(config);

    loop {
        if !running.load(Ordering::Relaxed) {
            camera.stop();
            camera.stop_encoder();
            return Ok(MotionOutcome::Stopped);
        }

        let handle = match camera.wait() {
            CameraMessage::Timeout => {
                error!("device timeout; restarting the monitoring camera");
                camera.stop();
                camera.start()?;
                continue;
            }
            CameraMessage::Quit => {
                camera.stop();
                camera.stop_encoder();
                return Ok(MotionOutcome::Stopped);
            }
            CameraMessage::Unrecognised => {
                camera.stop();
                camera.stop_encoder();
                return Err(CaptureError::UnrecognisedMessage);
            }
            CameraMessage::RequestComplete(handle) => handle,
        };

        let means = camera.with_frame(handle, |pixels| block_means(&pixels, config.block_size))?;
        if detector.process(means) {
            debug!("motion detected; tearing down the watcher");
            camera.stop();
            camera.stop_encoder();
            return Ok(MotionOutcome::Moved);
        }
    }
}
