//! Flight-capture state machine.
//!
//! The flight camera is externally triggered by the same pulse train
//! that lights the ball. The sensor needs several priming triggers
//! before it produces valid frames, and some sensor models emit an
//! extra frame per trigger that must be flushed. This loop absorbs the
//! priming pulses for a quiesce period, optionally captures a
//! pre-image for later subtraction, then returns a deep copy of the
//! final strobed frame.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, trace, warn};

use super::port::{CameraMessage, CaptureError, Clock, FrameHandle, TriggeredCamera};

/// Capture loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightCaptureConfig {
    /// Priming pulses in the strobe train's prefix.
    pub priming_pulse_count: u32,
    /// Rate at which priming pulses arrive.
    pub priming_fps: u32,
    /// Extra quiesce time for sensors that need the external-trigger
    /// setup command, ms.
    pub trigger_setup_pause_ms: u64,
    /// Whether the sensor needs the trigger-mode setup command after
    /// the camera has started.
    pub sensor_needs_trigger_setup: bool,
    /// Whether the sensor emits an extra frame per trigger that must
    /// be flushed.
    pub sensor_requires_flush: bool,
    /// Capture a pre-image for later subtraction.
    pub use_pre_image_subtraction: bool,
    /// Route the pre-image flush through a second priming group.
    /// Dormant path; off by default.
    pub second_priming_group: bool,
}

impl Default for FlightCaptureConfig {
    fn default() -> Self {
        Self {
            priming_pulse_count: 3,
            priming_fps: 100,
            trigger_setup_pause_ms: 0,
            sensor_needs_trigger_setup: false,
            sensor_requires_flush: true,
            use_pre_image_subtraction: false,
            second_priming_group: false,
        }
    }
}

impl FlightCaptureConfig {
    /// Time budget allotted to absorb priming triggers before the real
    /// shutter sequence begins.
    pub fn quiesce_ms(&self) -> u64 {
        let per_pulse = 1000 / self.priming_fps.max(1) as u64;
        let mut quiesce = (self.priming_pulse_count as u64 + 1) * per_pulse;
        if self.sensor_needs_trigger_setup {
            quiesce += self.trigger_setup_pause_ms;
        }
        quiesce
    }
}

/// States of the capture loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightCaptureState {
    Uninitialised,
    WaitingForFirstPrimingGroup,
    WaitingForFirstPrimingTimeEnd,
    WaitingForPreImageTrigger,
    WaitingForPreImageFlush,
    WaitingForSecondPrimingGroup,
    WaitingForSecondPrimingTimeEnd,
    WaitingForFinalImageTrigger,
    WaitingForFinalImageFlush,
    FinalImageReceived,
}

/// How the capture loop ended.
#[derive(Debug)]
pub enum CaptureOutcome {
    /// The strobed frame, deep-copied out of the library buffer.
    Image(RgbImage),
    /// Quit message or run-flag shutdown; not an error.
    Aborted,
}

/// Run the externally-triggered capture loop to completion.
pub fn run_flight_capture<C, K>(
    camera: &mut C,
    clock: &K,
    config: &FlightCaptureConfig,
    running: &AtomicBool,
) -> Result<CaptureOutcome, CaptureError>
where
    C: TriggeredCamera,
    K: Clock,
{
    camera.open()?;
    camera.configure()?;
    camera.start()?;

    let quiesce_ms = config.quiesce_ms();
    debug!(quiesce_ms, "waiting for priming pulses");

    // Some sensors need the trigger-mode command issued after startup;
    // issue it once here and once more on the first priming trigger.
    if config.sensor_needs_trigger_setup {
        camera.run_trigger_mode_setup()?;
    }
    let mut trigger_setup_done = false;

    let mut state = FlightCaptureState::WaitingForFirstPrimingGroup;
    let mut priming_started_ms = clock.now_ms();
    let mut final_image: Option<RgbImage> = None;

    while state != FlightCaptureState::FinalImageReceived {
        if !running.load(Ordering::Relaxed) {
            camera.stop();
            return Ok(CaptureOutcome::Aborted);
        }

        let handle = match camera.wait() {
            CameraMessage::Timeout => {
                error!("device timeout; restarting the flight camera");
                camera.stop();
                camera.configure()?;
                camera.start()?;
                continue;
            }
            CameraMessage::Quit => {
                trace!("quit message received");
                camera.stop();
                return Ok(CaptureOutcome::Aborted);
            }
            CameraMessage::Unrecognised => {
                camera.stop();
                return Err(CaptureError::UnrecognisedMessage);
            }
            CameraMessage::RequestComplete(handle) => handle,
        };

        state = match state {
            FlightCaptureState::Uninitialised | FlightCaptureState::FinalImageReceived => {
                camera.stop();
                return Err(CaptureError::InvalidState("trigger outside the capture sequence"));
            }

            FlightCaptureState::WaitingForFirstPrimingGroup => {
                priming_started_ms = clock.now_ms();
                trace!("first priming trigger; starting quiesce countdown");
                if config.sensor_needs_trigger_setup && !trigger_setup_done {
                    camera.run_trigger_mode_setup()?;
                    trigger_setup_done = true;
                }
                FlightCaptureState::WaitingForFirstPrimingTimeEnd
            }

            FlightCaptureState::WaitingForFirstPrimingTimeEnd => {
                let elapsed = clock.now_ms().saturating_sub(priming_started_ms);
                if elapsed < quiesce_ms {
                    trace!(elapsed, "still quiescing");
                    FlightCaptureState::WaitingForFirstPrimingTimeEnd
                } else if config.use_pre_image_subtraction {
                    debug!("priming complete; ready for pre-image trigger");
                    FlightCaptureState::WaitingForPreImageTrigger
                } else if config.sensor_requires_flush {
                    debug!("priming complete; ready for final image trigger");
                    FlightCaptureState::WaitingForFinalImageTrigger
                } else {
                    debug!("priming complete; sensor needs no flush");
                    FlightCaptureState::WaitingForFinalImageFlush
                }
            }

            FlightCaptureState::WaitingForPreImageTrigger => {
                trace!("pre-image trigger; frame dequeues on the flush trigger");
                FlightCaptureState::WaitingForPreImageFlush
            }

            FlightCaptureState::WaitingForPreImageFlush => {
                trace!("pre-image flush");
                if config.second_priming_group {
                    FlightCaptureState::WaitingForSecondPrimingGroup
                } else {
                    FlightCaptureState::WaitingForFinalImageTrigger
                }
            }

            FlightCaptureState::WaitingForSecondPrimingGroup => {
                priming_started_ms = clock.now_ms();
                trace!("first trigger of the second priming group");
                FlightCaptureState::WaitingForSecondPrimingTimeEnd
            }

            FlightCaptureState::WaitingForSecondPrimingTimeEnd => {
                // The second group settles in half the time.
                let elapsed = clock.now_ms().saturating_sub(priming_started_ms);
                if elapsed < quiesce_ms / 2 {
                    FlightCaptureState::WaitingForSecondPrimingTimeEnd
                } else {
                    FlightCaptureState::WaitingForFinalImageTrigger
                }
            }

            FlightCaptureState::WaitingForFinalImageTrigger => {
                trace!("final image trigger; frame dequeues on the flush trigger");
                FlightCaptureState::WaitingForFinalImageFlush
            }

            FlightCaptureState::WaitingForFinalImageFlush => {
                info!("flushing final strobed image");
                camera.stop();
                let image = camera.with_frame(handle, |pixels| pixels.to_rgb_image())?;
                match image {
                    Some(img) => {
                        final_image = Some(img);
                        FlightCaptureState::FinalImageReceived
                    }
                    None => {
                        warn!("final frame buffer was unreadable");
                        return Err(CaptureError::EmptyFrame);
                    }
                }
            }
        };
    }

    match final_image {
        Some(image) => Ok(CaptureOutcome::Image(image)),
        None => Err(CaptureError::InvalidState("final state without an image")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Test clock advanced by the scripted camera.
    #[derive(Clone)]
    struct ManualClock(Rc<Cell<u64>>);

    impl Clock for ManualClock {
        fn now_ms(&self) -> u64 {
            self.0.get()
        }
    }

    /// Scripted camera: each entry advances the clock and yields a
    /// message.
    struct ScriptedCamera {
        script: VecDeque<(u64, CameraMessage)>,
        clock: Rc<Cell<u64>>,
        frame: Vec<u8>,
        width: u32,
        height: u32,
        restarts: usize,
        stopped: bool,
    }

    impl ScriptedCamera {
        fn new(script: Vec<(u64, CameraMessage)>, clock: Rc<Cell<u64>>) -> Self {
            // A 4x2 frame with a recognisable first pixel.
            let mut frame = vec![7u8; 4 * 2 * 3];
            frame[0] = 42;
            Self {
                script: script.into(),
                clock,
                frame,
                width: 4,
                height: 2,
                restarts: 0,
                stopped: false,
            }
        }
    }

    impl TriggeredCamera for ScriptedCamera {
        fn open(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }
        fn configure(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }
        fn start(&mut self) -> Result<(), CaptureError> {
            if self.stopped {
                self.restarts += 1;
                self.stopped = false;
            }
            Ok(())
        }
        fn stop(&mut self) {
            self.stopped = true;
        }
        fn wait(&mut self) -> CameraMessage {
            match self.script.pop_front() {
                Some((at_ms, msg)) => {
                    self.clock.set(at_ms);
                    msg
                }
                None => CameraMessage::Quit,
            }
        }
        fn with_frame<R>(
            &mut self,
            _handle: FrameHandle,
            read: impl FnOnce(crate::capture::port::FramePixels<'_>) -> R,
        ) -> Result<R, CaptureError> {
            Ok(read(crate::capture::port::FramePixels {
                data: &self.frame,
                width: self.width,
                height: self.height,
                stride: self.width as usize * 3,
            }))
        }
    }

    fn trig(at_ms: u64) -> (u64, CameraMessage) {
        (at_ms, CameraMessage::RequestComplete(FrameHandle(at_ms)))
    }

    fn running() -> AtomicBool {
        AtomicBool::new(true)
    }

    fn quiesce_config() -> FlightCaptureConfig {
        FlightCaptureConfig {
            priming_pulse_count: 3,
            priming_fps: 1000,
            use_pre_image_subtraction: true,
            sensor_requires_flush: true,
            ..Default::default()
        }
    }

    #[test]
    fn quiesce_time_follows_the_priming_schedule() {
        let cfg = quiesce_config();
        assert_eq!(cfg.quiesce_ms(), 4);
        let with_setup = FlightCaptureConfig {
            sensor_needs_trigger_setup: true,
            trigger_setup_pause_ms: 250,
            ..cfg
        };
        assert_eq!(with_setup.quiesce_ms(), 254);
    }

    #[test]
    fn priming_triggers_inside_quiesce_never_finish_the_capture() {
        let clock_cell = Rc::new(Cell::new(0));
        // All triggers inside the 4 ms quiesce window, then quit.
        let mut cam = ScriptedCamera::new(
            vec![trig(0), trig(1), trig(2), trig(3), (3, CameraMessage::Quit)],
            clock_cell.clone(),
        );
        let outcome = run_flight_capture(
            &mut cam,
            &ManualClock(clock_cell),
            &quiesce_config(),
            &running(),
        )
        .unwrap();
        assert!(matches!(outcome, CaptureOutcome::Aborted));
    }

    #[test]
    fn full_sequence_returns_the_deep_copied_final_flush() {
        let clock_cell = Rc::new(Cell::new(0));
        // Priming at 0..3 ms, advance at 5 ms, then pre-image
        // trigger+flush and final trigger+flush.
        let mut cam = ScriptedCamera::new(
            vec![
                trig(0),
                trig(1),
                trig(2),
                trig(3),
                trig(5),
                trig(6),
                trig(7),
                trig(8),
                trig(9),
            ],
            clock_cell.clone(),
        );
        let outcome = run_flight_capture(
            &mut cam,
            &ManualClock(clock_cell),
            &quiesce_config(),
            &running(),
        )
        .unwrap();
        match outcome {
            CaptureOutcome::Image(img) => {
                assert_eq!(img.dimensions(), (4, 2));
                assert_eq!(img.get_pixel(0, 0).0[0], 42);
            }
            CaptureOutcome::Aborted => panic!("expected an image"),
        }
    }

    #[test]
    fn no_pre_image_and_no_flush_jumps_to_the_final_flush() {
        let clock_cell = Rc::new(Cell::new(0));
        let cfg = FlightCaptureConfig {
            use_pre_image_subtraction: false,
            sensor_requires_flush: false,
            ..quiesce_config()
        };
        // One priming trigger, then the post-quiesce trigger arms the
        // flush state, and the next trigger carries the image.
        let mut cam = ScriptedCamera::new(vec![trig(0), trig(5), trig(6)], clock_cell.clone());
        let outcome =
            run_flight_capture(&mut cam, &ManualClock(clock_cell), &cfg, &running()).unwrap();
        assert!(matches!(outcome, CaptureOutcome::Image(_)));
    }

    #[test]
    fn second_priming_group_gate_routes_the_pre_image_path() {
        let clock_cell = Rc::new(Cell::new(0));
        let cfg = FlightCaptureConfig {
            second_priming_group: true,
            ..quiesce_config()
        };
        // quiesce/2 = 2 ms for the second group.
        let mut cam = ScriptedCamera::new(
            vec![
                trig(0),
                trig(5),  // first group done -> pre-image trigger
                trig(6),  // pre-image trigger -> flush
                trig(7),  // pre-image flush -> second priming group
                trig(8),  // second group start
                trig(11), // past quiesce/2 -> final trigger
                trig(12), // final trigger -> flush
                trig(13), // final flush -> image
            ],
            clock_cell.clone(),
        );
        let outcome =
            run_flight_capture(&mut cam, &ManualClock(clock_cell), &cfg, &running()).unwrap();
        assert!(matches!(outcome, CaptureOutcome::Image(_)));
    }

    #[test]
    fn timeout_restarts_the_camera_without_advancing_state() {
        let clock_cell = Rc::new(Cell::new(0));
        let mut cam = ScriptedCamera::new(
            vec![
                trig(0),
                (1, CameraMessage::Timeout),
                trig(5),
                trig(6),
                trig(7),
                trig(8),
                trig(9),
            ],
            clock_cell.clone(),
        );
        let outcome = run_flight_capture(
            &mut cam,
            &ManualClock(clock_cell),
            &quiesce_config(),
            &running(),
        )
        .unwrap();
        assert!(matches!(outcome, CaptureOutcome::Image(_)));
        assert_eq!(cam.restarts, 1);
    }

    #[test]
    fn unrecognised_message_is_fatal() {
        let clock_cell = Rc::new(Cell::new(0));
        let mut cam = ScriptedCamera::new(
            vec![trig(0), (1, CameraMessage::Unrecognised)],
            clock_cell.clone(),
        );
        let err = run_flight_capture(
            &mut cam,
            &ManualClock(clock_cell),
            &quiesce_config(),
            &running(),
        )
        .unwrap_err();
        assert!(matches!(err, CaptureError::UnrecognisedMessage));
    }

    #[test]
    fn run_flag_shutdown_aborts_cleanly() {
        let clock_cell = Rc::new(Cell::new(0));
        let mut cam = ScriptedCamera::new(vec![trig(0)], clock_cell.clone());
        let stop = AtomicBool::new(false);
        let outcome =
            run_flight_capture(&mut cam, &ManualClock(clock_cell), &quiesce_config(), &stop)
                .unwrap();
        assert!(matches!(outcome, CaptureOutcome::Aborted));
    }
}
