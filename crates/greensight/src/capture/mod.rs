//! Strobe-synchronised flight capture: the camera port seam, the
//! externally-triggered capture state machine, and the GPIO pulse
//! driver.

pub mod fsm;
pub mod gpio;
pub mod port;

pub use fsm::{run_flight_capture, CaptureOutcome, FlightCaptureConfig, FlightCaptureState};
pub use gpio::{GpioError, NoopPins, PulseDriver, PulsePins};
pub use port::{
    CameraMessage, CaptureError, Clock, FrameHandle, FramePixels, MonotonicClock, TriggeredCamera,
};
