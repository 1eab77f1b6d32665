//! greensight — the core of a strobe-based golf launch monitor.
//!
//! Two cameras watch a teed ball. When the ball is struck, the system
//! captures a strobed multi-exposure image of the ball in flight,
//! extracts ball positions and spin, and computes launch velocity,
//! launch angles and trajectory. The pipeline stages are:
//!
//! 1. **Watcher** – motion detection on the monitoring camera stream.
//! 2. **Capture** – the externally-triggered flight-camera state
//!    machine, synchronised to the strobe pulse train.
//! 3. **Detector** – classical (color-gated gradient voting) or
//!    neural (YOLO-style) ball detection on the strobed frame.
//! 4. **Solver** – 3D velocity, launch angles and spin from two
//!    strobed observations.
//! 5. **Trajectory** – carry/apex/flight-time through the physics
//!    collaborator.
//! 6. **Orchestrator** – binds the stages into one shot pipeline and
//!    publishes results.
//!
//! Host-framework pieces (the camera stack, the neural graph runtime,
//! the flight physics integrator, GPIO) are reached through traits so
//! the pipeline runs identically against hardware and test doubles.

pub mod ball;
pub mod calibrate;
pub mod capture;
pub mod detector;
pub mod neural;
pub mod orchestrator;
pub mod solver;
pub mod trajectory;
pub mod watcher;
pub mod web;

pub use ball::{Circle, GolfBall, ShotObservation};
pub use detector::{Detector, DetectorConfig, SearchMode};
pub use neural::{Detection, NeuralConfig, NeuralDetector};
pub use orchestrator::{Orchestrator, OrchestratorState, ShotResult};
pub use solver::{LaunchKinematics, SpinRates};
