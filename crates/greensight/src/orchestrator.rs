//! Shot pipeline orchestration.
//!
//! Binds the watcher, strobe driver, flight-capture loop, detector,
//! solver and trajectory shim into one cycle: watch → trigger →
//! capture → analyse → publish. Camera devices stay exclusive to
//! their loops (the watcher owns camera 1, flight capture owns camera
//! 2); the strobe pins fire from their own thread for the duration of
//! the train.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::ball::{Circle, GolfBall, ShotObservation};
use crate::capture::fsm::{run_flight_capture, CaptureOutcome, FlightCaptureConfig};
use crate::capture::gpio::{GpioError, PulseDriver, PulsePins};
use crate::capture::port::{CaptureError, Clock, TriggeredCamera};
use crate::detector::{DetectError, Detector, DetectorConfig, SearchMode};
use crate::neural::{GraphRuntime, NeuralConfig, NeuralDetector, NeuralError};
use crate::solver::{estimate_spin, solve_observation, SpinConfig, SpinEstimate};
use crate::trajectory::{Atmosphere, FlightPhysics, LaunchConditions, TrajectoryCalculator, TrajectoryResult};
use crate::watcher::{watch_for_motion, MonitorCamera, MotionConfig, MotionOutcome};
use crate::web::WebPublisher;
use greensight_core::camera::CameraSpec;
use greensight_core::config::ConfigStore;
use greensight_core::strobe::StrobePulseTrain;

/// Pipeline states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Watching,
    Triggered,
    Analysing,
    Publishing,
    Faulted,
}

/// Published record for one shot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShotResult {
    pub ok: bool,
    /// Reason when `ok` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub speed_mps: f64,
    pub vertical_launch_deg: f64,
    pub horizontal_launch_deg: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backspin_rpm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sidespin_rpm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rifle_rpm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trajectory: Option<TrajectoryResult>,
    pub ball_count: usize,
}

impl ShotResult {
    fn failure(reason: impl Into<String>, ball_count: usize) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
            speed_mps: 0.0,
            vertical_launch_deg: 0.0,
            horizontal_launch_deg: 0.0,
            backspin_rpm: None,
            sidespin_rpm: None,
            rifle_rpm: None,
            trajectory: None,
            ball_count,
        }
    }
}

/// How one cycle ended.
#[derive(Debug)]
pub enum CycleOutcome {
    Shot(Box<ShotResult>),
    /// Quit or run-flag shutdown before a shot completed.
    Stopped,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Neural(#[from] NeuralError),
    #[error(transparent)]
    Gpio(#[from] GpioError),
}

/// Which detector analyses the strobed frame.
pub enum DetectorBackend {
    Classical(Detector),
    Neural(Box<NeuralDetector>),
}

/// Orchestrator configuration pulled from the store.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub motion: MotionConfig,
    pub capture: FlightCaptureConfig,
    pub spin: SpinConfig,
    /// Ball travels right-to-left in camera 2's view.
    pub travel_right_to_left: bool,
}

impl OrchestratorConfig {
    pub fn from_store(store: &ConfigStore) -> Self {
        let defaults = Self {
            motion: MotionConfig::default(),
            capture: FlightCaptureConfig::default(),
            spin: SpinConfig::default(),
            travel_right_to_left: false,
        };
        Self {
            capture: FlightCaptureConfig {
                use_pre_image_subtraction: store.get_bool(
                    "gs_config.ball_exposure_selection.kUsePreImageSubtraction",
                    defaults.capture.use_pre_image_subtraction,
                ),
                ..defaults.capture
            },
            travel_right_to_left: store.get_bool(
                "gs_config.cameras.kBallTravelRightToLeft",
                defaults.travel_right_to_left,
            ),
            ..defaults
        }
    }
}

/// Binds the pipeline components for one process.
pub struct Orchestrator {
    store: Arc<ConfigStore>,
    config: OrchestratorConfig,
    backend: DetectorBackend,
    flight_camera_spec: CameraSpec,
    strobe_train: StrobePulseTrain,
    physics: Option<Box<dyn FlightPhysics>>,
    publisher: Option<WebPublisher>,
    running: Arc<AtomicBool>,
    state: Mutex<OrchestratorState>,
}

impl Orchestrator {
    /// Build from the config store. Selecting the neural backend
    /// requires a graph runtime; its init failure is unrecoverable.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<ConfigStore>,
        flight_camera_spec: CameraSpec,
        strobe_train: StrobePulseTrain,
        detector_config: DetectorConfig,
        neural_runtime: Option<&dyn GraphRuntime>,
        physics: Option<Box<dyn FlightPhysics>>,
        publisher: Option<WebPublisher>,
    ) -> Result<Self, OrchestratorError> {
        let config = OrchestratorConfig::from_store(&store);
        let method = store.get_string("gs_config.ball_identification.kDetectionMethod", "classical");
        let backend = match (method.as_str(), neural_runtime) {
            ("neural", Some(runtime)) => {
                let neural_config = NeuralConfig {
                    model_path: store
                        .get_string(
                            "gs_config.ball_identification.kModelPath",
                            "models/ball_640.onnx",
                        )
                        .into(),
                    ..NeuralConfig::default()
                };
                DetectorBackend::Neural(Box::new(NeuralDetector::initialize(
                    neural_config,
                    runtime,
                )?))
            }
            ("neural", None) => {
                warn!("neural detection requested but no runtime available; using classical");
                DetectorBackend::Classical(Detector::new(detector_config))
            }
            _ => DetectorBackend::Classical(Detector::new(detector_config)),
        };
        Ok(Self {
            store,
            config,
            backend,
            flight_camera_spec,
            strobe_train,
            physics,
            publisher,
            running: Arc::new(AtomicBool::new(true)),
            state: Mutex::new(OrchestratorState::Idle),
        })
    }

    /// Shared run flag; flipping it false tears every loop down.
    pub fn run_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: OrchestratorState) {
        *self.state.lock().unwrap() = state;
    }

    /// Inter-flash interval of the capture portion of the train, s.
    fn flash_interval_s(&self) -> f64 {
        let capture = self.strobe_train.capture();
        if capture.len() >= 2 {
            (capture[1].start_us - capture[0].start_us) as f64 * 1e-6
        } else {
            1e-3
        }
    }

    /// One full shot cycle: watch for motion, fire the strobe train
    /// while the flight FSM captures, analyse and publish.
    pub fn run_cycle<M, F, P, K>(
        &mut self,
        monitor: &mut M,
        flight: &mut F,
        driver: &mut PulseDriver<P>,
        clock: &K,
    ) -> Result<CycleOutcome, OrchestratorError>
    where
        M: MonitorCamera,
        F: TriggeredCamera,
        P: PulsePins + Send,
        K: Clock,
    {
        self.set_state(OrchestratorState::Watching);
        match watch_for_motion(monitor, self.config.motion, &self.running) {
            Ok(MotionOutcome::Moved) => {}
            Ok(MotionOutcome::Stopped) => return Ok(CycleOutcome::Stopped),
            Err(err) => {
                self.set_state(OrchestratorState::Faulted);
                return Err(err.into());
            }
        }

        self.set_state(OrchestratorState::Triggered);
        info!("motion detected; firing strobe train");

        // The pulse driver owns the GPIO lines on its own thread while
        // the flight FSM consumes the triggered frames.
        let capture_result = std::thread::scope(|scope| {
            let strobe_thread = scope.spawn(|| driver.fire(&self.strobe_train));
            let outcome = run_flight_capture(flight, clock, &self.config.capture, &self.running);
            match strobe_thread.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(%err, "strobe train failed"),
                Err(_) => error!("strobe thread panicked"),
            }
            outcome
        });

        let image = match capture_result {
            Ok(CaptureOutcome::Image(image)) => image,
            Ok(CaptureOutcome::Aborted) => return Ok(CycleOutcome::Stopped),
            Err(err) => {
                self.set_state(OrchestratorState::Faulted);
                return Err(err.into());
            }
        };

        self.set_state(OrchestratorState::Analysing);
        let shot = self.analyze_strobed_image(&image);

        self.set_state(OrchestratorState::Publishing);
        if let Some(publisher) = &self.publisher {
            match serde_json::to_value(&shot) {
                Ok(value) => {
                    publisher.publish_shot(&value);
                }
                Err(err) => warn!(%err, "shot serialization failed"),
            }
        }
        self.set_state(OrchestratorState::Watching);
        Ok(CycleOutcome::Shot(Box::new(shot)))
    }

    /// Detection → kinematics → spin → trajectory on the strobed frame.
    pub fn analyze_strobed_image(&mut self, image: &RgbImage) -> ShotResult {
        let balls = match self.detect_strobed(image) {
            Ok(balls) => balls,
            Err(reason) => return ShotResult::failure(reason, 0),
        };
        let ball_count = balls.len();
        if ball_count < 2 {
            return ShotResult::failure("fewer than two strobed ball images", ball_count);
        }

        // Order the two best detections along the travel direction and
        // hand them over as one owned observation.
        let mut pair = [balls[0].clone(), balls[1].clone()];
        let leftmost_first = pair[0].circle.cx <= pair[1].circle.cx;
        if leftmost_first == self.config.travel_right_to_left {
            pair.swap(0, 1);
        }
        let dt = self.flash_interval_s();
        let mut observation = ShotObservation::new(dt);
        observation.strobed = pair.to_vec();

        let kinematics = match solve_observation(&self.flight_camera_spec, &mut observation) {
            Ok(kin) => kin,
            Err(err) => return ShotResult::failure(err.to_string(), ball_count),
        };

        let gray = image::imageops::grayscale(image);
        let spin = estimate_spin(
            &gray,
            &observation.strobed[0].circle,
            &observation.strobed[1].circle,
            dt,
            &self.config.spin,
        );
        let (backspin, sidespin, rifle) = match &spin {
            SpinEstimate::Rates { rates, .. } => (
                Some(rates.backspin_rpm),
                Some(rates.sidespin_rpm),
                Some(rates.rifle_rpm),
            ),
            SpinEstimate::InsufficientFeatures => {
                warn!("insufficient surface features for spin");
                (None, None, None)
            }
        };

        let trajectory = self.physics.as_ref().map(|physics| {
            let launch = LaunchConditions {
                ball_speed_mps: kinematics.speed_mps,
                vertical_launch_deg: kinematics.vertical_launch_deg,
                horizontal_launch_deg: kinematics.horizontal_launch_deg,
                backspin_rpm: backspin.unwrap_or(0.0),
                sidespin_rpm: sidespin.unwrap_or(0.0),
            };
            TrajectoryCalculator::new(PhysicsRef(physics.as_ref()))
                .calculate(&launch, &Atmosphere::default())
        });

        ShotResult {
            ok: true,
            reason: None,
            speed_mps: kinematics.speed_mps,
            vertical_launch_deg: kinematics.vertical_launch_deg,
            horizontal_launch_deg: kinematics.horizontal_launch_deg,
            backspin_rpm: backspin,
            sidespin_rpm: sidespin,
            rifle_rpm: rifle,
            trajectory,
            ball_count,
        }
    }

    fn detect_strobed(&mut self, image: &RgbImage) -> Result<Vec<GolfBall>, String> {
        match &mut self.backend {
            DetectorBackend::Classical(detector) => {
                match detector.detect(image, SearchMode::Strobed, None) {
                    Ok(balls) => Ok(balls),
                    Err(DetectError::NoBall) => Ok(Vec::new()),
                    Err(err) => Err(err.to_string()),
                }
            }
            DetectorBackend::Neural(detector) => {
                let output = detector.detect(image).map_err(|e| e.to_string())?;
                Ok(output
                    .detections
                    .iter()
                    .map(|d| {
                        let circle = Circle::new(
                            (d.bbox.x + d.bbox.width / 2.0) as f64,
                            (d.bbox.y + d.bbox.height / 2.0) as f64,
                            ((d.bbox.width + d.bbox.height) / 4.0) as f64,
                        );
                        GolfBall::from_circle(circle, d.confidence, 1.0 - d.confidence)
                    })
                    .collect())
            }
        }
    }

    /// Read a fresh `tolerable_failures` setting; detection misses on a
    /// shot are surfaced after this many retries by the caller's loop.
    pub fn tolerable_failures(&self) -> usize {
        self.store
            .get_int("gs_config.calibration.kNumberOfCalibrationFailuresToTolerate", 2)
            .max(0) as usize
    }
}

/// Borrow adapter so the boxed physics can feed the calculator.
struct PhysicsRef<'a>(&'a dyn FlightPhysics);

impl FlightPhysics for PhysicsRef<'_> {
    fn simulate(
        &self,
        launch: &LaunchConditions,
        atmosphere: &Atmosphere,
    ) -> Result<Vec<[f64; 3]>, crate::trajectory::PhysicsError> {
        self.0.simulate(launch, atmosphere)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::gpio::NoopPins;
    use crate::capture::port::{CameraMessage, FrameHandle, FramePixels};
    use greensight_core::camera::{CamId, LensKind, Orientation, SensorModel};
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    struct ManualClock(Rc<Cell<u64>>);

    impl Clock for ManualClock {
        fn now_ms(&self) -> u64 {
            self.0.get()
        }
    }

    struct OneMotionMonitor {
        frames: VecDeque<u8>,
    }

    impl MonitorCamera for OneMotionMonitor {
        fn open(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }
        fn configure_video(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }
        fn start_encoder(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }
        fn start(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }
        fn stop(&mut self) {}
        fn stop_encoder(&mut self) {}
        fn wait(&mut self) -> CameraMessage {
            if self.frames.is_empty() {
                CameraMessage::Quit
            } else {
                CameraMessage::RequestComplete(FrameHandle(self.frames.len() as u64))
            }
        }
        fn with_frame<R>(
            &mut self,
            _handle: FrameHandle,
            read: impl FnOnce(FramePixels<'_>) -> R,
        ) -> Result<R, CaptureError> {
            let fill = self.frames.pop_front().unwrap_or(0);
            let data = vec![fill; 64 * 48 * 3];
            Ok(read(FramePixels {
                data: &data,
                width: 64,
                height: 48,
                stride: 64 * 3,
            }))
        }
    }

    struct StrobedFlightCamera {
        image: RgbImage,
        script: VecDeque<(u64, CameraMessage)>,
        clock: Rc<Cell<u64>>,
    }

    impl TriggeredCamera for StrobedFlightCamera {
        fn open(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }
        fn configure(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }
        fn start(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }
        fn stop(&mut self) {}
        fn wait(&mut self) -> CameraMessage {
            match self.script.pop_front() {
                Some((at, msg)) => {
                    self.clock.set(at);
                    msg
                }
                None => CameraMessage::Quit,
            }
        }
        fn with_frame<R>(
            &mut self,
            _handle: FrameHandle,
            read: impl FnOnce(FramePixels<'_>) -> R,
        ) -> Result<R, CaptureError> {
            Ok(read(FramePixels {
                data: self.image.as_raw(),
                width: self.image.width(),
                height: self.image.height(),
                stride: self.image.width() as usize * 3,
            }))
        }
    }

    struct Parabolic;

    impl FlightPhysics for Parabolic {
        fn simulate(
            &self,
            launch: &LaunchConditions,
            _atmosphere: &Atmosphere,
        ) -> Result<Vec<[f64; 3]>, crate::trajectory::PhysicsError> {
            const G: f64 = 9.80665;
            let v = launch.ball_speed_mps;
            let vert = launch.vertical_launch_deg.to_radians();
            let vz = v * vert.sin();
            let vy = v * vert.cos();
            let mut points = Vec::new();
            let mut t = 0.0;
            loop {
                let z = vz * t - 0.5 * G * t * t;
                points.push([0.0, vy * t, z]);
                if z < 0.0 && t > 0.0 {
                    break;
                }
                t += crate::trajectory::TRAJECTORY_DT_S;
            }
            Ok(points)
        }
    }

    fn flight_spec() -> CameraSpec {
        let mut spec = CameraSpec::new(
            CamId::Cam2,
            SensorModel::PiGlobalShutter,
            LensKind::Stock6mm,
            Orientation::Upright,
        );
        spec.resolution = (728, 544);
        spec
    }

    /// Strobed frame with two ball images whose radii encode range.
    fn strobed_image(spec: &CameraSpec) -> RgbImage {
        let mut img = RgbImage::from_pixel(spec.resolution.0, spec.resolution.1, image::Rgb([14, 14, 16]));
        for p in [
            nalgebra::Vector3::new(-0.02, 0.0, 0.50),
            nalgebra::Vector3::new(0.02, -0.01, 0.53),
        ] {
            let px = spec.project(&p).unwrap();
            let r = spec.expected_radius_px(p.norm(), spec.resolution.0).unwrap();
            for y in 0..spec.resolution.1 {
                for x in 0..spec.resolution.0 {
                    let dx = x as f64 - px[0];
                    let dy = y as f64 - px[1];
                    let dist = (dx * dx + dy * dy).sqrt();
                    let coverage = (r - dist + 0.5).clamp(0.0, 1.0);
                    if coverage > 0.0 {
                        let v = (16.0 + coverage * 216.0) as u8;
                        img.put_pixel(x, y, image::Rgb([v, v, v.saturating_sub(4)]));
                    }
                }
            }
        }
        img
    }

    fn orchestrator(spec: CameraSpec) -> Orchestrator {
        let store = Arc::new(ConfigStore::new());
        let distance = 0.52;
        let detector_config = DetectorConfig::for_camera(&spec, distance);
        let train = StrobePulseTrain::evenly_spaced(3, 1000, 6, 1000, 40).unwrap();
        Orchestrator::new(
            store,
            spec,
            train,
            detector_config,
            None,
            Some(Box::new(Parabolic)),
            None,
        )
        .unwrap()
    }

    #[test]
    fn full_cycle_produces_a_published_shot() {
        let spec = flight_spec();
        let image = strobed_image(&spec);
        let mut orch = orchestrator(spec);

        let clock_cell = Rc::new(Cell::new(0u64));
        let mut monitor = OneMotionMonitor {
            frames: vec![40, 40, 200].into(),
        };
        let trig = |t: u64| (t, CameraMessage::RequestComplete(FrameHandle(t)));
        let mut flight = StrobedFlightCamera {
            image,
            script: vec![trig(0), trig(50), trig(60), trig(70)].into(),
            clock: clock_cell.clone(),
        };
        let mut driver = PulseDriver::new(NoopPins::default(), 17, 27);

        let outcome = orch
            .run_cycle(&mut monitor, &mut flight, &mut driver, &ManualClock(clock_cell))
            .unwrap();
        match outcome {
            CycleOutcome::Shot(shot) => {
                assert!(shot.ok, "reason: {:?}", shot.reason);
                assert!(shot.ball_count >= 2);
                assert!(shot.speed_mps > 10.0);
                let trajectory = shot.trajectory.expect("trajectory attached");
                assert!(trajectory.ok);
                assert!(trajectory.carry_m > 0.0);
            }
            CycleOutcome::Stopped => panic!("expected a shot"),
        }
        assert_eq!(orch.state(), OrchestratorState::Watching);
    }

    #[test]
    fn quit_during_watching_stops_the_cycle() {
        let spec = flight_spec();
        let image = strobed_image(&spec);
        let mut orch = orchestrator(spec);
        let clock_cell = Rc::new(Cell::new(0u64));
        let mut monitor = OneMotionMonitor {
            frames: VecDeque::new(),
        };
        let mut flight = StrobedFlightCamera {
            image,
            script: VecDeque::new(),
            clock: clock_cell.clone(),
        };
        let mut driver = PulseDriver::new(NoopPins::default(), 17, 27);
        let outcome = orch
            .run_cycle(&mut monitor, &mut flight, &mut driver, &ManualClock(clock_cell))
            .unwrap();
        assert!(matches!(outcome, CycleOutcome::Stopped));
    }

    #[test]
    fn empty_frame_yields_a_failure_record_not_a_panic() {
        let spec = flight_spec();
        let mut orch = orchestrator(spec.clone());
        let blank = RgbImage::from_pixel(spec.resolution.0, spec.resolution.1, image::Rgb([10, 10, 10]));
        let shot = orch.analyze_strobed_image(&blank);
        assert!(!shot.ok);
        assert_eq!(shot.ball_count, 0);
    }

    #[test]
    fn detection_method_falls_back_without_a_runtime() {
        let store = Arc::new(ConfigStore::new());
        store.set_override("gs_config.ball_identification.kDetectionMethod", "neural");
        let spec = flight_spec();
        let orch = Orchestrator::new(
            store,
            spec.clone(),
            StrobePulseTrain::evenly_spaced(3, 1000, 6, 500, 40).unwrap(),
            DetectorConfig::for_camera(&spec, 0.52),
            None,
            None,
            None,
        )
        .unwrap();
        assert!(matches!(orch.backend, DetectorBackend::Classical(_)));
    }

    #[test]
    fn config_store_defaults_build_an_orchestrator_config() {
        let store = ConfigStore::new();
        store.set_override("gs_config.ball_exposure_selection.kUsePreImageSubtraction", "1");
        let cfg = OrchestratorConfig::from_store(&store);
        assert!(cfg.capture.use_pre_image_subtraction);
    }
}
