//! Camera self-calibration against a known-position ball.
//!
//! The rig places a ball at an exact offset from each camera. From the
//! measured ball radius at that known distance the focal length falls
//! out directly; the pointing angles follow from the pixel offset of
//! the ball against where a straight-out camera would see it. The
//! system config file is rewritten in place, with a timestamped backup
//! beside it; nothing is written on any rejection path.

use chrono::Utc;
use image::RgbImage;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::capture::port::CaptureError;
use crate::detector::{Detector, DetectorConfig, SearchMode};
use crate::web::WebPublisher;
use greensight_core::camera::{CamId, CameraSpec, FOCAL_LENGTH_RANGE_MM, MAX_POINTING_ANGLE_DEG};
use greensight_core::config::{ConfigError, ConfigStore};
use greensight_core::rig::{Enclosure, RigError, RigKind, RigTable};

/// Still-capture source used during calibration.
pub trait StillCamera {
    fn capture_still(&mut self) -> Result<RgbImage, CaptureError>;
}

/// An expected radius beyond this is a geometry error, not a ball.
const MAX_REASONABLE_RADIUS_PX: f64 = 1000.0;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error(transparent)]
    Rig(#[from] RigError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("too many detection failures ({failures} > {tolerated})")]
    TooManyFailures { failures: usize, tolerated: usize },
    #[error("could not detect the ball for the angle measurement")]
    AngleDetectionFailed,
    #[error("expected ball radius {0:.1} px is not plausible")]
    ImplausibleRadius(f64),
    #[error("average focal length {0:.2} mm outside the sane lens range")]
    FocalOutOfRange(f64),
    #[error("camera angles ({0:.1}°, {1:.1}°) exceed the mounting limit")]
    AngleOutOfRange(f64, f64),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Calibration procedure parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibratorConfig {
    pub rig: RigKind,
    pub enclosure: Enclosure,
    /// Stills averaged for the focal length.
    pub focal_length_samples: usize,
    /// Detection failures tolerated before giving up.
    pub tolerable_failures: usize,
    /// Initial radius window extension below the expected radius, px.
    pub radius_offset_below: f64,
    /// Initial radius window extension above the expected radius, px.
    pub radius_offset_above: f64,
}

impl Default for CalibratorConfig {
    fn default() -> Self {
        Self {
            rig: RigKind::StraightOn,
            enclosure: Enclosure::V2,
            focal_length_samples: 5,
            tolerable_failures: 2,
            radius_offset_below: 18.0,
            radius_offset_above: 24.0,
        }
    }
}

impl CalibratorConfig {
    /// Read the procedure parameters from the config store.
    pub fn from_store(store: &ConfigStore) -> Self {
        let defaults = Self::default();
        let rig = RigKind::from_config_code(
            store.get_int("gs_config.calibration.kCalibrationRigType", 1),
        )
        .unwrap_or(defaults.rig);
        let enclosure = match store.get_int("gs_config.calibration.kEnclosureVersion", 2) {
            3 => Enclosure::V3,
            _ => Enclosure::V2,
        };
        Self {
            rig,
            enclosure,
            focal_length_samples: store
                .get_int(
                    "gs_config.calibration.kNumberPicturesForFocalLengthAverage",
                    defaults.focal_length_samples as i64,
                )
                .max(1) as usize,
            tolerable_failures: store
                .get_int(
                    "gs_config.calibration.kNumberOfCalibrationFailuresToTolerate",
                    defaults.tolerable_failures as i64,
                )
                .max(0) as usize,
            radius_offset_below: defaults.radius_offset_below,
            radius_offset_above: defaults.radius_offset_above,
        }
    }
}

/// Outcome of a successful calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub camera: CamId,
    pub focal_length_mm: f64,
    pub angles_deg: [f64; 2],
    pub samples_used: usize,
    /// Backup written before the config rewrite, when one was made.
    pub backup_path: Option<PathBuf>,
}

/// Runs the auto-calibration procedure.
pub struct Calibrator {
    config: CalibratorConfig,
    rig_table: RigTable,
}

impl Calibrator {
    pub fn new(config: CalibratorConfig, rig_table: RigTable) -> Self {
        Self { config, rig_table }
    }

    /// Calibrate one camera: recover the focal length and pointing
    /// angles, persist them into the system config, and notify the
    /// web collaborator best-effort.
    pub fn auto_calibrate<C: StillCamera>(
        &self,
        spec: &CameraSpec,
        camera: &mut C,
        store: &ConfigStore,
        publisher: Option<&WebPublisher>,
    ) -> Result<CalibrationReport, CalibrationError> {
        let ball_position =
            self.rig_table
                .ball_position(self.config.rig, self.config.enclosure, spec.id)?;
        let distance = ball_position.norm();
        info!(camera = spec.id.number(), distance, "auto-calibration start");

        // The camera calibrates from its lens-nominal focal length;
        // the calibrated value is exactly what this run recomputes.
        let mut working = spec.clone();
        working.focal_length_mm = working.lens.nominal_focal_mm();

        let expected = working
            .expected_radius_px(distance, working.resolution.0)
            .unwrap_or(0.0);
        if expected <= 0.0 || expected > MAX_REASONABLE_RADIUS_PX {
            return Err(CalibrationError::ImplausibleRadius(expected));
        }
        let mut detector_config = DetectorConfig::for_camera(&working, distance);
        detector_config.set_radius_window(
            (expected - self.config.radius_offset_below).max(1.0),
            expected + self.config.radius_offset_above,
        );
        if detector_config.max_radius() > MAX_REASONABLE_RADIUS_PX {
            return Err(CalibrationError::ImplausibleRadius(detector_config.max_radius()));
        }

        // Camera 1 sees a classically placed ball; camera 2's view is
        // closer to a strobed flight picture.
        let mode = match spec.id {
            CamId::Cam1 => SearchMode::PlacedBall,
            CamId::Cam2 => SearchMode::Strobed,
        };

        let detector = Detector::new(detector_config.clone());
        let mut focal_sum = 0.0;
        let mut samples_used = 0usize;
        let mut failures = 0usize;
        let mut last_image: Option<RgbImage> = None;

        while samples_used < self.config.focal_length_samples {
            let image = camera.capture_still()?;
            match self.measure_focal(&detector, &working, &image, mode, distance) {
                Some(focal) => {
                    debug!(focal, "sampled focal length");
                    focal_sum += focal;
                    samples_used += 1;
                    last_image = Some(image);
                }
                None => {
                    failures += 1;
                    if failures > self.config.tolerable_failures {
                        return Err(CalibrationError::TooManyFailures {
                            failures,
                            tolerated: self.config.tolerable_failures,
                        });
                    }
                    warn!(failures, "focal-length sample failed; retrying");
                }
            }
        }

        let focal = focal_sum / samples_used as f64;
        let (focal_min, focal_max) = FOCAL_LENGTH_RANGE_MM;
        if !(focal_min..=focal_max).contains(&focal) {
            return Err(CalibrationError::FocalOutOfRange(focal));
        }
        info!(focal, samples_used, "average focal length accepted");
        working.focal_length_mm = focal;

        // Narrow the window with the improved focal length and measure
        // the pointing angles on one fresh capture.
        let refined_expected = working
            .expected_radius_px(distance, working.resolution.0)
            .ok_or(CalibrationError::ImplausibleRadius(0.0))?;
        let mut angle_detector_config = detector_config;
        angle_detector_config.set_radius_window(refined_expected * 0.9, refined_expected * 1.1);
        let angle_detector = Detector::new(angle_detector_config);

        let image = match last_image {
            Some(img) => img,
            None => camera.capture_still()?,
        };
        let ball = angle_detector
            .detect(&image, mode, None)
            .ok()
            .and_then(|balls| balls.into_iter().next())
            .ok_or(CalibrationError::AngleDetectionFailed)?;

        let angles = pointing_angles(&working, &ball.circle, &ball_position, distance);
        if angles[0].abs() > MAX_POINTING_ANGLE_DEG || angles[1].abs() > MAX_POINTING_ANGLE_DEG {
            return Err(CalibrationError::AngleOutOfRange(angles[0], angles[1]));
        }
        info!(x = angles[0], y = angles[1], "camera angles accepted");

        // Persist: config tree first, then the best-effort web push.
        let slot = spec.id.number();
        let focal_key = format!("gs_config.cameras.kCamera{slot}FocalLength");
        let angles_key = format!("gs_config.cameras.kCamera{slot}Angles");
        store.set_tree_value(&focal_key, json!(focal));
        store.set_tree_value(&angles_key, json!([angles[0], angles[1]]));

        let backup_path = match store.system_file_path() {
            Some(config_path) => {
                let stamp = Utc::now().format("%Y%m%d_%H%M%S");
                let backup = PathBuf::from(format!(
                    "{}_BACKUP_{stamp}.json",
                    config_path.display()
                ));
                std::fs::copy(&config_path, &backup).map_err(|source| ConfigError::Io {
                    path: backup.clone(),
                    source,
                })?;
                store.write_system_file(&config_path)?;
                info!(backup = %backup.display(), "system config rewritten");
                Some(backup)
            }
            None => {
                warn!("no system config path; calibration not persisted to disk");
                None
            }
        };

        if let Some(publisher) = publisher {
            publisher.update_calibration(&focal_key, &json!(focal));
            publisher.update_calibration(&angles_key, &json!([angles[0], angles[1]]));
        }

        Ok(CalibrationReport {
            camera: spec.id,
            focal_length_mm: focal,
            angles_deg: angles,
            samples_used,
            backup_path,
        })
    }

    /// One focal-length sample: detect the ball, convert its radius at
    /// the known distance. `None` on any miss.
    fn measure_focal(
        &self,
        detector: &Detector,
        spec: &CameraSpec,
        image: &RgbImage,
        mode: SearchMode,
        distance_m: f64,
    ) -> Option<f64> {
        let balls = detector.detect(image, mode, None).ok()?;
        let ball = balls.first()?;
        if ball.circle.r_px < 1.0 {
            return None;
        }
        spec.focal_length_from_radius(ball.circle.r_px, distance_m, spec.resolution.0)
    }
}

/// Pointing angles: the difference between where the camera actually
/// sees the ball (off image centre) and where a straight-out camera at
/// the same spot would see it.
fn pointing_angles(
    spec: &CameraSpec,
    circle: &crate::ball::Circle,
    ball_position: &Vector3<f64>,
    distance_m: f64,
) -> [f64; 2] {
    let dx = circle.cx - (spec.resolution.0 as f64 / 2.0).round();
    let dy = circle.cy - (spec.resolution.1 as f64 / 2.0).round();

    let x_offset_m = spec.x_offset_m(distance_m, dx, spec.resolution.0);
    // Positive is upward; image y grows downward.
    let y_offset_m = -spec.y_offset_m(distance_m, dy, spec.resolution.0);

    // Angles from the camera bore to the ball as imaged.
    let x_seen = -(x_offset_m / distance_m).atan().to_degrees();
    let y_seen = (y_offset_m / distance_m).atan().to_degrees();

    // Angles a straight-out camera would measure to the true position.
    let x_true = -(ball_position.x / ball_position.z).atan().to_degrees();
    let level_distance = (ball_position.x.powi(2) + ball_position.z.powi(2)).sqrt();
    let y_true = (ball_position.y / level_distance).atan().to_degrees();

    [x_true - x_seen, y_true - y_seen]
}
