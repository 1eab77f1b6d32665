//! Launch kinematics from two strobed ball observations.
//!
//! Both circles are unprojected with the calibrated focal length and
//! their measured radii (radius encodes range for a monocular view).
//! The launch frame is x lateral (right of the target line), y
//! downrange, z up; camera-frame points map in after the pointing-
//! angle correction.

pub mod spin;

pub use spin::{estimate_spin, SpinConfig, SpinEstimate, SpinRates};

use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::ball::{GolfBall, ShotObservation};
use greensight_core::camera::CameraSpec;

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("need two strobed balls, got {0}")]
    TooFewBalls(usize),
    #[error("inter-flash interval must be positive")]
    ZeroInterval,
    #[error("ball radius {0:.2} px is too small to range")]
    DegenerateRadius(f64),
    #[error("observation could not be unprojected")]
    Unprojectable,
}

/// Solved launch state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchKinematics {
    /// First strobed position, launch frame, meters.
    pub p1_m: [f64; 3],
    /// Second strobed position, launch frame, meters.
    pub p2_m: [f64; 3],
    /// Velocity vector, launch frame, m/s.
    pub velocity_mps: [f64; 3],
    /// Launch speed, m/s.
    pub speed_mps: f64,
    /// Vertical launch angle, degrees above horizontal.
    pub vertical_launch_deg: f64,
    /// Horizontal launch angle, degrees right of the target line.
    pub horizontal_launch_deg: f64,
}

/// Undo the camera's pointing angles, then map the camera frame
/// (x right, y down, z bore) into the launch frame.
fn camera_to_launch(camera: &CameraSpec, p_cam: Vector3<f64>) -> Vector3<f64> {
    let x_angle = camera.angles_deg[0].to_radians();
    let y_angle = camera.angles_deg[1].to_radians();
    // Pointing correction: yaw about the vertical image axis, then
    // pitch about the horizontal image axis.
    let yaw = Rotation3::from_axis_angle(&Vector3::y_axis(), x_angle);
    let pitch = Rotation3::from_axis_angle(&Vector3::x_axis(), y_angle);
    let corrected = yaw * pitch * p_cam;
    // Camera x -> lateral, camera z -> downrange, camera -y -> up.
    Vector3::new(corrected.x, corrected.z, -corrected.y)
}

/// Solve velocity and launch angles from two strobed balls seen
/// `dt_s` apart.
pub fn solve_launch(
    camera: &CameraSpec,
    first: &GolfBall,
    second: &GolfBall,
    dt_s: f64,
) -> Result<LaunchKinematics, SolverError> {
    if dt_s <= 0.0 {
        return Err(SolverError::ZeroInterval);
    }
    let width = camera.resolution.0;
    let mut positions = [Vector3::zeros(); 2];
    for (slot, ball) in positions.iter_mut().zip([first, second]) {
        let r = ball.circle.r_px;
        if r < 1.0 {
            return Err(SolverError::DegenerateRadius(r));
        }
        let range = camera
            .distance_from_radius(r, width)
            .ok_or(SolverError::Unprojectable)?;
        let p_cam = camera
            .unproject_at_range([ball.circle.cx, ball.circle.cy], range)
            .ok_or(SolverError::Unprojectable)?;
        *slot = camera_to_launch(camera, p_cam);
    }

    let velocity = (positions[1] - positions[0]) / dt_s;
    let speed = velocity.norm();
    let horizontal_speed = (velocity.x * velocity.x + velocity.y * velocity.y).sqrt();
    let vertical_deg = velocity.z.atan2(horizontal_speed).to_degrees();
    let horizontal_deg = velocity.x.atan2(velocity.y).to_degrees();
    debug!(speed, vertical_deg, horizontal_deg, "launch solved");

    Ok(LaunchKinematics {
        p1_m: positions[0].into(),
        p2_m: positions[1].into(),
        velocity_mps: velocity.into(),
        speed_mps: speed,
        vertical_launch_deg: vertical_deg,
        horizontal_launch_deg: horizontal_deg,
    })
}

/// Solve from a shot observation, enriching the first two strobed
/// balls with their 3D positions.
pub fn solve_observation(
    camera: &CameraSpec,
    observation: &mut ShotObservation,
) -> Result<LaunchKinematics, SolverError> {
    if observation.strobed.len() < 2 {
        return Err(SolverError::TooFewBalls(observation.strobed.len()));
    }
    let (first, second) = (observation.strobed[0].clone(), observation.strobed[1].clone());
    let kin = solve_launch(camera, &first, &second, observation.flash_interval_s)?;
    observation.strobed[0].set_position(Vector3::from(kin.p1_m));
    observation.strobed[1].set_position(Vector3::from(kin.p2_m));
    Ok(kin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ball::Circle;
    use approx::assert_abs_diff_eq;
    use greensight_core::camera::{CamId, LensKind, Orientation, SensorModel};

    fn camera() -> CameraSpec {
        CameraSpec::new(
            CamId::Cam2,
            SensorModel::PiGlobalShutter,
            LensKind::Stock6mm,
            Orientation::Upright,
        )
    }

    /// Project a camera-frame point to a ball observation (pixel +
    /// radius for its range).
    fn observe(camera: &CameraSpec, p_cam: Vector3<f64>) -> GolfBall {
        let px = camera.project(&p_cam).unwrap();
        let range = p_cam.norm();
        let r = camera.expected_radius_px(range, camera.resolution.0).unwrap();
        GolfBall::from_circle(Circle::new(px[0], px[1], r), 0.9, 0.1)
    }

    #[test]
    fn straight_downrange_shot_has_zero_angles() {
        let cam = camera();
        let b1 = observe(&cam, Vector3::new(0.0, 0.0, 0.50));
        let b2 = observe(&cam, Vector3::new(0.0, 0.0, 0.56));
        let kin = solve_launch(&cam, &b1, &b2, 0.001).unwrap();
        // 0.06 m in 1 ms = 60 m/s.
        assert_abs_diff_eq!(kin.speed_mps, 60.0, epsilon = 0.5);
        assert_abs_diff_eq!(kin.vertical_launch_deg, 0.0, epsilon = 0.5);
        assert_abs_diff_eq!(kin.horizontal_launch_deg, 0.0, epsilon = 0.5);
    }

    #[test]
    fn rising_shot_has_positive_vertical_angle() {
        let cam = camera();
        // Camera y points down, so upward motion is -y.
        let b1 = observe(&cam, Vector3::new(0.0, 0.0, 0.50));
        let b2 = observe(&cam, Vector3::new(0.0, -0.02, 0.55));
        let kin = solve_launch(&cam, &b1, &b2, 0.001).unwrap();
        let expected = (0.02f64 / 0.05).atan().to_degrees();
        assert_abs_diff_eq!(kin.vertical_launch_deg, expected, epsilon = 1.0);
        assert!(kin.velocity_mps[2] > 0.0);
    }

    #[test]
    fn pushed_shot_has_positive_horizontal_angle() {
        let cam = camera();
        let b1 = observe(&cam, Vector3::new(0.0, 0.0, 0.50));
        let b2 = observe(&cam, Vector3::new(0.015, 0.0, 0.55));
        let kin = solve_launch(&cam, &b1, &b2, 0.001).unwrap();
        assert!(kin.horizontal_launch_deg > 10.0);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let cam = camera();
        let b = observe(&cam, Vector3::new(0.0, 0.0, 0.5));
        assert!(matches!(
            solve_launch(&cam, &b, &b, 0.0),
            Err(SolverError::ZeroInterval)
        ));
    }

    #[test]
    fn observation_solver_requires_two_balls() {
        let cam = camera();
        let mut obs = ShotObservation::new(0.001);
        obs.strobed
            .push(observe(&cam, Vector3::new(0.0, 0.0, 0.5)));
        assert!(matches!(
            solve_observation(&cam, &mut obs),
            Err(SolverError::TooFewBalls(1))
        ));
    }

    #[test]
    fn observation_solver_enriches_ball_positions() {
        let cam = camera();
        let mut obs = ShotObservation::new(0.001);
        obs.strobed
            .push(observe(&cam, Vector3::new(0.0, 0.0, 0.50)));
        obs.strobed
            .push(observe(&cam, Vector3::new(0.0, 0.0, 0.56)));
        solve_observation(&cam, &mut obs).unwrap();
        assert!(obs.strobed[0].position().is_some());
        assert!(obs.strobed[1].position().is_some());
    }
}
