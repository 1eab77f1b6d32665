//! Trajectory metrics from the launch state.
//!
//! Integration is the physics collaborator's job, behind
//! [`FlightPhysics`]. This shim validates the launch state, fills in
//! atmospheric defaults, and reduces the returned polyline to the
//! numbers the UI wants. Invalid input yields an `ok = false` record
//! with a reason, never an error.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Polyline sample spacing produced by the physics collaborator, s.
pub const TRAJECTORY_DT_S: f64 = 0.01;

/// Validation bounds.
const SPEED_RANGE_MPS: (f64, f64) = (2.0, 100.0);
const VERTICAL_RANGE_DEG: (f64, f64) = (-10.0, 60.0);
const MAX_HORIZONTAL_DEG: f64 = 45.0;
const MAX_SPIN_RPM: f64 = 15_000.0;

/// Launch state handed to the physics collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConditions {
    pub ball_speed_mps: f64,
    pub vertical_launch_deg: f64,
    pub horizontal_launch_deg: f64,
    pub backspin_rpm: f64,
    pub sidespin_rpm: f64,
}

/// Optional atmospheric state; missing fields take the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Atmosphere {
    pub temperature_c: Option<f64>,
    pub elevation_m: Option<f64>,
    pub wind_speed_mps: Option<f64>,
    pub wind_direction_deg: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub pressure_hpa: Option<f64>,
}

impl Atmosphere {
    /// Apply standard-day defaults to any missing field.
    pub fn with_defaults(&self) -> Atmosphere {
        Atmosphere {
            temperature_c: Some(self.temperature_c.unwrap_or(21.1)),
            elevation_m: Some(self.elevation_m.unwrap_or(0.0)),
            wind_speed_mps: Some(self.wind_speed_mps.unwrap_or(0.0)),
            wind_direction_deg: Some(self.wind_direction_deg.unwrap_or(0.0)),
            humidity_pct: Some(self.humidity_pct.unwrap_or(50.0)),
            pressure_hpa: Some(self.pressure_hpa.unwrap_or(1013.25)),
        }
    }
}

#[derive(Debug, Error)]
pub enum PhysicsError {
    #[error("physics integration failed: {0}")]
    Integration(String),
}

/// The flight physics collaborator: integrates the launch state into a
/// polyline of [lateral, downrange, height] meters sampled every
/// [`TRAJECTORY_DT_S`].
pub trait FlightPhysics {
    fn simulate(
        &self,
        launch: &LaunchConditions,
        atmosphere: &Atmosphere,
    ) -> Result<Vec<[f64; 3]>, PhysicsError>;
}

/// Reduced trajectory record published to the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryResult {
    pub ok: bool,
    /// Reason when `ok` is false; informational otherwise.
    pub message: String,
    pub carry_m: f64,
    pub max_height_m: f64,
    pub flight_time_s: f64,
    pub landing_angle_deg: f64,
}

impl TrajectoryResult {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            carry_m: 0.0,
            max_height_m: 0.0,
            flight_time_s: 0.0,
            landing_angle_deg: 0.0,
        }
    }
}

fn validate(launch: &LaunchConditions) -> Result<(), String> {
    let (lo, hi) = SPEED_RANGE_MPS;
    if !(lo..=hi).contains(&launch.ball_speed_mps) {
        return Err(format!(
            "ball speed {:.1} m/s outside [{lo}, {hi}]",
            launch.ball_speed_mps
        ));
    }
    let (vlo, vhi) = VERTICAL_RANGE_DEG;
    if !(vlo..=vhi).contains(&launch.vertical_launch_deg) {
        return Err(format!(
            "vertical launch {:.1}° outside [{vlo}, {vhi}]",
            launch.vertical_launch_deg
        ));
    }
    if launch.horizontal_launch_deg.abs() > MAX_HORIZONTAL_DEG {
        return Err(format!(
            "horizontal launch {:.1}° beyond ±{MAX_HORIZONTAL_DEG}",
            launch.horizontal_launch_deg
        ));
    }
    if launch.backspin_rpm.abs() > MAX_SPIN_RPM || launch.sidespin_rpm.abs() > MAX_SPIN_RPM {
        return Err("spin rate beyond the plausible range".into());
    }
    Ok(())
}

/// Trajectory front-end over a physics implementation.
pub struct TrajectoryCalculator<P: FlightPhysics> {
    physics: P,
}

impl<P: FlightPhysics> TrajectoryCalculator<P> {
    pub fn new(physics: P) -> Self {
        Self { physics }
    }

    /// Carry, apex, flight time and landing angle for one launch.
    pub fn calculate(&self, launch: &LaunchConditions, atmosphere: &Atmosphere) -> TrajectoryResult {
        if let Err(reason) = validate(launch) {
            return TrajectoryResult::failed(reason);
        }
        let atmosphere = atmosphere.with_defaults();
        let polyline = match self.physics.simulate(launch, &atmosphere) {
            Ok(points) if points.len() >= 2 => points,
            Ok(_) => return TrajectoryResult::failed("physics returned a degenerate trajectory"),
            Err(err) => return TrajectoryResult::failed(err.to_string()),
        };

        let (landing_idx, carry_m, flight_time_s) = landing_point(&polyline);
        let max_height_m = polyline.iter().map(|p| p[2]).fold(f64::MIN, f64::max);
        let landing_angle_deg = {
            let a = &polyline[landing_idx.saturating_sub(1)];
            let b = &polyline[landing_idx];
            (b[2] - a[2]).atan2(b[1] - a[1]).to_degrees()
        };
        debug!(carry_m, max_height_m, flight_time_s, "trajectory reduced");

        TrajectoryResult {
            ok: true,
            message: String::new(),
            carry_m,
            max_height_m,
            flight_time_s,
            landing_angle_deg,
        }
    }

    /// The raw polyline; empty when the input is invalid.
    pub fn full_trajectory(
        &self,
        launch: &LaunchConditions,
        atmosphere: &Atmosphere,
    ) -> Vec<[f64; 3]> {
        if validate(launch).is_err() {
            return Vec::new();
        }
        self.physics
            .simulate(launch, &atmosphere.with_defaults())
            .unwrap_or_default()
    }
}

/// First ground crossing after launch, linearly interpolated; falls
/// back to the last point when the polyline never descends to zero.
fn landing_point(polyline: &[[f64; 3]]) -> (usize, f64, f64) {
    for i in 1..polyline.len() {
        let (prev, cur) = (&polyline[i - 1], &polyline[i]);
        if cur[2] <= 0.0 && prev[2] > 0.0 {
            let t = prev[2] / (prev[2] - cur[2]);
            let carry = prev[1] + t * (cur[1] - prev[1]);
            let time = (i as f64 - 1.0 + t) * TRAJECTORY_DT_S;
            return (i, carry, time);
        }
    }
    let last = polyline.len() - 1;
    (
        last,
        polyline[last][1],
        last as f64 * TRAJECTORY_DT_S,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Drag-free projectile integration for testing the shim.
    struct Parabolic;

    impl FlightPhysics for Parabolic {
        fn simulate(
            &self,
            launch: &LaunchConditions,
            _atmosphere: &Atmosphere,
        ) -> Result<Vec<[f64; 3]>, PhysicsError> {
            const G: f64 = 9.80665;
            let v = launch.ball_speed_mps;
            let vert = launch.vertical_launch_deg.to_radians();
            let horiz = launch.horizontal_launch_deg.to_radians();
            let vz = v * vert.sin();
            let vy = v * vert.cos() * horiz.cos();
            let vx = v * vert.cos() * horiz.sin();
            let mut points = Vec::new();
            let mut t = 0.0;
            loop {
                let z = vz * t - 0.5 * G * t * t;
                points.push([vx * t, vy * t, z]);
                if z < 0.0 && t > 0.0 {
                    break;
                }
                t += TRAJECTORY_DT_S;
            }
            Ok(points)
        }
    }

    fn launch(speed: f64, vertical: f64) -> LaunchConditions {
        LaunchConditions {
            ball_speed_mps: speed,
            vertical_launch_deg: vertical,
            horizontal_launch_deg: 0.0,
            backspin_rpm: 2800.0,
            sidespin_rpm: 150.0,
        }
    }

    #[test]
    fn parabolic_carry_matches_the_closed_form() {
        let calc = TrajectoryCalculator::new(Parabolic);
        let result = calc.calculate(&launch(60.0, 14.0), &Atmosphere::default());
        assert!(result.ok, "{}", result.message);
        const G: f64 = 9.80665;
        let expected = 60.0f64.powi(2) * (2.0 * 14.0f64.to_radians()).sin() / G;
        assert_abs_diff_eq!(result.carry_m, expected, epsilon = expected * 0.01);
        assert!(result.max_height_m > 0.0);
        assert!(result.flight_time_s > 1.0);
        assert!(result.landing_angle_deg < 0.0);
    }

    #[test]
    fn invalid_speed_reports_ok_false_with_a_reason() {
        let calc = TrajectoryCalculator::new(Parabolic);
        let result = calc.calculate(&launch(500.0, 14.0), &Atmosphere::default());
        assert!(!result.ok);
        assert!(result.message.contains("ball speed"));
        assert_eq!(result.carry_m, 0.0);
    }

    #[test]
    fn sideways_launch_is_rejected() {
        let calc = TrajectoryCalculator::new(Parabolic);
        let mut bad = launch(60.0, 14.0);
        bad.horizontal_launch_deg = 60.0;
        assert!(!calc.calculate(&bad, &Atmosphere::default()).ok);
        assert!(calc.full_trajectory(&bad, &Atmosphere::default()).is_empty());
    }

    #[test]
    fn defaults_fill_every_missing_atmosphere_field() {
        let atmos = Atmosphere {
            temperature_c: Some(30.0),
            ..Default::default()
        }
        .with_defaults();
        assert_eq!(atmos.temperature_c, Some(30.0));
        assert_eq!(atmos.humidity_pct, Some(50.0));
        assert_eq!(atmos.pressure_hpa, Some(1013.25));
    }
}
