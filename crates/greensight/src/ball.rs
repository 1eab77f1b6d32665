//! Ball observations and per-shot data.

use chrono::{DateTime, Utc};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A circle in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    /// Centre x, pixels.
    pub cx: f64,
    /// Centre y, pixels.
    pub cy: f64,
    /// Radius, pixels.
    pub r_px: f64,
}

impl Circle {
    pub fn new(cx: f64, cy: f64, r_px: f64) -> Self {
        Self { cx, cy, r_px }
    }

    /// Centre distance to another circle, pixels.
    pub fn center_distance(&self, other: &Circle) -> f64 {
        let dx = self.cx - other.cx;
        let dy = self.cy - other.cy;
        (dx * dx + dy * dy).sqrt()
    }

    /// Axis-aligned enclosing box as (x, y, w, h).
    pub fn enclosing_box(&self) -> [f64; 4] {
        [
            self.cx - self.r_px,
            self.cy - self.r_px,
            2.0 * self.r_px,
            2.0 * self.r_px,
        ]
    }
}

/// One detected ball: the image circle plus fields enriched by the
/// downstream stages. Created by a detection call, mutated by the 3D
/// projection and spin stages, never shared across shots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GolfBall {
    /// Detected circle in image coordinates.
    pub circle: Circle,
    /// 3D position in the camera frame, meters (set by unprojection).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_m: Option<[f64; 3]>,
    /// Surface rotation angle used by the spin stage, degrees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surface_angle_deg: Option<f64>,
    /// Detection confidence in [0, 1].
    pub confidence: f32,
    /// Composite quality score; lower is better.
    pub quality: f32,
}

impl GolfBall {
    pub fn from_circle(circle: Circle, confidence: f32, quality: f32) -> Self {
        Self {
            circle,
            position_m: None,
            surface_angle_deg: None,
            confidence,
            quality,
        }
    }

    /// Record the unprojected camera-frame position.
    pub fn set_position(&mut self, p: Vector3<f64>) {
        self.position_m = Some([p.x, p.y, p.z]);
    }

    pub fn position(&self) -> Option<Vector3<f64>> {
        self.position_m.map(|[x, y, z]| Vector3::new(x, y, z))
    }
}

/// Everything observed for one shot: the teed ball seen by camera 1
/// and the strobed sequence from camera 2. Owned by a single shot;
/// dropped when the shot is published or abandoned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShotObservation {
    /// Teed ball as last seen by the monitoring camera.
    pub teed_ball: Option<GolfBall>,
    /// Strobed ball instances from the flight camera, in flash order.
    pub strobed: Vec<GolfBall>,
    /// When motion was detected.
    pub triggered_at: DateTime<Utc>,
    /// Inter-flash interval of the strobe train, seconds.
    pub flash_interval_s: f64,
}

impl ShotObservation {
    pub fn new(flash_interval_s: f64) -> Self {
        Self {
            teed_ball: None,
            strobed: Vec::new(),
            triggered_at: Utc::now(),
            flash_interval_s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enclosing_box_is_centered_on_the_circle() {
        let c = Circle::new(100.0, 50.0, 10.0);
        assert_eq!(c.enclosing_box(), [90.0, 40.0, 20.0, 20.0]);
    }

    #[test]
    fn center_distance_is_euclidean() {
        let a = Circle::new(0.0, 0.0, 5.0);
        let b = Circle::new(3.0, 4.0, 5.0);
        assert_eq!(a.center_distance(&b), 5.0);
    }

    #[test]
    fn ball_position_roundtrips_through_serde_fields() {
        let mut ball = GolfBall::from_circle(Circle::new(10.0, 20.0, 8.0), 0.9, 0.1);
        ball.set_position(Vector3::new(0.1, -0.2, 0.6));
        let p = ball.position().unwrap();
        assert_eq!(p.z, 0.6);
    }
}
