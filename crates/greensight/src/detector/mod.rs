//! Classical ball detector.
//!
//! A gated circle detector: color mask → gradient-voting candidates →
//! composite scoring with search-mode tie-breaks → non-maximum
//! suppression. The neural detector in [`crate::neural`] is the
//! alternate backend selected by [`SearchMode::External`].

pub mod hough;
pub mod mask;
pub mod nms;
pub mod scoring;

pub use hough::{CircleCandidate, VoteConfig};
pub use mask::ColorBand;
pub use scoring::ScoreWeights;

use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::ball::{Circle, GolfBall};
use greensight_core::camera::CameraSpec;

/// What kind of scene the detector should assume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchMode {
    /// One stationary teed ball with a predictable radius.
    PlacedBall,
    /// Multiple faint, possibly overlapping balls along a flight path.
    Strobed,
    /// Slow ball near the ground; placed-ball gates, wider window.
    Putting,
    /// Delegate to the neural detector.
    External,
}

/// Rectangular region of interest in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("no ball found")]
    NoBall,
    #[error("radius window [{min:.1}, {max:.1}] px is degenerate")]
    BadRadiusWindow { min: f64, max: f64 },
    #[error("search mode External is handled by the neural detector")]
    ExternalMode,
    #[error("region of interest lies outside the image")]
    RoiOutOfBounds,
}

/// Detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Expected ball radius in pixels at the working distance.
    pub expected_radius_px: f64,
    /// Window extension below the expected radius, pixels.
    pub radius_offset_below: f64,
    /// Window extension above the expected radius, pixels.
    pub radius_offset_above: f64,
    /// Color gate around the reference ball color.
    pub color: ColorBand,
    /// Candidate voting controls.
    pub vote: VoteConfig,
    /// Score term weights.
    pub weights: ScoreWeights,
    /// IoU above which overlapping circles are suppressed.
    pub nms_iou: f64,
    /// Worst acceptable composite score.
    pub max_quality: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            expected_radius_px: 60.0,
            radius_offset_below: 18.0,
            radius_offset_above: 24.0,
            color: ColorBand::default(),
            vote: VoteConfig::default(),
            weights: ScoreWeights::default(),
            nms_iou: 0.4,
            max_quality: 0.85,
        }
    }
}

impl DetectorConfig {
    /// Derive the expected radius from a camera spec and the known
    /// distance to the ball.
    pub fn for_camera(camera: &CameraSpec, distance_m: f64) -> Self {
        let expected = camera
            .expected_radius_px(distance_m, camera.resolution.0)
            .unwrap_or(60.0);
        Self {
            expected_radius_px: expected,
            ..Default::default()
        }
    }

    /// Replace the radius window with explicit bounds.
    pub fn set_radius_window(&mut self, min: f64, max: f64) {
        self.expected_radius_px = 0.5 * (min + max);
        self.radius_offset_below = self.expected_radius_px - min;
        self.radius_offset_above = max - self.expected_radius_px;
    }

    pub fn min_radius(&self) -> f64 {
        (self.expected_radius_px - self.radius_offset_below).max(1.0)
    }

    pub fn max_radius(&self) -> f64 {
        self.expected_radius_px + self.radius_offset_above
    }
}

/// The classical detection entry point. Create once, detect on many
/// frames.
#[derive(Debug, Clone, Default)]
pub struct Detector {
    config: DetectorConfig,
}

impl Detector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut DetectorConfig {
        &mut self.config
    }

    /// Find ball circles in an image.
    ///
    /// Returned balls are sorted best-first, with radii inside the
    /// configured window and pairwise centre distance of at least half
    /// the minimum radius.
    pub fn detect(
        &self,
        image: &RgbImage,
        mode: SearchMode,
        roi: Option<Roi>,
    ) -> Result<Vec<GolfBall>, DetectError> {
        if mode == SearchMode::External {
            return Err(DetectError::ExternalMode);
        }
        let (r_min, r_max) = (self.config.min_radius(), self.config.max_radius());
        if r_max <= r_min {
            return Err(DetectError::BadRadiusWindow {
                min: r_min,
                max: r_max,
            });
        }

        let (view, x_off, y_off) = match roi {
            Some(r) => {
                let (w, h) = image.dimensions();
                if r.x + r.width > w || r.y + r.height > h || r.width == 0 || r.height == 0 {
                    return Err(DetectError::RoiOutOfBounds);
                }
                let sub = image::imageops::crop_imm(image, r.x, r.y, r.width, r.height).to_image();
                (sub, r.x as f64, r.y as f64)
            }
            None => (image.clone(), 0.0, 0.0),
        };

        let gray = image::imageops::grayscale(&view);
        let ball_mask = mask::color_mask(&view, &self.config.color);
        let masked_gray = gate_by_mask(&gray, &ball_mask);

        let candidates = hough::find_circles(&masked_gray, r_min, r_max, &self.config.vote);
        trace!(candidates = candidates.len(), "vote stage complete");
        if candidates.is_empty() {
            return Err(DetectError::NoBall);
        }

        let collinear = match mode {
            SearchMode::Strobed => scoring::collinearity_bonus(&candidates, self.config.expected_radius_px),
            _ => vec![0.0; candidates.len()],
        };

        let (w, h) = view.dimensions();
        let mut scored: Vec<(CircleCandidate, f32)> = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let mut score = scoring::composite_score(
                    &gray,
                    &ball_mask,
                    c,
                    self.config.expected_radius_px,
                    &self.config.weights,
                );
                match mode {
                    SearchMode::Strobed => {
                        score -= self.config.weights.mode_bonus * collinear[i];
                    }
                    SearchMode::PlacedBall | SearchMode::Putting => {
                        score -= self.config.weights.mode_bonus
                            * scoring::center_proximity_bonus(c, w, h);
                    }
                    SearchMode::External => unreachable!(),
                }
                (*c, score.max(0.0))
            })
            .filter(|(_, score)| *score <= self.config.max_quality)
            .collect();

        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

        let kept = nms::suppress_circles(
            scored,
            |(c, _)| Circle::new(c.cx, c.cy, c.r),
            self.config.nms_iou,
            0.5 * r_min,
        );
        if kept.is_empty() {
            return Err(DetectError::NoBall);
        }
        debug!(kept = kept.len(), mode = ?mode, "detection complete");

        Ok(kept
            .into_iter()
            .map(|(c, score)| {
                let circle = Circle::new(c.cx + x_off, c.cy + y_off, c.r);
                GolfBall::from_circle(circle, 1.0 / (1.0 + score), score)
            })
            .collect())
    }
}

/// Zero out grey pixels rejected by the color mask so the voting stage
/// only sees ball-colored structure.
fn gate_by_mask(gray: &GrayImage, mask: &GrayImage) -> GrayImage {
    let mut out = gray.clone();
    for (g, m) in out.pixels_mut().zip(mask.pixels()) {
        if m.0[0] == 0 {
            g.0[0] = 0;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw_balls(w: u32, h: u32, centers: &[(f32, f32)], radius: f32) -> RgbImage {
        let mut img = RgbImage::from_pixel(w, h, image::Rgb([15, 15, 18]));
        for &(cx, cy) in centers {
            for y in 0..h {
                for x in 0..w {
                    let dx = x as f32 - cx;
                    let dy = y as f32 - cy;
                    if (dx * dx + dy * dy).sqrt() <= radius {
                        img.put_pixel(x, y, image::Rgb([235, 235, 225]));
                    }
                }
            }
        }
        img
    }

    fn config(radius: f64) -> DetectorConfig {
        let mut cfg = DetectorConfig::default();
        cfg.expected_radius_px = radius;
        cfg.radius_offset_below = radius * 0.4;
        cfg.radius_offset_above = radius * 0.4;
        cfg
    }

    #[test]
    fn placed_ball_is_found_at_center() {
        let img = draw_balls(160, 160, &[(80.0, 80.0)], 14.0);
        let det = Detector::new(config(14.0));
        let balls = det.detect(&img, SearchMode::PlacedBall, None).unwrap();
        assert!(!balls.is_empty());
        let best = &balls[0];
        assert!((best.circle.cx - 80.0).abs() < 3.0);
        assert!((best.circle.cy - 80.0).abs() < 3.0);
        assert!((best.circle.r_px - 14.0).abs() < 3.0);
    }

    #[test]
    fn strobed_sequence_returns_separated_circles() {
        let img = draw_balls(300, 100, &[(50.0, 50.0), (140.0, 52.0), (230.0, 54.0)], 12.0);
        let det = Detector::new(config(12.0));
        let balls = det.detect(&img, SearchMode::Strobed, None).unwrap();
        assert!(balls.len() >= 3, "found {}", balls.len());
        let r_min = det.config().min_radius();
        for (i, a) in balls.iter().enumerate() {
            assert!(a.circle.r_px >= r_min && a.circle.r_px <= det.config().max_radius());
            for b in balls.iter().skip(i + 1) {
                assert!(a.circle.center_distance(&b.circle) >= 0.5 * r_min);
            }
        }
    }

    #[test]
    fn roi_offsets_are_applied_to_results() {
        let img = draw_balls(200, 200, &[(150.0, 150.0)], 12.0);
        let det = Detector::new(config(12.0));
        let roi = Roi {
            x: 100,
            y: 100,
            width: 100,
            height: 100,
        };
        let balls = det.detect(&img, SearchMode::PlacedBall, Some(roi)).unwrap();
        assert!((balls[0].circle.cx - 150.0).abs() < 4.0);
        assert!((balls[0].circle.cy - 150.0).abs() < 4.0);
    }

    #[test]
    fn external_mode_is_rejected_here() {
        let img = draw_balls(64, 64, &[], 10.0);
        let det = Detector::new(config(10.0));
        assert!(matches!(
            det.detect(&img, SearchMode::External, None),
            Err(DetectError::ExternalMode)
        ));
    }

    #[test]
    fn empty_scene_reports_no_ball() {
        let img = RgbImage::from_pixel(96, 96, image::Rgb([12, 12, 15]));
        let det = Detector::new(config(12.0));
        assert!(matches!(
            det.detect(&img, SearchMode::PlacedBall, None),
            Err(DetectError::NoBall)
        ));
    }
}
