//! Candidate scoring. Lower is better.
//!
//! The composite combines masked coverage inside the disk, edge-ring
//! sharpness, and radius deviation from the expected ball size.
//! Search-mode tie-breaks subtract a bonus: strobed candidates that
//! lie on a common line, or placed candidates near the image centre.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use super::hough::{sample_bilinear, CircleCandidate};
use super::mask::disk_coverage;

/// Weights of the composite score terms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// Weight of the (1 − coverage) term.
    pub coverage: f32,
    /// Weight of the edge-sharpness deficit term.
    pub edge: f32,
    /// Weight of the relative radius-deviation term.
    pub radius: f32,
    /// Magnitude of the mode tie-break bonus.
    pub mode_bonus: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            coverage: 0.45,
            edge: 0.30,
            radius: 0.25,
            mode_bonus: 0.15,
        }
    }
}

/// Mean absolute intensity step across the circle boundary, sampled on
/// rays just inside vs just outside the radius. Sharp ball edges give
/// a large step.
pub fn ring_sharpness(gray: &GrayImage, c: &CircleCandidate, n_rays: usize) -> f32 {
    let mut total = 0.0f32;
    for ray in 0..n_rays {
        let theta = ray as f64 * std::f64::consts::TAU / n_rays as f64;
        let (sin_t, cos_t) = theta.sin_cos();
        let inner = sample_bilinear(gray, c.cx + (c.r - 1.5) * cos_t, c.cy + (c.r - 1.5) * sin_t);
        let outer = sample_bilinear(gray, c.cx + (c.r + 1.5) * cos_t, c.cy + (c.r + 1.5) * sin_t);
        total += (inner - outer).abs();
    }
    total / (n_rays as f32 * 255.0)
}

/// Composite candidate score; lower is better.
pub fn composite_score(
    gray: &GrayImage,
    mask: &GrayImage,
    c: &CircleCandidate,
    expected_radius: f64,
    weights: &ScoreWeights,
) -> f32 {
    let coverage = disk_coverage(mask, c.cx, c.cy, c.r) as f32;
    let sharpness = ring_sharpness(gray, c, 24).clamp(0.0, 1.0);
    let radius_dev = ((c.r - expected_radius).abs() / expected_radius.max(1.0)).min(1.0) as f32;
    weights.coverage * (1.0 - coverage) + weights.edge * (1.0 - sharpness) + weights.radius * radius_dev
}

/// Per-candidate collinearity bonus for strobed mode, in [0, 1].
///
/// Fits a total-least-squares line through all candidate centres and
/// rewards candidates whose perpendicular residual is small relative
/// to the expected radius.
pub fn collinearity_bonus(candidates: &[CircleCandidate], expected_radius: f64) -> Vec<f32> {
    if candidates.len() < 3 {
        return vec![0.0; candidates.len()];
    }
    let n = candidates.len() as f64;
    let mean_x = candidates.iter().map(|c| c.cx).sum::<f64>() / n;
    let mean_y = candidates.iter().map(|c| c.cy).sum::<f64>() / n;
    let (mut sxx, mut sxy, mut syy) = (0.0f64, 0.0f64, 0.0f64);
    for c in candidates {
        let dx = c.cx - mean_x;
        let dy = c.cy - mean_y;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    // Principal direction of the centre scatter.
    let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    let (dir_x, dir_y) = (theta.cos(), theta.sin());
    let tolerance = expected_radius.max(1.0);
    candidates
        .iter()
        .map(|c| {
            let dx = c.cx - mean_x;
            let dy = c.cy - mean_y;
            let residual = (dx * dir_y - dy * dir_x).abs();
            (1.0 - (residual / tolerance).min(1.0)) as f32
        })
        .collect()
}

/// Image-centre proximity bonus for placed-ball mode, in [0, 1].
pub fn center_proximity_bonus(c: &CircleCandidate, width: u32, height: u32) -> f32 {
    let cx = width as f64 / 2.0;
    let cy = height as f64 / 2.0;
    let dist = ((c.cx - cx).powi(2) + (c.cy - cy).powi(2)).sqrt();
    let half_diag = (cx * cx + cy * cy).sqrt().max(1.0);
    (1.0 - (dist / half_diag).min(1.0)) as f32
}
