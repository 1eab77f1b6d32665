//! Spin from two strobed ball images.
//!
//! The dimple/logo texture of the first ball is treated as a patch on
//! an orthographically-viewed sphere. Candidate spin triples rotate
//! the patch; the triple whose rotated patch best correlates with the
//! second ball image wins. Axes: backspin about the image-plane axis
//! perpendicular to travel, sidespin about the camera view axis, rifle
//! about the travel direction.

use image::GrayImage;
use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ball::Circle;
use crate::detector::hough::sample_bilinear;

/// Spin rates, rpm. Positive backspin is normal ball flight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpinRates {
    pub backspin_rpm: f64,
    pub sidespin_rpm: f64,
    pub rifle_rpm: f64,
}

/// Search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpinConfig {
    /// Search bound for backspin and sidespin, rpm.
    pub max_spin_rpm: f64,
    /// Search bound for rifle spin, rpm.
    pub max_rifle_rpm: f64,
    /// Coarse grid step, rpm.
    pub coarse_step_rpm: f64,
    /// Refinement shrinks the step by this factor around the best cell.
    pub refine_factor: u32,
    /// Sampled fraction of the ball radius.
    pub patch_radius_frac: f64,
    /// Minimum intensity standard deviation for a usable patch.
    pub min_texture_stddev: f32,
    /// Minimum overlapping samples per candidate.
    pub min_overlap: usize,
    /// Minimum winning correlation for a trustworthy estimate.
    pub min_correlation: f64,
}

impl Default for SpinConfig {
    fn default() -> Self {
        Self {
            max_spin_rpm: 6000.0,
            max_rifle_rpm: 2000.0,
            coarse_step_rpm: 500.0,
            refine_factor: 5,
            patch_radius_frac: 0.8,
            min_texture_stddev: 2.0,
            min_overlap: 40,
            min_correlation: 0.25,
        }
    }
}

/// Result of the spin search.
#[derive(Debug, Clone, PartialEq)]
pub enum SpinEstimate {
    Rates {
        rates: SpinRates,
        /// Normalized correlation of the winning triple, in [-1, 1].
        correlation: f64,
    },
    /// Not enough surface texture (or overlap) to correlate.
    InsufficientFeatures,
}

/// One sampled surface point: unit sphere normal + intensity.
struct SurfaceSample {
    normal: Vector3<f64>,
    value: f32,
}

fn sample_patch(gray: &GrayImage, ball: &Circle, frac: f64) -> Vec<SurfaceSample> {
    let r = ball.r_px;
    let max_u = frac;
    let step = (2.0 * max_u / 24.0).max(1e-3);
    let mut samples = Vec::new();
    let mut u = -max_u;
    while u <= max_u {
        let mut v = -max_u;
        while v <= max_u {
            let rr = u * u + v * v;
            if rr < frac * frac {
                let w = (1.0 - rr).sqrt();
                let value = sample_bilinear(gray, ball.cx + u * r, ball.cy + v * r);
                samples.push(SurfaceSample {
                    normal: Vector3::new(u, v, w),
                    value,
                });
            }
            v += step;
        }
        u += step;
    }
    samples
}

fn stddev(values: impl Iterator<Item = f32> + Clone) -> f32 {
    let n = values.clone().count().max(1) as f32;
    let mean = values.clone().sum::<f32>() / n;
    (values.map(|v| (v - mean) * (v - mean)).sum::<f32>() / n).sqrt()
}

/// Normalized cross-correlation of the rotated patch against the
/// second ball image. `None` when overlap is too small.
fn correlate(
    gray: &GrayImage,
    patch: &[SurfaceSample],
    target: &Circle,
    rotation: &Rotation3<f64>,
    min_overlap: usize,
) -> Option<f64> {
    let mut xs = Vec::with_capacity(patch.len());
    let mut ys = Vec::with_capacity(patch.len());
    for s in patch {
        let n = rotation * s.normal;
        // Rotated behind the visible hemisphere.
        if n.z < 0.05 {
            continue;
        }
        let value = sample_bilinear(gray, target.cx + n.x * target.r_px, target.cy + n.y * target.r_px);
        xs.push(s.value as f64);
        ys.push(value as f64);
    }
    if xs.len() < min_overlap {
        return None;
    }
    let n = xs.len() as f64;
    let mx = xs.iter().sum::<f64>() / n;
    let my = ys.iter().sum::<f64>() / n;
    let mut num = 0.0;
    let mut dx2 = 0.0;
    let mut dy2 = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        let dx = x - mx;
        let dy = y - my;
        num += dx * dy;
        dx2 += dx * dx;
        dy2 += dy * dy;
    }
    let denom = (dx2 * dy2).sqrt();
    if denom < 1e-9 {
        return None;
    }
    Some(num / denom)
}

const RPM_TO_RAD_PER_S: f64 = std::f64::consts::TAU / 60.0;

/// Estimate spin between two strobed ball instances seen `dt_s` apart.
pub fn estimate_spin(
    gray: &GrayImage,
    first: &Circle,
    second: &Circle,
    dt_s: f64,
    config: &SpinConfig,
) -> SpinEstimate {
    if dt_s <= 0.0 || first.r_px < 3.0 || second.r_px < 3.0 {
        return SpinEstimate::InsufficientFeatures;
    }
    let patch = sample_patch(gray, first, config.patch_radius_frac);
    if patch.len() < config.min_overlap {
        return SpinEstimate::InsufficientFeatures;
    }
    if stddev(patch.iter().map(|s| s.value)) < config.min_texture_stddev {
        return SpinEstimate::InsufficientFeatures;
    }

    // Spin axes from the travel direction in the image plane.
    let travel = {
        let d = Vector3::new(second.cx - first.cx, second.cy - first.cy, 0.0);
        let n = d.norm();
        if n < 1e-6 {
            Vector3::new(1.0, 0.0, 0.0)
        } else {
            d / n
        }
    };
    let view = Vector3::new(0.0, 0.0, 1.0);
    let back_axis = view.cross(&travel);

    let rotation_for = |rates: &SpinRates| {
        let omega = (back_axis * rates.backspin_rpm
            + view * rates.sidespin_rpm
            + travel * rates.rifle_rpm)
            * RPM_TO_RAD_PER_S;
        Rotation3::from_scaled_axis(omega * dt_s)
    };

    let score =
        |rates: &SpinRates| correlate(gray, &patch, second, &rotation_for(rates), config.min_overlap);

    // Coarse pass.
    let mut best: Option<(SpinRates, f64)> = None;
    let step = config.coarse_step_rpm;
    let mut consider = |rates: SpinRates, best: &mut Option<(SpinRates, f64)>| {
        if let Some(c) = score(&rates) {
            if best.as_ref().map(|(_, bc)| c > *bc).unwrap_or(true) {
                *best = Some((rates, c));
            }
        }
    };

    let mut backspin = -config.max_spin_rpm;
    while backspin <= config.max_spin_rpm {
        let mut sidespin = -config.max_spin_rpm;
        while sidespin <= config.max_spin_rpm {
            let mut rifle = -config.max_rifle_rpm;
            while rifle <= config.max_rifle_rpm {
                consider(
                    SpinRates {
                        backspin_rpm: backspin,
                        sidespin_rpm: sidespin,
                        rifle_rpm: rifle,
                    },
                    &mut best,
                );
                rifle += step;
            }
            sidespin += step;
        }
        backspin += step;
    }

    let Some((coarse_best, _)) = best else {
        return SpinEstimate::InsufficientFeatures;
    };

    // Fine pass around the best coarse cell.
    let fine_step = step / config.refine_factor.max(1) as f64;
    let mut backspin = coarse_best.backspin_rpm - step;
    while backspin <= coarse_best.backspin_rpm + step {
        let mut sidespin = coarse_best.sidespin_rpm - step;
        while sidespin <= coarse_best.sidespin_rpm + step {
            let mut rifle = coarse_best.rifle_rpm - step;
            while rifle <= coarse_best.rifle_rpm + step {
                consider(
                    SpinRates {
                        backspin_rpm: backspin,
                        sidespin_rpm: sidespin,
                        rifle_rpm: rifle,
                    },
                    &mut best,
                );
                rifle += fine_step;
            }
            sidespin += fine_step;
        }
        backspin += fine_step;
    }

    match best {
        Some((rates, correlation)) if correlation >= config.min_correlation => {
            debug!(?rates, correlation, "spin estimate");
            SpinEstimate::Rates { rates, correlation }
        }
        _ => SpinEstimate::InsufficientFeatures,
    }
}
