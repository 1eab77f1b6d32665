//! Gradient-voting circle candidates.
//!
//! For each pixel with a strong gradient, votes are cast along the
//! gradient direction at distances in [r_min, r_max]. Ball boundaries
//! produce accumulator peaks at their centres because edge gradients
//! converge radially. Each peak's radius is then recovered from the
//! radial intensity-derivative profile around the peak.

use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Voting-stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoteConfig {
    /// Gradient magnitude threshold (fraction of max gradient).
    pub grad_threshold: f32,
    /// NMS radius for accumulator peak extraction (pixels).
    pub nms_radius: f32,
    /// Minimum accumulator value for a candidate (fraction of max).
    pub min_vote_frac: f32,
    /// Gaussian sigma for accumulator smoothing.
    pub accum_sigma: f32,
    /// Cap on candidates returned (after score sorting).
    pub max_candidates: usize,
    /// Angular rays used for radius recovery.
    pub n_rays: usize,
}

impl Default for VoteConfig {
    fn default() -> Self {
        Self {
            grad_threshold: 0.05,
            nms_radius: 6.0,
            min_vote_frac: 0.12,
            accum_sigma: 2.0,
            max_candidates: 24,
            n_rays: 32,
        }
    }
}

/// A candidate circle with its vote score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircleCandidate {
    pub cx: f64,
    pub cy: f64,
    pub r: f64,
    /// Accumulator peak value.
    pub votes: f32,
}

#[inline]
fn bilinear_add(accum: &mut [f32], stride: usize, x: f32, y: f32, weight: f32) {
    let x0 = x as usize;
    let y0 = y as usize;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let base = y0 * stride + x0;
    accum[base] += weight * (1.0 - fx) * (1.0 - fy);
    accum[base + 1] += weight * fx * (1.0 - fy);
    accum[base + stride] += weight * (1.0 - fx) * fy;
    accum[base + stride + 1] += weight * fx * fy;
}

/// Bilinear intensity sample; clamps to the image border.
pub fn sample_bilinear(gray: &GrayImage, x: f64, y: f64) -> f32 {
    let (w, h) = gray.dimensions();
    let xc = x.clamp(0.0, (w - 1) as f64);
    let yc = y.clamp(0.0, (h - 1) as f64);
    let x0 = xc.floor() as u32;
    let y0 = yc.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = (xc - x0 as f64) as f32;
    let fy = (yc - y0 as f64) as f32;
    let p00 = gray.get_pixel(x0, y0).0[0] as f32;
    let p10 = gray.get_pixel(x1, y0).0[0] as f32;
    let p01 = gray.get_pixel(x0, y1).0[0] as f32;
    let p11 = gray.get_pixel(x1, y1).0[0] as f32;
    p00 * (1.0 - fx) * (1.0 - fy) + p10 * fx * (1.0 - fy) + p01 * (1.0 - fx) * fy + p11 * fx * fy
}

/// Find candidate ball circles in a grayscale (or masked) image.
///
/// Returns candidates sorted by vote score, highest first, with radii
/// inside `[r_min, r_max]`.
pub fn find_circles(
    gray: &GrayImage,
    r_min: f64,
    r_max: f64,
    config: &VoteConfig,
) -> Vec<CircleCandidate> {
    let (w, h) = gray.dimensions();
    if w < 8 || h < 8 || r_max < r_min || r_min < 1.0 {
        return Vec::new();
    }

    let gx = imageproc::gradients::horizontal_scharr(gray);
    let gy = imageproc::gradients::vertical_scharr(gray);
    let gx_raw = gx.as_raw();
    let gy_raw = gy.as_raw();

    let mut max_mag_sq: f32 = 0.0;
    for (&gxv, &gyv) in gx_raw.iter().zip(gy_raw.iter()) {
        let (gxv, gyv) = (gxv as f32, gyv as f32);
        max_mag_sq = max_mag_sq.max(gxv * gxv + gyv * gyv);
    }
    let max_mag = max_mag_sq.sqrt();
    if max_mag < 1e-6 {
        return Vec::new();
    }
    let threshold_sq = (config.grad_threshold * max_mag).powi(2);

    let stride = w as usize;
    let mut accum = vec![0.0f32; stride * h as usize];
    let radii: Vec<f32> = {
        let mut v = Vec::new();
        let mut r = r_min as f32;
        while r <= r_max as f32 {
            v.push(r);
            r += 1.0;
        }
        v
    };
    if radii.is_empty() {
        return Vec::new();
    }
    let x_limit = (w - 1) as f32;
    let y_limit = (h - 1) as f32;

    for y in 0..h as usize {
        let y_base = y * stride;
        let yf = y as f32;
        for x in 0..stride {
            let idx = y_base + x;
            let gxv = gx_raw[idx] as f32;
            let gyv = gy_raw[idx] as f32;
            let mag_sq = gxv * gxv + gyv * gyv;
            if mag_sq < threshold_sq {
                continue;
            }
            let mag = mag_sq.sqrt();
            let inv = 1.0 / mag;
            let (dx, dy) = (gxv * inv, gyv * inv);
            let xf = x as f32;
            for &r in &radii {
                let (vx, vy) = (xf + dx * r, yf + dy * r);
                if vx >= 0.0 && vx < x_limit && vy >= 0.0 && vy < y_limit {
                    bilinear_add(&mut accum, stride, vx, vy, mag);
                }
                let (vx, vy) = (xf - dx * r, yf - dy * r);
                if vx >= 0.0 && vx < x_limit && vy >= 0.0 && vy < y_limit {
                    bilinear_add(&mut accum, stride, vx, vy, mag);
                }
            }
        }
    }

    let accum_img = image::ImageBuffer::<image::Luma<f32>, Vec<f32>>::from_raw(w, h, accum)
        .expect("accumulator dimensions match");
    let smoothed = imageproc::filter::gaussian_blur_f32(&accum_img, config.accum_sigma);
    let data = smoothed.as_raw();

    let max_val = data.iter().cloned().fold(0.0f32, f32::max);
    if max_val < 1e-6 {
        return Vec::new();
    }
    let vote_threshold = config.min_vote_frac * max_val;
    let nms_r = config.nms_radius.ceil() as i32;
    let nms_r_sq = config.nms_radius * config.nms_radius;
    let mut offsets = Vec::new();
    for dy in -nms_r..=nms_r {
        for dx in -nms_r..=nms_r {
            if dx == 0 && dy == 0 {
                continue;
            }
            if (dx * dx + dy * dy) as f32 > nms_r_sq {
                continue;
            }
            offsets.push(dy as isize * stride as isize + dx as isize);
        }
    }

    let mut candidates = Vec::new();
    for y in nms_r..(h as i32 - nms_r) {
        for x in nms_r..(w as i32 - nms_r) {
            let idx = y as usize * stride + x as usize;
            let val = data[idx];
            if val < vote_threshold {
                continue;
            }
            let mut is_max = true;
            for &off in &offsets {
                let nidx = idx.wrapping_add_signed(off);
                if data[nidx] > val || (data[nidx] == val && nidx < idx) {
                    is_max = false;
                    break;
                }
            }
            if !is_max {
                continue;
            }
            if let Some(r) = recover_radius(gray, x as f64, y as f64, r_min, r_max, config.n_rays) {
                candidates.push(CircleCandidate {
                    cx: x as f64,
                    cy: y as f64,
                    r,
                    votes: val,
                });
            }
        }
    }

    candidates.sort_by(|a, b| b.votes.partial_cmp(&a.votes).unwrap());
    candidates.truncate(config.max_candidates);
    candidates
}

/// Recover the boundary radius at a candidate centre from the mean
/// radial derivative profile: sample intensity along `n_rays` rays,
/// average per radius, and take the strongest |dI/dr| inside the
/// window.
fn recover_radius(
    gray: &GrayImage,
    cx: f64,
    cy: f64,
    r_min: f64,
    r_max: f64,
    n_rays: usize,
) -> Option<f64> {
    // Sample half a pixel beyond the window so the edge of a
    // max-radius ball still produces a derivative peak.
    let r_lo = (r_min - 1.0).max(1.0);
    let r_hi = r_max + 1.0;
    let n_samples = ((r_hi - r_lo).ceil() as usize + 1).max(3);
    let step = (r_hi - r_lo) / (n_samples - 1) as f64;

    let mut profile = vec![0.0f32; n_samples];
    for ray in 0..n_rays {
        let theta = ray as f64 * std::f64::consts::TAU / n_rays as f64;
        let (sin_t, cos_t) = theta.sin_cos();
        for (si, value) in profile.iter_mut().enumerate() {
            let r = r_lo + si as f64 * step;
            *value += sample_bilinear(gray, cx + r * cos_t, cy + r * sin_t);
        }
    }
    for v in &mut profile {
        *v /= n_rays as f32;
    }

    // Central-difference derivative; boundary samples one-sided.
    let mut deriv = vec![0.0f32; n_samples];
    deriv[0] = profile[1] - profile[0];
    for i in 1..n_samples - 1 {
        deriv[i] = (profile[i + 1] - profile[i - 1]) * 0.5;
    }
    deriv[n_samples - 1] = profile[n_samples - 1] - profile[n_samples - 2];

    let (best_i, best) = deriv
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.abs().partial_cmp(&b.1.abs()).unwrap())?;
    if best.abs() < 1e-3 {
        return None;
    }

    // Sub-pixel peak via a 3-point parabolic fit on |dI/dr|.
    let mut offset = 0.0f64;
    if best_i > 0 && best_i + 1 < n_samples {
        let y0 = deriv[best_i - 1].abs() as f64;
        let y1 = deriv[best_i].abs() as f64;
        let y2 = deriv[best_i + 1].abs() as f64;
        let denom = y0 - 2.0 * y1 + y2;
        if denom.abs() > 1e-9 {
            offset = (0.5 * (y0 - y2) / denom).clamp(-0.5, 0.5);
        }
    }
    let r = r_lo + (best_i as f64 + offset) * step;
    Some(r.clamp(r_min, r_max))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw_ball(w: u32, h: u32, cx: f32, cy: f32, radius: f32) -> GrayImage {
        let mut img = GrayImage::from_pixel(w, h, image::Luma([20]));
        for y in 0..h {
            for x in 0..w {
                let dx = x as f32 - cx;
                let dy = y as f32 - cy;
                if (dx * dx + dy * dy).sqrt() <= radius {
                    img.put_pixel(x, y, image::Luma([230]));
                }
            }
        }
        img
    }

    #[test]
    fn single_ball_is_found_near_its_center() {
        let img = draw_ball(120, 120, 60.0, 60.0, 14.0);
        let found = find_circles(&img, 8.0, 20.0, &VoteConfig::default());
        assert!(!found.is_empty());
        let best = found[0];
        let err = ((best.cx - 60.0).powi(2) + (best.cy - 60.0).powi(2)).sqrt();
        assert!(err < 3.0, "center error {err}");
        assert!((best.r - 14.0).abs() < 2.5, "radius {}", best.r);
    }

    #[test]
    fn radii_stay_inside_the_window() {
        let img = draw_ball(120, 120, 60.0, 60.0, 14.0);
        for c in find_circles(&img, 10.0, 18.0, &VoteConfig::default()) {
            assert!(c.r >= 10.0 && c.r <= 18.0);
        }
    }

    #[test]
    fn blank_image_yields_no_candidates() {
        let img = GrayImage::from_pixel(64, 64, image::Luma([128]));
        assert!(find_circles(&img, 5.0, 15.0, &VoteConfig::default()).is_empty());
    }

    #[test]
    fn multiple_balls_each_get_a_candidate() {
        let mut img = GrayImage::from_pixel(240, 90, image::Luma([15]));
        for &cx in &[40.0f32, 120.0, 200.0] {
            for y in 0..90u32 {
                for x in 0..240u32 {
                    let dx = x as f32 - cx;
                    let dy = y as f32 - 45.0;
                    if (dx * dx + dy * dy).sqrt() <= 12.0 {
                        img.put_pixel(x, y, image::Luma([220]));
                    }
                }
            }
        }
        let found = find_circles(&img, 8.0, 16.0, &VoteConfig::default());
        assert!(found.len() >= 3, "found {}", found.len());
    }
}
