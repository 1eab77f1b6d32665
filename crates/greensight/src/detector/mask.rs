//! Color gate for the classical ball detector.
//!
//! The ball's reference color (RGB) is converted to HLS once; each
//! image pixel is then tested against a band around that reference.

use greensight_core::colorsys;
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

/// HLS acceptance band around a reference ball color.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ColorBand {
    /// Reference hue in [0, 1).
    pub hue_center: f32,
    /// Accepted hue half-width (wrapping).
    pub hue_halfwidth: f32,
    /// Minimum lightness.
    pub lightness_min: f32,
    /// Maximum lightness.
    pub lightness_max: f32,
    /// Maximum saturation; a white ball is low-saturation, so the gate
    /// bounds saturation from above rather than below.
    pub saturation_max: f32,
}

impl Default for ColorBand {
    fn default() -> Self {
        // A white range ball under strobe lighting.
        Self::from_reference_rgb([235, 235, 225], 0.12, 0.35)
    }
}

impl ColorBand {
    /// Build a band from an RGB reference color with the given hue
    /// half-width and lightness tolerance.
    pub fn from_reference_rgb(rgb: [u8; 3], hue_halfwidth: f32, lightness_tol: f32) -> Self {
        let [h, l, s] = colorsys::rgb_to_hls(colorsys::rgb8_to_f32(rgb));
        Self {
            hue_center: h,
            hue_halfwidth,
            lightness_min: (l - lightness_tol).max(0.0),
            lightness_max: (l + lightness_tol).min(1.0),
            saturation_max: (s + 0.25).min(1.0),
        }
    }

    /// Wrapping hue distance in [0, 0.5].
    fn hue_distance(&self, h: f32) -> f32 {
        let d = (h - self.hue_center).abs() % 1.0;
        d.min(1.0 - d)
    }

    /// Test one RGB pixel against the band.
    pub fn accepts(&self, rgb: [u8; 3]) -> bool {
        let [h, l, s] = colorsys::rgb_to_hls(colorsys::rgb8_to_f32(rgb));
        if l < self.lightness_min || l > self.lightness_max {
            return false;
        }
        if s > self.saturation_max {
            return false;
        }
        // Hue is meaningless for near-achromatic pixels.
        if s < 0.08 {
            return true;
        }
        self.hue_distance(h) <= self.hue_halfwidth
    }
}

/// Binary mask: 255 where the pixel passes the color gate.
pub fn color_mask(image: &RgbImage, band: &ColorBand) -> GrayImage {
    let (w, h) = image.dimensions();
    let mut mask = GrayImage::new(w, h);
    for (x, y, px) in image.enumerate_pixels() {
        let on = band.accepts([px.0[0], px.0[1], px.0[2]]);
        mask.put_pixel(x, y, image::Luma([if on { 255 } else { 0 }]));
    }
    mask
}

/// Fraction of mask-on pixels inside the disk (cx, cy, r).
pub fn disk_coverage(mask: &GrayImage, cx: f64, cy: f64, r: f64) -> f64 {
    let (w, h) = mask.dimensions();
    let x0 = (cx - r).floor().max(0.0) as u32;
    let y0 = (cy - r).floor().max(0.0) as u32;
    let x1 = ((cx + r).ceil() as u32).min(w.saturating_sub(1));
    let y1 = ((cy + r).ceil() as u32).min(h.saturating_sub(1));
    let r2 = r * r;
    let mut inside = 0u64;
    let mut on = 0u64;
    for y in y0..=y1 {
        for x in x0..=x1 {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            if dx * dx + dy * dy > r2 {
                continue;
            }
            inside += 1;
            if mask.get_pixel(x, y).0[0] > 0 {
                on += 1;
            }
        }
    }
    if inside == 0 {
        0.0
    } else {
        on as f64 / inside as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn white_reference_accepts_white_and_rejects_saturated_green() {
        let band = ColorBand::default();
        assert!(band.accepts([240, 240, 235]));
        assert!(!band.accepts([20, 200, 30]));
        assert!(!band.accepts([10, 10, 10]));
    }

    #[test]
    fn disk_coverage_of_a_filled_disk_is_near_one() {
        let mut img = RgbImage::from_pixel(64, 64, image::Rgb([0, 0, 0]));
        for y in 0..64 {
            for x in 0..64 {
                let dx = x as f64 - 32.0;
                let dy = y as f64 - 32.0;
                if dx * dx + dy * dy <= 100.0 {
                    img.put_pixel(x, y, image::Rgb([240, 240, 235]));
                }
            }
        }
        let mask = color_mask(&img, &ColorBand::default());
        let cov = disk_coverage(&mask, 32.0, 32.0, 10.0);
        assert!(cov > 0.95, "coverage {cov}");
        let off = disk_coverage(&mask, 5.0, 5.0, 4.0);
        assert!(off < 0.05, "off-disk coverage {off}");
    }
}
