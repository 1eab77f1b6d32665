//! Aspect-preserving letterbox resize.
//!
//! The source image is scaled by the limiting axis and centred on a
//! grey canvas; the recorded (scale, x_off, y_off) triple maps
//! detections back to source coordinates.

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// Fill value of the padding border.
pub const LETTERBOX_FILL: u8 = 114;

/// Forward/inverse mapping between source and letterboxed coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Letterbox {
    pub scale: f32,
    pub x_offset: u32,
    pub y_offset: u32,
}

impl Letterbox {
    /// Mapping for a source of (src_w, src_h) into a (dst_w, dst_h)
    /// canvas.
    pub fn compute(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Self {
        let scale = (dst_w as f32 / src_w as f32).min(dst_h as f32 / src_h as f32);
        let new_w = (src_w as f32 * scale) as u32;
        let new_h = (src_h as f32 * scale) as u32;
        Self {
            scale,
            x_offset: (dst_w - new_w) / 2,
            y_offset: (dst_h - new_h) / 2,
        }
    }

    /// Source point to letterboxed (tensor-space) point.
    pub fn forward(&self, x: f32, y: f32) -> (f32, f32) {
        (
            x * self.scale + self.x_offset as f32,
            y * self.scale + self.y_offset as f32,
        )
    }

    /// Letterboxed point back to source coordinates.
    pub fn inverse(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.x_offset as f32) / self.scale,
            (y - self.y_offset as f32) / self.scale,
        )
    }

    /// Scale a length from letterboxed back to source units.
    pub fn inverse_len(&self, len: f32) -> f32 {
        len / self.scale
    }
}

/// Letterbox-resize `src` into a (dst_w, dst_h) grey canvas.
pub fn letterbox_image(src: &RgbImage, dst_w: u32, dst_h: u32) -> (RgbImage, Letterbox) {
    let (src_w, src_h) = src.dimensions();
    let lb = Letterbox::compute(src_w, src_h, dst_w, dst_h);
    let new_w = ((src_w as f32 * lb.scale) as u32).max(1);
    let new_h = ((src_h as f32 * lb.scale) as u32).max(1);
    let resized = image::imageops::resize(src, new_w, new_h, image::imageops::FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(
        dst_w,
        dst_h,
        Rgb([LETTERBOX_FILL, LETTERBOX_FILL, LETTERBOX_FILL]),
    );
    image::imageops::replace(&mut canvas, &resized, lb.x_offset as i64, lb.y_offset as i64);
    (canvas, lb)
}
