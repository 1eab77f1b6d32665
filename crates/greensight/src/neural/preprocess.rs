//! Tensor preprocessing: letterboxed HWC image to planar CHW floats
//! in [0, 1], plane order B, G, R.
//!
//! Two code paths: a NEON path on aarch64 and a scalar path
//! everywhere. Both multiply by the same reciprocal constant so the
//! produced tensors are bit-identical.

use image::RgbImage;

const INV_255: f32 = 1.0 / 255.0;

/// Fill `out` (length `3 * w * h`) with the planar blob.
pub fn blob_from_image(img: &RgbImage, out: &mut [f32], use_simd: bool) {
    debug_assert_eq!(
        out.len(),
        (img.width() * img.height() * 3) as usize,
        "blob buffer size mismatch"
    );
    #[cfg(target_arch = "aarch64")]
    if use_simd {
        // SAFETY: NEON is a baseline feature on aarch64 targets.
        unsafe { blob_from_image_neon(img, out) };
        return;
    }
    let _ = use_simd;
    blob_from_image_scalar(img, out);
}

/// Scalar reference path.
pub fn blob_from_image_scalar(img: &RgbImage, out: &mut [f32]) {
    let pixels = (img.width() * img.height()) as usize;
    let raw = img.as_raw();
    for i in 0..pixels {
        let r = raw[i * 3] as f32;
        let g = raw[i * 3 + 1] as f32;
        let b = raw[i * 3 + 2] as f32;
        out[i] = b * INV_255;
        out[pixels + i] = g * INV_255;
        out[2 * pixels + i] = r * INV_255;
    }
}

#[cfg(target_arch = "aarch64")]
unsafe fn blob_from_image_neon(img: &RgbImage, out: &mut [f32]) {
    use std::arch::aarch64::*;

    #[inline(always)]
    unsafe fn widen_scale_store(dst: *mut f32, v: uint8x8_t, scale: float32x4_t) {
        let wide = vmovl_u8(v);
        let lo = vcvtq_f32_u32(vmovl_u16(vget_low_u16(wide)));
        let hi = vcvtq_f32_u32(vmovl_u16(vget_high_u16(wide)));
        vst1q_f32(dst, vmulq_f32(lo, scale));
        vst1q_f32(dst.add(4), vmulq_f32(hi, scale));
    }

    let pixels = (img.width() * img.height()) as usize;
    let raw = img.as_raw();
    let src = raw.as_ptr();
    let dst = out.as_mut_ptr();
    let scale = vdupq_n_f32(INV_255);

    let mut i = 0usize;
    while i + 8 <= pixels {
        // Deinterleave 8 RGB pixels into three 8-lane registers.
        let rgb = vld3_u8(src.add(i * 3));
        widen_scale_store(dst.add(i), rgb.2, scale); // B plane
        widen_scale_store(dst.add(pixels + i), rgb.1, scale); // G plane
        widen_scale_store(dst.add(2 * pixels + i), rgb.0, scale); // R plane
        i += 8;
    }
    // Scalar tail.
    while i < pixels {
        let r = raw[i * 3] as f32;
        let g = raw[i * 3 + 1] as f32;
        let b = raw[i * 3 + 2] as f32;
        out[i] = b * INV_255;
        out[pixels + i] = g * INV_255;
        out[2 * pixels + i] = r * INV_255;
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_image(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            image::Rgb([
                (x * 7 % 256) as u8,
                (y * 11 % 256) as u8,
                ((x + y) * 3 % 256) as u8,
            ])
        })
    }

    #[test]
    fn planes_are_bgr_ordered_and_normalized() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, image::Rgb([255, 0, 0]));
        img.put_pixel(1, 0, image::Rgb([0, 0, 255]));
        let mut out = vec![0.0f32; 6];
        blob_from_image_scalar(&img, &mut out);
        // B plane, G plane, R plane
        assert_eq!(out, vec![0.0, 1.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn selected_path_matches_scalar_reference() {
        let img = gradient_image(37, 23);
        let n = (img.width() * img.height() * 3) as usize;
        let mut reference = vec![0.0f32; n];
        let mut chosen = vec![0.0f32; n];
        blob_from_image_scalar(&img, &mut reference);
        blob_from_image(&img, &mut chosen, true);
        assert_eq!(reference, chosen);
    }
}
