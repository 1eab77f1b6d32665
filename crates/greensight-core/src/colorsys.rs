//! Color-space conversions for the detector's color gate.
//!
//! All channels are normalized to `[0, 1]`. Hue wraps modulo 1.

const ONE_THIRD: f32 = 1.0 / 3.0;
const ONE_SIXTH: f32 = 1.0 / 6.0;
const TWO_THIRD: f32 = 2.0 / 3.0;

/// Floored modulus that keeps the result in `[0, b)` for positive `b`.
#[inline]
fn fmods(a: f32, b: f32) -> f32 {
    let f = a % b;
    if (f < 0.0 && b > 0.0) || (f > 0.0 && b < 0.0) {
        f + b
    } else {
        f
    }
}

/// RGB to YIQ (NTSC luma/chroma).
pub fn rgb_to_yiq([r, g, b]: [f32; 3]) -> [f32; 3] {
    let y = 0.30 * r + 0.59 * g + 0.11 * b;
    let i = 0.74 * (r - y) - 0.27 * (b - y);
    let q = 0.48 * (r - y) + 0.41 * (b - y);
    [y, i, q]
}

/// YIQ to RGB. Outputs are clamped to `[0, 1]`.
pub fn yiq_to_rgb([y, i, q]: [f32; 3]) -> [f32; 3] {
    let r = y + 0.9468822170900693 * i + 0.6235565819861433 * q;
    let g = y - 0.27478764629897834 * i - 0.6356910791873801 * q;
    let b = y - 1.1085450346420322 * i + 1.7090069284064666 * q;
    [r.clamp(0.0, 1.0), g.clamp(0.0, 1.0), b.clamp(0.0, 1.0)]
}

/// RGB to HLS (hue, lightness, saturation).
pub fn rgb_to_hls([r, g, b]: [f32; 3]) -> [f32; 3] {
    let maxc = r.max(g).max(b);
    let minc = r.min(g).min(b);
    let l = (minc + maxc) / 2.0;
    if (maxc - minc).abs() < f32::EPSILON {
        return [0.0, l, 0.0];
    }
    let spread = maxc - minc;
    let s = if l <= 0.5 {
        spread / (maxc + minc)
    } else {
        spread / (2.0 - maxc - minc)
    };
    let rc = (maxc - r) / spread;
    let gc = (maxc - g) / spread;
    let bc = (maxc - b) / spread;
    let h = if (r - maxc).abs() < f32::EPSILON {
        bc - gc
    } else if (g - maxc).abs() < f32::EPSILON {
        2.0 + rc - bc
    } else {
        4.0 + gc - rc
    };
    [fmods(h / 6.0, 1.0), l, s]
}

fn hls_value(m1: f32, m2: f32, hue: f32) -> f32 {
    let hue = fmods(hue, 1.0);
    if hue < ONE_SIXTH {
        m1 + (m2 - m1) * hue * 6.0
    } else if hue < 0.5 {
        m2
    } else if hue < TWO_THIRD {
        m1 + (m2 - m1) * (TWO_THIRD - hue) * 6.0
    } else {
        m1
    }
}

/// HLS to RGB.
pub fn hls_to_rgb([h, l, s]: [f32; 3]) -> [f32; 3] {
    if s.abs() < f32::EPSILON {
        return [l, l, l];
    }
    let m2 = if l <= 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let m1 = 2.0 * l - m2;
    [
        hls_value(m1, m2, h + ONE_THIRD),
        hls_value(m1, m2, h),
        hls_value(m1, m2, h - ONE_THIRD),
    ]
}

/// RGB to HSV (hue, saturation, value).
pub fn rgb_to_hsv([r, g, b]: [f32; 3]) -> [f32; 3] {
    let maxc = r.max(g).max(b);
    let minc = r.min(g).min(b);
    let v = maxc;
    if (maxc - minc).abs() < f32::EPSILON {
        return [0.0, 0.0, v];
    }
    let spread = maxc - minc;
    let s = spread / maxc;
    let rc = (maxc - r) / spread;
    let gc = (maxc - g) / spread;
    let bc = (maxc - b) / spread;
    let h = if (r - maxc).abs() < f32::EPSILON {
        bc - gc
    } else if (g - maxc).abs() < f32::EPSILON {
        2.0 + rc - bc
    } else {
        4.0 + gc - rc
    };
    [fmods(h / 6.0, 1.0), s, v]
}

/// HSV to RGB.
pub fn hsv_to_rgb([h, s, v]: [f32; 3]) -> [f32; 3] {
    if s.abs() < f32::EPSILON {
        return [v, v, v];
    }
    let i = (h * 6.0).floor();
    let f = h * 6.0 - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match (i as i32).rem_euclid(6) {
        0 => [v, t, p],
        1 => [q, v, p],
        2 => [p, v, t],
        3 => [p, q, v],
        4 => [t, p, v],
        _ => [v, p, q],
    }
}

/// Convert an 8-bit RGB triple to normalized floats.
#[inline]
pub fn rgb8_to_f32(rgb: [u8; 3]) -> [f32; 3] {
    [
        rgb[0] as f32 / 255.0,
        rgb[1] as f32 / 255.0,
        rgb[2] as f32 / 255.0,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn roundtrip_hls(rgb: [f32; 3]) {
        let back = hls_to_rgb(rgb_to_hls(rgb));
        for c in 0..3 {
            assert_abs_diff_eq!(back[c], rgb[c], epsilon = 1e-5);
        }
    }

    #[test]
    fn hls_roundtrip_on_primaries_and_greys() {
        roundtrip_hls([1.0, 0.0, 0.0]);
        roundtrip_hls([0.0, 1.0, 0.0]);
        roundtrip_hls([0.0, 0.0, 1.0]);
        roundtrip_hls([0.5, 0.5, 0.5]);
        roundtrip_hls([0.9, 0.85, 0.2]);
    }

    #[test]
    fn hsv_roundtrip() {
        let rgb = [0.95, 0.92, 0.88];
        let back = hsv_to_rgb(rgb_to_hsv(rgb));
        for c in 0..3 {
            assert_abs_diff_eq!(back[c], rgb[c], epsilon = 1e-5);
        }
    }

    #[test]
    fn white_has_no_saturation() {
        let [h, l, s] = rgb_to_hls([1.0, 1.0, 1.0]);
        assert_eq!(h, 0.0);
        assert_eq!(l, 1.0);
        assert_eq!(s, 0.0);
    }

    #[test]
    fn yiq_luma_of_grey_is_identity() {
        let [y, i, q] = rgb_to_yiq([0.4, 0.4, 0.4]);
        assert_abs_diff_eq!(y, 0.4, epsilon = 1e-6);
        assert_abs_diff_eq!(i, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(q, 0.0, epsilon = 1e-6);
    }
}
