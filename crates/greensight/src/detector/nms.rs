//! Non-maximum suppression over overlapping circles.

use crate::ball::Circle;

/// IoU of two axis-aligned boxes given as (x, y, w, h).
pub fn box_iou(a: [f64; 4], b: [f64; 4]) -> f64 {
    let ax1 = a[0] + a[2];
    let ay1 = a[1] + a[3];
    let bx1 = b[0] + b[2];
    let by1 = b[1] + b[3];
    let ix = (ax1.min(bx1) - a[0].max(b[0])).max(0.0);
    let iy = (ay1.min(by1) - a[1].max(b[1])).max(0.0);
    let inter = ix * iy;
    let union = a[2] * a[3] + b[2] * b[3] - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Suppress overlapping circles.
///
/// `scored` must be sorted best-first. A circle is dropped when its
/// enclosing-box IoU with a kept circle exceeds `iou_threshold`, or
/// when its centre is closer than `min_center_distance` to a kept
/// centre.
pub fn suppress_circles<T, F>(
    scored: Vec<T>,
    circle_of: F,
    iou_threshold: f64,
    min_center_distance: f64,
) -> Vec<T>
where
    F: Fn(&T) -> Circle,
{
    let mut kept: Vec<T> = Vec::with_capacity(scored.len());
    for item in scored {
        let c = circle_of(&item);
        let clash = kept.iter().any(|k| {
            let kc = circle_of(k);
            box_iou(c.enclosing_box(), kc.enclosing_box()) > iou_threshold
                || c.center_distance(&kc) < min_center_distance
        });
        if !clash {
            kept.push(item);
        }
    }
    kept
}
