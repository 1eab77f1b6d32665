//! Decode the channel-first detector output and suppress duplicates.
//!
//! The model emits `[1, 4 + C, P]`: all cx values, then all cy, w, h,
//! then per-class scores. `P` is the anchor count over strides
//! {8, 16, 32}.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::letterbox::Letterbox;

/// Axis-aligned box in input-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    /// Intersection-over-union with another box.
    pub fn iou(&self, other: &BBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);
        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.width * self.height + other.width * other.height - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One decoded detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f32,
    pub class_id: usize,
}

/// Anchor count for an input of (width, height): Σ (w/s)(h/s) over
/// strides {8, 16, 32}.
pub fn prediction_count(width: u32, height: u32) -> usize {
    [8u32, 16, 32]
        .iter()
        .map(|s| ((width / s) * (height / s)) as usize)
        .sum()
}

/// Decode raw output into thresholded detections in source-image
/// coordinates.
pub fn decode_predictions(
    output: &[f32],
    num_predictions: usize,
    num_classes: usize,
    single_class: bool,
    confidence_threshold: f32,
    letterbox: &Letterbox,
) -> Vec<Detection> {
    let data_width = 4 + if single_class { 1 } else { num_classes };
    let expected = num_predictions * data_width;
    let num_predictions = if output.len() != expected {
        warn!(
            expected,
            got = output.len(),
            "output size mismatch; clamping prediction count"
        );
        num_predictions.min(output.len() / data_width.max(1))
    } else {
        num_predictions
    };

    let mut detections = Vec::new();
    for i in 0..num_predictions {
        let cx = output[i];
        let cy = output[num_predictions + i];
        let w = output[2 * num_predictions + i];
        let h = output[3 * num_predictions + i];

        let (confidence, class_id) = if single_class {
            (output[4 * num_predictions + i], 0)
        } else {
            let mut best = 0.0f32;
            let mut best_class = 0usize;
            for c in 0..num_classes {
                let score = output[(4 + c) * num_predictions + i];
                if score > best {
                    best = score;
                    best_class = c;
                }
            }
            (best, best_class)
        };

        if confidence < confidence_threshold {
            continue;
        }

        let (cx_src, cy_src) = letterbox.inverse(cx, cy);
        let w_src = letterbox.inverse_len(w);
        let h_src = letterbox.inverse_len(h);
        detections.push(Detection {
            bbox: BBox {
                x: cx_src - w_src / 2.0,
                y: cy_src - h_src / 2.0,
                width: w_src,
                height: h_src,
            },
            confidence,
            class_id,
        });
    }
    detections
}

/// Class-aware non-maximum suppression. Output is ordered by
/// descending confidence; survivors are pairwise IoU ≤ threshold
/// within a class.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return detections;
    }
    detections.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());

    let mut suppressed = vec![false; detections.len()];
    let mut kept = Vec::with_capacity(detections.len());
    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        kept.push(detections[i]);
        for j in (i + 1)..detections.len() {
            if suppressed[j] || detections[i].class_id != detections[j].class_id {
                continue;
            }
            if detections[i].bbox.iou(&detections[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, w: f32, h: f32, conf: f32, class_id: usize) -> Detection {
        Detection {
            bbox: BBox {
                x,
                y,
                width: w,
                height: h,
            },
            confidence: conf,
            class_id,
        }
    }

    #[test]
    fn anchor_count_for_square_inputs() {
        // 640x640: 80*80 + 40*40 + 20*20
        assert_eq!(prediction_count(640, 640), 8400);
    }

    #[test]
    fn nms_keeps_first_and_third_of_the_classic_triple() {
        let input = vec![
            det(0.0, 0.0, 10.0, 10.0, 0.9, 0),
            det(1.0, 1.0, 10.0, 10.0, 0.8, 0),
            det(50.0, 50.0, 10.0, 10.0, 0.7, 0),
        ];
        let out = non_max_suppression(input, 0.5);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].confidence, 0.9);
        assert_eq!(out[1].confidence, 0.7);
    }

    #[test]
    fn nms_is_class_aware_and_confidence_ordered() {
        let input = vec![
            det(0.0, 0.0, 10.0, 10.0, 0.6, 1),
            det(1.0, 1.0, 10.0, 10.0, 0.9, 0),
        ];
        let out = non_max_suppression(input, 0.3);
        // Different classes never suppress each other.
        assert_eq!(out.len(), 2);
        assert!(out[0].confidence >= out[1].confidence);
        for i in 0..out.len() {
            for j in (i + 1)..out.len() {
                if out[i].class_id == out[j].class_id {
                    assert!(out[i].bbox.iou(&out[j].bbox) <= 0.3);
                }
            }
        }
    }

    #[test]
    fn decode_reads_channel_first_and_inverts_letterbox() {
        // One anchor, single-class: layout [cx, cy, w, h, conf] with P=1.
        let lb = Letterbox {
            scale: 0.5,
            x_offset: 0,
            y_offset: 140,
        };
        let output = vec![320.0, 320.0, 32.0, 32.0, 0.88];
        let dets = decode_predictions(&output, 1, 1, true, 0.5, &lb);
        assert_eq!(dets.len(), 1);
        let d = dets[0];
        // Centre maps back to (640, 360) in source coordinates.
        assert!((d.bbox.x + d.bbox.width / 2.0 - 640.0).abs() < 1e-3);
        assert!((d.bbox.y + d.bbox.height / 2.0 - 360.0).abs() < 1e-3);
        assert_eq!(d.bbox.width, 64.0);
    }

    #[test]
    fn low_confidence_predictions_are_dropped() {
        let lb = Letterbox {
            scale: 1.0,
            x_offset: 0,
            y_offset: 0,
        };
        let output = vec![10.0, 10.0, 4.0, 4.0, 0.1];
        assert!(decode_predictions(&output, 1, 1, true, 0.5, &lb).is_empty());
    }

    #[test]
    fn multi_class_takes_the_best_class_score() {
        let lb = Letterbox {
            scale: 1.0,
            x_offset: 0,
            y_offset: 0,
        };
        // P=1, C=3: [cx, cy, w, h, c0, c1, c2]
        let output = vec![10.0, 10.0, 4.0, 4.0, 0.2, 0.7, 0.4];
        let dets = decode_predictions(&output, 1, 3, false, 0.5, &lb);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 1);
        assert_eq!(dets[0].confidence, 0.7);
    }

    #[test]
    fn truncated_output_clamps_instead_of_panicking() {
        let lb = Letterbox {
            scale: 1.0,
            x_offset: 0,
            y_offset: 0,
        };
        // Claims two predictions but carries only one.
        let output = vec![10.0, 10.0, 4.0, 4.0, 0.9];
        let dets = decode_predictions(&output, 2, 1, true, 0.5, &lb);
        assert!(dets.len() <= 1);
    }
}
