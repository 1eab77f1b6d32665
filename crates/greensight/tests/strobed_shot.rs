//! End-to-end analysis of a synthetic strobed frame through the
//! public API: classical detection, launch solving, spin search.

use greensight::detector::{Detector, DetectorConfig, SearchMode};
use greensight::solver::{estimate_spin, solve_launch, SpinConfig, SpinEstimate};
use image::RgbImage;
use nalgebra::Vector3;

use greensight_core::camera::{CamId, CameraSpec, LensKind, Orientation, SensorModel};

fn flight_camera() -> CameraSpec {
    let mut spec = CameraSpec::new(
        CamId::Cam2,
        SensorModel::PiGlobalShutter,
        LensKind::Stock6mm,
        Orientation::Upright,
    );
    spec.resolution = (728, 544);
    spec
}

/// Draw one ball with a little dimple texture at a camera-frame
/// position; the radius encodes the range.
fn draw_ball(img: &mut RgbImage, spec: &CameraSpec, position: Vector3<f64>) {
    let px = spec.project(&position).unwrap();
    let r = spec
        .expected_radius_px(position.norm(), spec.resolution.0)
        .unwrap();
    let (w, h) = img.dimensions();
    for y in 0..h {
        for x in 0..w {
            let dx = x as f64 - px[0];
            let dy = y as f64 - px[1];
            let dist = (dx * dx + dy * dy).sqrt();
            let coverage = (r - dist + 0.5).clamp(0.0, 1.0);
            if coverage <= 0.0 {
                continue;
            }
            // Dimple-ish texture: radial intensity ripple.
            let ripple = (6.0 * (dist / r) * std::f64::consts::PI).sin() * 14.0;
            let base = 210.0 + ripple;
            let v = (14.0 + coverage * (base - 14.0)).clamp(0.0, 255.0) as u8;
            img.put_pixel(x, y, image::Rgb([v, v, v.saturating_sub(5)]));
        }
    }
}

#[test]
fn strobed_frame_solves_to_a_plausible_launch() {
    let spec = flight_camera();
    let p1 = Vector3::new(-0.02, 0.0, 0.50);
    let p2 = Vector3::new(0.02, -0.012, 0.53);
    let dt = 0.001;

    let mut img = RgbImage::from_pixel(spec.resolution.0, spec.resolution.1, image::Rgb([14, 14, 16]));
    draw_ball(&mut img, &spec, p1);
    draw_ball(&mut img, &spec, p2);

    let detector = Detector::new(DetectorConfig::for_camera(&spec, 0.52));
    let mut balls = detector
        .detect(&img, SearchMode::Strobed, None)
        .expect("strobed detection");
    assert!(balls.len() >= 2, "found {}", balls.len());

    // Detector invariants.
    let (r_min, r_max) = (
        detector.config().min_radius(),
        detector.config().max_radius(),
    );
    for (i, a) in balls.iter().enumerate() {
        assert!(a.circle.r_px >= r_min && a.circle.r_px <= r_max);
        for b in balls.iter().skip(i + 1) {
            assert!(a.circle.center_distance(&b.circle) >= 0.5 * r_min);
        }
    }

    // Temporal order: the ball travels left to right.
    balls.truncate(2);
    balls.sort_by(|a, b| a.circle.cx.partial_cmp(&b.circle.cx).unwrap());

    let kin = solve_launch(&spec, &balls[0], &balls[1], dt).expect("launch solve");
    let truth = ((p2 - p1) / dt).norm();
    assert!(
        kin.speed_mps > truth * 0.6 && kin.speed_mps < truth * 1.4,
        "speed {} vs truth {truth}",
        kin.speed_mps
    );
    // Upward and rightward shot.
    assert!(kin.vertical_launch_deg > 0.0);
    assert!(kin.horizontal_launch_deg > 0.0);

    // The spin search must terminate with a definite answer on this
    // texture, whichever way it falls.
    let gray = image::imageops::grayscale(&img);
    let spin = estimate_spin(
        &gray,
        &balls[0].circle,
        &balls[1].circle,
        dt,
        &SpinConfig {
            max_spin_rpm: 2000.0,
            max_rifle_rpm: 0.0,
            coarse_step_rpm: 1000.0,
            ..Default::default()
        },
    );
    match spin {
        SpinEstimate::Rates { correlation, .. } => assert!(correlation.abs() <= 1.0),
        SpinEstimate::InsufficientFeatures => {}
    }
}
