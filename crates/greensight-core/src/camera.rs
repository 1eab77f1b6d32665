//! Pinhole camera model and per-slot hardware description.
//!
//! The projection model is a thin pinhole: focal length stored in
//! millimeters, sensor pixel pitch inferred from the sensor tag and
//! scaled for the working resolution. No lens distortion is modelled;
//! calibration absorbs residuals into the pointing angles.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Regulation golf ball radius in millimeters.
pub const BALL_RADIUS_MM: f64 = 21.335;

/// Sanity bounds for a calibrated focal length (mm).
pub const FOCAL_LENGTH_RANGE_MM: (f64, f64) = (2.0, 50.0);

/// Sanity bound for calibrated pointing angles (degrees off-bore).
pub const MAX_POINTING_ANGLE_DEG: f64 = 45.0;

/// Which physical camera slot a spec describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CamId {
    /// Monitoring camera watching the teed ball.
    Cam1,
    /// Externally-triggered flight camera.
    Cam2,
}

impl CamId {
    /// 1-based slot number as used in config keys.
    pub fn number(self) -> u8 {
        match self {
            CamId::Cam1 => 1,
            CamId::Cam2 => 2,
        }
    }

    /// Parse a 1-based slot number.
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(CamId::Cam1),
            2 => Some(CamId::Cam2),
            _ => None,
        }
    }
}

/// Supported sensor modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SensorModel {
    /// Raspberry Pi Global Shutter camera (IMX296, color).
    #[default]
    PiGlobalShutter,
    /// InnoMaker IMX296 mono module.
    InnoMakerImx296Mono,
    /// Raspberry Pi HQ camera (IMX477).
    PiHq,
}

impl SensorModel {
    /// Native sensor resolution (width, height) in pixels.
    pub fn native_resolution(self) -> (u32, u32) {
        match self {
            SensorModel::PiGlobalShutter | SensorModel::InnoMakerImx296Mono => (1456, 1088),
            SensorModel::PiHq => (4056, 3040),
        }
    }

    /// Physical pixel pitch in micrometers.
    pub fn pixel_pitch_um(self) -> f64 {
        match self {
            SensorModel::PiGlobalShutter | SensorModel::InnoMakerImx296Mono => 3.45,
            SensorModel::PiHq => 1.55,
        }
    }

    /// Whether the sensor emits an extra frame per external trigger
    /// that must be flushed before the next real frame.
    pub fn requires_flush_trigger(self) -> bool {
        match self {
            SensorModel::PiGlobalShutter => true,
            SensorModel::InnoMakerImx296Mono => true,
            SensorModel::PiHq => false,
        }
    }

    /// Whether the sensor needs an external-trigger-mode setup command
    /// after the camera stack has started.
    pub fn needs_trigger_mode_setup(self) -> bool {
        matches!(self, SensorModel::InnoMakerImx296Mono)
    }
}

/// Lens fitted to a camera slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LensKind {
    /// Stock 6 mm M12 lens.
    #[default]
    Stock6mm,
    /// 3.6 mm wide-angle M12 lens.
    Wide3_6mm,
    /// 12 mm narrow M12 lens.
    Narrow12mm,
}

impl LensKind {
    /// Nominal focal length in millimeters, used before calibration.
    pub fn nominal_focal_mm(self) -> f64 {
        match self {
            LensKind::Stock6mm => 6.0,
            LensKind::Wide3_6mm => 3.6,
            LensKind::Narrow12mm => 12.0,
        }
    }
}

/// Mounting orientation of the camera module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Orientation {
    #[default]
    Upright,
    /// Module mounted upside down; the host stack flips frames.
    Inverted,
}

/// Per-camera hardware description plus calibrated intrinsics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraSpec {
    /// Physical camera slot.
    pub id: CamId,
    /// Sensor module tag.
    pub sensor: SensorModel,
    /// Lens tag.
    pub lens: LensKind,
    /// Mounting orientation.
    pub orientation: Orientation,
    /// Working resolution (width, height) in pixels.
    pub resolution: (u32, u32),
    /// Focal length in millimeters (nominal until calibrated).
    pub focal_length_mm: f64,
    /// Pointing angles (x, y) in degrees off-bore.
    pub angles_deg: [f64; 2],
}

impl CameraSpec {
    /// A spec at the sensor's native resolution with the lens-nominal
    /// focal length and zero pointing angles.
    pub fn new(id: CamId, sensor: SensorModel, lens: LensKind, orientation: Orientation) -> Self {
        Self {
            id,
            sensor,
            lens,
            orientation,
            resolution: sensor.native_resolution(),
            focal_length_mm: lens.nominal_focal_mm(),
            angles_deg: [0.0, 0.0],
        }
    }

    /// Returns `true` when the focal length is positive and finite and
    /// the resolution is non-degenerate.
    pub fn is_valid(&self) -> bool {
        self.focal_length_mm.is_finite()
            && self.focal_length_mm > 0.0
            && self.resolution.0 > 0
            && self.resolution.1 > 0
    }

    /// Whether the calibrated intrinsics fall inside the sanity bounds.
    pub fn within_calibration_bounds(&self) -> bool {
        let (lo, hi) = FOCAL_LENGTH_RANGE_MM;
        self.focal_length_mm >= lo
            && self.focal_length_mm <= hi
            && self.angles_deg[0].abs() <= MAX_POINTING_ANGLE_DEG
            && self.angles_deg[1].abs() <= MAX_POINTING_ANGLE_DEG
    }

    /// Effective pixel pitch in millimeters at the given working image
    /// width. Binned/scaled modes widen the pitch proportionally.
    pub fn pixel_pitch_mm(&self, image_width_px: u32) -> f64 {
        let (native_w, _) = self.sensor.native_resolution();
        let scale = native_w as f64 / image_width_px.max(1) as f64;
        self.sensor.pixel_pitch_um() * 1e-3 * scale
    }

    /// Expected ball radius in pixels for a ball at `distance_m`
    /// imaged at `image_width_px` working width.
    pub fn expected_radius_px(&self, distance_m: f64, image_width_px: u32) -> Option<f64> {
        if !self.is_valid() || distance_m <= 0.0 {
            return None;
        }
        let pitch = self.pixel_pitch_mm(image_width_px);
        Some(self.focal_length_mm * BALL_RADIUS_MM / (distance_m * 1000.0) / pitch)
    }

    /// Focal length (mm) recovered from a measured ball radius at a
    /// known direct distance.
    pub fn focal_length_from_radius(
        &self,
        measured_radius_px: f64,
        distance_m: f64,
        image_width_px: u32,
    ) -> Option<f64> {
        if measured_radius_px < 1.0 || distance_m <= 0.0 {
            return None;
        }
        let pitch = self.pixel_pitch_mm(image_width_px);
        Some(measured_radius_px * pitch * distance_m * 1000.0 / BALL_RADIUS_MM)
    }

    /// Direct distance (m) to a ball whose image radius was measured.
    pub fn distance_from_radius(&self, measured_radius_px: f64, image_width_px: u32) -> Option<f64> {
        if !self.is_valid() || measured_radius_px < 1.0 {
            return None;
        }
        let pitch = self.pixel_pitch_mm(image_width_px);
        Some(self.focal_length_mm * BALL_RADIUS_MM / (measured_radius_px * pitch) / 1000.0)
    }

    /// Convert a horizontal pixel offset from image centre into a real
    /// X offset (m) at the given depth. Negative means left of bore.
    pub fn x_offset_m(&self, distance_m: f64, dx_px: f64, image_width_px: u32) -> f64 {
        distance_m * dx_px * self.pixel_pitch_mm(image_width_px) / self.focal_length_mm
    }

    /// Convert a vertical pixel offset from image centre into a real
    /// Y offset (m) at the given depth.
    pub fn y_offset_m(&self, distance_m: f64, dy_px: f64, image_width_px: u32) -> f64 {
        distance_m * dy_px * self.pixel_pitch_mm(image_width_px) / self.focal_length_mm
    }

    /// Project a camera-frame point (meters, +z forward, +y down in
    /// image convention) to pixel coordinates.
    pub fn project(&self, p: &Vector3<f64>) -> Option<[f64; 2]> {
        if !self.is_valid() || p.z <= 0.0 {
            return None;
        }
        let pitch = self.pixel_pitch_mm(self.resolution.0);
        let f_px = self.focal_length_mm / pitch;
        let cx = self.resolution.0 as f64 / 2.0;
        let cy = self.resolution.1 as f64 / 2.0;
        let u = cx + p.x / p.z * f_px;
        let v = cy + p.y / p.z * f_px;
        (u.is_finite() && v.is_finite()).then_some([u, v])
    }

    /// Unproject a pixel to the camera-frame point at direct range
    /// `range_m` along the pixel's viewing ray.
    pub fn unproject_at_range(&self, pixel: [f64; 2], range_m: f64) -> Option<Vector3<f64>> {
        if !self.is_valid() || range_m <= 0.0 {
            return None;
        }
        let pitch = self.pixel_pitch_mm(self.resolution.0);
        let f_px = self.focal_length_mm / pitch;
        let cx = self.resolution.0 as f64 / 2.0;
        let cy = self.resolution.1 as f64 / 2.0;
        let dir = Vector3::new((pixel[0] - cx) / f_px, (pixel[1] - cy) / f_px, 1.0);
        let n = dir.norm();
        if !n.is_finite() || n <= 0.0 {
            return None;
        }
        Some(dir * (range_m / n))
    }

    /// Unproject a pixel to the camera-frame point at depth `z_m`.
    pub fn unproject_at_depth(&self, pixel: [f64; 2], z_m: f64) -> Option<Vector3<f64>> {
        if !self.is_valid() || z_m <= 0.0 {
            return None;
        }
        let pitch = self.pixel_pitch_mm(self.resolution.0);
        let f_px = self.focal_length_mm / pitch;
        let cx = self.resolution.0 as f64 / 2.0;
        let cy = self.resolution.1 as f64 / 2.0;
        Some(Vector3::new(
            (pixel[0] - cx) / f_px * z_m,
            (pixel[1] - cy) / f_px * z_m,
            z_m,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn flight_cam() -> CameraSpec {
        CameraSpec::new(
            CamId::Cam2,
            SensorModel::PiGlobalShutter,
            LensKind::Stock6mm,
            Orientation::Upright,
        )
    }

    #[test]
    fn radius_and_focal_invert_each_other() {
        let cam = flight_cam();
        let d = 0.55;
        let r = cam.expected_radius_px(d, cam.resolution.0).unwrap();
        let f = cam
            .focal_length_from_radius(r, d, cam.resolution.0)
            .unwrap();
        assert_abs_diff_eq!(f, cam.focal_length_mm, epsilon = 1e-9);
    }

    #[test]
    fn distance_from_radius_inverts_expected_radius() {
        let cam = flight_cam();
        let r = cam.expected_radius_px(0.8, cam.resolution.0).unwrap();
        let d = cam.distance_from_radius(r, cam.resolution.0).unwrap();
        assert_abs_diff_eq!(d, 0.8, epsilon = 1e-9);
    }

    #[test]
    fn binned_mode_doubles_expected_radius_error_free() {
        let cam = flight_cam();
        let full = cam.expected_radius_px(0.6, 1456).unwrap();
        let half = cam.expected_radius_px(0.6, 728).unwrap();
        assert_abs_diff_eq!(full, half * 2.0, epsilon = 1e-9);
    }

    #[test]
    fn project_unproject_roundtrip() {
        let cam = flight_cam();
        let p = Vector3::new(0.12, -0.05, 0.62);
        let px = cam.project(&p).unwrap();
        let back = cam.unproject_at_depth(px, p.z).unwrap();
        assert_abs_diff_eq!(back.x, p.x, epsilon = 1e-9);
        assert_abs_diff_eq!(back.y, p.y, epsilon = 1e-9);
    }

    #[test]
    fn unproject_at_range_preserves_range() {
        let cam = flight_cam();
        let p = cam.unproject_at_range([900.0, 300.0], 0.75).unwrap();
        assert_abs_diff_eq!(p.norm(), 0.75, epsilon = 1e-9);
    }

    #[test]
    fn calibration_bounds_reject_wild_angles() {
        let mut cam = flight_cam();
        assert!(cam.within_calibration_bounds());
        cam.angles_deg = [60.0, 0.0];
        assert!(!cam.within_calibration_bounds());
        cam.angles_deg = [0.0, 0.0];
        cam.focal_length_mm = 80.0;
        assert!(!cam.within_calibration_bounds());
    }

    #[test]
    fn behind_camera_points_do_not_project() {
        let cam = flight_cam();
        assert!(cam.project(&Vector3::new(0.0, 0.0, -0.5)).is_none());
    }
}
