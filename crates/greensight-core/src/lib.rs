//! greensight-core — shared primitives for the greensight launch monitor.
//!
//! This crate holds the pieces every other part of the system consumes:
//!
//! 1. **Config** – a three-tier key/value store (system defaults, user
//!    overrides, runtime overrides) with flat-key mapping, validation
//!    and preset support.
//! 2. **Camera** – pinhole camera model: sensor tags, focal length,
//!    pointing angles, expected ball radius at distance, projection math.
//! 3. **Rig** – calibration rig geometry: known ball offsets per
//!    (rig kind, enclosure) pair.
//! 4. **Colorsys** – RGB/HLS/HSV/YIQ conversions for the detector's
//!    color gate.
//! 5. **Strobe** – the strobe pulse-train value type with its timing
//!    invariants.
//!
//! Heavier machinery (detection, capture, kinematics) lives in the
//! `greensight` crate.

pub mod camera;
pub mod colorsys;
pub mod config;
pub mod rig;
pub mod strobe;

pub use camera::{CamId, CameraSpec, LensKind, Orientation, SensorModel};
pub use config::{ConfigError, ConfigStore, MappingTable, ValueSource};
pub use rig::{Enclosure, RigKind, RigTable};
pub use strobe::{PulseTrainError, StrobePulse, StrobePulseTrain};
