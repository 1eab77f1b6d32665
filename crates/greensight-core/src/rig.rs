//! Calibration rig geometry.
//!
//! A rig places a ball at a known (x, y, z) offset from each camera.
//! Which offsets apply depends on the rig kind and the enclosure
//! generation; the custom kind carries its own pair. The table is
//! built once at startup and read-only afterwards.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::camera::CamId;

/// Physical calibration jig variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RigKind {
    /// Both cameras facing straight out.
    StraightOn,
    /// Camera 1 skewed toward the hitting area.
    Skewed,
    /// Operator-supplied offsets.
    Custom,
}

impl RigKind {
    /// Parse the 1-based config enum (1 = straight, 2 = skewed, 3 = custom).
    pub fn from_config_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(RigKind::StraightOn),
            2 => Some(RigKind::Skewed),
            3 => Some(RigKind::Custom),
            _ => None,
        }
    }
}

/// Enclosure generation; the mounting geometry shifts between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Enclosure {
    #[default]
    V2,
    V3,
}

/// Ball offsets from camera 1 and camera 2 for one rig configuration,
/// in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigOffsets {
    pub cam1: [f64; 3],
    pub cam2: [f64; 3],
}

impl RigOffsets {
    fn for_camera(&self, id: CamId) -> Vector3<f64> {
        let v = match id {
            CamId::Cam1 => self.cam1,
            CamId::Cam2 => self.cam2,
        };
        Vector3::new(v[0], v[1], v[2])
    }
}

#[derive(Debug, Error)]
pub enum RigError {
    #[error("no offsets configured for rig {rig:?} / enclosure {enclosure:?}")]
    MissingEntry { rig: RigKind, enclosure: Enclosure },
    #[error("custom rig selected but no custom offsets configured")]
    MissingCustom,
    #[error("rig offsets give a non-positive distance to the ball")]
    DegenerateDistance,
}

/// Lookup table from (rig, enclosure) to the known ball offsets.
#[derive(Debug, Clone)]
pub struct RigTable {
    entries: HashMap<(RigKind, Enclosure), RigOffsets>,
    custom: Option<RigOffsets>,
}

impl RigTable {
    /// Build a table from explicit entries.
    pub fn new(
        entries: HashMap<(RigKind, Enclosure), RigOffsets>,
        custom: Option<RigOffsets>,
    ) -> Self {
        Self { entries, custom }
    }

    /// Factory-default offsets for both enclosure generations.
    pub fn factory_defaults() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            (RigKind::StraightOn, Enclosure::V2),
            RigOffsets {
                cam1: [0.0, -0.286, 0.521],
                cam2: [0.0, 0.046, 0.541],
            },
        );
        entries.insert(
            (RigKind::Skewed, Enclosure::V2),
            RigOffsets {
                cam1: [-0.041, -0.286, 0.521],
                cam2: [0.0, 0.046, 0.541],
            },
        );
        entries.insert(
            (RigKind::StraightOn, Enclosure::V3),
            RigOffsets {
                cam1: [0.0, -0.305, 0.558],
                cam2: [0.0, 0.055, 0.572],
            },
        );
        entries.insert(
            (RigKind::Skewed, Enclosure::V3),
            RigOffsets {
                cam1: [-0.044, -0.305, 0.558],
                cam2: [0.0, 0.055, 0.572],
            },
        );
        Self {
            entries,
            custom: None,
        }
    }

    /// Install operator-supplied offsets for the custom rig kind.
    pub fn set_custom(&mut self, offsets: RigOffsets) {
        self.custom = Some(offsets);
    }

    /// Known ball position from the given camera for a rig selection.
    pub fn ball_position(
        &self,
        rig: RigKind,
        enclosure: Enclosure,
        camera: CamId,
    ) -> Result<Vector3<f64>, RigError> {
        let offsets = match rig {
            RigKind::Custom => self.custom.as_ref().ok_or(RigError::MissingCustom)?,
            _ => self
                .entries
                .get(&(rig, enclosure))
                .ok_or(RigError::MissingEntry { rig, enclosure })?,
        };
        let p = offsets.for_camera(camera);
        if p.norm() <= 1e-4 {
            return Err(RigError::DegenerateDistance);
        }
        Ok(p)
    }
}

impl Default for RigTable {
    fn default() -> Self {
        Self::factory_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_table_covers_standard_rigs() {
        let table = RigTable::factory_defaults();
        for rig in [RigKind::StraightOn, RigKind::Skewed] {
            for enc in [Enclosure::V2, Enclosure::V3] {
                for cam in [CamId::Cam1, CamId::Cam2] {
                    let p = table.ball_position(rig, enc, cam).unwrap();
                    assert!(p.norm() > 0.1, "implausibly close ball for {rig:?}/{enc:?}");
                }
            }
        }
    }

    #[test]
    fn custom_rig_requires_offsets() {
        let mut table = RigTable::factory_defaults();
        assert!(matches!(
            table.ball_position(RigKind::Custom, Enclosure::V2, CamId::Cam1),
            Err(RigError::MissingCustom)
        ));
        table.set_custom(RigOffsets {
            cam1: [0.1, -0.2, 0.5],
            cam2: [0.0, 0.1, 0.5],
        });
        let p = table
            .ball_position(RigKind::Custom, Enclosure::V2, CamId::Cam1)
            .unwrap();
        assert_eq!(p.x, 0.1);
    }

    #[test]
    fn config_codes_map_one_based() {
        assert_eq!(RigKind::from_config_code(1), Some(RigKind::StraightOn));
        assert_eq!(RigKind::from_config_code(3), Some(RigKind::Custom));
        assert_eq!(RigKind::from_config_code(0), None);
    }
}
