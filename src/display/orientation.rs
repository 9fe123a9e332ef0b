//! Display rotation for the capture stream

use serde::{Deserialize, Serialize};

/// Rotation in 90 degree steps, clockwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Nearest lower quarter turn, wrapping at 360.
    pub fn from_degrees(degrees: u32) -> Self {
        match (degrees % 360) / 90 {
            0 => Rotation::Deg0,
            1 => Rotation::Deg90,
            2 => Rotation::Deg180,
            _ => Rotation::Deg270,
        }
    }

    /// Platform surface-rotation index (0..=3) as reported by window managers.
    pub fn from_surface_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Rotation::Deg0),
            1 => Some(Rotation::Deg90),
            2 => Some(Rotation::Deg180),
            3 => Some(Rotation::Deg270),
            _ => None,
        }
    }
}

/// Which way the camera points relative to the screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Facing {
    #[default]
    Back,
    Front,
}

/// Rotation to apply to the capture stream so the preview is upright.
///
/// `mount_orientation` is the sensor's fixed rotation relative to the
/// device's natural orientation. Front cameras are mirrored, so the
/// result is inverted to keep a natural mirror preview.
pub fn display_rotation(mount_orientation: u32, device_rotation: Rotation, facing: Facing) -> u32 {
    let mount = mount_orientation % 360;
    let device = device_rotation.degrees();
    match facing {
        Facing::Front => (360 - (mount + device) % 360) % 360,
        Facing::Back => (mount + 360 - device) % 360,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROTATIONS: [Rotation; 4] = [
        Rotation::Deg0,
        Rotation::Deg90,
        Rotation::Deg180,
        Rotation::Deg270,
    ];

    #[test]
    fn back_camera_portrait() {
        assert_eq!(display_rotation(90, Rotation::Deg0, Facing::Back), 90);
    }

    #[test]
    fn front_camera_portrait_is_mirrored() {
        assert_eq!(display_rotation(90, Rotation::Deg0, Facing::Front), 270);
    }

    #[test]
    fn back_camera_landscape() {
        assert_eq!(display_rotation(90, Rotation::Deg90, Facing::Back), 0);
        assert_eq!(display_rotation(90, Rotation::Deg270, Facing::Back), 180);
    }

    #[test]
    fn front_camera_sensor_at_270() {
        assert_eq!(display_rotation(270, Rotation::Deg0, Facing::Front), 90);
        assert_eq!(display_rotation(270, Rotation::Deg90, Facing::Front), 0);
    }

    #[test]
    fn quarter_turn_inputs_stay_on_quarter_turns() {
        for mount in [0, 90, 180, 270] {
            for device in ROTATIONS {
                for facing in [Facing::Back, Facing::Front] {
                    let first = display_rotation(mount, device, facing);
                    assert!(matches!(first, 0 | 90 | 180 | 270), "{mount} {device:?} {facing:?}");
                    assert_eq!(first, display_rotation(mount, device, facing));
                }
            }
        }
    }

    #[test]
    fn surface_index_conversion() {
        assert_eq!(Rotation::from_surface_index(3), Some(Rotation::Deg270));
        assert_eq!(Rotation::from_surface_index(4), None);
        assert_eq!(Rotation::from_degrees(450), Rotation::Deg90);
    }
}
