//! Cube state, in float form (simulation/view side) and fixed-point form
//! (wire side).

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::quat::CompressedQuat;

pub const DEFAULT_NUM_CUBES: usize = 901;
pub const UNITS_PER_METER: i32 = 512;
pub const POSITION_BOUND_XY: i32 = 256;
pub const POSITION_BOUND_Z: i32 = 32;

/// World dimensions shared by both peers. Every index and position field on
/// the wire derives its bit width from these values, so the peers must agree
/// on them before a session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub num_cubes: usize,
    pub units_per_meter: i32,
    /// Horizontal position bound in meters; x and y live in `[-bound, +bound]`.
    pub position_bound_xy: i32,
    /// Vertical position bound in meters; z lives in `[0, +bound]`.
    pub position_bound_z: i32,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            num_cubes: DEFAULT_NUM_CUBES,
            units_per_meter: UNITS_PER_METER,
            position_bound_xy: POSITION_BOUND_XY,
            position_bound_z: POSITION_BOUND_Z,
        }
    }
}

impl SnapshotConfig {
    pub fn quantized_bound_xy(&self) -> i32 {
        self.units_per_meter * self.position_bound_xy
    }

    pub fn quantized_bound_z(&self) -> i32 {
        self.units_per_meter * self.position_bound_z
    }
}

/// Full-precision cube state as sampled from the simulation and handed to
/// the view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubeState {
    pub interacting: bool,
    pub position: Vec3,
    pub orientation: Quat,
}

impl Default for CubeState {
    fn default() -> Self {
        Self {
            interacting: false,
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
        }
    }
}

/// Fixed-point cube state. Equality on this type is what the delta modes use
/// to decide whether a cube changed, so it must stay exact integer equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuantizedCube {
    pub interacting: bool,
    pub position_x: i32,
    pub position_y: i32,
    pub position_z: i32,
    pub orientation: CompressedQuat,
}

impl QuantizedCube {
    pub fn quantize(state: &CubeState, config: &SnapshotConfig) -> Self {
        let bound_xy = config.quantized_bound_xy();
        let bound_z = config.quantized_bound_z();
        let scale = config.units_per_meter as f32;

        let quantize_axis = |value: f32, min: i32, max: i32| -> i32 {
            ((value * scale).floor() as i32).clamp(min, max)
        };

        Self {
            interacting: state.interacting,
            position_x: quantize_axis(state.position.x, -bound_xy, bound_xy),
            position_y: quantize_axis(state.position.y, -bound_xy, bound_xy),
            position_z: quantize_axis(state.position.z, 0, bound_z),
            orientation: CompressedQuat::from_quat(state.orientation),
        }
    }

    pub fn dequantize(&self, config: &SnapshotConfig) -> CubeState {
        let scale = config.units_per_meter as f32;
        CubeState {
            interacting: self.interacting,
            position: Vec3::new(
                self.position_x as f32 / scale,
                self.position_y as f32 / scale,
                self.position_z as f32 / scale,
            ),
            orientation: self.orientation.to_quat(),
        }
    }
}

/// One captured world state: a fixed-count array of quantized cubes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub cubes: Vec<QuantizedCube>,
}

impl Snapshot {
    pub fn new(num_cubes: usize) -> Self {
        Self {
            cubes: vec![QuantizedCube::default(); num_cubes],
        }
    }

    pub fn from_states(states: &[CubeState], config: &SnapshotConfig) -> Self {
        Self {
            cubes: states
                .iter()
                .map(|state| QuantizedCube::quantize(state, config))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_clamps_to_bounds() {
        let config = SnapshotConfig::default();
        let state = CubeState {
            interacting: true,
            position: Vec3::new(10_000.0, -10_000.0, -5.0),
            orientation: Quat::IDENTITY,
        };
        let quantized = QuantizedCube::quantize(&state, &config);
        assert_eq!(quantized.position_x, config.quantized_bound_xy());
        assert_eq!(quantized.position_y, -config.quantized_bound_xy());
        assert_eq!(quantized.position_z, 0);
        assert!(quantized.interacting);
    }

    #[test]
    fn quantize_dequantize_position_error() {
        let config = SnapshotConfig::default();
        let state = CubeState {
            interacting: false,
            position: Vec3::new(12.345, -67.89, 3.21),
            orientation: Quat::from_rotation_y(0.5),
        };
        let restored = QuantizedCube::quantize(&state, &config).dequantize(&config);
        let step = 1.0 / config.units_per_meter as f32;
        assert!((restored.position - state.position).abs().max_element() <= step);
    }

    #[test]
    fn changed_detection_is_exact_equality() {
        let config = SnapshotConfig::default();
        let state = CubeState::default();
        let a = QuantizedCube::quantize(&state, &config);
        let mut b = a;
        assert_eq!(a, b);
        b.position_z += 1;
        assert_ne!(a, b);
    }
}
