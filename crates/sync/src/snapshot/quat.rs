//! Smallest-three quaternion compression.
//!
//! A unit quaternion's largest-magnitude component is implied by the other
//! three and the unit-norm constraint, so only the three smaller components
//! go on the wire, each quantized to [`ORIENTATION_BITS`] bits over the range
//! `[-1/sqrt(2), +1/sqrt(2)]`. Since `q` and `-q` encode the same rotation,
//! the quaternion is negated as needed so the omitted component is always
//! non-negative on reconstruction.

use glam::Quat;

use crate::net::{BitSerializer, StreamError};

pub const ORIENTATION_BITS: u32 = 9;

const MINIMUM: f32 = -0.707_107;
const MAXIMUM: f32 = 0.707_107;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressedQuat {
    /// Index of the omitted (largest magnitude) component, 0..=3 for x,y,z,w.
    pub largest: u32,
    pub integer_a: u32,
    pub integer_b: u32,
    pub integer_c: u32,
}

impl CompressedQuat {
    pub fn from_quat(q: Quat) -> Self {
        let components = [q.x, q.y, q.z, q.w];

        let mut largest = 0;
        for (index, component) in components.iter().enumerate() {
            if component.abs() > components[largest as usize].abs() {
                largest = index as u32;
            }
        }

        let sign = if components[largest as usize] < 0.0 {
            -1.0
        } else {
            1.0
        };

        let mut smallest = [0.0f32; 3];
        let mut cursor = 0;
        for (index, component) in components.iter().enumerate() {
            if index as u32 != largest {
                smallest[cursor] = component * sign;
                cursor += 1;
            }
        }

        let scale = ((1u32 << ORIENTATION_BITS) - 1) as f32;
        let quantize = |value: f32| -> u32 {
            let clamped = value.clamp(MINIMUM, MAXIMUM);
            ((clamped - MINIMUM) / (MAXIMUM - MINIMUM) * scale + 0.5).floor() as u32
        };

        Self {
            largest,
            integer_a: quantize(smallest[0]),
            integer_b: quantize(smallest[1]),
            integer_c: quantize(smallest[2]),
        }
    }

    pub fn to_quat(self) -> Quat {
        let scale = ((1u32 << ORIENTATION_BITS) - 1) as f32;
        let dequantize =
            |integer: u32| -> f32 { integer as f32 / scale * (MAXIMUM - MINIMUM) + MINIMUM };

        let a = dequantize(self.integer_a);
        let b = dequantize(self.integer_b);
        let c = dequantize(self.integer_c);
        let d = (1.0 - a * a - b * b - c * c).max(0.0).sqrt();

        let quat = match self.largest {
            0 => Quat::from_xyzw(d, a, b, c),
            1 => Quat::from_xyzw(a, d, b, c),
            2 => Quat::from_xyzw(a, b, d, c),
            _ => Quat::from_xyzw(a, b, c, d),
        };
        quat.normalize()
    }

    pub fn serialize<S: BitSerializer>(&mut self, stream: &mut S) -> Result<(), StreamError> {
        self.largest = stream.serialize_bits(self.largest, 2)?;
        self.integer_a = stream.serialize_bits(self.integer_a, ORIENTATION_BITS)?;
        self.integer_b = stream.serialize_bits(self.integer_b, ORIENTATION_BITS)?;
        self.integer_c = stream.serialize_bits(self.integer_c, ORIENTATION_BITS)?;
        Ok(())
    }
}
