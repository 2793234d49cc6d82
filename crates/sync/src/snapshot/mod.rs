mod buffer;
mod cube;
mod interpolation;
mod quat;

pub use buffer::{SequenceBuffer, SlidingWindow, MAX_SNAPSHOTS};
pub use cube::{
    CubeState, QuantizedCube, Snapshot, SnapshotConfig, DEFAULT_NUM_CUBES, POSITION_BOUND_XY,
    POSITION_BOUND_Z, UNITS_PER_METER,
};
pub use interpolation::{InterpolationBuffer, InterpolationMode, ObjectUpdate};
pub use quat::{CompressedQuat, ORIENTATION_BITS};
