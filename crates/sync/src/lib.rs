pub mod net;
pub mod snapshot;

pub use net::{
    sequence_greater_than, BitSerializer, ConfigError, DeltaAckPacket, DeltaContext, DeltaMode,
    DeltaSnapshotPacket, MeasureStream, Packet, PacketError, ReadStream, Session, SessionConfig,
    SessionState, SessionStats, Simulator, SimulatorConfig, SimulatorState, SnapshotSource,
    StreamError, TimeBase, ViewSink, WriteStream, LEFT_PORT, MAX_PACKET_SIZE, RIGHT_PORT,
};
pub use snapshot::{
    CompressedQuat, CubeState, InterpolationBuffer, InterpolationMode, ObjectUpdate,
    QuantizedCube, SequenceBuffer, SlidingWindow, Snapshot, SnapshotConfig, DEFAULT_NUM_CUBES,
    MAX_SNAPSHOTS, ORIENTATION_BITS,
};
