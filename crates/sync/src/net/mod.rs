mod bitstream;
mod delta;
mod packet;
mod session;
mod simulator;

pub use bitstream::{
    bits_required, BitSerializer, MeasureStream, ReadStream, StreamError, WriteStream,
};
pub use delta::{count_relative_index_bits, serialize_delta_snapshot, DeltaContext};
pub use packet::{
    sequence_greater_than, DeltaAckPacket, DeltaMode, DeltaSnapshotPacket, Packet, PacketError,
    LEFT_PORT, MAX_PACKET_SIZE, RIGHT_PORT,
};
pub use session::{
    ConfigError, Session, SessionConfig, SessionState, SessionStats, SnapshotSource, ViewSink,
};
pub use simulator::{Simulator, SimulatorConfig, SimulatorState, TimeBase};
