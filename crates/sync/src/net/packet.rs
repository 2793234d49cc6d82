//! Packet set and wire entry points.
//!
//! Two packet types cross the link: delta-compressed snapshots (sender to
//! receiver) and cumulative acks (receiver to sender). The closed set is a
//! tagged enum; one wire bit selects the variant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::bitstream::{BitSerializer, MeasureStream, ReadStream, StreamError, WriteStream};
use super::delta::{serialize_delta_snapshot, DeltaContext};
use crate::snapshot::QuantizedCube;

pub const LEFT_PORT: u16 = 1000;
pub const RIGHT_PORT: u16 = 1001;

/// Configured maximum datagram size; there is no MTU discovery.
pub const MAX_PACKET_SIZE: usize = 64 * 1024;

const DELTA_SNAPSHOT_PACKET: i32 = 0;
const DELTA_ACK_PACKET: i32 = 1;
const PACKET_TYPE_COUNT: i32 = 2;

const SEQUENCE_WRAP_THRESHOLD: u16 = 1 << 15;

/// Wrap-around ordering for 16-bit sequence numbers.
#[inline]
pub fn sequence_greater_than(s1: u16, s2: u16) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaMode {
    NotChanged,
    ChangedIndex,
    RelativeIndex,
    RelativePosition,
    RelativeOrientation,
}

impl DeltaMode {
    pub const COUNT: usize = 5;

    pub const ALL: [DeltaMode; Self::COUNT] = [
        DeltaMode::NotChanged,
        DeltaMode::ChangedIndex,
        DeltaMode::RelativeIndex,
        DeltaMode::RelativePosition,
        DeltaMode::RelativeOrientation,
    ];

    pub fn index(self) -> i32 {
        match self {
            DeltaMode::NotChanged => 0,
            DeltaMode::ChangedIndex => 1,
            DeltaMode::RelativeIndex => 2,
            DeltaMode::RelativePosition => 3,
            DeltaMode::RelativeOrientation => 4,
        }
    }

    pub fn from_index(index: i32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn description(self) -> &'static str {
        match self {
            DeltaMode::NotChanged => "Not changed",
            DeltaMode::ChangedIndex => "Changed index",
            DeltaMode::RelativeIndex => "Relative index",
            DeltaMode::RelativePosition => "Relative position",
            DeltaMode::RelativeOrientation => "Relative orientation",
        }
    }
}

impl Default for DeltaMode {
    fn default() -> Self {
        DeltaMode::NotChanged
    }
}

#[derive(Debug, Error)]
pub enum PacketError {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("base snapshot {0} missing from sequence buffer")]
    MissingBase(u16),
    #[error("base snapshot {0} no longer held by sliding window")]
    StaleBase(u16),
    #[error("snapshot carries {got} cubes, configured world has {expected}")]
    CubeCountMismatch { got: usize, expected: usize },
}

impl PacketError {
    /// Transient drops are expected under loss and reordering and are counted,
    /// not logged as errors. Everything else is a protocol violation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PacketError::MissingBase(_) | PacketError::Stream(StreamError::Underflow(_))
        )
    }
}

/// Snapshot delta keyed by sequence, encoded against `base_sequence` (or the
/// shared initial snapshot when `initial` is set). The packet owns its cube
/// payload; window and buffer storage is exchanged by copy.
#[derive(Debug, Clone, Default)]
pub struct DeltaSnapshotPacket {
    pub sequence: u16,
    pub delta_mode: DeltaMode,
    pub initial: bool,
    pub base_sequence: u16,
    pub cubes: Vec<QuantizedCube>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaAckPacket {
    pub ack: u16,
}

impl DeltaAckPacket {
    fn serialize<S: BitSerializer>(&mut self, stream: &mut S) -> Result<(), StreamError> {
        self.ack = stream.serialize_u16(self.ack)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Packet {
    Snapshot(DeltaSnapshotPacket),
    Ack(DeltaAckPacket),
}

impl Packet {
    fn serialize_out<S: BitSerializer>(
        &mut self,
        stream: &mut S,
        ctx: &DeltaContext,
    ) -> Result<(), PacketError> {
        match self {
            Packet::Snapshot(packet) => {
                stream.serialize_int(DELTA_SNAPSHOT_PACKET, 0, PACKET_TYPE_COUNT - 1)?;
                serialize_delta_snapshot(stream, packet, ctx)
            }
            Packet::Ack(packet) => {
                stream.serialize_int(DELTA_ACK_PACKET, 0, PACKET_TYPE_COUNT - 1)?;
                packet.serialize(stream)?;
                Ok(())
            }
        }
    }

    /// Serializes into a datagram no larger than `max_packet_size`.
    pub fn write(&mut self, ctx: &DeltaContext, max_packet_size: usize) -> Result<Vec<u8>, PacketError> {
        let mut stream = WriteStream::new(max_packet_size);
        self.serialize_out(&mut stream, ctx)?;
        Ok(stream.finish()?)
    }

    /// Dry run returning the exact bit count `write` would emit.
    pub fn measure_bits(&mut self, ctx: &DeltaContext) -> Result<usize, PacketError> {
        let mut stream = MeasureStream::new();
        self.serialize_out(&mut stream, ctx)?;
        Ok(stream.bits_processed())
    }

    /// Decodes a received datagram. Failure leaves the receiver state in
    /// `ctx` untouched; the caller just drops the packet.
    pub fn read(data: &[u8], ctx: &DeltaContext) -> Result<Packet, PacketError> {
        let mut stream = ReadStream::new(data);
        let tag = stream.serialize_int(0, 0, PACKET_TYPE_COUNT - 1)?;
        match tag {
            DELTA_SNAPSHOT_PACKET => {
                let mut packet = DeltaSnapshotPacket::default();
                serialize_delta_snapshot(&mut stream, &mut packet, ctx)?;
                Ok(Packet::Snapshot(packet))
            }
            _ => {
                let mut packet = DeltaAckPacket::default();
                packet.serialize(&mut stream)?;
                Ok(Packet::Ack(packet))
            }
        }
    }
}
