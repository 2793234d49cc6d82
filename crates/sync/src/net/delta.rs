//! Delta-compressed snapshot serialization.
//!
//! Each snapshot packet is encoded against an agreed base snapshot: the
//! shared initial snapshot before the first ack, afterwards the window entry
//! at `base_sequence`. Five modes of increasing sophistication trade cpu for
//! bits; all of them produce every cube of the output snapshot, either from
//! the wire or copied from the base.
//!
//! The reader and writer walk the same control path in lockstep, so any
//! change to field order here changes the wire format.

use super::bitstream::{bits_required, BitSerializer, StreamError};
use super::packet::{DeltaMode, DeltaSnapshotPacket, PacketError};
use crate::snapshot::{QuantizedCube, SequenceBuffer, SlidingWindow, Snapshot, SnapshotConfig};

/// Changed-count ceiling for [`DeltaMode::ChangedIndex`].
const MAX_CHANGED_INDEX: i32 = 89;
/// Changed-count ceiling for [`DeltaMode::RelativeIndex`].
const MAX_CHANGED_RELATIVE: i32 = 255;
/// Changed-count ceiling for the relative position/orientation modes.
const MAX_CHANGED_POSITION: i32 = 126;
/// Relative indices win only while the estimated index cost stays below this.
const RELATIVE_INDEX_BITS_THRESHOLD: usize = 900;
/// Per-axis offset bound for the relative position encoding (11 bits signed).
const RELATIVE_POSITION_BOUND: i32 = 1023;

/// Typed replacement for the opaque per-connection context the stream used
/// to carry: the writer resolves bases from its sliding window, the reader
/// from its sequence buffer, and both share the initial snapshot.
#[derive(Debug, Clone, Copy)]
pub enum DeltaContext<'a> {
    Sender {
        window: &'a SlidingWindow,
        initial: &'a Snapshot,
        config: &'a SnapshotConfig,
    },
    Receiver {
        buffer: &'a SequenceBuffer,
        initial: &'a Snapshot,
        config: &'a SnapshotConfig,
    },
}

impl<'a> DeltaContext<'a> {
    pub fn sender(
        window: &'a SlidingWindow,
        initial: &'a Snapshot,
        config: &'a SnapshotConfig,
    ) -> Self {
        DeltaContext::Sender {
            window,
            initial,
            config,
        }
    }

    pub fn receiver(
        buffer: &'a SequenceBuffer,
        initial: &'a Snapshot,
        config: &'a SnapshotConfig,
    ) -> Self {
        DeltaContext::Receiver {
            buffer,
            initial,
            config,
        }
    }

    pub fn config(&self) -> &'a SnapshotConfig {
        match *self {
            DeltaContext::Sender { config, .. } => config,
            DeltaContext::Receiver { config, .. } => config,
        }
    }

    fn base(&self, is_initial: bool, base_sequence: u16) -> Result<&'a Snapshot, PacketError> {
        match *self {
            DeltaContext::Sender {
                window, initial, ..
            } => {
                if is_initial {
                    Ok(initial)
                } else {
                    window
                        .get(base_sequence)
                        .ok_or(PacketError::StaleBase(base_sequence))
                }
            }
            DeltaContext::Receiver {
                buffer, initial, ..
            } => {
                if is_initial {
                    Ok(initial)
                } else {
                    buffer
                        .find(base_sequence)
                        .ok_or(PacketError::MissingBase(base_sequence))
                }
            }
        }
    }
}

/// Single serialize routine for the snapshot packet, shared by the write,
/// read and measure streams.
pub fn serialize_delta_snapshot<S: BitSerializer>(
    stream: &mut S,
    packet: &mut DeltaSnapshotPacket,
    ctx: &DeltaContext,
) -> Result<(), PacketError> {
    let config = ctx.config();
    let num_cubes = config.num_cubes;

    packet.sequence = stream.serialize_u16(packet.sequence)?;

    let mode_index =
        stream.serialize_int(packet.delta_mode.index(), 0, DeltaMode::COUNT as i32 - 1)?;
    if S::IS_READING {
        packet.delta_mode =
            DeltaMode::from_index(mode_index).ok_or(StreamError::OutOfRange {
                value: mode_index as i64,
                min: 0,
                max: DeltaMode::COUNT as i64 - 1,
            })?;
    }

    packet.initial = stream.serialize_bool(packet.initial)?;
    if !packet.initial {
        packet.base_sequence = stream.serialize_u16(packet.base_sequence)?;
    }

    if S::IS_READING {
        packet.cubes = vec![QuantizedCube::default(); num_cubes];
    } else if packet.cubes.len() != num_cubes {
        return Err(PacketError::CubeCountMismatch {
            got: packet.cubes.len(),
            expected: num_cubes,
        });
    }

    let base = ctx.base(packet.initial, packet.base_sequence)?;
    if base.cubes.len() != num_cubes {
        return Err(PacketError::CubeCountMismatch {
            got: base.cubes.len(),
            expected: num_cubes,
        });
    }

    let cubes = &mut packet.cubes[..];
    let base_cubes = &base.cubes[..];

    match packet.delta_mode {
        DeltaMode::NotChanged => {
            serialize_changed_bits(stream, cubes, base_cubes, |stream, cube, _| {
                serialize_cube_absolute(stream, cube, config)
            })?;
        }
        DeltaMode::ChangedIndex => {
            let use_indices =
                S::IS_WRITING && count_changed(cubes, base_cubes) < MAX_CHANGED_INDEX;
            serialize_indexed(
                stream,
                cubes,
                base_cubes,
                MAX_CHANGED_INDEX + 1,
                use_indices,
                false,
                |stream, cube, _| serialize_cube_absolute(stream, cube, config),
            )?;
        }
        DeltaMode::RelativeIndex => {
            let use_indices = S::IS_WRITING && {
                let changed: Vec<bool> = cubes
                    .iter()
                    .zip(base_cubes)
                    .map(|(cube, base)| cube != base)
                    .collect();
                let num_changed = changed.iter().filter(|&&c| c).count() as i32;
                count_relative_index_bits(&changed) < RELATIVE_INDEX_BITS_THRESHOLD
                    && num_changed <= MAX_CHANGED_RELATIVE
            };
            serialize_indexed(
                stream,
                cubes,
                base_cubes,
                MAX_CHANGED_RELATIVE,
                use_indices,
                true,
                |stream, cube, _| serialize_cube_absolute(stream, cube, config),
            )?;
        }
        DeltaMode::RelativePosition => {
            let use_indices =
                S::IS_WRITING && count_changed(cubes, base_cubes) < MAX_CHANGED_POSITION;
            serialize_indexed(
                stream,
                cubes,
                base_cubes,
                MAX_CHANGED_POSITION + 1,
                use_indices,
                true,
                |stream, cube, base| serialize_cube_relative_position(stream, cube, base, config),
            )?;
        }
        DeltaMode::RelativeOrientation => {
            let use_indices =
                S::IS_WRITING && count_changed(cubes, base_cubes) < MAX_CHANGED_POSITION;
            serialize_indexed(
                stream,
                cubes,
                base_cubes,
                MAX_CHANGED_POSITION + 1,
                use_indices,
                true,
                |stream, cube, base| {
                    serialize_cube_relative_orientation(stream, cube, base, config)
                },
            )?;
        }
    }

    Ok(())
}

fn count_changed(cubes: &[QuantizedCube], base: &[QuantizedCube]) -> i32 {
    cubes
        .iter()
        .zip(base)
        .filter(|(cube, base)| cube != base)
        .count() as i32
}

/// Baseline layout: one `changed` bit per cube, changed cubes in full.
fn serialize_changed_bits<S, F>(
    stream: &mut S,
    cubes: &mut [QuantizedCube],
    base: &[QuantizedCube],
    mut body: F,
) -> Result<(), StreamError>
where
    S: BitSerializer,
    F: FnMut(&mut S, &mut QuantizedCube, &QuantizedCube) -> Result<(), StreamError>,
{
    for i in 0..cubes.len() {
        let changed = stream.serialize_bool(cubes[i] != base[i])?;
        if changed {
            body(stream, &mut cubes[i], &base[i])?;
        } else if S::IS_READING {
            cubes[i] = base[i];
        }
    }
    Ok(())
}

/// Index layout: a decision bit, then either an explicit changed-index list
/// or the per-cube fallback of [`serialize_changed_bits`]. The writer makes
/// the decision; the bit keeps the reader in lockstep.
fn serialize_indexed<S, F>(
    stream: &mut S,
    cubes: &mut [QuantizedCube],
    base: &[QuantizedCube],
    count_field_max: i32,
    use_indices_decision: bool,
    relative_indices: bool,
    mut body: F,
) -> Result<(), StreamError>
where
    S: BitSerializer,
    F: FnMut(&mut S, &mut QuantizedCube, &QuantizedCube) -> Result<(), StreamError>,
{
    let num_cubes = cubes.len();
    let use_indices = stream.serialize_bool(use_indices_decision)?;

    if !use_indices {
        return serialize_changed_bits(stream, cubes, base, body);
    }

    let num_changed = stream.serialize_int(count_changed(cubes, base), 0, count_field_max)?;

    if S::IS_WRITING {
        let mut first = true;
        let mut previous = 0usize;
        for i in 0..num_cubes {
            if cubes[i] != base[i] {
                if first || !relative_indices {
                    stream.serialize_int(i as i32, 0, num_cubes as i32 - 1)?;
                    first = false;
                } else {
                    serialize_index_relative(stream, previous, i, num_cubes)?;
                }
                body(stream, &mut cubes[i], &base[i])?;
                previous = i;
            }
        }
    } else {
        let mut changed = vec![false; num_cubes];
        let mut previous = 0usize;
        for j in 0..num_changed {
            let i = if j == 0 || !relative_indices {
                stream.serialize_int(0, 0, num_cubes as i32 - 1)? as usize
            } else {
                serialize_index_relative(stream, previous, 0, num_cubes)?
            };
            body(stream, &mut cubes[i], &base[i])?;
            changed[i] = true;
            previous = i;
        }
        for i in 0..num_cubes {
            if !changed[i] {
                cubes[i] = base[i];
            }
        }
    }

    Ok(())
}

/// Gap code between successive changed indices, cheap for small gaps.
///
/// Cascading flag bits select the band: +1 costs a single bit, then bands
/// [2,5], [6,13], [14,29], [30,61], [62,125] cost 4/6/8/10/12 bits, and
/// anything larger falls back to a ranged int. [`count_relative_index_bits`]
/// must mirror this table exactly.
fn serialize_index_relative<S: BitSerializer>(
    stream: &mut S,
    previous: usize,
    current: usize,
    num_cubes: usize,
) -> Result<usize, StreamError> {
    let difference = if S::IS_WRITING {
        debug_assert!(current > previous);
        (current - previous) as i32
    } else {
        0
    };

    let decoded;

    if stream.serialize_bool(difference == 1)? {
        decoded = previous + 1;
    } else if stream.serialize_bool(difference <= 5)? {
        decoded = previous + stream.serialize_int(difference, 2, 5)? as usize;
    } else if stream.serialize_bool(difference <= 13)? {
        decoded = previous + stream.serialize_int(difference, 6, 13)? as usize;
    } else if stream.serialize_bool(difference <= 29)? {
        decoded = previous + stream.serialize_int(difference, 14, 29)? as usize;
    } else if stream.serialize_bool(difference <= 61)? {
        decoded = previous + stream.serialize_int(difference, 30, 61)? as usize;
    } else if stream.serialize_bool(difference <= 125)? {
        decoded = previous + stream.serialize_int(difference, 62, 125)? as usize;
    } else {
        decoded = previous + stream.serialize_int(difference, 126, num_cubes as i32 - 1)? as usize;
    }

    if S::IS_READING && decoded >= num_cubes {
        return Err(StreamError::OutOfRange {
            value: decoded as i64,
            min: 0,
            max: num_cubes as i64 - 1,
        });
    }
    Ok(decoded)
}

/// Exact bit cost of the index layer if [`DeltaMode::RelativeIndex`] takes
/// its index branch: the 8-bit count field, an absolute first index, and one
/// gap code per following index.
pub fn count_relative_index_bits(changed: &[bool]) -> usize {
    let num_cubes = changed.len();
    let mut bits = 8;
    let mut first = true;
    let mut previous = 0usize;

    for (i, &is_changed) in changed.iter().enumerate() {
        if !is_changed {
            continue;
        }
        if first {
            bits += bits_required(num_cubes as u32 - 1) as usize;
            first = false;
        } else {
            bits += match i - previous {
                1 => 1,
                2..=5 => 4,
                6..=13 => 6,
                14..=29 => 8,
                30..=61 => 10,
                62..=125 => 12,
                _ => 6 + bits_required((num_cubes as i64 - 1 - 126) as u32) as usize,
            };
        }
        previous = i;
    }

    bits
}

fn serialize_cube_absolute<S: BitSerializer>(
    stream: &mut S,
    cube: &mut QuantizedCube,
    config: &SnapshotConfig,
) -> Result<(), StreamError> {
    let bound_xy = config.quantized_bound_xy();
    let bound_z = config.quantized_bound_z();

    cube.interacting = stream.serialize_bool(cube.interacting)?;
    cube.position_x = stream.serialize_int(cube.position_x, -bound_xy, bound_xy)?;
    cube.position_y = stream.serialize_int(cube.position_y, -bound_xy, bound_xy)?;
    cube.position_z = stream.serialize_int(cube.position_z, 0, bound_z)?;
    cube.orientation.serialize(stream)
}

fn serialize_cube_relative_position<S: BitSerializer>(
    stream: &mut S,
    cube: &mut QuantizedCube,
    base: &QuantizedCube,
    config: &SnapshotConfig,
) -> Result<(), StreamError> {
    cube.interacting = stream.serialize_bool(cube.interacting)?;

    let relative_position = S::IS_WRITING
        && (cube.position_x - base.position_x).abs() <= RELATIVE_POSITION_BOUND
        && (cube.position_y - base.position_y).abs() <= RELATIVE_POSITION_BOUND
        && (cube.position_z - base.position_z).abs() <= RELATIVE_POSITION_BOUND;
    let relative_position = stream.serialize_bool(relative_position)?;

    if relative_position {
        let (mut offset_x, mut offset_y, mut offset_z) = if S::IS_WRITING {
            (
                cube.position_x - base.position_x,
                cube.position_y - base.position_y,
                cube.position_z - base.position_z,
            )
        } else {
            (0, 0, 0)
        };

        offset_x =
            stream.serialize_int(offset_x, -RELATIVE_POSITION_BOUND, RELATIVE_POSITION_BOUND)?;
        offset_y =
            stream.serialize_int(offset_y, -RELATIVE_POSITION_BOUND, RELATIVE_POSITION_BOUND)?;
        offset_z =
            stream.serialize_int(offset_z, -RELATIVE_POSITION_BOUND, RELATIVE_POSITION_BOUND)?;

        cube.position_x = base.position_x + offset_x;
        cube.position_y = base.position_y + offset_y;
        cube.position_z = base.position_z + offset_z;
    } else {
        let bound_xy = config.quantized_bound_xy();
        let bound_z = config.quantized_bound_z();
        cube.position_x = stream.serialize_int(cube.position_x, -bound_xy, bound_xy)?;
        cube.position_y = stream.serialize_int(cube.position_y, -bound_xy, bound_xy)?;
        cube.position_z = stream.serialize_int(cube.position_z, 0, bound_z)?;
    }

    cube.orientation.serialize(stream)
}

/// Hook for a future relative-quaternion encoding. Until that is enabled the
/// wire stays identical to the relative-position body: the orientation goes
/// out in absolute form.
fn serialize_cube_relative_orientation<S: BitSerializer>(
    stream: &mut S,
    cube: &mut QuantizedCube,
    base: &QuantizedCube,
    config: &SnapshotConfig,
) -> Result<(), StreamError> {
    serialize_cube_relative_position(stream, cube, base, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::bitstream::{MeasureStream, ReadStream, WriteStream};
    use crate::net::packet::MAX_PACKET_SIZE;
    use crate::snapshot::CompressedQuat;

    fn small_config(num_cubes: usize) -> SnapshotConfig {
        SnapshotConfig {
            num_cubes,
            ..SnapshotConfig::default()
        }
    }

    fn encode(
        packet: &mut DeltaSnapshotPacket,
        ctx: &DeltaContext,
    ) -> Result<Vec<u8>, PacketError> {
        let mut stream = WriteStream::new(MAX_PACKET_SIZE);
        serialize_delta_snapshot(&mut stream, packet, ctx)?;
        Ok(stream.finish()?)
    }

    fn decode(bytes: &[u8], ctx: &DeltaContext) -> Result<DeltaSnapshotPacket, PacketError> {
        let mut stream = ReadStream::new(bytes);
        let mut packet = DeltaSnapshotPacket::default();
        serialize_delta_snapshot(&mut stream, &mut packet, ctx)?;
        Ok(packet)
    }

    fn measure(packet: &mut DeltaSnapshotPacket, ctx: &DeltaContext) -> usize {
        let mut stream = MeasureStream::new();
        serialize_delta_snapshot(&mut stream, packet, ctx).unwrap();
        stream.bits_processed()
    }

    fn initial_packet(
        sequence: u16,
        mode: DeltaMode,
        cubes: Vec<QuantizedCube>,
    ) -> DeltaSnapshotPacket {
        DeltaSnapshotPacket {
            sequence,
            delta_mode: mode,
            initial: true,
            base_sequence: 0,
            cubes,
        }
    }

    fn roundtrip_initial(config: &SnapshotConfig, mode: DeltaMode, cubes: Vec<QuantizedCube>) {
        let initial = Snapshot::new(config.num_cubes);
        let window = SlidingWindow::new(4, config.num_cubes);
        let buffer = SequenceBuffer::new(4, config.num_cubes);
        let sender = DeltaContext::sender(&window, &initial, config);
        let receiver = DeltaContext::receiver(&buffer, &initial, config);

        let mut packet = initial_packet(7, mode, cubes.clone());
        let bytes = encode(&mut packet, &sender).unwrap();
        assert_eq!(measure(&mut packet, &sender).div_ceil(8), bytes.len());

        let decoded = decode(&bytes, &receiver).unwrap();
        assert_eq!(decoded.sequence, 7);
        assert_eq!(decoded.delta_mode, mode);
        assert!(decoded.initial);
        assert_eq!(decoded.cubes, cubes);
    }

    fn moved_cube(x: i32, y: i32, z: i32) -> QuantizedCube {
        QuantizedCube {
            interacting: false,
            position_x: x,
            position_y: y,
            position_z: z,
            orientation: CompressedQuat::default(),
        }
    }

    #[test]
    fn identity_delta_is_one_bit_per_cube() {
        // Single unchanged cube against an identical base: the body is one
        // cleared `changed` bit.
        let config = small_config(1);
        let initial = Snapshot::new(1);
        let window = SlidingWindow::new(4, 1);
        let buffer = SequenceBuffer::new(4, 1);
        let sender = DeltaContext::sender(&window, &initial, &config);
        let receiver = DeltaContext::receiver(&buffer, &initial, &config);

        let mut packet = initial_packet(0, DeltaMode::NotChanged, initial.cubes.clone());
        let bits = measure(&mut packet, &sender);
        // sequence (16) + mode (3) + initial flag (1) + one changed bit
        assert_eq!(bits, 16 + 3 + 1 + 1);

        let bytes = encode(&mut packet, &sender).unwrap();
        let decoded = decode(&bytes, &receiver).unwrap();
        assert_eq!(decoded.cubes, initial.cubes);
    }

    #[test]
    fn single_cube_move_relative_position() {
        // Four cubes, index 2 moved by (+5, -3, +1): index list plus one
        // relative-position body.
        let config = small_config(4);
        let initial = Snapshot::new(4);
        let window = SlidingWindow::new(4, 4);
        let buffer = SequenceBuffer::new(4, 4);
        let sender = DeltaContext::sender(&window, &initial, &config);
        let receiver = DeltaContext::receiver(&buffer, &initial, &config);

        let mut cubes = initial.cubes.clone();
        cubes[2] = moved_cube(5, -3, 1);

        let mut packet = initial_packet(1, DeltaMode::RelativePosition, cubes.clone());
        let bits = measure(&mut packet, &sender);
        // header 20 + use_indices 1 + count 7 + index 2 + interacting 1 +
        // use_relative 1 + 3 * 11 offsets + orientation 29
        assert_eq!(bits, 20 + 1 + 7 + 2 + 1 + 1 + 33 + 29);

        let bytes = encode(&mut packet, &sender).unwrap();
        let decoded = decode(&bytes, &receiver).unwrap();
        assert_eq!(decoded.cubes, cubes);
    }

    #[test]
    fn all_modes_roundtrip_sparse_changes() {
        let config = small_config(40);
        for mode in DeltaMode::ALL {
            let mut cubes = vec![QuantizedCube::default(); 40];
            cubes[0] = moved_cube(100, 200, 300);
            cubes[3] = moved_cube(-50, 0, 9000);
            cubes[4] = QuantizedCube {
                interacting: true,
                ..moved_cube(7, 7, 7)
            };
            cubes[39] = moved_cube(2000, -2000, 1);
            roundtrip_initial(&config, mode, cubes);
        }
    }

    #[test]
    fn all_modes_roundtrip_dense_changes() {
        // Enough changed cubes to force every mode onto its fallback path.
        let config = small_config(300);
        for mode in DeltaMode::ALL {
            let cubes: Vec<QuantizedCube> = (0..300)
                .map(|i| moved_cube(i as i32 * 17 % 4000, -(i as i32), (i as i32) % 900))
                .collect();
            roundtrip_initial(&config, mode, cubes);
        }
    }

    #[test]
    fn relative_position_falls_back_to_absolute_offsets() {
        // Offset beyond +/-1023 forces the absolute branch inside the body.
        let config = small_config(2);
        let mut cubes = vec![QuantizedCube::default(); 2];
        cubes[1] = QuantizedCube {
            interacting: true,
            ..moved_cube(5000, 0, 0)
        };
        roundtrip_initial(&config, DeltaMode::RelativePosition, cubes);
    }

    #[test]
    fn windowed_base_roundtrip() {
        // Encode sequence 1 against acked sequence 0 held in the window and
        // mirrored in the receiver's sequence buffer.
        let config = small_config(3);
        let initial = Snapshot::new(3);

        let mut window = SlidingWindow::new(8, 3);
        let (sequence, slot) = window.insert();
        assert_eq!(sequence, 0);
        slot.cubes[1] = moved_cube(10, 20, 30);
        let base_snapshot = window.get(0).unwrap().clone();

        let mut buffer = SequenceBuffer::new(8, 3);
        assert!(buffer.insert(0, base_snapshot.clone()));

        let mut cubes = base_snapshot.cubes.clone();
        cubes[1].position_x += 4;

        let sender = DeltaContext::sender(&window, &initial, &config);
        let receiver = DeltaContext::receiver(&buffer, &initial, &config);

        let mut packet = DeltaSnapshotPacket {
            sequence: 1,
            delta_mode: DeltaMode::RelativePosition,
            initial: false,
            base_sequence: 0,
            cubes: cubes.clone(),
        };
        let bytes = encode(&mut packet, &sender).unwrap();
        let decoded = decode(&bytes, &receiver).unwrap();
        assert_eq!(decoded.cubes, cubes);
    }

    #[test]
    fn missing_base_is_transient_drop() {
        let config = small_config(2);
        let initial = Snapshot::new(2);
        let buffer = SequenceBuffer::new(4, 2);
        let receiver = DeltaContext::receiver(&buffer, &initial, &config);

        // Sender holds sequences 0..=6 and encodes 7 against base 6; the
        // receiver's sequence buffer never saw 6.
        let mut window = SlidingWindow::new(16, 2);
        for _ in 0..7 {
            window.insert();
        }
        let sender = DeltaContext::sender(&window, &initial, &config);

        let mut packet = DeltaSnapshotPacket {
            sequence: 7,
            delta_mode: DeltaMode::NotChanged,
            initial: false,
            base_sequence: 6,
            cubes: initial.cubes.clone(),
        };
        let bytes = encode(&mut packet, &sender).unwrap();

        let err = decode(&bytes, &receiver).unwrap_err();
        assert!(matches!(err, PacketError::MissingBase(6)));
        assert!(err.is_transient());
    }

    #[test]
    fn stale_base_refused_by_sender() {
        let config = small_config(2);
        let initial = Snapshot::new(2);
        let window = SlidingWindow::new(4, 2);
        let sender = DeltaContext::sender(&window, &initial, &config);

        let mut packet = DeltaSnapshotPacket {
            sequence: 1,
            delta_mode: DeltaMode::NotChanged,
            initial: false,
            base_sequence: 0,
            cubes: initial.cubes.clone(),
        };
        let err = encode(&mut packet, &sender).unwrap_err();
        assert!(matches!(err, PacketError::StaleBase(0)));
    }

    #[test]
    fn estimator_matches_gap_code() {
        // The estimator must agree with the bits the gap code emits.
        let num_cubes = 901;
        let patterns: [&[usize]; 5] = [
            &[0],
            &[0, 1, 2, 3, 4],
            &[10, 12, 25, 40, 70, 140, 300, 900],
            &[5, 900],
            &[0, 63, 189, 315, 441, 567, 693, 819],
        ];

        for indices in patterns {
            let mut changed = vec![false; num_cubes];
            for &i in indices {
                changed[i] = true;
            }

            let mut stream = MeasureStream::new();
            let mut first = true;
            let mut previous = 0usize;
            let mut measured = 8usize;
            for &i in indices {
                if first {
                    stream.serialize_int(i as i32, 0, num_cubes as i32 - 1).unwrap();
                    first = false;
                } else {
                    serialize_index_relative(&mut stream, previous, i, num_cubes).unwrap();
                }
                previous = i;
            }
            measured += stream.bits_processed();

            assert_eq!(
                count_relative_index_bits(&changed),
                measured,
                "pattern {:?}",
                indices
            );
        }
    }

    #[test]
    fn cost_ordering_across_modes() {
        // With a clustered sparse change set, each smarter mode should cost
        // no more than the one before it.
        let config = small_config(901);
        let initial = Snapshot::new(901);
        let window = SlidingWindow::new(4, 901);
        let sender = DeltaContext::sender(&window, &initial, &config);

        let mut cubes = initial.cubes.clone();
        for i in 100..130 {
            cubes[i] = moved_cube(i as i32, 2 * i as i32, 3);
        }

        let cost = |mode: DeltaMode| {
            let mut packet = initial_packet(0, mode, cubes.clone());
            measure(&mut packet, &sender)
        };

        let not_changed = cost(DeltaMode::NotChanged);
        let changed_index = cost(DeltaMode::ChangedIndex);
        let relative_index = cost(DeltaMode::RelativeIndex);

        assert!(not_changed >= changed_index);
        assert!(changed_index >= relative_index);
    }
}
