//! Snapshot session: the sender/receiver glue driving one simulated link.
//!
//! One cooperative `update` per tick: pace and send the next delta snapshot,
//! advance the simulator, drain received packets into the sequence and
//! interpolation buffers, ack the newest snapshot seen this frame, and hand
//! the interpolated view to the caller. The left peer (simulating side) and
//! right peer (viewing side) live in one session object and talk through the
//! in-process simulator, distinguished by port.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use log::{debug, warn};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::delta::DeltaContext;
use super::packet::{
    sequence_greater_than, DeltaAckPacket, DeltaMode, DeltaSnapshotPacket, Packet, LEFT_PORT,
    MAX_PACKET_SIZE, RIGHT_PORT,
};
use super::simulator::{Simulator, SimulatorConfig, SimulatorState, TimeBase};
use crate::snapshot::{
    CubeState, InterpolationBuffer, InterpolationMode, ObjectUpdate, SequenceBuffer,
    SlidingWindow, Snapshot, SnapshotConfig, MAX_SNAPSHOTS,
};

/// Supplies the current world state; the rigid-body simulation behind it is
/// not this crate's concern.
pub trait SnapshotSource {
    /// Fills `sink` with the current cube states. Returning `false` skips
    /// this send (the sequence number is still consumed).
    fn sample_snapshot(&mut self, sink: &mut [CubeState]) -> bool;
}

/// Receives interpolated object updates on the viewing side.
pub trait ViewSink {
    fn view_update(&mut self, updates: &[ObjectUpdate]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No ack seen yet; every snapshot is encoded against the shared
    /// initial snapshot.
    Starting,
    /// At least one ack arrived. Later loss never returns to `Starting`.
    Running,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub delta_mode: DeltaMode,
    pub playout_delay: f64,
    pub send_rate: f64,
    pub latency: f64,
    pub jitter: f64,
    pub packet_loss: f64,
    pub interpolation: InterpolationMode,
    pub snapshot: SnapshotConfig,
    pub max_snapshots: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            delta_mode: DeltaMode::NotChanged,
            playout_delay: 0.067,
            send_rate: 60.0,
            // 100ms round trip. Any lower and delta compression is too easy.
            latency: 0.05,
            jitter: 1.0 / 60.0,
            packet_loss: 5.0,
            interpolation: InterpolationMode::Linear,
            snapshot: SnapshotConfig::default(),
            max_snapshots: MAX_SNAPSHOTS,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("send rate must be positive, got {0}")]
    SendRate(f64),
    #[error("playout delay must not be negative, got {0}")]
    PlayoutDelay(f64),
    #[error("latency and jitter must not be negative")]
    LinkTiming,
    #[error("packet loss must be a percentage in [0, 100], got {0}")]
    PacketLoss(f64),
    #[error("world must contain at least one cube")]
    NoCubes,
    #[error("position bounds must be positive")]
    PositionBounds,
    #[error("snapshot window must hold at least one entry")]
    WindowSize,
    #[error("initial snapshot has {got} cubes, configured world has {expected}")]
    InitialSnapshotSize { got: usize, expected: usize },
}

impl SessionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.send_rate <= 0.0 {
            return Err(ConfigError::SendRate(self.send_rate));
        }
        if self.playout_delay < 0.0 {
            return Err(ConfigError::PlayoutDelay(self.playout_delay));
        }
        if self.latency < 0.0 || self.jitter < 0.0 {
            return Err(ConfigError::LinkTiming);
        }
        if !(0.0..=100.0).contains(&self.packet_loss) {
            return Err(ConfigError::PacketLoss(self.packet_loss));
        }
        if self.snapshot.num_cubes == 0 {
            return Err(ConfigError::NoCubes);
        }
        if self.snapshot.units_per_meter <= 0
            || self.snapshot.position_bound_xy <= 0
            || self.snapshot.position_bound_z <= 0
        {
            return Err(ConfigError::PositionBounds);
        }
        if self.max_snapshots == 0 {
            return Err(ConfigError::WindowSize);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    pub packets_sent: u64,
    pub snapshots_received: u64,
    pub acks_received: u64,
    /// Expected casualties of the lossy link: missing bases, truncated
    /// packets, entries older than the sequence buffer holds.
    pub transient_drops: u64,
    /// Malformed traffic: range failures, impossible enums, misrouted
    /// packets.
    pub protocol_violations: u64,
    /// Sends abandoned because the ack cursor fell out of the window.
    pub send_failures: u64,
}

pub struct Session {
    config: SessionConfig,
    state: SessionState,
    simulator: Simulator,
    window: SlidingWindow,
    sequence_buffer: SequenceBuffer,
    interpolation: InterpolationBuffer,
    initial_snapshot: Snapshot,
    send_accumulator: f64,
    sample_scratch: Vec<CubeState>,
    receive_scratch: Vec<CubeState>,
    update_scratch: Vec<ObjectUpdate>,
    stats: SessionStats,
}

fn peer_address(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), port)
}

impl Session {
    pub fn new(
        config: SessionConfig,
        initial: &[CubeState],
        rng: StdRng,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if initial.len() != config.snapshot.num_cubes {
            return Err(ConfigError::InitialSnapshotSize {
                got: initial.len(),
                expected: config.snapshot.num_cubes,
            });
        }

        let num_cubes = config.snapshot.num_cubes;
        let mut simulator = Simulator::new(SimulatorConfig::default(), rng);
        simulator.add_state(SimulatorState::new(
            config.latency,
            config.jitter,
            config.packet_loss,
        ));

        Ok(Self {
            state: SessionState::Starting,
            simulator,
            window: SlidingWindow::new(config.max_snapshots, num_cubes),
            sequence_buffer: SequenceBuffer::new(config.max_snapshots, num_cubes),
            interpolation: InterpolationBuffer::new(
                config.max_snapshots,
                num_cubes,
                config.playout_delay,
                config.interpolation,
            ),
            initial_snapshot: Snapshot::from_states(initial, &config.snapshot),
            // Primed so the first update sends immediately.
            send_accumulator: 1.0,
            sample_scratch: vec![CubeState::default(); num_cubes],
            receive_scratch: Vec::with_capacity(num_cubes),
            update_scratch: Vec::with_capacity(num_cubes),
            stats: SessionStats::default(),
            config,
        })
    }

    /// One cooperative tick: send, carry, receive, ack, interpolate.
    pub fn update(
        &mut self,
        time: TimeBase,
        source: &mut dyn SnapshotSource,
        view: &mut dyn ViewSink,
    ) {
        self.send_snapshot(time, source);
        self.simulator.update(time);
        self.receive_packets(time);
        self.dispatch_view(time, view);
    }

    fn send_snapshot(&mut self, time: TimeBase, source: &mut dyn SnapshotSource) {
        self.send_accumulator += time.delta_time;
        if self.send_accumulator < 1.0 / self.config.send_rate {
            return;
        }
        self.send_accumulator = 0.0;

        if !source.sample_snapshot(&mut self.sample_scratch) {
            return;
        }

        let quantized = Snapshot::from_states(&self.sample_scratch, &self.config.snapshot);
        let packet_cubes = quantized.cubes.clone();
        let (sequence, slot) = self.window.insert();
        *slot = quantized;

        let base_sequence = self
            .window
            .acked()
            .map(|ack| ack.wrapping_add(1))
            .unwrap_or(0);
        let mut packet = Packet::Snapshot(DeltaSnapshotPacket {
            sequence,
            delta_mode: self.config.delta_mode,
            initial: self.state == SessionState::Starting,
            base_sequence,
            cubes: packet_cubes,
        });

        let ctx = DeltaContext::sender(
            &self.window,
            &self.initial_snapshot,
            &self.config.snapshot,
        );
        match packet.write(&ctx, MAX_PACKET_SIZE) {
            Ok(payload) => {
                self.simulator.send(peer_address(RIGHT_PORT), payload);
                self.stats.packets_sent += 1;
            }
            Err(error) => {
                warn!("failed to encode snapshot {}: {}", sequence, error);
                self.stats.send_failures += 1;
            }
        }
    }

    fn receive_packets(&mut self, time: TimeBase) {
        let mut received_this_frame = false;
        let mut ack_sequence = 0u16;

        while let Some((to, payload)) = self.simulator.receive() {
            let result = {
                let ctx = DeltaContext::receiver(
                    &self.sequence_buffer,
                    &self.initial_snapshot,
                    &self.config.snapshot,
                );
                Packet::read(&payload, &ctx)
            };

            match (to.port(), result) {
                (RIGHT_PORT, Ok(Packet::Snapshot(packet))) => {
                    self.on_snapshot(time, packet, &mut received_this_frame, &mut ack_sequence);
                }
                (LEFT_PORT, Ok(Packet::Ack(packet))) => {
                    self.window.ack(packet.ack.wrapping_sub(1));
                    if self.state == SessionState::Starting {
                        debug!("first ack received, session running");
                        self.state = SessionState::Running;
                    }
                    self.stats.acks_received += 1;
                }
                (_, Err(error)) if error.is_transient() => {
                    debug!("dropping undecodable packet: {}", error);
                    self.stats.transient_drops += 1;
                }
                (_, Err(error)) => {
                    warn!("protocol violation: {}", error);
                    self.stats.protocol_violations += 1;
                }
                (port, Ok(_)) => {
                    warn!("packet type not valid on port {}", port);
                    self.stats.protocol_violations += 1;
                }
            }
        }

        if received_this_frame {
            self.send_ack(ack_sequence);
        }
    }

    fn on_snapshot(
        &mut self,
        time: TimeBase,
        packet: DeltaSnapshotPacket,
        received_this_frame: &mut bool,
        ack_sequence: &mut u16,
    ) {
        let sequence = packet.sequence;

        self.receive_scratch.clear();
        self.receive_scratch.extend(
            packet
                .cubes
                .iter()
                .map(|cube| cube.dequantize(&self.config.snapshot)),
        );

        let snapshot = Snapshot {
            cubes: packet.cubes,
        };
        if !self.sequence_buffer.insert(sequence, snapshot) {
            debug!("snapshot {} older than the sequence buffer holds", sequence);
            self.stats.transient_drops += 1;
            return;
        }

        self.interpolation
            .add_snapshot(time.time, sequence, &self.receive_scratch);
        self.stats.snapshots_received += 1;

        if !*received_this_frame || sequence_greater_than(sequence, *ack_sequence) {
            *received_this_frame = true;
            *ack_sequence = sequence;
        }
    }

    fn send_ack(&mut self, ack_sequence: u16) {
        let mut packet = Packet::Ack(DeltaAckPacket { ack: ack_sequence });
        let ctx = DeltaContext::sender(
            &self.window,
            &self.initial_snapshot,
            &self.config.snapshot,
        );
        match packet.write(&ctx, MAX_PACKET_SIZE) {
            Ok(payload) => {
                // Acks do not count against the reported send bandwidth.
                self.simulator.set_bandwidth_exclude(true);
                self.simulator.send(peer_address(LEFT_PORT), payload);
                self.simulator.set_bandwidth_exclude(false);
            }
            Err(error) => warn!("failed to encode ack: {}", error),
        }
    }

    fn dispatch_view(&mut self, time: TimeBase, view: &mut dyn ViewSink) {
        self.interpolation
            .get_view_update(time.time, &mut self.update_scratch);
        if !self.update_scratch.is_empty() {
            view.view_update(&self.update_scratch);
        }
    }

    pub fn reset(&mut self) {
        self.state = SessionState::Starting;
        self.simulator.reset();
        self.window.reset();
        self.sequence_buffer.reset();
        self.interpolation.reset();
        self.send_accumulator = 1.0;
        self.stats = SessionStats::default();
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn bandwidth_kbps(&self) -> f64 {
        self.simulator.bandwidth_kbps()
    }
}
