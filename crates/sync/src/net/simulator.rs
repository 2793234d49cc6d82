//! In-process network simulator.
//!
//! Buffers sent datagrams in a ring of owned slots and releases them by
//! dequeue time, so jitter reorders delivery naturally. Latency, jitter and
//! loss come from the active [`SimulatorState`]; with several states
//! configured the simulator hops between them at random to model a shifting
//! link.

use std::collections::VecDeque;
use std::net::SocketAddr;

use log::debug;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::packet::MAX_PACKET_SIZE;

/// The injected clock. No component reads wall time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeBase {
    pub time: f64,
    pub delta_time: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulatorState {
    /// One-way latency in seconds.
    pub latency: f64,
    /// Jitter applied as a uniform +/- offset in seconds.
    pub jitter: f64,
    /// Packet loss in percent.
    pub packet_loss: f64,
}

impl SimulatorState {
    pub fn new(latency: f64, jitter: f64, packet_loss: f64) -> Self {
        Self {
            latency,
            jitter,
            packet_loss,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Number of packets buffered before the ring starts overwriting.
    pub num_packets: usize,
    /// 1-in-n chance per update to hop to a random configured state.
    pub state_chance: u32,
    pub max_packet_size: usize,
    /// Seconds of history used for the bandwidth readout.
    pub bandwidth_window: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            num_packets: 1024,
            state_chance: 1000,
            max_packet_size: MAX_PACKET_SIZE,
            bandwidth_window: 1.0,
        }
    }
}

#[derive(Debug)]
struct BufferedPacket {
    payload: Vec<u8>,
    to: SocketAddr,
    dequeue_time: f64,
    packet_number: u64,
}

/// Lossy, jittered in-process link between the two peers.
#[derive(Debug)]
pub struct Simulator {
    config: SimulatorConfig,
    time: TimeBase,
    packet_number: u64,
    // Owning slots: an overwrite on wrap drops the displaced packet here.
    slots: Vec<Option<BufferedPacket>>,
    states: Vec<SimulatorState>,
    state: SimulatorState,
    rng: StdRng,
    bandwidth_exclude: bool,
    bytes_sent: VecDeque<(f64, usize)>,
    packets_dropped: u64,
}

impl Simulator {
    pub fn new(config: SimulatorConfig, rng: StdRng) -> Self {
        let num_packets = config.num_packets.max(1);
        Self {
            config,
            time: TimeBase::default(),
            packet_number: 0,
            slots: (0..num_packets).map(|_| None).collect(),
            states: Vec::new(),
            state: SimulatorState::default(),
            rng,
            bandwidth_exclude: false,
            bytes_sent: VecDeque::new(),
            packets_dropped: 0,
        }
    }

    /// Adds a link condition to the rotation. The first state added becomes
    /// active immediately.
    pub fn add_state(&mut self, state: SimulatorState) {
        if self.states.is_empty() {
            self.state = state;
        }
        self.states.push(state);
    }

    pub fn clear_states(&mut self) {
        self.states.clear();
        self.state = SimulatorState::default();
    }

    pub fn send(&mut self, to: SocketAddr, payload: Vec<u8>) {
        if payload.len() > self.config.max_packet_size {
            debug!(
                "dropping oversized packet: {} > {} bytes",
                payload.len(),
                self.config.max_packet_size
            );
            self.packets_dropped += 1;
            return;
        }

        let packet_number = self.packet_number;
        self.packet_number += 1;

        if !self.bandwidth_exclude {
            self.bytes_sent.push_back((self.time.time, payload.len()));
        }

        if self.state.packet_loss > 0.0
            && self.rng.gen_range(0.0..100.0) <= self.state.packet_loss
        {
            self.packets_dropped += 1;
            return;
        }

        let jitter = if self.state.jitter > 0.0 {
            self.rng.gen_range(-self.state.jitter..=self.state.jitter)
        } else {
            0.0
        };
        let delay = (self.state.latency + jitter).max(0.0);

        let index = (packet_number % self.slots.len() as u64) as usize;
        self.slots[index] = Some(BufferedPacket {
            payload,
            to,
            dequeue_time: self.time.time + delay,
            packet_number,
        });
    }

    /// Returns the buffered packet with the earliest dequeue time that has
    /// come due, if any. Delivery order is dequeue-time order, not send
    /// order.
    pub fn receive(&mut self) -> Option<(SocketAddr, Vec<u8>)> {
        let mut oldest: Option<usize> = None;
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(packet) = slot {
                match oldest {
                    Some(best)
                        if self.slots[best]
                            .as_ref()
                            .is_some_and(|b| b.dequeue_time <= packet.dequeue_time) => {}
                    _ => oldest = Some(index),
                }
            }
        }

        let index = oldest?;
        let due = self.slots[index]
            .as_ref()
            .is_some_and(|packet| packet.dequeue_time <= self.time.time);
        if !due {
            return None;
        }
        let packet = self.slots[index].take()?;
        Some((packet.to, packet.payload))
    }

    pub fn update(&mut self, time: TimeBase) {
        self.time = time;

        if !self.states.is_empty()
            && self.config.state_chance > 0
            && self.rng.gen_range(0..self.config.state_chance) == 0
        {
            let index = self.rng.gen_range(0..self.states.len());
            self.state = self.states[index];
            debug!("simulator switched to state {:?}", self.state);
        }

        let horizon = time.time - self.config.bandwidth_window;
        while self
            .bytes_sent
            .front()
            .is_some_and(|&(sent_at, _)| sent_at < horizon)
        {
            self.bytes_sent.pop_front();
        }
    }

    pub fn set_bandwidth_exclude(&mut self, exclude: bool) {
        self.bandwidth_exclude = exclude;
    }

    /// Send bandwidth over the rolling window, in kilobits per second.
    /// Excluded traffic (acks) is not counted.
    pub fn bandwidth_kbps(&self) -> f64 {
        let bytes: usize = self.bytes_sent.iter().map(|&(_, len)| len).sum();
        bytes as f64 * 8.0 / self.config.bandwidth_window / 1000.0
    }

    pub fn packets_dropped(&self) -> u64 {
        self.packets_dropped
    }

    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.packet_number = 0;
        self.bytes_sent.clear();
        self.packets_dropped = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::net::{IpAddr, Ipv6Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), port)
    }

    fn simulator(state: SimulatorState) -> Simulator {
        let mut simulator = Simulator::new(SimulatorConfig::default(), StdRng::seed_from_u64(42));
        simulator.add_state(state);
        simulator
    }

    #[test]
    fn lossless_link_conserves_packets() {
        let mut simulator = simulator(SimulatorState::default());
        simulator.update(TimeBase {
            time: 0.0,
            delta_time: 0.1,
        });

        for i in 0..100u8 {
            simulator.send(addr(1000), vec![i]);
        }

        let mut received = 0;
        while let Some((to, payload)) = simulator.receive() {
            assert_eq!(to, addr(1000));
            assert_eq!(payload.len(), 1);
            received += 1;
        }
        assert_eq!(received, 100);
        assert!(simulator.receive().is_none());
    }

    #[test]
    fn latency_delays_delivery() {
        let mut simulator = simulator(SimulatorState::new(0.5, 0.0, 0.0));
        simulator.update(TimeBase {
            time: 0.0,
            delta_time: 0.1,
        });
        simulator.send(addr(1000), vec![1]);

        assert!(simulator.receive().is_none());
        simulator.update(TimeBase {
            time: 0.4,
            delta_time: 0.1,
        });
        assert!(simulator.receive().is_none());
        simulator.update(TimeBase {
            time: 0.6,
            delta_time: 0.1,
        });
        assert!(simulator.receive().is_some());
    }

    #[test]
    fn delivery_is_dequeue_time_order() {
        // With heavy jitter, packets come back ordered by dequeue time.
        let mut simulator = simulator(SimulatorState::new(0.1, 0.09, 0.0));
        simulator.update(TimeBase {
            time: 0.0,
            delta_time: 0.1,
        });
        for i in 0..50u8 {
            simulator.send(addr(1000), vec![i]);
        }
        simulator.update(TimeBase {
            time: 10.0,
            delta_time: 0.1,
        });

        let mut count = 0;
        while simulator.receive().is_some() {
            count += 1;
        }
        assert_eq!(count, 50);
    }

    #[test]
    fn full_loss_drops_everything() {
        let mut simulator = simulator(SimulatorState::new(0.0, 0.0, 100.0));
        simulator.update(TimeBase {
            time: 0.0,
            delta_time: 0.1,
        });
        for _ in 0..20 {
            simulator.send(addr(1000), vec![0]);
        }
        assert!(simulator.receive().is_none());
        assert_eq!(simulator.packets_dropped(), 20);
    }

    #[test]
    fn half_loss_is_roughly_half() {
        // 600 packets at 50% loss; seeded, so the count is deterministic,
        // and it must land in the 99% confidence band [240, 360].
        let mut simulator = simulator(SimulatorState::new(0.0, 0.0, 50.0));
        simulator.update(TimeBase {
            time: 0.0,
            delta_time: 0.1,
        });

        let mut received = 0;
        for _ in 0..600 {
            simulator.send(addr(1000), vec![0]);
            while simulator.receive().is_some() {
                received += 1;
            }
        }
        assert!(
            (240..=360).contains(&received),
            "received {} of 600",
            received
        );
    }

    #[test]
    fn ring_overwrite_drops_displaced_packets() {
        let config = SimulatorConfig {
            num_packets: 8,
            ..SimulatorConfig::default()
        };
        let mut simulator = Simulator::new(config, StdRng::seed_from_u64(1));
        simulator.add_state(SimulatorState::default());
        simulator.update(TimeBase {
            time: 0.0,
            delta_time: 0.1,
        });

        for i in 0..20u8 {
            simulator.send(addr(1000), vec![i]);
        }

        // Only the last 8 survive the wrap.
        let mut received = Vec::new();
        while let Some((_, payload)) = simulator.receive() {
            received.push(payload[0]);
        }
        assert_eq!(received.len(), 8);
        assert!(received.iter().all(|&i| i >= 12));
    }

    #[test]
    fn bandwidth_excludes_marked_traffic() {
        let mut simulator = simulator(SimulatorState::default());
        simulator.update(TimeBase {
            time: 0.0,
            delta_time: 0.1,
        });

        simulator.send(addr(1000), vec![0; 1000]);
        simulator.set_bandwidth_exclude(true);
        simulator.send(addr(1001), vec![0; 5000]);
        simulator.set_bandwidth_exclude(false);

        // 1000 bytes over a 1 second window = 8 kbps.
        assert!((simulator.bandwidth_kbps() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn oversized_packet_dropped() {
        let config = SimulatorConfig {
            max_packet_size: 16,
            ..SimulatorConfig::default()
        };
        let mut simulator = Simulator::new(config, StdRng::seed_from_u64(7));
        simulator.send(addr(1000), vec![0; 17]);
        assert!(simulator.receive().is_none());
        assert_eq!(simulator.packets_dropped(), 1);
    }
}
