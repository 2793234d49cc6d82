//! Headless loopback demo: one simulating peer and one viewing peer joined
//! by the in-process network simulator. A small synthetic cube world stands
//! in for the rigid-body simulation; the demo reports bandwidth and session
//! stats per delta mode instead of rendering.

use anyhow::{bail, Result};
use clap::Parser;
use glam::{Quat, Vec3};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use cubesync::{
    CubeState, DeltaMode, ObjectUpdate, Session, SessionConfig, SessionState, SnapshotConfig,
    SnapshotSource, TimeBase, ViewSink,
};

#[derive(Debug, Parser)]
#[command(about = "Delta-compressed snapshot sync over a simulated lossy link")]
struct Args {
    /// Delta mode 0..=4; omit to run all five in sequence.
    #[arg(long)]
    mode: Option<usize>,

    /// Simulated duration per mode, in seconds.
    #[arg(long, default_value_t = 10.0)]
    seconds: f64,

    /// Number of cubes in the world.
    #[arg(long, default_value_t = 901)]
    cubes: usize,

    /// Fraction of cubes in motion at any time.
    #[arg(long, default_value_t = 0.1)]
    churn: f64,

    /// One-way latency in milliseconds.
    #[arg(long, default_value_t = 50.0)]
    latency_ms: f64,

    /// Jitter in milliseconds, applied as +/-.
    #[arg(long, default_value_t = 16.7)]
    jitter_ms: f64,

    /// Packet loss percentage.
    #[arg(long, default_value_t = 5.0)]
    loss: f64,

    /// Snapshots per second.
    #[arg(long, default_value_t = 60.0)]
    send_rate: f64,

    /// RNG seed for the link and the world layout.
    #[arg(long, default_value_t = 1)]
    seed: u64,
}

/// Synthetic world: cubes scattered over the arena floor, a moving subset
/// orbiting their home positions. Cubes near the first cube interact.
struct DemoWorld {
    homes: Vec<Vec3>,
    moving: Vec<bool>,
    phases: Vec<f32>,
    elapsed: f32,
}

impl DemoWorld {
    fn new(num_cubes: usize, churn: f64, rng: &mut StdRng) -> Self {
        let mut homes = Vec::with_capacity(num_cubes);
        let mut moving = Vec::with_capacity(num_cubes);
        let mut phases = Vec::with_capacity(num_cubes);
        for _ in 0..num_cubes {
            homes.push(Vec3::new(
                rng.gen_range(-100.0..100.0),
                rng.gen_range(-100.0..100.0),
                rng.gen_range(0.5..4.0),
            ));
            moving.push(rng.gen_bool(churn.clamp(0.0, 1.0)));
            phases.push(rng.gen_range(0.0..std::f32::consts::TAU));
        }
        Self {
            homes,
            moving,
            phases,
            elapsed: 0.0,
        }
    }

    fn step(&mut self, delta_time: f32) {
        self.elapsed += delta_time;
    }

    fn cube(&self, index: usize) -> CubeState {
        let home = self.homes[index];
        let position = if self.moving[index] {
            let angle = self.elapsed * 1.3 + self.phases[index];
            home + Vec3::new(angle.cos() * 1.5, angle.sin() * 1.5, 0.0)
        } else {
            home
        };
        let orientation = if self.moving[index] {
            Quat::from_rotation_z(self.elapsed * 0.9 + self.phases[index])
        } else {
            Quat::from_rotation_z(self.phases[index])
        };
        CubeState {
            interacting: position.distance(self.homes[0]) < 10.0,
            position,
            orientation,
        }
    }

    fn states(&self) -> Vec<CubeState> {
        (0..self.homes.len()).map(|i| self.cube(i)).collect()
    }
}

impl SnapshotSource for DemoWorld {
    fn sample_snapshot(&mut self, sink: &mut [CubeState]) -> bool {
        for (index, cube) in sink.iter_mut().enumerate() {
            *cube = self.cube(index);
        }
        true
    }
}

#[derive(Default)]
struct DemoView {
    frames: usize,
    objects: usize,
}

impl ViewSink for DemoView {
    fn view_update(&mut self, updates: &[ObjectUpdate]) {
        self.frames += 1;
        self.objects = updates.len();
    }
}

fn run_mode(mode: DeltaMode, args: &Args) -> Result<()> {
    let config = SessionConfig {
        delta_mode: mode,
        send_rate: args.send_rate,
        latency: args.latency_ms / 1000.0,
        jitter: args.jitter_ms / 1000.0,
        packet_loss: args.loss,
        snapshot: SnapshotConfig {
            num_cubes: args.cubes,
            ..SnapshotConfig::default()
        },
        ..SessionConfig::default()
    };

    let mut world_rng = StdRng::seed_from_u64(args.seed);
    let mut world = DemoWorld::new(args.cubes, args.churn, &mut world_rng);
    let initial = world.states();

    let mut session = Session::new(config, &initial, StdRng::seed_from_u64(args.seed ^ 0x5EED))?;
    let mut view = DemoView::default();

    println!("== mode {}: {}", mode.index(), mode.description());

    let delta_time = 1.0 / 60.0;
    let steps = (args.seconds / delta_time).round() as u64;
    let mut peak_kbps: f64 = 0.0;
    let mut time = TimeBase {
        time: 0.0,
        delta_time,
    };

    for step in 0..steps {
        world.step(delta_time as f32);
        session.update(time, &mut world, &mut view);
        time.time += delta_time;

        peak_kbps = peak_kbps.max(session.bandwidth_kbps());
        if step > 0 && step % 60 == 0 {
            info!(
                "t={:>4.1}s bandwidth {:>8.1} kbps, {} view frames",
                time.time,
                session.bandwidth_kbps(),
                view.frames
            );
        }
    }

    let stats = session.stats();
    let bandwidth = session.bandwidth_kbps();
    println!(
        "   state {:?}, sent {}, received {}, acked {}, drops {}, violations {}",
        session.state(),
        stats.packets_sent,
        stats.snapshots_received,
        stats.acks_received,
        stats.transient_drops,
        stats.protocol_violations,
    );
    println!(
        "   bandwidth {:.1} kbps (peak {:.1}), view frames {} x {} objects",
        bandwidth, peak_kbps, view.frames, view.objects
    );

    if session.state() != SessionState::Running {
        bail!("session never left the starting state");
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let modes: Vec<DeltaMode> = match args.mode {
        Some(index) => match DeltaMode::from_index(index as i32) {
            Some(mode) => vec![mode],
            None => bail!("mode must be 0..={}", DeltaMode::COUNT - 1),
        },
        None => DeltaMode::ALL.to_vec(),
    };

    println!(
        "{} cubes, {:.0}ms latency +/-{:.1}ms jitter, {:.0}% loss, {:.0}Hz",
        args.cubes, args.latency_ms, args.jitter_ms, args.loss, args.send_rate
    );

    for mode in modes {
        run_mode(mode, &args)?;
    }
    Ok(())
}
