//! Playout-delayed snapshot interpolation.
//!
//! Received snapshots are keyed by sequence with their receive time. The
//! view runs `playout_delay` seconds behind `now`; each tick the buffer
//! finds the snapshot pair straddling that render time and emits linearly
//! interpolated positions and slerped orientations. Losing the pair stalls
//! the view on whatever it showed last.

use glam::{Quat, Vec3};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::net::sequence_greater_than;
use crate::snapshot::cube::CubeState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterpolationMode {
    Linear,
}

impl Default for InterpolationMode {
    fn default() -> Self {
        InterpolationMode::Linear
    }
}

/// One interpolated cube handed to the view layer.
#[derive(Debug, Clone, Copy)]
pub struct ObjectUpdate {
    pub index: usize,
    pub position: Vec3,
    pub orientation: Quat,
    pub interacting: bool,
}

#[derive(Debug, Clone)]
struct Entry {
    sequence: u16,
    valid: bool,
    receive_time: f64,
    cubes: Vec<CubeState>,
}

#[derive(Debug)]
pub struct InterpolationBuffer {
    entries: Vec<Entry>,
    playout_delay: f64,
    mode: InterpolationMode,
    /// Set once a prev/next pair has been found; a later gap is reported to
    /// the caller as a stall rather than silently clearing.
    pub interpolating: bool,
}

impl InterpolationBuffer {
    pub fn new(size: usize, num_cubes: usize, playout_delay: f64, mode: InterpolationMode) -> Self {
        assert!(size > 0);
        Self {
            entries: (0..size)
                .map(|_| Entry {
                    sequence: 0,
                    valid: false,
                    receive_time: 0.0,
                    cubes: vec![CubeState::default(); num_cubes],
                })
                .collect(),
            playout_delay,
            mode,
            interpolating: false,
        }
    }

    /// Inserts a received snapshot. A duplicate of an entry already stored
    /// for the same sequence is ignored.
    pub fn add_snapshot(&mut self, time: f64, sequence: u16, cubes: &[CubeState]) {
        let index = sequence as usize % self.entries.len();
        let entry = &mut self.entries[index];
        if entry.valid && entry.sequence == sequence {
            return;
        }
        entry.sequence = sequence;
        entry.valid = true;
        entry.receive_time = time;
        entry.cubes.clear();
        entry.cubes.extend_from_slice(cubes);
    }

    /// Emits the interpolated view for `now`, or nothing while no snapshot
    /// pair straddles the render time.
    pub fn get_view_update(&mut self, now: f64, updates: &mut Vec<ObjectUpdate>) {
        updates.clear();
        let render_time = now - self.playout_delay;

        // prev: the latest snapshot at or before the render time.
        let mut prev: Option<&Entry> = None;
        for entry in self.entries.iter().filter(|e| e.valid) {
            if entry.receive_time <= render_time
                && prev.is_none_or(|p| sequence_greater_than(entry.sequence, p.sequence))
            {
                prev = Some(entry);
            }
        }

        let Some(prev) = prev else {
            self.interpolating = false;
            return;
        };

        // next: the closest received sequence after prev.
        let mut next: Option<&Entry> = None;
        for entry in self.entries.iter().filter(|e| e.valid) {
            if sequence_greater_than(entry.sequence, prev.sequence)
                && next.is_none_or(|n| sequence_greater_than(n.sequence, entry.sequence))
            {
                next = Some(entry);
            }
        }

        let Some(next) = next else {
            if self.interpolating {
                debug!("no snapshot to interpolate towards");
            }
            return;
        };

        self.interpolating = true;

        let span = next.receive_time - prev.receive_time;
        let t = if span > 0.0 {
            (((render_time - prev.receive_time) / span) as f32).clamp(0.0, 1.0)
        } else {
            0.0
        };

        match self.mode {
            InterpolationMode::Linear => {
                updates.reserve(prev.cubes.len());
                for (index, (from, to)) in prev.cubes.iter().zip(&next.cubes).enumerate() {
                    updates.push(ObjectUpdate {
                        index,
                        position: from.position.lerp(to.position, t),
                        orientation: slerp_shortest(from.orientation, to.orientation, t),
                        interacting: to.interacting,
                    });
                }
            }
        }
    }

    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            entry.valid = false;
        }
        self.interpolating = false;
    }
}

fn slerp_shortest(from: Quat, to: Quat, t: f32) -> Quat {
    if from.dot(to) < 0.0 {
        from.slerp(-to, t)
    } else {
        from.slerp(to, t)
    }
}
