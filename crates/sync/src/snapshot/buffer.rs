//! Sequence-indexed snapshot stores.
//!
//! Both stores are rings of `size` slots indexed by `sequence % size`, with
//! the slot's stored sequence acting as a tag: a lookup only succeeds while
//! the tag still matches, which is what distinguishes a live entry from a
//! stale slot that has since been overwritten.

use crate::net::sequence_greater_than;
use crate::snapshot::cube::Snapshot;

pub const MAX_SNAPSHOTS: usize = 256;

#[derive(Debug, Clone)]
struct Slot {
    sequence: u16,
    valid: bool,
    snapshot: Snapshot,
}

/// Sender-side history of emitted snapshots, pruned by acks.
///
/// `insert` allocates the next sequence number; the ack cursor tracks the
/// most recent sequence the receiver is known to hold, so the sender can
/// delta against `ack + 1`.
#[derive(Debug)]
pub struct SlidingWindow {
    slots: Vec<Slot>,
    sequence: u16,
    ack: Option<u16>,
}

impl SlidingWindow {
    pub fn new(size: usize, num_cubes: usize) -> Self {
        assert!(size > 0);
        Self {
            slots: (0..size)
                .map(|_| Slot {
                    sequence: 0,
                    valid: false,
                    snapshot: Snapshot::new(num_cubes),
                })
                .collect(),
            sequence: 0,
            ack: None,
        }
    }

    /// Allocates the next sequence and returns the slot to fill, overwriting
    /// whatever occupied that ring position.
    pub fn insert(&mut self) -> (u16, &mut Snapshot) {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        let index = sequence as usize % self.slots.len();
        let slot = &mut self.slots[index];
        slot.sequence = sequence;
        slot.valid = true;
        (sequence, &mut slot.snapshot)
    }

    /// Returns the stored snapshot iff the slot still holds `sequence`.
    /// A miss means the caller referenced a base that has been overwritten.
    pub fn get(&self, sequence: u16) -> Option<&Snapshot> {
        let slot = &self.slots[sequence as usize % self.slots.len()];
        (slot.valid && slot.sequence == sequence).then(|| &slot.snapshot)
    }

    /// Advances the ack cursor, never backwards under wrap-around ordering.
    pub fn ack(&mut self, sequence: u16) {
        match self.ack {
            Some(current) if !sequence_greater_than(sequence, current) => {}
            _ => self.ack = Some(sequence),
        }
    }

    /// Latest acked sequence; `None` until the first ack arrives.
    pub fn acked(&self) -> Option<u16> {
        self.ack
    }

    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.valid = false;
        }
        self.sequence = 0;
        self.ack = None;
    }
}

/// Receiver-side cache of recently decoded snapshots, used as delta bases.
#[derive(Debug)]
pub struct SequenceBuffer {
    slots: Vec<Slot>,
    newest: Option<u16>,
}

impl SequenceBuffer {
    pub fn new(size: usize, num_cubes: usize) -> Self {
        assert!(size > 0);
        Self {
            slots: (0..size)
                .map(|_| Slot {
                    sequence: 0,
                    valid: false,
                    snapshot: Snapshot::new(num_cubes),
                })
                .collect(),
            newest: None,
        }
    }

    /// Stores `snapshot` at `sequence`, displacing any prior occupant of the
    /// same ring position. Entries older than the ring can hold are rejected.
    pub fn insert(&mut self, sequence: u16, snapshot: Snapshot) -> bool {
        if let Some(newest) = self.newest {
            let oldest = newest.wrapping_sub(self.slots.len() as u16 - 1);
            if sequence_greater_than(oldest, sequence) {
                return false;
            }
            if sequence_greater_than(sequence, newest) {
                self.newest = Some(sequence);
            }
        } else {
            self.newest = Some(sequence);
        }

        let index = sequence as usize % self.slots.len();
        let slot = &mut self.slots[index];
        slot.sequence = sequence;
        slot.valid = true;
        slot.snapshot = snapshot;
        true
    }

    pub fn find(&self, sequence: u16) -> Option<&Snapshot> {
        let slot = &self.slots[sequence as usize % self.slots.len()];
        (slot.valid && slot.sequence == sequence).then(|| &slot.snapshot)
    }

    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.valid = false;
        }
        self.newest = None;
    }
}
