//! # parsim-engine::timevortex
//!
//! The per-partition activity priority queue. A binary heap keyed by
//! `(delivery_time, priority, insertion_order)`; insertion and pop are
//! O(log n). Insertion assigns the monotone insertion order used as the
//! final tie-break, which makes same-key pops deterministic and lets a
//! checkpoint reproduce the exact pop sequence.

use crate::activity::{Activity, Scheduled};
use parsim_types::persist_fields;
use parsim_types::ser::{Persist, SerMode, Serializer};
use parsim_types::time::{CoreTime, Priority};
use std::collections::BinaryHeap;

/// Type tag recorded in checkpoints so a restart can refuse a blob taken
/// with a queue implementation it does not have.
pub const VORTEX_TYPE_PQ: &str = "vortex.pq";

pub struct TimeVortex {
    heap: BinaryHeap<Scheduled>,
    next_seq: u64,
    max_depth: usize,
    type_tag: String,
}

impl Default for TimeVortex {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeVortex {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
            max_depth: 0,
            type_tag: VORTEX_TYPE_PQ.to_string(),
        }
    }

    /// Inserts an activity, assigning its insertion order.
    pub fn insert(&mut self, time: CoreTime, priority: Priority, activity: Activity) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Scheduled {
            time,
            priority,
            seq,
            activity,
        });
        self.max_depth = self.max_depth.max(self.heap.len());
    }

    /// Re-inserts an already-sequenced entry (restart path). The sequence
    /// counter is never rewound.
    pub fn insert_scheduled(&mut self, entry: Scheduled) {
        self.next_seq = self.next_seq.max(entry.seq + 1);
        self.heap.push(entry);
        self.max_depth = self.max_depth.max(self.heap.len());
    }

    /// Removes and returns the earliest activity.
    pub fn pop(&mut self) -> Option<Scheduled> {
        self.heap.pop()
    }

    /// The earliest activity without removal.
    pub fn front(&self) -> Option<&Scheduled> {
        self.heap.peek()
    }

    pub fn current_depth(&self) -> usize {
        self.heap.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Removes every entry, preserving the sequence counter. Used by the
    /// checkpoint engine to filter or rewrite entries in place.
    pub fn drain(&mut self) -> Vec<Scheduled> {
        let mut out: Vec<Scheduled> = std::mem::take(&mut self.heap).into_vec();
        out.sort_by_key(|e| e.key());
        out
    }
}

impl Persist for TimeVortex {
    fn persist(&mut self, ser: &mut Serializer) {
        persist_fields!(ser, self.type_tag, self.next_seq, self.max_depth);
        // Heap contents travel as a sorted vector so packing is
        // deterministic regardless of internal heap layout.
        let mut entries: Vec<Scheduled> = self.heap.iter().cloned().collect();
        entries.sort_by_key(|e| e.key());
        ser.named("entries", &mut entries);
        if ser.mode() == SerMode::Unpack {
            self.heap = entries.into_iter().collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parsim_types::time::priority;

    #[test]
    fn pops_in_key_order() {
        let mut tv = TimeVortex::new();
        tv.insert(30, priority::EVENT, Activity::ExitCheck);
        tv.insert(10, priority::EVENT, Activity::ExitCheck);
        tv.insert(20, priority::EVENT, Activity::ExitCheck);
        assert_eq!(tv.current_depth(), 3);
        assert_eq!(tv.pop().unwrap().time, 10);
        assert_eq!(tv.pop().unwrap().time, 20);
        assert_eq!(tv.pop().unwrap().time, 30);
        assert!(tv.pop().is_none());
    }

    #[test]
    fn priority_breaks_time_ties() {
        let mut tv = TimeVortex::new();
        tv.insert(10, priority::CLOCK, Activity::ClockTick { period_factor: 1 });
        tv.insert(10, priority::EVENT, Activity::ExitCheck);
        // The event (lower priority number) pops before the clock tick.
        assert_eq!(tv.pop().unwrap().priority, priority::EVENT);
        assert_eq!(tv.pop().unwrap().priority, priority::CLOCK);
    }

    #[test]
    fn insertion_order_breaks_full_ties() {
        let mut tv = TimeVortex::new();
        for _ in 0..5 {
            tv.insert(7, priority::EVENT, Activity::ExitCheck);
        }
        let seqs: Vec<u64> = std::iter::from_fn(|| tv.pop()).map(|s| s.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn depth_instrumentation() {
        let mut tv = TimeVortex::new();
        tv.insert(1, 0, Activity::ExitCheck);
        tv.insert(2, 0, Activity::ExitCheck);
        tv.pop();
        tv.insert(3, 0, Activity::ExitCheck);
        assert_eq!(tv.current_depth(), 2);
        assert_eq!(tv.max_depth(), 2);
    }

    #[test]
    fn persist_round_trip_preserves_sequence() {
        let mut tv = TimeVortex::new();
        tv.insert(5, priority::EVENT, Activity::ExitCheck);
        tv.insert(5, priority::EVENT, Activity::ExitCheck);
        tv.pop();

        let mut packer = Serializer::packer(128);
        tv.persist(&mut packer);
        let mut out = TimeVortex::new();
        let mut unpacker = Serializer::unpacker(packer.into_buffer());
        out.persist(&mut unpacker);
        assert!(!unpacker.truncated());
        assert_eq!(out.current_depth(), 1);
        let popped = out.pop().unwrap();
        assert_eq!(popped.seq, 1);
        // New insertions continue the original sequence.
        out.insert(9, priority::EVENT, Activity::ExitCheck);
        assert_eq!(out.pop().unwrap().seq, 2);
    }
}
