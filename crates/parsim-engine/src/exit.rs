//! # parsim-engine::exit
//!
//! Exit coordination and the heartbeat. Exit is a per-thread refcount of
//! primary components still holding the simulation open; the counts are
//! mirrored in shared atomics so any thread can see when the whole
//! process has drained, and the final end time is the max across ranks.

use parsim_types::persist_fields;
use parsim_types::ser::{Persist, Serializer};
use parsim_types::time::CoreTime;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

/// Per-thread exit refcount with a process-wide view.
pub struct Exit {
    counts: Arc<Vec<AtomicI32>>,
    thread: usize,
    /// Candidate end time: the moment this thread's count last hit zero.
    pub end_time: CoreTime,
}

impl Exit {
    pub fn new(counts: Arc<Vec<AtomicI32>>, thread: usize) -> Self {
        Self {
            counts,
            thread,
            end_time: 0,
        }
    }

    /// One more primary component holding the simulation open.
    pub fn increment(&self) -> i32 {
        self.counts[self.thread].fetch_add(1, Ordering::SeqCst) + 1
    }

    /// A primary component released its hold. Returns the new count.
    pub fn decrement(&self) -> i32 {
        self.counts[self.thread].fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub fn local_count(&self) -> i32 {
        self.counts[self.thread].load(Ordering::SeqCst)
    }

    /// Sum of all threads' counts in this process.
    pub fn process_count(&self) -> i64 {
        self.counts
            .iter()
            .map(|c| c.load(Ordering::SeqCst) as i64)
            .sum()
    }

    pub fn all_threads_zero(&self) -> bool {
        self.counts.iter().all(|c| c.load(Ordering::SeqCst) == 0)
    }

    /// Restores this thread's count (restart path).
    pub fn restore_count(&self, value: i32) {
        self.counts[self.thread].store(value, Ordering::SeqCst);
    }
}

impl Persist for Exit {
    fn persist(&mut self, ser: &mut Serializer) {
        let mut count = self.local_count();
        persist_fields!(ser, count, self.end_time);
        self.restore_count(count);
    }
}

/// Max-reduction cell for the candidate end time across threads.
#[derive(Default)]
pub struct EndTimeCell(AtomicU64);

impl EndTimeCell {
    pub fn offer(&self, time: CoreTime) {
        self.0.fetch_max(time, Ordering::SeqCst);
    }

    pub fn get(&self) -> CoreTime {
        self.0.load(Ordering::SeqCst)
    }
}

/// Heartbeat configuration. The activity itself lives in the TimeVortex;
/// this records the periods and counters.
#[derive(Debug, Clone, Default)]
pub struct Heartbeat {
    /// Period in core ticks (0 = disabled).
    pub sim_period: CoreTime,
    /// Wall period in seconds (0 = disabled); driven by the real-time
    /// manager.
    pub wall_period_secs: u64,
    pub beats: u64,
}

impl Persist for Heartbeat {
    fn persist(&mut self, ser: &mut Serializer) {
        persist_fields!(ser, self.sim_period, self.wall_period_secs, self.beats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exit_pair() -> (Exit, Exit) {
        let counts = Arc::new(vec![AtomicI32::new(0), AtomicI32::new(0)]);
        (Exit::new(counts.clone(), 0), Exit::new(counts, 1))
    }

    #[test]
    fn refcounts_are_per_thread_with_shared_view() {
        let (a, b) = exit_pair();
        a.increment();
        b.increment();
        b.increment();
        assert_eq!(a.local_count(), 1);
        assert_eq!(b.local_count(), 2);
        assert_eq!(a.process_count(), 3);
        assert!(!a.all_threads_zero());
        a.decrement();
        b.decrement();
        b.decrement();
        assert!(a.all_threads_zero());
    }

    #[test]
    fn end_time_cell_is_a_max_reduction() {
        let cell = EndTimeCell::default();
        cell.offer(50);
        cell.offer(20);
        cell.offer(70);
        assert_eq!(cell.get(), 70);
    }
}
