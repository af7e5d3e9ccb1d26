//! # parsim-engine::sync
//!
//! Partition synchronization. Every `min_part` simulated ticks (the
//! minimum latency of any partition-crossing link) each partition reaches
//! a SyncPoint: threads rendezvous at a barrier, thread 0 drives the
//! cross-rank exchange, and received events drop into the owning
//! partition's TimeVortex at their stamped delivery times. The same
//! machinery runs the untimed init/complete rounds, counted by phase
//! instead of simulated time, until a whole round moves no messages
//! anywhere in the job.

pub mod barrier;
pub mod transport;

pub use barrier::Barrier;

use crate::exit::EndTimeCell;
use fxhash::FxHashMap;
use parsim_types::ids::{LinkId, RankId, ThreadId};
use parsim_types::persist_fields;
use parsim_types::ser::{Persist, Serializer};
use parsim_types::time::{CoreTime, Priority, TIME_MAX};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64};
use std::sync::{Arc, Mutex};

/// An event crossing a partition boundary, addressed by the pair's
/// globally-unique name rather than a local handler id.
#[derive(Debug, Clone, Default)]
pub struct WireEvent {
    pub sync_name: String,
    pub time: CoreTime,
    pub priority: Priority,
    pub payload: Option<bytes::Bytes>,
}

impl Persist for WireEvent {
    fn persist(&mut self, ser: &mut Serializer) {
        persist_fields!(ser, self.sync_name, self.time, self.priority, self.payload);
    }
}

/// Untimed (init/complete) data crossing a partition boundary.
#[derive(Debug, Clone, Default)]
pub struct WireUntimed {
    pub sync_name: String,
    pub phase: u64,
    pub payload: bytes::Bytes,
}

impl Persist for WireUntimed {
    fn persist(&mut self, ser: &mut Serializer) {
        persist_fields!(ser, self.sync_name, self.phase, self.payload);
    }
}

/// State shared by every partition thread in this process.
pub struct SyncShared {
    pub nthreads: usize,
    pub barrier: Barrier,
    /// Per-thread timed-event inboxes (cross-thread sends land here
    /// immediately; drained at sync points and checkpoints).
    pub inboxes: Vec<Mutex<Vec<WireEvent>>>,
    /// Per-thread untimed inboxes for init/complete rounds.
    pub untimed_inboxes: Vec<Mutex<Vec<WireUntimed>>>,
    /// Which thread owns each locally-registered sync name.
    pub registry: Mutex<FxHashMap<String, ThreadId>>,
    /// Untimed messages sent by this process in the current round.
    pub untimed_local: AtomicU64,
    /// Round total across the whole job, published by thread 0.
    pub untimed_total: AtomicU64,
    /// Cross-rank packets staged by all threads for the next exchange.
    pub rank_stage: Mutex<Vec<(RankId, WireEvent)>>,
    pub rank_untimed_stage: Mutex<Vec<(RankId, WireUntimed)>>,
    /// Exit refcounts, one per thread.
    pub exit_counts: Arc<Vec<AtomicI32>>,
    /// Primary components registered in this process, ever.
    pub primary_registered: AtomicU64,
    /// Candidate end time (max across threads).
    pub end_candidate: EndTimeCell,
    /// Set when the whole job agreed to end, with the final cycle.
    pub end_flag: AtomicBool,
    pub end_cycle: AtomicU64,
    /// Per-thread registry text blocks staged during a checkpoint.
    pub checkpoint_stage: Mutex<Vec<(ThreadId, String)>>,
}

impl SyncShared {
    pub fn new(nthreads: usize) -> Arc<Self> {
        Arc::new(Self {
            nthreads,
            barrier: Barrier::new(nthreads),
            inboxes: (0..nthreads).map(|_| Mutex::new(Vec::new())).collect(),
            untimed_inboxes: (0..nthreads).map(|_| Mutex::new(Vec::new())).collect(),
            registry: Mutex::new(FxHashMap::default()),
            untimed_local: AtomicU64::new(0),
            untimed_total: AtomicU64::new(0),
            rank_stage: Mutex::new(Vec::new()),
            rank_untimed_stage: Mutex::new(Vec::new()),
            exit_counts: Arc::new((0..nthreads).map(|_| AtomicI32::new(0)).collect()),
            primary_registered: AtomicU64::new(0),
            end_candidate: EndTimeCell::default(),
            end_flag: AtomicBool::new(false),
            end_cycle: AtomicU64::new(0),
            checkpoint_stage: Mutex::new(Vec::new()),
        })
    }
}

/// Per-partition synchronization state. The heavyweight coordination
/// lives in the driver (which owns the TimeVortex and link arena); this
/// records the horizon math and the local end of the sync-link registry.
pub struct SyncManager {
    pub shared: Arc<SyncShared>,
    /// Minimum latency of any link crossing a partition boundary;
    /// simulated time may advance at most this far between sync points.
    pub min_part: CoreTime,
    /// Latency of the cheapest link into each sibling thread.
    pub inter_thread_latencies: Vec<CoreTime>,
    pub inter_thread_min: CoreTime,
    /// Local sync links: pair name -> the receiving link on this
    /// partition.
    pub local_links: std::collections::BTreeMap<String, LinkId>,
}

impl SyncManager {
    pub fn new(shared: Arc<SyncShared>) -> Self {
        Self {
            shared,
            min_part: TIME_MAX,
            inter_thread_latencies: Vec::new(),
            inter_thread_min: TIME_MAX,
            local_links: std::collections::BTreeMap::new(),
        }
    }

    /// True when this partition has no cross-partition links of its own.
    /// (It still observes the job-wide sync cadence and barriers.)
    pub fn independent(&self) -> bool {
        self.local_links.is_empty()
    }

    /// Registers the local end of a partition-crossing link pair under
    /// its globally-unique name, so inbound packets can find their way.
    pub fn register_link(
        &mut self,
        name: &str,
        link: LinkId,
        thread: ThreadId,
        latency: CoreTime,
    ) {
        self.local_links.insert(name.to_string(), link);
        self.shared
            .registry
            .lock()
            .expect("sync registry poisoned")
            .insert(name.to_string(), thread);
        self.min_part = self.min_part.min(latency);
    }

    /// Records a thread-crossing link's latency for the horizon math.
    pub fn note_inter_thread(&mut self, latency: CoreTime) {
        self.inter_thread_min = self.inter_thread_min.min(latency);
        self.inter_thread_latencies.push(latency);
    }

    pub fn resolve_local(&self, name: &str) -> Option<LinkId> {
        self.local_links.get(name).copied()
    }

    /// The thread owning a sync name in this process, if local.
    pub fn thread_of(&self, name: &str) -> Option<ThreadId> {
        self.shared
            .registry
            .lock()
            .expect("sync registry poisoned")
            .get(name)
            .copied()
    }
}

impl Persist for SyncManager {
    fn persist(&mut self, ser: &mut Serializer) {
        persist_fields!(
            ser,
            self.min_part,
            self.inter_thread_latencies,
            self.inter_thread_min,
            self.local_links
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_part_tracks_cheapest_cross_link() {
        let shared = SyncShared::new(1);
        let mut mgr = SyncManager::new(shared);
        assert!(mgr.independent());
        mgr.register_link("a", 0, 0, 500);
        mgr.register_link("b", 1, 0, 200);
        assert_eq!(mgr.min_part, 200);
        assert!(!mgr.independent());
        assert_eq!(mgr.resolve_local("a"), Some(0));
        assert_eq!(mgr.thread_of("b"), Some(0));
    }
}
