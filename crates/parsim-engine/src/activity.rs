//! # parsim-engine::activity
//!
//! The `Activity` sum type, everything that can be scheduled in a
//! TimeVortex, and the `Scheduled` ordering wrapper that keys the queue
//! by `(delivery_time, priority, insertion_order)`. Once inserted, an
//! activity's ordering key never changes.

use bytes::Bytes;
use parsim_types::ids::{HandlerId, LinkId, LinkTag};
use parsim_types::persist_fields;
use parsim_types::ser::{Persist, SerMode, Serializer};
use parsim_types::time::{CoreTime, Priority};
use std::cmp::Ordering;

/// An event in flight: stamped with its delivery time, the receiving
/// handler, and the receiving link (for receive-side intercept tools).
/// A `None` payload is a null event; the handler is invoked with nothing.
#[derive(Debug, Clone, Default)]
pub struct EventEnvelope {
    pub delivery_time: CoreTime,
    pub handler: Option<HandlerId>,
    pub recv_link: LinkId,
    pub link_tag: LinkTag,
    pub payload: Option<Bytes>,
}

impl Persist for EventEnvelope {
    fn persist(&mut self, ser: &mut Serializer) {
        persist_fields!(
            ser,
            self.delivery_time,
            self.handler,
            self.recv_link,
            self.link_tag,
            self.payload
        );
    }
}

/// Everything that can sit in the TimeVortex.
#[derive(Debug, Clone)]
pub enum Activity {
    /// Deliver an event to its handler.
    Event(EventEnvelope),
    /// A clock tick; the clock is identified by `(period_factor, priority)`.
    ClockTick { period_factor: CoreTime },
    /// A one-shot fires; identified by `(delay_factor, priority)`.
    OneShotFire { delay_factor: CoreTime },
    /// End the run loop. Carries an optional termination message.
    Stop { message: Option<String> },
    /// Write a checkpoint, then reschedule at `next`.
    Checkpoint { next: CoreTime },
    /// Enter the interactive console (stubbed to a log line when no
    /// console is attached).
    Interactive { reason: String },
    /// Partition synchronization horizon; reschedules itself at `next`.
    SyncPoint { next: CoreTime },
    /// Periodic status line; reschedules itself at `next`.
    Heartbeat { next: CoreTime },
    /// Re-check the exit refcounts.
    ExitCheck,
}

impl Default for Activity {
    fn default() -> Self {
        Activity::ExitCheck
    }
}

impl Persist for Activity {
    fn persist(&mut self, ser: &mut Serializer) {
        let mut disc: u8 = match self {
            Activity::Event(_) => 0,
            Activity::ClockTick { .. } => 1,
            Activity::OneShotFire { .. } => 2,
            Activity::Stop { .. } => 3,
            Activity::Checkpoint { .. } => 4,
            Activity::Interactive { .. } => 5,
            Activity::SyncPoint { .. } => 6,
            Activity::Heartbeat { .. } => 7,
            Activity::ExitCheck => 8,
        };
        ser.named("kind", &mut disc);
        if ser.mode() == SerMode::Unpack {
            *self = match disc {
                0 => Activity::Event(EventEnvelope::default()),
                1 => Activity::ClockTick { period_factor: 0 },
                2 => Activity::OneShotFire { delay_factor: 0 },
                3 => Activity::Stop { message: None },
                4 => Activity::Checkpoint { next: 0 },
                5 => Activity::Interactive {
                    reason: String::new(),
                },
                6 => Activity::SyncPoint { next: 0 },
                7 => Activity::Heartbeat { next: 0 },
                _ => Activity::ExitCheck,
            };
        }
        match self {
            Activity::Event(env) => ser.named("event", env),
            Activity::ClockTick { period_factor } => ser.named("period_factor", period_factor),
            Activity::OneShotFire { delay_factor } => ser.named("delay_factor", delay_factor),
            Activity::Stop { message } => ser.named("message", message),
            Activity::Checkpoint { next } => ser.named("next", next),
            Activity::Interactive { reason } => ser.named("reason", reason),
            Activity::SyncPoint { next } => ser.named("next", next),
            Activity::Heartbeat { next } => ser.named("next", next),
            Activity::ExitCheck => {}
        }
    }
}

/// The ordering wrapper stored in the TimeVortex. `seq` is the monotone
/// insertion order assigned by the queue and is the final tie-break.
#[derive(Debug, Clone)]
pub struct Scheduled {
    pub time: CoreTime,
    pub priority: Priority,
    pub seq: u64,
    pub activity: Activity,
}

impl Scheduled {
    pub fn key(&self) -> (CoreTime, Priority, u64) {
        (self.time, self.priority, self.seq)
    }
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    /// `BinaryHeap` is a max-heap; the ordering is reversed so the heap
    /// yields the smallest `(time, priority, seq)` first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

impl Default for Scheduled {
    fn default() -> Self {
        Self {
            time: 0,
            priority: 0,
            seq: 0,
            activity: Activity::default(),
        }
    }
}

impl Persist for Scheduled {
    fn persist(&mut self, ser: &mut Serializer) {
        persist_fields!(ser, self.time, self.priority, self.seq, self.activity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sched(time: CoreTime, priority: Priority, seq: u64) -> Scheduled {
        Scheduled {
            time,
            priority,
            seq,
            activity: Activity::ExitCheck,
        }
    }

    #[test]
    fn ordering_is_lexicographic_and_reversed() {
        // Reversed for the max-heap: the "greatest" element is the one
        // that should pop first.
        assert!(sched(1, 0, 0) > sched(2, 0, 0));
        assert!(sched(1, 1, 0) > sched(1, 2, 0));
        assert!(sched(1, 1, 1) > sched(1, 1, 2));
    }

    #[test]
    fn activity_round_trip() {
        let mut original = Activity::Stop {
            message: Some("done".to_string()),
        };
        let mut packer = Serializer::packer(32);
        original.persist(&mut packer);
        let mut out = Activity::default();
        let mut unpacker = Serializer::unpacker(packer.into_buffer());
        out.persist(&mut unpacker);
        assert!(!unpacker.truncated());
        match out {
            Activity::Stop { message } => assert_eq!(message.as_deref(), Some("done")),
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
