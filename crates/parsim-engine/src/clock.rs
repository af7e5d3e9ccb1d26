//! # parsim-engine::clock
//!
//! Clocks and one-shots. A clock is unique per `(period_factor, priority)`
//! and carries a list of registered handlers; it self-reschedules after
//! every tick while any handler remains. Handler attachment is recorded
//! as `(owner, tag)` so a checkpoint can rebuild the list against the
//! restart-time handler arena.

use parsim_types::ids::{ClockTag, ComponentId, HandlerId};
use parsim_types::persist_fields;
use parsim_types::ser::{Persist, SerMode, Serializer};
use parsim_types::time::{CoreTime, Cycle, Priority};

/// Identifies a clock or one-shot: `(factor, priority)`.
pub type ClockKey = (CoreTime, Priority);

#[derive(Debug, Default)]
pub struct Clock {
    pub period_factor: CoreTime,
    pub priority: Priority,
    /// Live handler handles, in registration order.
    pub handlers: Vec<HandlerId>,
    /// The same handlers as `(owner, tag)` identities, for restart.
    pub handler_ids: Vec<(ComponentId, ClockTag)>,
    pub current_cycle: Cycle,
    pub next: CoreTime,
    pub scheduled: bool,
}

impl Clock {
    pub fn new(period_factor: CoreTime, priority: Priority) -> Self {
        Self {
            period_factor,
            priority,
            ..Self::default()
        }
    }

    pub fn register(&mut self, handler: HandlerId, owner: ComponentId, tag: ClockTag) {
        self.handlers.push(handler);
        self.handler_ids.push((owner, tag));
    }

    pub fn unregister(&mut self, owner: ComponentId, tag: ClockTag) -> Option<HandlerId> {
        let pos = self
            .handler_ids
            .iter()
            .position(|(o, t)| *o == owner && *t == tag)?;
        self.handler_ids.remove(pos);
        Some(self.handlers.remove(pos))
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Cycle index derived from the current time, for an unscheduled
    /// clock asked what comes next.
    pub fn update_current_cycle(&mut self, now: CoreTime) {
        self.current_cycle = now / self.period_factor;
    }

    pub fn next_cycle(&mut self, now: CoreTime) -> Cycle {
        if !self.scheduled {
            self.update_current_cycle(now);
        }
        self.current_cycle + 1
    }
}

impl Persist for Clock {
    fn persist(&mut self, ser: &mut Serializer) {
        // The live handles are not serialized; they are rebuilt from
        // `handler_ids` against the restart-time arena.
        persist_fields!(
            ser,
            self.period_factor,
            self.priority,
            self.handler_ids,
            self.current_cycle,
            self.next,
            self.scheduled
        );
    }
}

/// Fires every registered handler once, then disarms.
#[derive(Debug, Default)]
pub struct OneShot {
    pub delay_factor: CoreTime,
    pub priority: Priority,
    pub handlers: Vec<HandlerId>,
    pub handler_ids: Vec<(ComponentId, ClockTag)>,
    pub scheduled: bool,
}

impl OneShot {
    pub fn new(delay_factor: CoreTime, priority: Priority) -> Self {
        Self {
            delay_factor,
            priority,
            ..Self::default()
        }
    }

    pub fn register(&mut self, handler: HandlerId, owner: ComponentId, tag: ClockTag) {
        self.handlers.push(handler);
        self.handler_ids.push((owner, tag));
    }

    /// Takes the armed handlers for dispatch, leaving the one-shot
    /// disarmed.
    pub fn take_handlers(&mut self) -> Vec<HandlerId> {
        self.handler_ids.clear();
        self.scheduled = false;
        std::mem::take(&mut self.handlers)
    }
}

impl Persist for OneShot {
    fn persist(&mut self, ser: &mut Serializer) {
        persist_fields!(
            ser,
            self.delay_factor,
            self.priority,
            self.handler_ids,
            self.scheduled
        );
    }
}

/// Rebuilds a restored clock's live handles from its persisted
/// identities. Returns the identities that no longer resolve.
pub fn rebind_handlers(
    handler_ids: &[(ComponentId, ClockTag)],
    handlers: &mut Vec<HandlerId>,
    arena: &crate::handler::HandlerArena,
    kind_of: impl Fn(ClockTag) -> crate::handler::HandlerKind,
) -> Vec<(ComponentId, ClockTag)> {
    handlers.clear();
    let mut missing = Vec::new();
    for (owner, tag) in handler_ids {
        match arena.find(*owner, kind_of(*tag)) {
            Some(id) => handlers.push(id),
            None => missing.push((*owner, *tag)),
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_unregister() {
        let mut clock = Clock::new(1000, 60);
        clock.register(HandlerId::new(0, 1), 10, 0);
        clock.register(HandlerId::new(1, 1), 10, 1);
        assert_eq!(clock.handlers.len(), 2);
        let removed = clock.unregister(10, 0).unwrap();
        assert_eq!(removed, HandlerId::new(0, 1));
        assert_eq!(clock.handlers, vec![HandlerId::new(1, 1)]);
        assert!(clock.unregister(10, 0).is_none());
    }

    #[test]
    fn next_cycle_synthesizes_when_unscheduled() {
        let mut clock = Clock::new(1000, 60);
        clock.scheduled = false;
        assert_eq!(clock.next_cycle(5500), 6);
        clock.scheduled = true;
        clock.current_cycle = 9;
        assert_eq!(clock.next_cycle(5500), 10);
    }

    #[test]
    fn oneshot_disarms_on_take() {
        let mut os = OneShot::new(0, 80);
        os.register(HandlerId::new(0, 1), 1, 0);
        os.scheduled = true;
        let taken = os.take_handlers();
        assert_eq!(taken.len(), 1);
        assert!(!os.scheduled);
        assert!(os.handlers.is_empty());
    }
}
