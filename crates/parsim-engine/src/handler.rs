//! # parsim-engine::handler
//!
//! The per-partition handler arena. Events carry a generation-checked
//! `HandlerId` instead of a pointer; the arena routes it back to the
//! owning component and the port/clock tag it registered. At restart the
//! old arena (from the blob) and the new arena (rebuilt during component
//! construction) are joined on `(owner, kind)` to remap in-flight ids.

use fxhash::FxHashMap;
use parsim_types::ids::{ClockTag, ComponentId, HandlerId, PortTag};
use parsim_types::persist_fields;
use parsim_types::ser::{Persist, SerMode, Serializer};

/// What a handler is for. Also the identity used for restart remapping,
/// so a component must not register two handlers with the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Event { port: PortTag },
    Clock { tag: ClockTag },
    OneShot { tag: ClockTag },
}

impl Default for HandlerKind {
    fn default() -> Self {
        HandlerKind::Event { port: 0 }
    }
}

impl Persist for HandlerKind {
    fn persist(&mut self, ser: &mut Serializer) {
        let mut disc: u8 = match self {
            HandlerKind::Event { .. } => 0,
            HandlerKind::Clock { .. } => 1,
            HandlerKind::OneShot { .. } => 2,
        };
        ser.named("kind", &mut disc);
        if ser.mode() == SerMode::Unpack {
            *self = match disc {
                0 => HandlerKind::Event { port: 0 },
                1 => HandlerKind::Clock { tag: 0 },
                _ => HandlerKind::OneShot { tag: 0 },
            };
        }
        match self {
            HandlerKind::Event { port } => ser.named("port", port),
            HandlerKind::Clock { tag } => ser.named("tag", tag),
            HandlerKind::OneShot { tag } => ser.named("tag", tag),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HandlerEntry {
    pub owner: ComponentId,
    pub kind: HandlerKind,
    pub gen: u32,
    pub live: bool,
}

impl Persist for HandlerEntry {
    fn persist(&mut self, ser: &mut Serializer) {
        persist_fields!(ser, self.owner, self.kind, self.gen, self.live);
    }
}

#[derive(Default)]
pub struct HandlerArena {
    slots: Vec<HandlerEntry>,
}

impl HandlerArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, owner: ComponentId, kind: HandlerKind) -> HandlerId {
        let index = self.slots.len() as u32;
        self.slots.push(HandlerEntry {
            owner,
            kind,
            gen: 1,
            live: true,
        });
        HandlerId::new(index, 1)
    }

    /// Resolves a handle, checking the generation.
    pub fn get(&self, id: HandlerId) -> Option<&HandlerEntry> {
        self.slots
            .get(id.index as usize)
            .filter(|e| e.live && e.gen == id.gen)
    }

    /// Invalidates a handle. The slot's generation advances so stale ids
    /// no longer resolve.
    pub fn retire(&mut self, id: HandlerId) {
        if let Some(entry) = self.slots.get_mut(id.index as usize) {
            if entry.gen == id.gen {
                entry.live = false;
                entry.gen += 1;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Finds the live handler registered by `owner` for `kind`.
    pub fn find(&self, owner: ComponentId, kind: HandlerKind) -> Option<HandlerId> {
        self.slots
            .iter()
            .enumerate()
            .find(|(_, e)| e.live && e.owner == owner && e.kind == kind)
            .map(|(i, e)| HandlerId::new(i as u32, e.gen))
    }

    /// Builds the restart side table: ids in `old` mapped onto the ids
    /// this (rebuilt) arena assigned for the same `(owner, kind)`.
    pub fn remap_from(&self, old: &HandlerArena) -> FxHashMap<HandlerId, HandlerId> {
        let mut table = FxHashMap::default();
        for (index, entry) in old.slots.iter().enumerate() {
            if !entry.live {
                continue;
            }
            let old_id = HandlerId::new(index as u32, entry.gen);
            if let Some(new_id) = self.find(entry.owner, entry.kind) {
                table.insert(old_id, new_id);
            }
        }
        table
    }
}

impl Persist for HandlerArena {
    fn persist(&mut self, ser: &mut Serializer) {
        persist_fields!(ser, self.slots);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_checking() {
        let mut arena = HandlerArena::new();
        let id = arena.register(1, HandlerKind::Event { port: 0 });
        assert!(arena.get(id).is_some());
        arena.retire(id);
        assert!(arena.get(id).is_none());
    }

    #[test]
    fn remap_joins_on_owner_and_kind() {
        let mut old = HandlerArena::new();
        let old_a = old.register(1, HandlerKind::Event { port: 0 });
        let _old_b = old.register(2, HandlerKind::Clock { tag: 7 });

        // Rebuilt in a different order.
        let mut new = HandlerArena::new();
        let new_b = new.register(2, HandlerKind::Clock { tag: 7 });
        let new_a = new.register(1, HandlerKind::Event { port: 0 });

        let table = new.remap_from(&old);
        assert_eq!(table[&old_a], new_a);
        assert_eq!(table.len(), 2);
        assert_eq!(
            table[&HandlerId::new(1, 1)],
            new_b
        );
    }
}
