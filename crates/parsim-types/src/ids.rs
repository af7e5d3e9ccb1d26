//! # parsim-types::ids
//!
//! Identifier types used throughout the simulation. Distinct types keep a
//! `LinkId` from being confused with a `PortTag`, and the composite
//! `ComponentId` encodes the subcomponent tree position directly in the id.

use crate::ser::{Persist, Serializer};
use serde::{Deserialize, Serialize};

/// A rank (process) index.
pub type RankId = u32;

/// A thread index within a rank.
pub type ThreadId = u32;

/// One `(rank, thread)` execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct RankInfo {
    pub rank: RankId,
    pub thread: ThreadId,
}

impl RankInfo {
    pub const fn new(rank: RankId, thread: ThreadId) -> Self {
        Self { rank, thread }
    }
}

impl std::fmt::Display for RankInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.rank, self.thread)
    }
}

impl Persist for RankInfo {
    fn persist(&mut self, ser: &mut Serializer) {
        self.rank.persist(ser);
        self.thread.persist(ser);
    }
}

/// 64-bit composite component identifier.
///
/// The top [`SUBCOMPONENT_BITS`] bits are a subcomponent index (0 for a
/// top-level component); the low bits are the top-level component number.
/// A subcomponent therefore shares the low bits with every ancestor up to
/// its top-level component.
pub type ComponentId = u64;

pub const SUBCOMPONENT_BITS: u32 = 16;
pub const COMPONENT_NUM_BITS: u32 = 64 - SUBCOMPONENT_BITS;
pub const COMPONENT_NUM_MASK: u64 = (1 << COMPONENT_NUM_BITS) - 1;

/// Extracts the top-level component number.
pub fn component_num(id: ComponentId) -> u64 {
    id & COMPONENT_NUM_MASK
}

/// Extracts the subcomponent index (0 for top-level components).
pub fn subcomponent_index(id: ComponentId) -> u16 {
    (id >> COMPONENT_NUM_BITS) as u16
}

/// Builds the id of the `index`-th subcomponent under `parent`.
pub fn subcomponent_id(parent: ComponentId, index: u16) -> ComponentId {
    ((index as u64) << COMPONENT_NUM_BITS) | component_num(parent)
}

/// Index of a Link in the per-partition link arena. Pair fix-up and
/// checkpoint references both key on this index.
pub type LinkId = u32;

/// Stable per-link tag used on the wire and in checkpoints.
pub type LinkTag = u64;

/// A component-chosen tag identifying one of its ports.
pub type PortTag = u32;

/// A component-chosen tag identifying one of its clock or one-shot handlers.
pub type ClockTag = u64;

/// Generation-checked handle into the per-partition handler arena.
///
/// Events carry this instead of a handler pointer; the generation catches
/// use of a handle whose slot has been re-issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HandlerId {
    pub index: u32,
    pub gen: u32,
}

impl HandlerId {
    pub const fn new(index: u32, gen: u32) -> Self {
        Self { index, gen }
    }
}

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "h{}.{}", self.index, self.gen)
    }
}

impl Persist for HandlerId {
    fn persist(&mut self, ser: &mut Serializer) {
        self.index.persist(ser);
        self.gen.persist(ser);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_id_composite() {
        let top: ComponentId = 42;
        assert_eq!(component_num(top), 42);
        assert_eq!(subcomponent_index(top), 0);

        let sub = subcomponent_id(top, 3);
        assert_eq!(component_num(sub), 42);
        assert_eq!(subcomponent_index(sub), 3);

        // Subcomponents of subcomponents stay under the same top-level number.
        let sub2 = subcomponent_id(sub, 7);
        assert_eq!(component_num(sub2), 42);
        assert_eq!(subcomponent_index(sub2), 7);
    }
}
