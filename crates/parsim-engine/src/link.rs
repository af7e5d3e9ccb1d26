//! # parsim-engine::link
//!
//! Links and the per-partition link arena. A Link is always one half of a
//! pair whose `pair` fields reference each other (a SelfLink is the
//! degenerate case where both halves are the same index). Sending on a
//! link stamps the event with `now + delay + latency` and the receiving
//! half's handler, then enqueues it on the sending half's queue: the
//! owning partition's TimeVortex, the polling queue, or a cross-partition
//! sync queue.
//!
//! Tools (port modules, profiling probes) attach to a link as intercept
//! points: send-side tools may rewrite or drop an event before it is
//! queued, receive-side tools run immediately before the handler and may
//! cancel delivery. Receive-side tools on a polling link are rejected.

use crate::activity::EventEnvelope;
use bytes::Bytes;
use parsim_types::errors::SimError;
use parsim_types::ids::{ComponentId, HandlerId, LinkId, LinkTag, RankId, ThreadId};
use parsim_types::persist_fields;
use parsim_types::ser::{Persist, SerMode, Serializer};
use parsim_types::time::CoreTime;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkKind {
    #[default]
    Uninit,
    Handler,
    Polling,
    Sync,
}

impl Persist for LinkKind {
    fn persist(&mut self, ser: &mut Serializer) {
        let mut disc = *self as u8;
        disc.persist(ser);
        if ser.mode() == SerMode::Unpack {
            *self = match disc {
                1 => LinkKind::Handler,
                2 => LinkKind::Polling,
                3 => LinkKind::Sync,
                _ => LinkKind::Uninit,
            };
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkMode {
    #[default]
    Init,
    Run,
    Complete,
}

impl Persist for LinkMode {
    fn persist(&mut self, ser: &mut Serializer) {
        let mut disc = *self as u8;
        disc.persist(ser);
        if ser.mode() == SerMode::Unpack {
            *self = match disc {
                1 => LinkMode::Run,
                2 => LinkMode::Complete,
                _ => LinkMode::Init,
            };
        }
    }
}

/// Where sends on a link go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendTarget {
    #[default]
    Uninit,
    /// Into the owning partition's TimeVortex (receiver is local).
    Vortex,
    /// Into this link's polling queue; the peer drains it with `recv`.
    Polling,
    /// Into another thread's inbox on this rank.
    CrossThread(ThreadId),
    /// Into the per-peer sync queue for another rank.
    CrossRank(RankId),
}

impl Persist for SendTarget {
    fn persist(&mut self, ser: &mut Serializer) {
        let (mut disc, mut arg): (u8, u32) = match self {
            SendTarget::Uninit => (0, 0),
            SendTarget::Vortex => (1, 0),
            SendTarget::Polling => (2, 0),
            SendTarget::CrossThread(t) => (3, *t),
            SendTarget::CrossRank(r) => (4, *r),
        };
        disc.persist(ser);
        arg.persist(ser);
        if ser.mode() == SerMode::Unpack {
            *self = match disc {
                1 => SendTarget::Vortex,
                2 => SendTarget::Polling,
                3 => SendTarget::CrossThread(arg),
                4 => SendTarget::CrossRank(arg),
                _ => SendTarget::Uninit,
            };
        }
    }
}

/// An event parked on a polling link until its delivery time is polled.
#[derive(Debug, Clone, Default)]
pub struct PolledEvent {
    pub delivery_time: CoreTime,
    pub seq: u64,
    pub payload: Option<Bytes>,
}

impl Persist for PolledEvent {
    fn persist(&mut self, ser: &mut Serializer) {
        persist_fields!(ser, self.delivery_time, self.seq, self.payload);
    }
}

impl PartialEq for PolledEvent {
    fn eq(&self, other: &Self) -> bool {
        (self.delivery_time, self.seq) == (other.delivery_time, other.seq)
    }
}
impl Eq for PolledEvent {}
impl PartialOrd for PolledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PolledEvent {
    // Reversed so the BinaryHeap yields the earliest first.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.delivery_time, other.seq).cmp(&(self.delivery_time, self.seq))
    }
}

/// Time-ordered queue on the sending half of a polling link.
#[derive(Debug, Default)]
pub struct PollingQueue {
    heap: BinaryHeap<PolledEvent>,
    next_seq: u64,
}

impl PollingQueue {
    pub fn push(&mut self, delivery_time: CoreTime, payload: Option<Bytes>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(PolledEvent {
            delivery_time,
            seq,
            payload,
        });
    }

    /// Pops the next event whose delivery time has been reached.
    pub fn pop_due(&mut self, now: CoreTime) -> Option<PolledEvent> {
        if self.heap.peek().is_some_and(|e| e.delivery_time <= now) {
            self.heap.pop()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl Persist for PollingQueue {
    fn persist(&mut self, ser: &mut Serializer) {
        persist_fields!(ser, self.next_seq);
        let mut entries: Vec<PolledEvent> = self.heap.iter().cloned().collect();
        entries.sort_by_key(|e| (e.delivery_time, e.seq));
        ser.named("entries", &mut entries);
        if ser.mode() == SerMode::Unpack {
            self.heap = entries.into_iter().collect();
        }
    }
}

/// Data sent during an untimed (init/complete) round, tagged with the
/// phase counter instead of simulated time.
#[derive(Debug, Clone, Default)]
pub struct UntimedItem {
    pub phase: u64,
    pub payload: Bytes,
}

impl Persist for UntimedItem {
    fn persist(&mut self, ser: &mut Serializer) {
        persist_fields!(ser, self.phase, self.payload);
    }
}

/// An intercept/trace tool attached to a link.
pub trait LinkTool: Send {
    fn name(&self) -> &str;
    /// Send-side intercept. Setting the event to `None` drops it (the
    /// tool owns the deletion).
    fn on_send(&mut self, _ev: &mut Option<EventEnvelope>) {}
    /// Receive-side intercept, invoked immediately before the handler.
    /// Setting the event to `None` cancels delivery.
    fn on_deliver(&mut self, _ev: &mut Option<EventEnvelope>) {}
    /// One-line summary for end-of-run reporting.
    fn report(&self) -> Option<String> {
        None
    }
}

/// The built-in profiling tool: counts events crossing its attach point.
pub struct EventCountTool {
    name: String,
    pub sends: u64,
    pub delivers: u64,
}

impl EventCountTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sends: 0,
            delivers: 0,
        }
    }
}

impl LinkTool for EventCountTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_send(&mut self, ev: &mut Option<EventEnvelope>) {
        if ev.is_some() {
            self.sends += 1;
        }
    }

    fn on_deliver(&mut self, ev: &mut Option<EventEnvelope>) {
        if ev.is_some() {
            self.delivers += 1;
        }
    }

    fn report(&self) -> Option<String> {
        Some(format!(
            "{}: sends={} delivers={}",
            self.name, self.sends, self.delivers
        ))
    }
}

/// One half of a link pair.
pub struct Link {
    pub tag: LinkTag,
    pub kind: LinkKind,
    pub mode: LinkMode,
    pub pair: LinkId,
    /// Added to every send on this link, in core ticks.
    pub latency: CoreTime,
    /// Factor of the default time base for `send` delays.
    pub default_tb: CoreTime,
    /// Handler for events arriving on this link (none for polling links).
    pub delivery_info: Option<HandlerId>,
    /// Where sends on this link enqueue.
    pub target: SendTarget,
    /// Globally-unique pair name for links that cross a partition.
    pub sync_name: Option<String>,
    /// Component currently holding this link in its LinkMap.
    pub owner: ComponentId,
    pub polling: PollingQueue,
    /// Untimed data awaiting this link's owner.
    pub untimed: VecDeque<UntimedItem>,
    pub send_tools: Vec<Box<dyn LinkTool>>,
    pub recv_tools: Vec<Box<dyn LinkTool>>,
}

impl Link {
    fn new(tag: LinkTag) -> Self {
        Self {
            tag,
            kind: LinkKind::Uninit,
            mode: LinkMode::Init,
            pair: 0,
            latency: 0,
            default_tb: 0,
            delivery_info: None,
            target: SendTarget::Uninit,
            sync_name: None,
            owner: 0,
            polling: PollingQueue::default(),
            untimed: VecDeque::new(),
            send_tools: Vec::new(),
            recv_tools: Vec::new(),
        }
    }

    pub fn is_self_link(&self, my_id: LinkId) -> bool {
        self.pair == my_id
    }
}

impl Persist for Link {
    fn persist(&mut self, ser: &mut Serializer) {
        // Tools are not serialized; profiling attach points are re-applied
        // from the run configuration after restart.
        persist_fields!(
            ser,
            self.tag,
            self.kind,
            self.mode,
            self.pair,
            self.latency,
            self.default_tb,
            self.delivery_info,
            self.target,
            self.sync_name,
            self.owner,
            self.polling,
            self.untimed
        );
    }
}

/// The per-partition link arena. `LinkId` is an index into this vector;
/// pair back-references are indices, so checkpointing the arena and
/// fixing pairs up on restart is a table lookup.
#[derive(Default)]
pub struct LinkArena {
    links: Vec<Link>,
}

impl LinkArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connected pair of links.
    pub fn create_pair(&mut self, tag_a: LinkTag, tag_b: LinkTag) -> (LinkId, LinkId) {
        let a = self.links.len() as LinkId;
        let b = a + 1;
        let mut link_a = Link::new(tag_a);
        let mut link_b = Link::new(tag_b);
        link_a.pair = b;
        link_b.pair = a;
        self.links.push(link_a);
        self.links.push(link_b);
        (a, b)
    }

    /// Creates a self link: both halves are the same index.
    pub fn create_self_link(&mut self, tag: LinkTag) -> LinkId {
        let id = self.links.len() as LinkId;
        let mut link = Link::new(tag);
        link.pair = id;
        self.links.push(link);
        id
    }

    pub fn get(&self, id: LinkId) -> Result<&Link, SimError> {
        self.links
            .get(id as usize)
            .ok_or_else(|| SimError::WireUp(format!("link {id} does not exist")))
    }

    pub fn get_mut(&mut self, id: LinkId) -> Result<&mut Link, SimError> {
        self.links
            .get_mut(id as usize)
            .ok_or_else(|| SimError::WireUp(format!("link {id} does not exist")))
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LinkId, &Link)> + '_ {
        self.links.iter().enumerate().map(|(i, l)| (i as LinkId, l))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (LinkId, &mut Link)> + '_ {
        self.links
            .iter_mut()
            .enumerate()
            .map(|(i, l)| (i as LinkId, l))
    }

    /// Attaches a tool. Receive-side tools on a polling link are a
    /// contract violation.
    pub fn attach_tool(
        &mut self,
        id: LinkId,
        tool: Box<dyn LinkTool>,
        recv_side: bool,
    ) -> Result<(), SimError> {
        let link = self.get_mut(id)?;
        if recv_side && link.kind == LinkKind::Polling {
            return Err(SimError::PollingMisuse(format!(
                "receive-side tool '{}' attached to polling link {}",
                tool.name(),
                id
            )));
        }
        if recv_side {
            link.recv_tools.push(tool);
        } else {
            link.send_tools.push(tool);
        }
        Ok(())
    }
}

impl Persist for LinkArena {
    fn persist(&mut self, ser: &mut Serializer) {
        let mut count = self.links.len();
        ser.named("count", &mut count);
        if ser.mode() == SerMode::Unpack {
            self.links = (0..count).map(|_| Link::new(0)).collect();
        }
        for (i, link) in self.links.iter_mut().enumerate() {
            ser.named(&format!("[{i}]"), link);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_symmetry() {
        let mut arena = LinkArena::new();
        let (a, b) = arena.create_pair(0, 1);
        assert_eq!(arena.get(a).unwrap().pair, b);
        assert_eq!(arena.get(b).unwrap().pair, a);
        let s = arena.create_self_link(2);
        assert!(arena.get(s).unwrap().is_self_link(s));
    }

    #[test]
    fn polling_queue_orders_and_gates_by_time() {
        let mut q = PollingQueue::default();
        q.push(20, None);
        q.push(10, None);
        assert!(q.pop_due(5).is_none());
        assert_eq!(q.pop_due(15).unwrap().delivery_time, 10);
        assert!(q.pop_due(15).is_none());
        assert_eq!(q.pop_due(25).unwrap().delivery_time, 20);
    }

    #[test]
    fn recv_tool_on_polling_link_is_rejected() {
        let mut arena = LinkArena::new();
        let (a, _b) = arena.create_pair(0, 1);
        arena.get_mut(a).unwrap().kind = LinkKind::Polling;
        let err = arena.attach_tool(a, Box::new(EventCountTool::new("probe")), true);
        assert!(matches!(err, Err(SimError::PollingMisuse(_))));
        // Send side is fine.
        arena
            .attach_tool(a, Box::new(EventCountTool::new("probe")), false)
            .unwrap();
    }

    #[test]
    fn event_count_tool_counts() {
        let mut tool = EventCountTool::new("t");
        let mut ev = Some(EventEnvelope::default());
        tool.on_send(&mut ev);
        tool.on_deliver(&mut ev);
        let mut gone: Option<EventEnvelope> = None;
        tool.on_send(&mut gone);
        assert_eq!(tool.sends, 1);
        assert_eq!(tool.delivers, 1);
    }
}
