//! # parsim-engine::sim
//!
//! The per-partition simulation driver. One `Sim` owns a partition's
//! TimeVortex, link arena, handler arena, component slots, clocks, and
//! exit state, and walks the lifecycle init → setup → run → complete →
//! finish. The run loop pops the earliest activity, advances simulated
//! time, and executes it; a time fault (an activity delivered earlier
//! than the clock) is detected on pop, the offending activity still
//! executes, and the loop aborts on the following iteration.
//!
//! `EngineCtx` is the bridge handed to components: it implements the
//! `CoreCtx` trait from `parsim-model` against this partition's state.

use crate::activity::{Activity, EventEnvelope, Scheduled};
use crate::checkpoint;
use crate::clock::{Clock, ClockKey, OneShot};
use crate::component::ComponentSlot;
use crate::exit::{Exit, Heartbeat};
use crate::handler::{HandlerArena, HandlerKind};
use crate::link::{LinkArena, LinkKind, LinkMode, SendTarget};
use crate::realtime::{self, RealTimeManager};
use crate::sync::transport::RankTransport;
use crate::sync::{SyncManager, WireEvent, WireUntimed};
use crate::timelord::TimeLord;
use crate::timevortex::TimeVortex;
use bytes::Bytes;
use indexmap::IndexMap;
use parsim_model::api::{Component, CoreCtx};
use parsim_model::factory::Factory;
use parsim_model::params::Params;
use parsim_types::config::RunConfig;
use parsim_types::errors::{SimError, SyncError};
use parsim_types::ids::{ClockTag, ComponentId, LinkId, PortTag, RankId, RankInfo};
use parsim_types::ser::{Persist, SerMode, Serializer};
use parsim_types::time::{
    checked_add, priority, CoreTime, Cycle, Priority, TimeConverter, TIME_MAX,
};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Lifecycle position of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Init,
    Run,
    Complete,
}

impl Persist for RunMode {
    fn persist(&mut self, ser: &mut Serializer) {
        let mut disc = *self as u8;
        disc.persist(ser);
        if ser.mode() == SerMode::Unpack {
            *self = match disc {
                1 => RunMode::Run,
                2 => RunMode::Complete,
                _ => RunMode::Init,
            };
        }
    }
}

/// How the run loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownMode {
    #[default]
    Clean,
    Signal,
    Emergency,
}

#[derive(Debug, Default, Clone)]
pub struct SimStats {
    pub activities_popped: u64,
    pub events_delivered: u64,
    pub events_dropped: u64,
    pub sync_exchanges: u64,
    pub checkpoints_written: u64,
}

pub struct Sim {
    // Identity.
    pub(crate) num_ranks: RankInfo,
    pub(crate) my_rank: RankInfo,
    pub(crate) timelord: Arc<TimeLord>,
    pub(crate) factory: Arc<Factory>,
    pub(crate) config: RunConfig,

    // Time.
    pub(crate) current_sim_cycle: CoreTime,
    pub(crate) current_priority: Priority,
    pub(crate) run_mode: RunMode,
    pub(crate) end_sim: bool,
    pub(crate) end_sim_cycle: CoreTime,
    pub(crate) untimed_phase: u64,
    pub(crate) shutdown_mode: ShutdownMode,

    // Partition state.
    pub(crate) vortex: TimeVortex,
    pub(crate) links: LinkArena,
    pub(crate) handlers: HandlerArena,
    pub(crate) components: BTreeMap<ComponentId, ComponentSlot>,
    /// Name lookup, in declaration order.
    pub(crate) names: IndexMap<String, ComponentId>,
    pub(crate) clocks: BTreeMap<ClockKey, Clock>,
    pub(crate) oneshots: BTreeMap<ClockKey, OneShot>,
    pub(crate) exit: Exit,
    pub(crate) primary_count: u64,
    pub(crate) heartbeat: Heartbeat,
    pub(crate) sync: SyncManager,
    pub(crate) transport: Option<Box<dyn RankTransport>>,
    pub(crate) realtime: RealTimeManager,
    pub(crate) rank_outbox: Vec<(RankId, WireEvent)>,
    pub(crate) rank_untimed_outbox: Vec<(RankId, WireUntimed)>,

    // Checkpointing.
    pub(crate) checkpoint_sim_period: CoreTime,
    pub(crate) checkpoint_next_id: u64,
    pub(crate) restarting: bool,

    // Dispatch bookkeeping.
    pub(crate) constructing: Option<ComponentId>,
    pub(crate) stats: SimStats,
}

impl Sim {
    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn now(&self) -> CoreTime {
        self.current_sim_cycle
    }

    pub fn current_priority(&self) -> Priority {
        self.current_priority
    }

    pub fn end_sim_cycle(&self) -> CoreTime {
        self.end_sim_cycle
    }

    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    pub fn my_rank(&self) -> RankInfo {
        self.my_rank
    }

    pub fn timelord(&self) -> &Arc<TimeLord> {
        &self.timelord
    }

    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    pub fn vortex(&self) -> &TimeVortex {
        &self.vortex
    }

    pub fn component_id(&self, name: &str) -> Option<ComponentId> {
        self.names.get(name).copied()
    }

    /// Downcast view of a component instance, for wiring code and tests.
    pub fn component_as<T: 'static>(&self, name: &str) -> Option<&T> {
        let id = self.component_id(name)?;
        self.components
            .get(&id)?
            .instance
            .as_ref()?
            .as_any()
            .downcast_ref::<T>()
    }

    fn partition_label(&self) -> String {
        format!("({}:{})", self.my_rank.rank, self.my_rank.thread)
    }

    // ------------------------------------------------------------------
    // Construction-time plumbing (used by the builder and restart)
    // ------------------------------------------------------------------

    /// Builds the instance for an already-wired component slot.
    pub(crate) fn construct_component(&mut self, cid: ComponentId) -> Result<(), SimError> {
        let (type_name, params) = {
            let slot = self
                .components
                .get(&cid)
                .ok_or_else(|| SimError::WireUp(format!("component {cid} does not exist")))?;
            (slot.info.type_name.clone(), slot.info.params.clone())
        };
        let previous = self.constructing.replace(cid);
        let factory = self.factory.clone();
        let instance = {
            let mut ctx = EngineCtx { sim: self, cid };
            factory.create(&type_name, cid, &params, &mut ctx)?
        };
        self.constructing = previous;
        if let Some(slot) = self.components.get_mut(&cid) {
            slot.instance = Some(instance);
        }
        Ok(())
    }

    /// Runs a closure against a component with the engine context,
    /// temporarily taking the instance out of its slot.
    pub(crate) fn with_component<R>(
        &mut self,
        cid: ComponentId,
        f: impl FnOnce(&mut dyn Component, &mut EngineCtx<'_>) -> R,
    ) -> Option<R> {
        let slot = self.components.get_mut(&cid)?;
        let mut instance = slot.instance.take()?;
        let mut ctx = EngineCtx { sim: self, cid };
        let result = f(instance.as_mut(), &mut ctx);
        if let Some(slot) = self.components.get_mut(&cid) {
            slot.instance = Some(instance);
        }
        Some(result)
    }

    /// Destroys a component: children first, then detach from the
    /// parent's child list, then drop the instance.
    pub fn destroy_component(&mut self, cid: ComponentId) {
        let children = self
            .components
            .get(&cid)
            .map(|s| s.info.children.clone())
            .unwrap_or_default();
        for child in children {
            self.destroy_component(child);
        }
        let parent = self.components.get(&cid).and_then(|s| s.info.parent);
        if let Some(parent) = parent {
            if let Some(slot) = self.components.get_mut(&parent) {
                slot.info.remove_child(cid);
            }
        }
        if let Some(mut slot) = self.components.remove(&cid) {
            slot.info.parent = None;
            self.names.shift_remove(&slot.info.name);
            slot.instance = None;
        }
    }

    // ------------------------------------------------------------------
    // Link operations
    // ------------------------------------------------------------------

    /// Finds a port for `cid`, reparenting from an ancestor's LinkMap
    /// when the component shares ports with its parent.
    fn resolve_port(&mut self, cid: ComponentId, port: &str) -> Result<LinkId, SimError> {
        let mut cursor = cid;
        loop {
            let info = &self
                .components
                .get(&cursor)
                .ok_or_else(|| SimError::WireUp(format!("component {cursor} does not exist")))?
                .info;
            if let Some(link) = info.link_map.get(port) {
                if cursor != cid {
                    // Shared port: move it down to the configuring
                    // component.
                    self.components
                        .get_mut(&cursor)
                        .expect("component vanished")
                        .info
                        .link_map
                        .remove(port);
                    self.components
                        .get_mut(&cid)
                        .expect("component vanished")
                        .info
                        .link_map
                        .insert(port, link)?;
                    self.links.get_mut(link)?.owner = cid;
                }
                return Ok(link);
            }
            match (info.share_ports, info.parent) {
                (true, Some(parent)) => cursor = parent,
                _ => {
                    return Err(SimError::WireUp(format!(
                        "component {} has no port '{port}'",
                        self.components
                            .get(&cid)
                            .map(|s| s.info.name.as_str())
                            .unwrap_or("?")
                    )))
                }
            }
        }
    }

    fn configure_link_impl(
        &mut self,
        cid: ComponentId,
        port: &str,
        time_base: &str,
        handler_port: Option<PortTag>,
    ) -> Result<LinkId, SimError> {
        let link = self.resolve_port(cid, port)?;
        let factor = self.timelord.converter(time_base)?.factor();
        let kind = self.links.get(link)?.kind;
        if kind != LinkKind::Uninit {
            let replay_match = self.restarting
                && kind
                    == if handler_port.is_some() {
                        LinkKind::Handler
                    } else {
                        LinkKind::Polling
                    };
            if !replay_match {
                return Err(SimError::WireUp(format!(
                    "port '{port}' is already configured"
                )));
            }
            // Restart replay: the link state is restored; only the
            // handler handle is fresh.
            let handler = handler_port
                .map(|tag| self.handlers.register(cid, HandlerKind::Event { port: tag }));
            self.links.get_mut(link)?.delivery_info = handler;
            return Ok(link);
        }
        let handler =
            handler_port.map(|tag| self.handlers.register(cid, HandlerKind::Event { port: tag }));
        let pair = {
            let l = self.links.get_mut(link)?;
            l.kind = if handler.is_some() {
                LinkKind::Handler
            } else {
                LinkKind::Polling
            };
            l.delivery_info = handler;
            l.default_tb = factor;
            l.owner = cid;
            l.pair
        };
        if handler.is_none() {
            // Polling: sends from the peer park on the peer's queue
            // instead of entering the vortex.
            let peer = self.links.get_mut(pair)?;
            match peer.target {
                SendTarget::CrossThread(_) | SendTarget::CrossRank(_) => {
                    return Err(SimError::WireUp(format!(
                        "polling port '{port}' cannot cross a partition boundary"
                    )));
                }
                _ => peer.target = SendTarget::Polling,
            }
        }
        Ok(link)
    }

    /// Sends on a link at `now + delay * default_tb + latency`.
    pub(crate) fn send_on_link(
        &mut self,
        link: LinkId,
        delay: Cycle,
        payload: Option<Bytes>,
    ) -> Result<(), SimError> {
        let now = self.current_sim_cycle;
        let (mode, kind, latency, default_tb, pair, target, tag, sync_name) = {
            let l = self.links.get(link)?;
            (
                l.mode,
                l.kind,
                l.latency,
                l.default_tb,
                l.pair,
                l.target,
                l.tag,
                l.sync_name.clone(),
            )
        };
        if mode != LinkMode::Run {
            return Err(SimError::Phase(format!(
                "send on link {tag} while not running (mode {mode:?})"
            )));
        }
        if kind == LinkKind::Polling {
            return Err(SimError::PollingMisuse(format!(
                "send on polling link {tag}"
            )));
        }
        let delay_core = delay
            .checked_mul(default_tb.max(1))
            .ok_or(SimError::TimeOverflow {
                base: delay,
                offset: default_tb,
            })?;
        let time = checked_add(checked_add(now, delay_core)?, latency)?;

        let handler = self.links.get(pair)?.delivery_info;
        let mut ev = Some(EventEnvelope {
            delivery_time: time,
            handler,
            recv_link: pair,
            link_tag: tag,
            payload,
        });

        // Send-side intercepts may rewrite or drop the event.
        let mut tools = std::mem::take(&mut self.links.get_mut(link)?.send_tools);
        for tool in tools.iter_mut() {
            if ev.is_none() {
                break;
            }
            tool.on_send(&mut ev);
        }
        self.links.get_mut(link)?.send_tools = tools;

        let Some(ev) = ev else {
            return Ok(());
        };

        metrics::counter!("parsim_events_sent_total").increment(1);
        match target {
            SendTarget::Vortex => {
                self.vortex
                    .insert(time, priority::EVENT, Activity::Event(ev));
            }
            SendTarget::Polling => {
                self.links.get_mut(link)?.polling.push(time, ev.payload);
            }
            SendTarget::CrossThread(thread) => {
                let name = sync_name.ok_or_else(|| {
                    SimError::Sync(SyncError::UnknownSyncLink(format!("link {tag}")))
                })?;
                self.sync.shared.inboxes[thread as usize]
                    .lock()
                    .expect("sync inbox poisoned")
                    .push(WireEvent {
                        sync_name: name,
                        time,
                        priority: priority::EVENT,
                        payload: ev.payload,
                    });
            }
            SendTarget::CrossRank(rank) => {
                let name = sync_name.ok_or_else(|| {
                    SimError::Sync(SyncError::UnknownSyncLink(format!("link {tag}")))
                })?;
                self.rank_outbox.push((
                    rank,
                    WireEvent {
                        sync_name: name,
                        time,
                        priority: priority::EVENT,
                        payload: ev.payload,
                    },
                ));
            }
            SendTarget::Uninit => {
                return Err(SimError::WireUp(format!(
                    "send on unconfigured link {tag}"
                )));
            }
        }
        Ok(())
    }

    fn recv_on_link(&mut self, link: LinkId) -> Result<Option<Bytes>, SimError> {
        let (kind, pair) = {
            let l = self.links.get(link)?;
            (l.kind, l.pair)
        };
        if kind != LinkKind::Polling {
            return Err(SimError::PollingMisuse(format!(
                "recv on non-polling link {link}"
            )));
        }
        let now = self.current_sim_cycle;
        Ok(self
            .links
            .get_mut(pair)?
            .polling
            .pop_due(now)
            .and_then(|ev| ev.payload))
    }

    fn send_untimed_on_link(&mut self, link: LinkId, payload: Bytes) -> Result<(), SimError> {
        let (mode, pair, target, tag, sync_name) = {
            let l = self.links.get(link)?;
            (l.mode, l.pair, l.target, l.tag, l.sync_name.clone())
        };
        if mode == LinkMode::Run {
            return Err(SimError::Phase(format!(
                "untimed send on link {tag} during the run phase"
            )));
        }
        let phase = self.untimed_phase;
        match target {
            SendTarget::CrossThread(thread) => {
                let name = sync_name.ok_or_else(|| {
                    SimError::Sync(SyncError::UnknownSyncLink(format!("link {tag}")))
                })?;
                self.sync.shared.untimed_inboxes[thread as usize]
                    .lock()
                    .expect("untimed inbox poisoned")
                    .push(WireUntimed {
                        sync_name: name,
                        phase,
                        payload,
                    });
            }
            SendTarget::CrossRank(rank) => {
                let name = sync_name.ok_or_else(|| {
                    SimError::Sync(SyncError::UnknownSyncLink(format!("link {tag}")))
                })?;
                self.rank_untimed_outbox.push((
                    rank,
                    WireUntimed {
                        sync_name: name,
                        phase,
                        payload,
                    },
                ));
            }
            _ => {
                self.links
                    .get_mut(pair)?
                    .untimed
                    .push_back(crate::link::UntimedItem { phase, payload });
            }
        }
        self.sync
            .shared
            .untimed_local
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Clock operations
    // ------------------------------------------------------------------

    pub(crate) fn register_clock_handler(
        &mut self,
        cid: ComponentId,
        freq: &str,
        tag: ClockTag,
        prio: Priority,
    ) -> Result<TimeConverter, SimError> {
        let factor = self.timelord.sim_cycles(freq)?;
        if factor == 0 {
            return Err(SimError::WireUp(format!(
                "clock period '{freq}' resolves to zero ticks"
            )));
        }
        let key = (factor, prio);
        let handler = self.handlers.register(cid, HandlerKind::Clock { tag });
        if self.restarting {
            // Replay: the arena registration is fresh, but attachment and
            // scheduling are restored from the blob and rebound later.
            return Ok(TimeConverter::new(factor));
        }
        let clock = self
            .clocks
            .entry(key)
            .or_insert_with(|| Clock::new(factor, prio));
        clock.register(handler, cid, tag);
        if !clock.scheduled {
            self.schedule_clock(key);
        }
        Ok(TimeConverter::new(factor))
    }

    /// Computes the first tick for a (re)registered clock. A clock
    /// registered at an exact cycle boundary after time zero fires at the
    /// current instant when the tick would still be ahead of the
    /// currently-executing priority; otherwise it fires at the next
    /// boundary.
    fn schedule_clock(&mut self, key: ClockKey) {
        let now = self.current_sim_cycle;
        let current_priority = self.current_priority;
        let Some(clock) = self.clocks.get_mut(&key) else {
            return;
        };
        let pf = clock.period_factor;
        clock.current_cycle = now / pf;
        let mut next = (clock.current_cycle + 1) * pf;
        if current_priority < clock.priority && now != 0 && now % pf == 0 {
            next = now;
            clock.current_cycle = now / pf - 1;
        }
        clock.next = next;
        clock.scheduled = true;
        let prio = clock.priority;
        self.vortex
            .insert(next, prio, Activity::ClockTick { period_factor: pf });
    }

    fn execute_clock_tick(&mut self, period_factor: CoreTime, prio: Priority) {
        let key = (period_factor, prio);
        let (cycle, handler_list) = {
            let Some(clock) = self.clocks.get_mut(&key) else {
                return;
            };
            if clock.handlers.is_empty() {
                clock.scheduled = false;
                return;
            }
            clock.current_cycle += 1;
            (clock.current_cycle, clock.handlers.clone())
        };
        for handler in handler_list {
            let Some(entry) = self.handlers.get(handler) else {
                continue;
            };
            let owner = entry.owner;
            let HandlerKind::Clock { tag } = entry.kind else {
                continue;
            };
            let done = self
                .with_component(owner, |c, ctx| c.on_clock(tag, cycle, ctx))
                .unwrap_or(false);
            if done {
                if let Some(clock) = self.clocks.get_mut(&key) {
                    clock.unregister(owner, tag);
                }
                self.handlers.retire(handler);
            }
        }
        let next = self.current_sim_cycle + period_factor;
        if let Some(clock) = self.clocks.get_mut(&key) {
            clock.next = next;
            self.vortex.insert(
                next,
                prio,
                Activity::ClockTick {
                    period_factor,
                },
            );
        }
    }

    pub(crate) fn register_oneshot_handler(
        &mut self,
        cid: ComponentId,
        delay: &str,
        tag: ClockTag,
        prio: Priority,
    ) -> Result<(), SimError> {
        let factor = self.timelord.sim_cycles(delay)?;
        let key = (factor, prio);
        let handler = self.handlers.register(cid, HandlerKind::OneShot { tag });
        if self.restarting {
            return Ok(());
        }
        let oneshot = self
            .oneshots
            .entry(key)
            .or_insert_with(|| OneShot::new(factor, prio));
        oneshot.register(handler, cid, tag);
        if !oneshot.scheduled {
            oneshot.scheduled = true;
            let time = checked_add(self.current_sim_cycle, factor)?;
            self.vortex.insert(
                time,
                prio,
                Activity::OneShotFire {
                    delay_factor: factor,
                },
            );
        }
        Ok(())
    }

    fn execute_oneshot(&mut self, delay_factor: CoreTime, prio: Priority) {
        let key = (delay_factor, prio);
        let handlers = match self.oneshots.get_mut(&key) {
            Some(os) => os.take_handlers(),
            None => return,
        };
        for handler in handlers {
            if let Some(entry) = self.handlers.get(handler) {
                let owner = entry.owner;
                if let HandlerKind::OneShot { tag } = entry.kind {
                    self.with_component(owner, |c, ctx| c.on_oneshot(tag, ctx));
                }
            }
            self.handlers.retire(handler);
        }
    }

    // ------------------------------------------------------------------
    // Event delivery
    // ------------------------------------------------------------------

    fn deliver_event(&mut self, ev: EventEnvelope) -> Result<(), SimError> {
        // Receive-side intercepts run immediately before the handler and
        // may cancel delivery.
        let recv_link = ev.recv_link;
        let mut slot = Some(ev);
        if let Ok(link) = self.links.get_mut(recv_link) {
            if !link.recv_tools.is_empty() {
                let mut tools = std::mem::take(&mut link.recv_tools);
                for tool in tools.iter_mut() {
                    if slot.is_none() {
                        break;
                    }
                    tool.on_deliver(&mut slot);
                }
                if let Ok(link) = self.links.get_mut(recv_link) {
                    link.recv_tools = tools;
                }
            }
        }
        let Some(ev) = slot else {
            self.stats.events_dropped += 1;
            return Ok(());
        };

        let Some(handler) = ev.handler else {
            tracing::warn!(
                target: "events",
                link = ev.link_tag,
                "event arrived on a link with no handler"
            );
            self.stats.events_dropped += 1;
            return Ok(());
        };
        let Some(entry) = self.handlers.get(handler) else {
            tracing::warn!(target: "events", %handler, "event for a retired handler dropped");
            self.stats.events_dropped += 1;
            return Ok(());
        };
        let owner = entry.owner;
        let HandlerKind::Event { port } = entry.kind else {
            return Err(SimError::Phase(format!(
                "event routed to a non-event handler {handler}"
            )));
        };
        self.stats.events_delivered += 1;
        metrics::counter!("parsim_events_delivered_total").increment(1);
        tracing::trace!(target: "events", link = ev.link_tag, component = owner, "event delivered");
        self.with_component(owner, |c, ctx| c.on_event(port, ev.payload, ctx));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Exit protocol
    // ------------------------------------------------------------------

    pub(crate) fn note_primary(&mut self, cid: ComponentId) {
        if self.constructing != Some(cid) {
            let name = self
                .components
                .get(&cid)
                .map(|s| s.info.name.clone())
                .unwrap_or_default();
            self.fatal(SimError::Phase(format!(
                "register_as_primary called outside construction by '{name}'"
            )));
        }
        let Some(slot) = self.components.get_mut(&cid) else {
            return;
        };
        if slot.info.primary {
            return;
        }
        slot.info.primary = true;
        self.primary_count += 1;
        if !self.restarting {
            self.sync
                .shared
                .primary_registered
                .fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn hold_sim(&mut self, cid: ComponentId) {
        if self.restarting {
            // Replayed constructor call; the blob state is authoritative.
            return;
        }
        let Some(slot) = self.components.get_mut(&cid) else {
            return;
        };
        if !slot.info.primary {
            tracing::warn!(
                component = %slot.info.name,
                "do_not_end_sim called without register_as_primary"
            );
        }
        if slot.info.keep_alive {
            tracing::warn!(
                component = %slot.info.name,
                "repeated do_not_end_sim without ok_to_end_sim"
            );
        }
        slot.info.keep_alive = true;
        self.exit.increment();
    }

    pub(crate) fn release_sim(&mut self, cid: ComponentId) {
        if self.restarting {
            return;
        }
        let Some(slot) = self.components.get_mut(&cid) else {
            return;
        };
        if !slot.info.keep_alive {
            tracing::warn!(
                component = %slot.info.name,
                "ok_to_end_sim without a matching do_not_end_sim"
            );
        }
        slot.info.keep_alive = false;
        let remaining = self.exit.decrement();
        if remaining <= 0 {
            self.exit.end_time = self.current_sim_cycle;
            self.sync.shared.end_candidate.offer(self.current_sim_cycle);
            self.vortex
                .insert(self.current_sim_cycle, priority::EXIT, Activity::ExitCheck);
        }
    }

    fn execute_exit_check(&mut self) {
        let shared = &self.sync.shared;
        if shared.primary_registered.load(Ordering::SeqCst) == 0 {
            return;
        }
        if !self.exit.all_threads_zero() {
            return;
        }
        // Parallel runs settle the end time at the next sync point, where
        // every partition is at the same instant; ending here would break
        // the barrier alignment.
        if self.sync.shared.nthreads > 1 || self.num_ranks.rank > 1 {
            return;
        }
        let end = shared.end_candidate.get().max(self.current_sim_cycle);
        shared.end_cycle.fetch_max(end, Ordering::SeqCst);
        shared.end_flag.store(true, Ordering::SeqCst);
        self.end_sim = true;
        self.end_sim_cycle = shared.end_cycle.load(Ordering::SeqCst);
        tracing::info!(
            target: "lifecycle",
            end = self.end_sim_cycle,
            "all primary components released; ending simulation"
        );
    }

    // ------------------------------------------------------------------
    // Sync points
    // ------------------------------------------------------------------

    fn pack_wire_events(events: &mut Vec<WireEvent>) -> Vec<u8> {
        let mut sizer = Serializer::sizer();
        events.persist(&mut sizer);
        let mut packer = Serializer::packer(sizer.size());
        events.persist(&mut packer);
        packer.into_buffer()
    }

    fn unpack_wire<T: Persist + Default>(bytes: Vec<u8>) -> Result<Vec<T>, SimError> {
        let mut unpacker = Serializer::unpacker(bytes);
        let mut out: Vec<T> = Vec::new();
        out.persist(&mut unpacker);
        if unpacker.truncated() {
            return Err(SimError::Sync(SyncError::Transport(
                "malformed sync packet".to_string(),
            )));
        }
        Ok(out)
    }

    fn execute_sync_point(&mut self, _next: CoreTime) -> Result<(), SimError> {
        let shared = self.sync.shared.clone();

        // Stage this partition's cross-rank sends for the exchange.
        if !self.rank_outbox.is_empty() {
            shared
                .rank_stage
                .lock()
                .expect("rank stage poisoned")
                .append(&mut self.rank_outbox);
        }
        shared.barrier.wait();

        if self.my_rank.thread == 0 {
            self.rank_exchange_timed()?;
        }
        shared.barrier.wait();

        self.drain_event_inbox()?;

        if shared.end_flag.load(Ordering::SeqCst) {
            self.end_sim = true;
            self.end_sim_cycle = shared
                .end_cycle
                .load(Ordering::SeqCst)
                .max(self.current_sim_cycle);
        }

        // Next horizon.
        let horizon = self.sync.min_part.min(self.sync.inter_thread_min);
        if horizon != TIME_MAX && !self.end_sim {
            let t = checked_add(self.current_sim_cycle, horizon)?;
            self.vortex
                .insert(t, priority::RANK_SYNC, Activity::SyncPoint { next: t });
        }
        self.stats.sync_exchanges += 1;
        metrics::counter!("parsim_sync_points_total").increment(1);
        Ok(())
    }

    /// Thread 0: drive the cross-rank exchange and the global exit
    /// reduction.
    fn rank_exchange_timed(&mut self) -> Result<(), SimError> {
        let shared = self.sync.shared.clone();
        let staged: Vec<(RankId, WireEvent)> = std::mem::take(
            &mut *shared.rank_stage.lock().expect("rank stage poisoned"),
        );

        if let Some(transport) = self.transport.as_mut() {
            let mut by_rank: BTreeMap<RankId, Vec<WireEvent>> = BTreeMap::new();
            for (rank, ev) in staged {
                by_rank.entry(rank).or_default().push(ev);
            }
            let out: Vec<(RankId, Vec<u8>)> = by_rank
                .iter_mut()
                .map(|(rank, events)| (*rank, Self::pack_wire_events(events)))
                .collect();
            let received = transport.exchange(out).map_err(SimError::Sync)?;
            for (_, bytes) in received {
                for ev in Self::unpack_wire::<WireEvent>(bytes)? {
                    let thread = self.sync.thread_of(&ev.sync_name).ok_or_else(|| {
                        SimError::Sync(SyncError::UnknownSyncLink(ev.sync_name.clone()))
                    })?;
                    shared.inboxes[thread as usize]
                        .lock()
                        .expect("sync inbox poisoned")
                        .push(ev);
                }
            }

            // Global exit settlement: once every partition's refcount is
            // zero (and someone did register), the end time is the max.
            let local_live = self.exit.process_count().max(0) as u64;
            let live = transport.allreduce_sum(local_live).map_err(SimError::Sync)?;
            let registered = transport
                .allreduce_sum(shared.primary_registered.load(Ordering::SeqCst))
                .map_err(SimError::Sync)?;
            if registered > 0 && live == 0 && !shared.end_flag.load(Ordering::SeqCst) {
                let candidate = shared.end_candidate.get().max(self.current_sim_cycle);
                let end = transport.allreduce_max(candidate).map_err(SimError::Sync)?;
                shared.end_cycle.fetch_max(end, Ordering::SeqCst);
                shared.end_flag.store(true, Ordering::SeqCst);
            }
        } else {
            if !staged.is_empty() {
                return Err(SimError::Sync(SyncError::Transport(
                    "cross-rank events staged with no transport".to_string(),
                )));
            }
            // Single rank, multiple threads: settle the exit here, where
            // every thread is parked at the same sync instant.
            let registered = shared.primary_registered.load(Ordering::SeqCst);
            if registered > 0
                && self.exit.all_threads_zero()
                && !shared.end_flag.load(Ordering::SeqCst)
            {
                let end = shared.end_candidate.get().max(self.current_sim_cycle);
                shared.end_cycle.fetch_max(end, Ordering::SeqCst);
                shared.end_flag.store(true, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    /// Moves received events from this thread's inbox into the vortex at
    /// their stamped times.
    pub(crate) fn drain_event_inbox(&mut self) -> Result<(), SimError> {
        let thread = self.my_rank.thread as usize;
        let mut inbox: Vec<WireEvent> = std::mem::take(
            &mut *self.sync.shared.inboxes[thread]
                .lock()
                .expect("sync inbox poisoned"),
        );
        // Stable order regardless of arrival interleaving.
        inbox.sort_by(|a, b| {
            (a.time, a.priority, a.sync_name.as_str()).cmp(&(b.time, b.priority, b.sync_name.as_str()))
        });
        for ev in inbox {
            let link = self.sync.resolve_local(&ev.sync_name).ok_or_else(|| {
                SimError::Sync(SyncError::UnknownSyncLink(ev.sync_name.clone()))
            })?;
            let l = self.links.get(link)?;
            let envelope = EventEnvelope {
                delivery_time: ev.time,
                handler: l.delivery_info,
                recv_link: link,
                link_tag: l.tag,
                payload: ev.payload,
            };
            self.vortex
                .insert(ev.time, ev.priority, Activity::Event(envelope));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Untimed phases (init / complete)
    // ------------------------------------------------------------------

    fn untimed_rounds(
        &mut self,
        phase_fn: fn(&mut dyn Component, u64, &mut dyn CoreCtx),
    ) -> Result<(), SimError> {
        let shared = self.sync.shared.clone();
        self.untimed_phase = 0;
        loop {
            shared.barrier.wait();
            if self.my_rank.thread == 0 {
                shared.untimed_local.store(0, Ordering::SeqCst);
            }
            shared.barrier.wait();

            let phase = self.untimed_phase;
            let ids: Vec<ComponentId> = self.components.keys().copied().collect();
            for cid in ids {
                self.with_component(cid, |c, ctx| phase_fn(c, phase, ctx));
            }

            // Stage cross-rank untimed data, then let thread 0 run the
            // exchange and the zero-message reduction.
            if !self.rank_untimed_outbox.is_empty() {
                shared
                    .rank_untimed_stage
                    .lock()
                    .expect("untimed stage poisoned")
                    .append(&mut self.rank_untimed_outbox);
            }
            shared.barrier.wait();
            if self.my_rank.thread == 0 {
                self.rank_exchange_untimed()?;
            }
            shared.barrier.wait();
            self.drain_untimed_inbox()?;
            shared.barrier.wait();

            let total = shared.untimed_total.load(Ordering::SeqCst);
            self.untimed_phase += 1;
            if total == 0 {
                return Ok(());
            }
        }
    }

    fn rank_exchange_untimed(&mut self) -> Result<(), SimError> {
        let shared = self.sync.shared.clone();
        let staged: Vec<(RankId, WireUntimed)> = std::mem::take(
            &mut *shared
                .rank_untimed_stage
                .lock()
                .expect("untimed stage poisoned"),
        );
        let local = shared.untimed_local.load(Ordering::SeqCst);
        let total = if let Some(transport) = self.transport.as_mut() {
            let mut by_rank: BTreeMap<RankId, Vec<WireUntimed>> = BTreeMap::new();
            for (rank, item) in staged {
                by_rank.entry(rank).or_default().push(item);
            }
            let out: Vec<(RankId, Vec<u8>)> = by_rank
                .iter_mut()
                .map(|(rank, items)| {
                    let mut sizer = Serializer::sizer();
                    items.persist(&mut sizer);
                    let mut packer = Serializer::packer(sizer.size());
                    items.persist(&mut packer);
                    (*rank, packer.into_buffer())
                })
                .collect();
            let received = transport.exchange(out).map_err(SimError::Sync)?;
            for (_, bytes) in received {
                for item in Self::unpack_wire::<WireUntimed>(bytes)? {
                    let thread = self.sync.thread_of(&item.sync_name).ok_or_else(|| {
                        SimError::Sync(SyncError::UnknownSyncLink(item.sync_name.clone()))
                    })?;
                    shared.untimed_inboxes[thread as usize]
                        .lock()
                        .expect("untimed inbox poisoned")
                        .push(item);
                }
            }
            transport.allreduce_sum(local).map_err(SimError::Sync)?
        } else {
            local
        };
        shared.untimed_total.store(total, Ordering::SeqCst);
        Ok(())
    }

    fn drain_untimed_inbox(&mut self) -> Result<(), SimError> {
        let thread = self.my_rank.thread as usize;
        let mut inbox: Vec<WireUntimed> = std::mem::take(
            &mut *self.sync.shared.untimed_inboxes[thread]
                .lock()
                .expect("untimed inbox poisoned"),
        );
        inbox.sort_by(|a, b| {
            (a.phase, a.sync_name.as_str()).cmp(&(b.phase, b.sync_name.as_str()))
        });
        for item in inbox {
            let link = self.sync.resolve_local(&item.sync_name).ok_or_else(|| {
                SimError::Sync(SyncError::UnknownSyncLink(item.sync_name.clone()))
            })?;
            self.links
                .get_mut(link)?
                .untimed
                .push_back(crate::link::UntimedItem {
                    phase: item.phase,
                    payload: item.payload,
                });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Heartbeat / status / checkpoint activities
    // ------------------------------------------------------------------

    fn execute_heartbeat(&mut self) {
        self.heartbeat.beats += 1;
        tracing::info!(
            target: "heartbeat",
            partition = %self.partition_label(),
            sim_time = %self.timelord.format_time(self.current_sim_cycle),
            wall = ?self.realtime.elapsed(),
            depth = self.vortex.current_depth(),
            max_depth = self.vortex.max_depth(),
            "heartbeat"
        );
        if self.heartbeat.sim_period > 0 {
            let next = self.current_sim_cycle.saturating_add(self.heartbeat.sim_period);
            if next != TIME_MAX {
                self.vortex
                    .insert(next, priority::HEARTBEAT, Activity::Heartbeat { next });
            }
        }
    }

    fn print_status(&self) {
        tracing::info!(
            target: "status",
            partition = %self.partition_label(),
            sim_time = %self.timelord.format_time(self.current_sim_cycle),
            components = self.components.len(),
            depth = self.vortex.current_depth(),
            activities = self.stats.activities_popped,
            events = self.stats.events_delivered,
            "status"
        );
    }

    fn execute_checkpoint(&mut self) -> Result<(), SimError> {
        // The next checkpoint activity goes in before the write so the
        // blob carries it and a restarted run keeps checkpointing.
        if self.checkpoint_sim_period > 0 {
            let next = checked_add(self.current_sim_cycle, self.checkpoint_sim_period)?;
            self.vortex
                .insert(next, priority::CHECKPOINT, Activity::Checkpoint { next });
        }
        checkpoint::write_checkpoint(self)?;
        self.stats.checkpoints_written += 1;
        metrics::counter!("parsim_checkpoints_total").increment(1);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Untimed initialization rounds. Loops until a whole round moves no
    /// untimed data anywhere in the job.
    pub fn init(&mut self) -> Result<(), SimError> {
        tracing::debug!(target: "lifecycle", partition = %self.partition_label(), "init phase");
        self.run_mode = RunMode::Init;
        for (_, link) in self.links.iter_mut() {
            link.mode = LinkMode::Init;
        }
        self.untimed_rounds(|c, phase, ctx| c.init_phase(phase, ctx))
    }

    /// One-time setup between init and run: components' `setup`, link
    /// modes to Run, and the initial control activities.
    pub fn setup(&mut self) -> Result<(), SimError> {
        let shared = self.sync.shared.clone();
        shared.barrier.wait();
        tracing::debug!(target: "lifecycle", partition = %self.partition_label(), "setup phase");

        // A restarted partition already ran setup in its first life; the
        // component callbacks and control seeding must not replay.
        let replay = self.restarting;
        if !replay {
            let ids: Vec<ComponentId> = self.components.keys().copied().collect();
            for cid in ids {
                self.with_component(cid, |c, ctx| c.setup(ctx));
            }
        }

        for (_, link) in self.links.iter_mut() {
            link.mode = LinkMode::Run;
        }
        self.run_mode = RunMode::Run;

        if !replay {
            self.seed_control_activities()?;
        }
        self.restarting = false;

        shared.barrier.wait();
        self.realtime.begin();
        Ok(())
    }

    fn seed_control_activities(&mut self) -> Result<(), SimError> {
        // Sentinel: the queue is never empty during a normal run.
        self.vortex.insert(
            TIME_MAX,
            priority::STOP,
            Activity::Stop {
                message: Some("event queue exhausted".to_string()),
            },
        );

        if let Some(stop_at) = self.config.stop_at.clone() {
            let time = self.timelord.sim_cycles(&stop_at)?;
            self.vortex
                .insert(time, priority::STOP, Activity::Stop { message: None });
        }

        if let Some(period) = self.config.heartbeat_sim_period.clone() {
            let ticks = self.timelord.sim_cycles(&period)?;
            self.heartbeat.sim_period = ticks;
            if ticks > 0 {
                self.vortex
                    .insert(ticks, priority::HEARTBEAT, Activity::Heartbeat { next: ticks });
            }
        }
        if let Some(wall) = self.config.heartbeat_wall_period.clone() {
            self.heartbeat.wall_period_secs =
                parsim_types::config::parse_wall_time(&wall)?.as_secs();
        }

        if let Some(period) = self.config.checkpoint_sim_period.clone() {
            let ticks = self.timelord.sim_cycles(&period)?;
            self.checkpoint_sim_period = ticks;
            if ticks > 0 {
                self.vortex
                    .insert(ticks, priority::CHECKPOINT, Activity::Checkpoint { next: ticks });
            }
        }

        if let Some(start) = self.config.interactive_start.clone() {
            if self.config.interactive_console.is_none() {
                return Err(SimError::Phase(
                    "--interactive-start given without --interactive-console".to_string(),
                ));
            }
            let time = self.timelord.sim_cycles(&start)?;
            self.vortex.insert(
                time,
                priority::INTERACTIVE,
                Activity::Interactive {
                    reason: format!("interactive start at {start}"),
                },
            );
        }

        let horizon = self.sync.min_part.min(self.sync.inter_thread_min);
        if horizon != TIME_MAX {
            self.vortex.insert(
                horizon,
                priority::RANK_SYNC,
                Activity::SyncPoint { next: horizon },
            );
        }
        Ok(())
    }

    /// The main run loop.
    pub fn run(&mut self) -> Result<(), SimError> {
        tracing::debug!(target: "lifecycle", partition = %self.partition_label(), "run phase");
        // The offending activity still executes; the fault aborts the
        // loop on the following iteration.
        let mut time_fault = None;

        while !self.end_sim && time_fault.is_none() {
            let Some(popped) = self.vortex.pop() else {
                // Only reachable when the sentinel was consumed.
                self.end_sim = true;
                break;
            };
            if popped.time < self.current_sim_cycle {
                time_fault = Some(SimError::TimeFault {
                    event_time: popped.time,
                    current: self.current_sim_cycle,
                });
            }
            self.current_sim_cycle = popped.time;
            self.current_priority = popped.priority;
            self.stats.activities_popped += 1;
            self.execute_activity(popped)?;

            let flags = self.realtime.poll();
            if flags != 0 {
                self.handle_rt_flags(flags)?;
            }
        }

        if let Some(fault) = time_fault {
            return Err(fault);
        }

        self.sync.shared.barrier.wait();
        tracing::info!(
            target: "lifecycle",
            partition = %self.partition_label(),
            sim_time = %self.timelord.format_time(self.end_sim_cycle),
            activities = self.stats.activities_popped,
            "run loop finished"
        );
        Ok(())
    }

    fn execute_activity(&mut self, popped: Scheduled) -> Result<(), SimError> {
        match popped.activity {
            Activity::Event(ev) => self.deliver_event(ev)?,
            Activity::ClockTick { period_factor } => {
                self.execute_clock_tick(period_factor, popped.priority)
            }
            Activity::OneShotFire { delay_factor } => {
                self.execute_oneshot(delay_factor, popped.priority)
            }
            Activity::Stop { message } => {
                if let Some(message) = message {
                    tracing::info!(target: "lifecycle", %message, "stop");
                }
                self.end_sim = true;
                self.end_sim_cycle = self.current_sim_cycle;
                self.exit.end_time = self.current_sim_cycle;
            }
            Activity::Checkpoint { .. } => self.execute_checkpoint()?,
            Activity::Interactive { reason } => {
                // The console itself is an external tool; without one the
                // activity degrades to a log line.
                tracing::info!(target: "interactive", %reason, "interactive point reached");
            }
            Activity::SyncPoint { next } => self.execute_sync_point(next)?,
            Activity::Heartbeat { .. } => self.execute_heartbeat(),
            Activity::ExitCheck => self.execute_exit_check(),
        }
        Ok(())
    }

    fn handle_rt_flags(&mut self, flags: u32) -> Result<(), SimError> {
        if flags & realtime::FLAG_EMERGENCY != 0 {
            self.emergency_shutdown();
            return Ok(());
        }
        if flags & realtime::FLAG_CLEAN_EXIT != 0 {
            tracing::info!(target: "lifecycle", "wall-clock limit reached; clean exit");
            self.shutdown_mode = ShutdownMode::Signal;
            if self.sync.shared.nthreads == 1 && self.num_ranks.rank <= 1 {
                self.end_sim = true;
                self.end_sim_cycle = self.current_sim_cycle;
            } else {
                // Parallel runs end together at the next sync point.
                let shared = &self.sync.shared;
                shared
                    .end_cycle
                    .fetch_max(self.current_sim_cycle, Ordering::SeqCst);
                shared.end_flag.store(true, Ordering::SeqCst);
            }
        }
        if flags & realtime::FLAG_CHECKPOINT != 0 {
            if self.sync.shared.nthreads == 1 && self.num_ranks.rank <= 1 {
                self.execute_checkpoint()?;
            } else {
                tracing::warn!(
                    "wall-clock checkpoint requested on a parallel run; use \
                     --checkpoint-sim-period instead"
                );
            }
        }
        if flags & realtime::FLAG_HEARTBEAT != 0 {
            self.execute_heartbeat();
        }
        if flags & realtime::FLAG_STATUS != 0 {
            self.print_status();
        }
        if flags & realtime::FLAG_INTERACTIVE != 0 {
            tracing::info!(target: "interactive", "interactive signal received");
        }
        Ok(())
    }

    /// SIGINT/SIGTERM path: abort the run, giving every component its
    /// emergency callback.
    pub fn emergency_shutdown(&mut self) {
        self.shutdown_mode = ShutdownMode::Emergency;
        self.end_sim = true;
        self.end_sim_cycle = self.current_sim_cycle;
        let ids: Vec<ComponentId> = self.components.keys().copied().collect();
        for cid in ids {
            if let Some(slot) = self.components.get_mut(&cid) {
                if let Some(instance) = slot.instance.as_mut() {
                    instance.emergency_shutdown();
                }
            }
        }
        tracing::error!(
            target: "lifecycle",
            partition = %self.partition_label(),
            "emergency shutdown"
        );
    }

    /// Untimed completion rounds after the run loop.
    pub fn complete(&mut self) -> Result<(), SimError> {
        tracing::debug!(target: "lifecycle", partition = %self.partition_label(), "complete phase");
        self.run_mode = RunMode::Complete;
        for (_, link) in self.links.iter_mut() {
            link.mode = LinkMode::Complete;
        }
        self.untimed_rounds(|c, phase, ctx| c.complete_phase(phase, ctx))
    }

    /// Final callbacks and reporting.
    pub fn finish(&mut self) -> Result<(), SimError> {
        let shared = self.sync.shared.clone();
        shared.barrier.wait();
        tracing::debug!(target: "lifecycle", partition = %self.partition_label(), "finish phase");

        let ids: Vec<ComponentId> = self.components.keys().copied().collect();
        for cid in ids {
            self.with_component(cid, |c, ctx| c.finish(ctx));
        }

        for (_, link) in self.links.iter() {
            for tool in link.send_tools.iter().chain(link.recv_tools.iter()) {
                if let Some(line) = tool.report() {
                    tracing::info!(target: "profiling", %line, "attach point report");
                }
            }
        }

        self.realtime.shutdown();
        shared.barrier.wait();
        Ok(())
    }

    /// The whole lifecycle in order.
    pub fn execute(&mut self) -> Result<(), SimError> {
        self.init()?;
        self.setup()?;
        self.run()?;
        self.complete()?;
        self.finish()
    }

    /// Resumes a restored partition: restart skips init (untimed state
    /// was consumed before the checkpoint) and goes straight to setup.
    pub fn execute_from_restart(&mut self) -> Result<(), SimError> {
        self.setup()?;
        self.run()?;
        self.complete()?;
        self.finish()
    }

    /// Formats and aborts on a fatal contract violation, with the
    /// partition identity attached.
    pub(crate) fn fatal(&self, err: SimError) -> ! {
        tracing::error!(
            target: "fatal",
            partition = %self.partition_label(),
            error = %err,
            "fatal contract violation"
        );
        panic!("parsim fatal {}: {err}", self.partition_label());
    }
}

// ----------------------------------------------------------------------
// The component-facing context
// ----------------------------------------------------------------------

/// Mutable view of the partition handed to a component during any of its
/// callbacks.
pub struct EngineCtx<'a> {
    pub(crate) sim: &'a mut Sim,
    pub(crate) cid: ComponentId,
}

impl CoreCtx for EngineCtx<'_> {
    fn component_id(&self) -> ComponentId {
        self.cid
    }

    fn now(&self) -> CoreTime {
        self.sim.current_sim_cycle
    }

    fn sim_cycles(&self, time: &str) -> Result<CoreTime, SimError> {
        self.sim.timelord.sim_cycles(time)
    }

    fn configure_link(
        &mut self,
        port: &str,
        time_base: &str,
        tag: PortTag,
    ) -> Result<LinkId, SimError> {
        self.sim
            .configure_link_impl(self.cid, port, time_base, Some(tag))
    }

    fn configure_polling_link(&mut self, port: &str, time_base: &str) -> Result<LinkId, SimError> {
        self.sim.configure_link_impl(self.cid, port, time_base, None)
    }

    fn configure_self_link(
        &mut self,
        name: &str,
        time_base: &str,
        latency: &str,
        tag: PortTag,
    ) -> Result<LinkId, SimError> {
        let factor = self.sim.timelord.converter(time_base)?.factor();
        let latency_core = self.sim.timelord.sim_cycles(latency)?;
        let existing = self
            .sim
            .components
            .get(&self.cid)
            .and_then(|s| s.info.link_map.get(name));
        if let Some(link) = existing {
            if !self.sim.restarting {
                // A self link under a name that is already connected is a
                // wire-up error, matching the duplicate-port rule.
                return Err(SimError::WireUp(format!(
                    "duplicate self-link name '{name}'"
                )));
            }
            // Restart replay: the restored arena already holds this self
            // link; rebind the handler onto it.
            let handler = self
                .sim
                .handlers
                .register(self.cid, HandlerKind::Event { port: tag });
            self.sim.links.get_mut(link)?.delivery_info = Some(handler);
            return Ok(link);
        }
        let link = self.sim.links.create_self_link(self.sim.links.len() as u64);
        let handler = self
            .sim
            .handlers
            .register(self.cid, HandlerKind::Event { port: tag });
        {
            let l = self.sim.links.get_mut(link)?;
            l.kind = LinkKind::Handler;
            l.delivery_info = Some(handler);
            l.default_tb = factor;
            l.latency = latency_core;
            l.target = SendTarget::Vortex;
            l.owner = self.cid;
        }
        if let Some(slot) = self.sim.components.get_mut(&self.cid) {
            slot.info.link_map.insert(name, link)?;
        }
        Ok(link)
    }

    fn send(
        &mut self,
        link: LinkId,
        delay: Cycle,
        payload: Option<Bytes>,
    ) -> Result<(), SimError> {
        self.sim.send_on_link(link, delay, payload)
    }

    fn recv(&mut self, link: LinkId) -> Result<Option<Bytes>, SimError> {
        self.sim.recv_on_link(link)
    }

    fn send_untimed(&mut self, link: LinkId, payload: Bytes) -> Result<(), SimError> {
        self.sim.send_untimed_on_link(link, payload)
    }

    fn recv_untimed(&mut self, link: LinkId) -> Option<Bytes> {
        self.sim
            .links
            .get_mut(link)
            .ok()
            .and_then(|l| l.untimed.pop_front())
            .map(|item| item.payload)
    }

    fn register_clock(
        &mut self,
        freq: &str,
        tag: ClockTag,
        prio: Priority,
    ) -> Result<TimeConverter, SimError> {
        self.sim.register_clock_handler(self.cid, freq, tag, prio)
    }

    fn unregister_clock(&mut self, period_factor: CoreTime, tag: ClockTag, prio: Priority) {
        let key = (period_factor, prio);
        if let Some(clock) = self.sim.clocks.get_mut(&key) {
            if let Some(handler) = clock.unregister(self.cid, tag) {
                self.sim.handlers.retire(handler);
            }
        }
    }

    fn next_clock_cycle(&mut self, period_factor: CoreTime, prio: Priority) -> Cycle {
        let now = self.sim.current_sim_cycle;
        match self.sim.clocks.get_mut(&(period_factor, prio)) {
            Some(clock) => clock.next_cycle(now),
            None => now / period_factor.max(1) + 1,
        }
    }

    fn register_oneshot(
        &mut self,
        delay: &str,
        tag: ClockTag,
        prio: Priority,
    ) -> Result<(), SimError> {
        self.sim.register_oneshot_handler(self.cid, delay, tag, prio)
    }

    fn create_subcomponent(
        &mut self,
        slot_name: &str,
        type_name: &str,
        params: &Params,
        share_ports: bool,
    ) -> Result<ComponentId, SimError> {
        let parent = self.cid;
        let parent_name = self
            .sim
            .components
            .get(&parent)
            .map(|s| s.info.name.clone())
            .ok_or_else(|| SimError::WireUp(format!("component {parent} does not exist")))?;
        let child_name = format!("{parent_name}:{slot_name}");

        // Restart replay: the subcomponent already exists; only the
        // instance needs constructing.
        if let Some(&existing) = self.sim.names.get(&child_name) {
            if self
                .sim
                .components
                .get(&existing)
                .is_some_and(|s| s.instance.is_none())
            {
                self.sim.construct_component(existing)?;
            }
            return Ok(existing);
        }

        let (child_id, rank, default_tb) = {
            let parent_slot = self
                .sim
                .components
                .get_mut(&parent)
                .expect("component vanished");
            let id = parent_slot.info.allocate_subcomponent_id();
            parent_slot.info.add_child(id);
            (id, parent_slot.info.rank, parent_slot.info.default_tb)
        };
        let mut info =
            crate::component::ComponentInfo::new(child_id, &child_name, type_name, rank);
        info.parent = Some(parent);
        info.share_ports = share_ports;
        info.default_tb = default_tb;
        info.params = params.clone();
        self.sim.names.insert(child_name, child_id);
        self.sim
            .components
            .insert(child_id, ComponentSlot::new(info));
        self.sim.construct_component(child_id)?;
        Ok(child_id)
    }

    fn register_as_primary(&mut self) {
        self.sim.note_primary(self.cid);
    }

    fn do_not_end_sim(&mut self) {
        self.sim.hold_sim(self.cid);
    }

    fn ok_to_end_sim(&mut self) {
        self.sim.release_sim(self.cid);
    }

    fn log_kv(&mut self, key: &'static str, val: &str) {
        let name = self
            .sim
            .components
            .get(&self.cid)
            .map(|s| s.info.name.clone())
            .unwrap_or_default();
        tracing::info!(target: "component", component = %name, key, value = val, "kv");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SimBuilder;
    use parsim_model::components::DEMO_LIBRARY;
    use parsim_model::factory::Factory;

    fn counter_sim(stop_at: &str) -> Sim {
        let factory = Arc::new(Factory::new(""));
        factory.register_library(&DEMO_LIBRARY);
        factory.load_library("demo").unwrap();
        let config = RunConfig {
            stop_at: Some(stop_at.to_string()),
            ..RunConfig::default()
        };
        let mut builder = SimBuilder::new(config, factory);
        let mut params = Params::new();
        params.insert("frequency", "1GHz");
        builder.add_component("counter", "demo.TickCounter", params);
        builder.build().unwrap()
    }

    #[test]
    fn time_going_backward_faults_after_executing() {
        let mut sim = counter_sim("1us");
        sim.init().unwrap();
        sim.setup().unwrap();
        // Force the clock past an already-queued activity.
        sim.current_sim_cycle = 10_000;
        sim.vortex.insert(500, priority::EVENT, Activity::ExitCheck);
        let popped_before = sim.stats.activities_popped;
        let err = sim.run().unwrap_err();
        assert!(matches!(err, SimError::TimeFault { event_time: 500, .. }));
        // The offending activity was executed before the abort.
        assert_eq!(sim.stats.activities_popped, popped_before + 1);
    }

    #[test]
    fn late_clock_registration_at_boundary_fires_immediately() {
        let mut sim = counter_sim("1us");
        sim.init().unwrap();
        sim.setup().unwrap();
        // Simulate being mid-activity at an exact 1 ns boundary with a
        // priority ahead of the clock.
        sim.current_sim_cycle = 5_000;
        sim.current_priority = priority::EVENT;
        let cid = sim.component_id("counter").unwrap();
        sim.register_clock_handler(cid, "1GHz", 7, priority::CLOCK + 1)
            .unwrap();
        let clock = sim.clocks.get(&(1_000, priority::CLOCK + 1)).unwrap();
        assert_eq!(clock.next, 5_000);
        // Off a boundary, the same registration waits for the next cycle.
        sim.current_sim_cycle = 5_500;
        sim.register_clock_handler(cid, "1GHz", 8, priority::CLOCK + 2)
            .unwrap();
        let clock = sim.clocks.get(&(1_000, priority::CLOCK + 2)).unwrap();
        assert_eq!(clock.next, 6_000);
    }

    #[test]
    fn send_outside_run_mode_is_a_phase_error() {
        let mut sim = counter_sim("1us");
        // Still in Init mode; a timed send must be refused.
        let link = sim.links.create_self_link(99);
        sim.links.get_mut(link).unwrap().kind = LinkKind::Handler;
        let err = sim.send_on_link(link, 0, None).unwrap_err();
        assert!(matches!(err, SimError::Phase(_)));
    }
}
