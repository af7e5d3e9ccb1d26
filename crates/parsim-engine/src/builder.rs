//! # parsim-engine::builder
//!
//! Programmatic wire-up: declares components and links, then builds the
//! per-partition `Sim` instances. This is the seam where a configuration
//! front end would hand the core its graph; the core itself only sees
//! the finished declarations.
//!
//! Placement: each component declaration names its `(rank, thread)`.
//! Links whose ends land on different partitions become sync-link pairs
//! registered under a globally-unique name derived from the two
//! partition identities and the link's tag, so both sides re-attach by
//! name after an exchange or a restart.

use crate::component::{ComponentInfo, ComponentSlot};
use crate::exit::Exit;
use crate::handler::HandlerArena;
use crate::link::{EventCountTool, LinkArena, LinkKind, SendTarget};
use crate::linkmap::port_matches;
use crate::realtime::RealTimeManager;
use crate::sim::{RunMode, Sim, SimStats, ShutdownMode};
use crate::sync::transport::RankTransport;
use crate::sync::{SyncManager, SyncShared};
use crate::timelord::TimeLord;
use crate::timevortex::TimeVortex;
use fxhash::FxHashMap;
use parsim_model::factory::Factory;
use parsim_model::params::Params;
use parsim_types::config::{parse_profiling, RunConfig};
use parsim_types::errors::SimError;
use parsim_types::ids::{ComponentId, RankInfo, ThreadId};
use parsim_types::time::TIME_MAX;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One end of a declared link.
#[derive(Debug, Clone)]
pub struct LinkEnd {
    pub component: String,
    pub port: String,
    pub latency: String,
}

impl LinkEnd {
    pub fn new(component: &str, port: &str, latency: &str) -> Self {
        Self {
            component: component.to_string(),
            port: port.to_string(),
            latency: latency.to_string(),
        }
    }
}

struct ComponentDecl {
    name: String,
    type_name: String,
    params: Params,
    rank: RankInfo,
}

struct LinkDecl {
    name: String,
    ends: [LinkEnd; 2],
}

pub struct SimBuilder {
    config: RunConfig,
    factory: Arc<Factory>,
    components: Vec<ComponentDecl>,
    links: Vec<LinkDecl>,
}

impl SimBuilder {
    pub fn new(config: RunConfig, factory: Arc<Factory>) -> Self {
        Self {
            config,
            factory,
            components: Vec::new(),
            links: Vec::new(),
        }
    }

    /// Declares a component on partition (0,0).
    pub fn add_component(&mut self, name: &str, type_name: &str, params: Params) -> &mut Self {
        self.add_component_on(name, type_name, params, RankInfo::new(0, 0))
    }

    /// Declares a component on an explicit partition.
    pub fn add_component_on(
        &mut self,
        name: &str,
        type_name: &str,
        params: Params,
        rank: RankInfo,
    ) -> &mut Self {
        self.components.push(ComponentDecl {
            name: name.to_string(),
            type_name: type_name.to_string(),
            params,
            rank,
        });
        self
    }

    /// Declares a link between two component ports. The name must be
    /// unique; it seeds the sync-pair name if the link ends up crossing
    /// partitions.
    pub fn link(&mut self, name: &str, a: LinkEnd, b: LinkEnd) -> &mut Self {
        self.links.push(LinkDecl {
            name: name.to_string(),
            ends: [a, b],
        });
        self
    }

    /// Builds the single partition of a serial job.
    pub fn build(self) -> Result<Sim, SimError> {
        let mut sims = self.build_partitions(None, 1, 0, 1)?;
        Ok(sims.remove(0))
    }

    /// Builds all thread partitions of a single-rank process.
    pub fn build_threads(self, nthreads: u32) -> Result<Vec<Sim>, SimError> {
        self.build_partitions(None, nthreads, 0, 1)
    }

    /// Builds this process's thread partitions of a multi-rank job. The
    /// transport identifies the local rank; thread 0 takes ownership of
    /// it.
    pub fn build_rank(
        self,
        transport: Box<dyn RankTransport>,
        nthreads: u32,
    ) -> Result<Vec<Sim>, SimError> {
        let my_rank = transport.my_rank();
        let num_ranks = transport.num_ranks();
        self.build_partitions(Some(transport), nthreads, my_rank, num_ranks)
    }

    fn validate(&self) -> Result<(), SimError> {
        let mut names = std::collections::BTreeSet::new();
        for decl in &self.components {
            if !names.insert(decl.name.as_str()) {
                return Err(SimError::WireUp(format!(
                    "duplicate component name '{}'",
                    decl.name
                )));
            }
        }
        let mut link_names = std::collections::BTreeSet::new();
        for link in &self.links {
            if !link_names.insert(link.name.as_str()) {
                return Err(SimError::WireUp(format!(
                    "duplicate link name '{}'",
                    link.name
                )));
            }
            for end in &link.ends {
                if !names.contains(end.component.as_str()) {
                    return Err(SimError::WireUp(format!(
                        "link '{}' references unknown component '{}'",
                        link.name, end.component
                    )));
                }
            }
        }
        Ok(())
    }

    fn build_partitions(
        self,
        transport: Option<Box<dyn RankTransport>>,
        nthreads: u32,
        my_process_rank: u32,
        num_ranks: u32,
    ) -> Result<Vec<Sim>, SimError> {
        self.validate()?;
        let timelord = Arc::new(TimeLord::new(&self.config.timebase)?);
        let shared = SyncShared::new(nthreads as usize);

        let mut sims: Vec<Sim> = (0..nthreads)
            .map(|thread| {
                Ok(Sim {
                    num_ranks: RankInfo::new(num_ranks, nthreads),
                    my_rank: RankInfo::new(my_process_rank, thread),
                    timelord: timelord.clone(),
                    factory: self.factory.clone(),
                    config: self.config.clone(),
                    current_sim_cycle: 0,
                    current_priority: 0,
                    run_mode: RunMode::Init,
                    end_sim: false,
                    end_sim_cycle: 0,
                    untimed_phase: 0,
                    shutdown_mode: ShutdownMode::Clean,
                    vortex: TimeVortex::new(),
                    links: LinkArena::new(),
                    handlers: HandlerArena::new(),
                    components: BTreeMap::new(),
                    names: indexmap::IndexMap::new(),
                    clocks: BTreeMap::new(),
                    oneshots: BTreeMap::new(),
                    exit: Exit::new(shared.exit_counts.clone(), thread as usize),
                    primary_count: 0,
                    heartbeat: Default::default(),
                    sync: SyncManager::new(shared.clone()),
                    transport: None,
                    realtime: RealTimeManager::from_config(&self.config)?,
                    rank_outbox: Vec::new(),
                    rank_untimed_outbox: Vec::new(),
                    checkpoint_sim_period: 0,
                    checkpoint_next_id: 1,
                    restarting: false,
                    constructing: None,
                    stats: SimStats::default(),
                })
            })
            .collect::<Result<_, SimError>>()?;
        if let Some(transport) = transport {
            sims[0].transport = Some(transport);
        }

        // Component ids follow declaration order, identically on every
        // rank, so cross-rank references agree.
        let mut placement: FxHashMap<&str, (ComponentId, RankInfo)> = FxHashMap::default();
        for (index, decl) in self.components.iter().enumerate() {
            let id = index as ComponentId;
            placement.insert(decl.name.as_str(), (id, decl.rank));
            if decl.rank.rank != my_process_rank {
                continue;
            }
            let thread = decl.rank.thread;
            if thread >= nthreads {
                return Err(SimError::WireUp(format!(
                    "component '{}' placed on thread {thread} of {nthreads}",
                    decl.name
                )));
            }
            let sim = &mut sims[thread as usize];
            let mut info = ComponentInfo::new(id, &decl.name, &decl.type_name, decl.rank);
            info.params = decl.params.clone();
            sim.names.insert(decl.name.clone(), id);
            sim.components.insert(id, ComponentSlot::new(info));
        }

        // Wire the links.
        for (index, decl) in self.links.iter().enumerate() {
            let ends: Vec<(ComponentId, RankInfo, &LinkEnd)> = decl
                .ends
                .iter()
                .map(|end| {
                    let (id, rank) = placement[end.component.as_str()];
                    (id, rank, end)
                })
                .collect();
            let latencies: Vec<u64> = decl
                .ends
                .iter()
                .map(|end| timelord.sim_cycles(&end.latency))
                .collect::<Result<_, _>>()?;
            let tag_base = (index as u64) * 2;
            let link_min_latency = latencies[0].min(latencies[1]);

            for (side, &(cid, rank, end)) in ends.iter().enumerate() {
                if rank.rank != my_process_rank {
                    continue;
                }
                let other = 1 - side;
                let (_ocid, orank, _oend) = ends[other];
                let sim = &mut sims[rank.thread as usize];

                if orank == rank {
                    // Both ends on this partition: wire the full pair once,
                    // from side 0.
                    if side == 0 {
                        let (a, b) = sim.links.create_pair(tag_base, tag_base + 1);
                        {
                            let la = sim.links.get_mut(a)?;
                            la.latency = latencies[0];
                            la.target = SendTarget::Vortex;
                            la.owner = cid;
                        }
                        {
                            let lb = sim.links.get_mut(b)?;
                            lb.latency = latencies[1];
                            lb.target = SendTarget::Vortex;
                            lb.owner = ends[1].0;
                        }
                        wire_port(sim, cid, &end.port, a)?;
                        wire_port(sim, ends[1].0, &ends[1].2.port, b)?;
                    }
                } else {
                    // Partition-crossing: this side gets its real link plus
                    // a sync stub as its pair.
                    let sync_name = sync_pair_name(rank, orank, &decl.name);
                    let (local, stub) =
                        sim.links.create_pair(tag_base + side as u64, tag_base + other as u64);
                    {
                        let l = sim.links.get_mut(local)?;
                        l.latency = latencies[side];
                        l.sync_name = Some(sync_name.clone());
                        l.target = if orank.rank == rank.rank {
                            SendTarget::CrossThread(orank.thread)
                        } else {
                            SendTarget::CrossRank(orank.rank)
                        };
                        l.owner = cid;
                    }
                    {
                        let s = sim.links.get_mut(stub)?;
                        s.kind = LinkKind::Sync;
                        s.sync_name = Some(sync_name.clone());
                        s.latency = latencies[other];
                    }
                    wire_port(sim, cid, &end.port, local)?;
                    sim.sync
                        .register_link(&sync_name, local, rank.thread, link_min_latency);
                    if orank.rank == rank.rank {
                        sim.sync.note_inter_thread(link_min_latency);
                    }
                }
            }
        }

        // The sync cadence must be identical on every partition of the
        // job, so the horizon is the min over ALL partition-crossing
        // links, reduced across ranks (min via max of the complement).
        let local_min = sims
            .iter()
            .map(|s| s.sync.min_part)
            .min()
            .unwrap_or(TIME_MAX);
        let global_min = match sims[0].transport.as_mut() {
            Some(transport) => {
                TIME_MAX
                    - transport
                        .allreduce_max(TIME_MAX - local_min)
                        .map_err(SimError::Sync)?
            }
            None => local_min,
        };
        for sim in sims.iter_mut() {
            sim.sync.min_part = global_min;
        }

        // Construct the component instances, in id order per partition.
        for sim in sims.iter_mut() {
            let ids: Vec<ComponentId> = sim.components.keys().copied().collect();
            for cid in ids {
                sim.construct_component(cid)?;
            }
        }

        // Profiling attach points from the run configuration.
        if let Some(spec) = self.config.enable_profiling.clone() {
            for sim in sims.iter_mut() {
                apply_profiling(sim, &spec)?;
            }
        }

        for sim in sims.iter() {
            tracing::debug!(
                target: "lifecycle",
                rank = sim.my_rank.rank,
                thread = sim.my_rank.thread,
                components = sim.components.len(),
                links = sim.links.len(),
                min_part = if sim.sync.min_part == TIME_MAX { 0 } else { sim.sync.min_part },
                "partition built"
            );
        }
        Ok(sims)
    }
}

fn wire_port(
    sim: &mut Sim,
    cid: ComponentId,
    port: &str,
    link: parsim_types::ids::LinkId,
) -> Result<(), SimError> {
    sim.components
        .get_mut(&cid)
        .ok_or_else(|| SimError::WireUp(format!("component {cid} not on this partition")))?
        .info
        .link_map
        .insert(port, link)
}

/// The globally-unique name of a partition-crossing link pair: ordered
/// partition identities plus the link name.
fn sync_pair_name(a: RankInfo, b: RankInfo, link_name: &str) -> String {
    let (lo, hi) = if (a.rank, a.thread) <= (b.rank, b.thread) {
        (a, b)
    } else {
        (b, a)
    };
    format!("sync:{}:{}:{}", lo, hi, link_name)
}

/// Applies `--enable-profiling` specs: each point pattern is matched
/// against `component.port` names and an attach-point tool is installed
/// on every match.
fn apply_profiling(sim: &mut Sim, spec: &str) -> Result<(), SimError> {
    let specs = parse_profiling(spec).map_err(SimError::Config)?;
    for profile in specs {
        if profile.tool_type != "event_count" {
            return Err(SimError::Config(
                parsim_types::errors::ConfigError::Invalid(format!(
                    "unknown profiling tool type '{}'",
                    profile.tool_type
                )),
            ));
        }
        let mut targets: Vec<(String, parsim_types::ids::LinkId, LinkKind)> = Vec::new();
        for slot in sim.components.values() {
            for (port, link) in slot.info.link_map.iter() {
                let full = format!("{}.{}", slot.info.name, port);
                let hit = profile
                    .points
                    .iter()
                    .any(|point| point == "*" || port_matches(point, &full));
                if hit {
                    let kind = sim.links.get(link)?.kind;
                    targets.push((full, link, kind));
                }
            }
        }
        for (point, link, kind) in targets {
            let tool_name = format!("{}@{}", profile.name, point);
            sim.links
                .attach_tool(link, Box::new(EventCountTool::new(tool_name.clone())), false)?;
            if kind != LinkKind::Polling {
                sim.links
                    .attach_tool(link, Box::new(EventCountTool::new(tool_name)), true)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parsim_model::components::DEMO_LIBRARY;

    fn factory() -> Arc<Factory> {
        let factory = Arc::new(Factory::new(""));
        factory.register_library(&DEMO_LIBRARY);
        factory.load_library("demo").unwrap();
        factory
    }

    fn pingpong(config: RunConfig) -> SimBuilder {
        let mut builder = SimBuilder::new(config, factory());
        let mut starter = Params::new();
        starter.insert("starter", "true");
        builder.add_component("a", "demo.Pinger", starter);
        builder.add_component("b", "demo.Pinger", Params::new());
        builder.link(
            "ab",
            LinkEnd::new("a", "port", "5ns"),
            LinkEnd::new("b", "port", "5ns"),
        );
        builder
    }

    #[test]
    fn wiring_produces_symmetric_pairs() {
        let sim = pingpong(RunConfig::default()).build().unwrap();
        for (id, link) in sim.links.iter() {
            let pair = sim.links.get(link.pair).unwrap();
            assert_eq!(pair.pair, id);
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut builder = SimBuilder::new(RunConfig::default(), factory());
        builder.add_component("x", "demo.TickCounter", Params::new());
        builder.add_component("x", "demo.TickCounter", Params::new());
        assert!(matches!(builder.build(), Err(SimError::WireUp(_))));

        let mut builder = SimBuilder::new(RunConfig::default(), factory());
        builder.add_component("x", "demo.TickCounter", Params::new());
        builder.link(
            "loop",
            LinkEnd::new("x", "p", "1ns"),
            LinkEnd::new("ghost", "p", "1ns"),
        );
        assert!(matches!(builder.build(), Err(SimError::WireUp(_))));
    }

    #[test]
    fn profiling_spec_attaches_and_counts() {
        let config = RunConfig {
            stop_at: Some("100ns".to_string()),
            enable_profiling: Some("pp:event_count[a.port]".to_string()),
            ..RunConfig::default()
        };
        let mut sim = pingpong(config).build().unwrap();
        sim.execute().unwrap();

        let a = sim.component_id("a").unwrap();
        let link = sim
            .components
            .get(&a)
            .unwrap()
            .info
            .link_map
            .get("port")
            .unwrap();
        let link = sim.links.get(link).unwrap();
        let tool = link.send_tools.first().expect("send tool attached");
        let report = tool.report().unwrap();
        // Component a sends the seed plus one reply per delivery.
        assert!(report.contains("sends=11"), "unexpected report: {report}");
    }

    #[test]
    fn unknown_profiling_tool_is_a_config_error() {
        let config = RunConfig {
            enable_profiling: Some("x:flamegraph[*]".to_string()),
            ..RunConfig::default()
        };
        assert!(matches!(
            pingpong(config).build(),
            Err(SimError::Config(_))
        ));
    }
}

/// Runs every partition of a process to completion on its own thread and
/// hands the finished `Sim`s back (for inspection or teardown).
pub fn run_process(sims: Vec<Sim>) -> Result<Vec<Sim>, SimError> {
    if sims.len() == 1 {
        let mut sims = sims;
        sims[0].execute()?;
        return Ok(sims);
    }
    let handles: Vec<_> = sims
        .into_iter()
        .map(|mut sim| {
            std::thread::Builder::new()
                .name(format!("parsim-{}-{}", sim.my_rank().rank, sim.my_rank().thread))
                .spawn(move || -> Result<Sim, SimError> {
                    sim.execute()?;
                    Ok(sim)
                })
                .expect("failed to spawn partition thread")
        })
        .collect();
    let mut finished = Vec::new();
    for handle in handles {
        match handle.join() {
            Ok(result) => finished.push(result?),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
    Ok(finished)
}
