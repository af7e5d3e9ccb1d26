//! # parsim-engine::checkpoint
//!
//! The checkpoint/restart engine. A checkpoint is a text registry plus a
//! globals blob and one binary blob per `(rank, thread)` partition, all
//! length-prefixed little-endian records written through the four-mode
//! serializer:
//!
//! ```text
//! <prefix>_<id>.registry          header, config section, per-partition
//!                                 "** (r:t): <blob>" entries with
//!                                 "component_id : offset (name)" lines
//! <prefix>_<id>_globals.bin       one record of job-wide state
//! <prefix>_<id>_<r>_<t>.bin       A: loaded libraries
//!                                 B: partition state (vortex included)
//!                                 C: component count
//!                                 D: one record per component
//! ```
//!
//! Restart reads the registry, loads the libraries, restores partition
//! state, re-creates each ComponentInfo+instance pair through the
//! factory (constructor side effects suppressed), and finally remaps
//! in-flight handler ids through the old-arena/new-arena side table and
//! re-registers sync-link pair names.

use crate::activity::Activity;
use crate::component::{ComponentInfo, ComponentSlot};
use crate::exit::Exit;
use crate::handler::{HandlerArena, HandlerKind};
use crate::link::LinkArena;
use crate::realtime::RealTimeManager;
use crate::sim::{RunMode, ShutdownMode, Sim, SimStats};
use crate::sync::transport::RankTransport;
use crate::sync::{SyncManager, SyncShared};
use crate::timelord::TimeLord;
use crate::timevortex::{TimeVortex, VORTEX_TYPE_PQ};
use parsim_model::factory::Factory;
use parsim_model::params;
use parsim_types::config::RunConfig;
use parsim_types::errors::{CheckpointError, SimError};
use parsim_types::ids::{ComponentId, HandlerId, RankInfo, ThreadId};
use parsim_types::persist_fields;
use parsim_types::ser::{Persist, Serializer};
use parsim_types::time::{priority, TIME_MAX};
use std::collections::BTreeMap;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

// ----------------------------------------------------------------------
// Record framing
// ----------------------------------------------------------------------

fn pack_with(f: impl FnMut(&mut Serializer)) -> Vec<u8> {
    let mut f = f;
    let mut sizer = Serializer::sizer();
    f(&mut sizer);
    let mut packer = Serializer::packer(sizer.size());
    f(&mut packer);
    packer.into_buffer()
}

fn write_record(file: &mut std::fs::File, payload: &[u8]) -> Result<(), CheckpointError> {
    file.write_all(&(payload.len() as u64).to_le_bytes())?;
    file.write_all(payload)?;
    Ok(())
}

fn read_record(file: &mut std::fs::File, what: &str) -> Result<Vec<u8>, CheckpointError> {
    let mut len_raw = [0u8; 8];
    file.read_exact(&mut len_raw)
        .map_err(|_| CheckpointError::Truncated(what.to_string()))?;
    let len = u64::from_le_bytes(len_raw) as usize;
    let mut payload = vec![0u8; len];
    file.read_exact(&mut payload)
        .map_err(|_| CheckpointError::Truncated(what.to_string()))?;
    Ok(payload)
}

fn unpack_record<T: Persist>(bytes: Vec<u8>, value: &mut T, what: &str) -> Result<(), CheckpointError> {
    let mut unpacker = Serializer::unpacker(bytes);
    value.persist(&mut unpacker);
    if unpacker.truncated() {
        return Err(CheckpointError::Truncated(what.to_string()));
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Globals record
// ----------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct GlobalsRecord {
    pub num_ranks: u32,
    pub num_threads: u32,
    pub search_paths: String,
    pub timebase: String,
    pub output_directory: String,
    pub prefix: String,
    pub verbose: u32,
    pub globals_name: String,
    pub checkpoint_prefix: String,
    pub params_keys: Vec<String>,
}

impl Persist for GlobalsRecord {
    fn persist(&mut self, ser: &mut Serializer) {
        persist_fields!(
            ser,
            self.num_ranks,
            self.num_threads,
            self.search_paths,
            self.timebase,
            self.output_directory,
            self.prefix,
            self.verbose,
            self.globals_name,
            self.checkpoint_prefix,
            self.params_keys
        );
    }
}

// ----------------------------------------------------------------------
// Partition state (section B)
// ----------------------------------------------------------------------

/// One routine, four modes: sizes, writes, reads, or maps the whole
/// partition state. Field order is the schema.
fn persist_partition(sim: &mut Sim, ser: &mut Serializer) {
    ser.named("num_ranks", &mut sim.num_ranks);
    ser.named("my_rank", &mut sim.my_rank);
    ser.named("current_sim_cycle", &mut sim.current_sim_cycle);
    ser.named("current_priority", &mut sim.current_priority);
    ser.named("run_mode", &mut sim.run_mode);
    ser.named("end_sim", &mut sim.end_sim);
    ser.named("end_sim_cycle", &mut sim.end_sim_cycle);
    ser.named("untimed_phase", &mut sim.untimed_phase);
    let mut independent = sim.sync.independent();
    ser.named("independent", &mut independent);
    ser.named("sync", &mut sim.sync);
    ser.named("output_directory", &mut sim.config.output_directory);
    ser.named("realtime", &mut sim.realtime);
    ser.named("exit", &mut sim.exit);
    ser.named("primary_count", &mut sim.primary_count);
    ser.named("heartbeat", &mut sim.heartbeat);
    ser.named("checkpoint_sim_period", &mut sim.checkpoint_sim_period);
    ser.named("checkpoint_next_id", &mut sim.checkpoint_next_id);
    ser.named("clocks", &mut sim.clocks);
    ser.named("oneshots", &mut sim.oneshots);
    ser.named("handlers", &mut sim.handlers);
    ser.named("links", &mut sim.links);
    ser.named("rank_outbox", &mut sim.rank_outbox);
    ser.named("rank_untimed_outbox", &mut sim.rank_untimed_outbox);
    ser.named("vortex", &mut sim.vortex);
}

/// Walks the live partition state through Map mode, yielding the
/// introspection tree interactive tooling browses. Components appear as
/// named children with their own persisted fields.
pub fn map_partition(sim: &mut Sim) -> parsim_types::ser::ObjectMap {
    let mut mapper = Serializer::mapper();
    mapper.named("partition", &mut Mapped(sim));
    mapper.into_object_map()
}

/// Adapter so the whole partition maps through one `Persist` entry.
struct Mapped<'a>(&'a mut Sim);

impl Persist for Mapped<'_> {
    fn persist(&mut self, ser: &mut Serializer) {
        persist_partition(self.0, ser);
        let ids: Vec<ComponentId> = self.0.components.keys().copied().collect();
        for cid in ids {
            let mut slot = match self.0.components.remove(&cid) {
                Some(slot) => slot,
                None => continue,
            };
            let name = slot.info.name.clone();
            ser.named(&name, &mut SlotAdapter(&mut slot));
            self.0.components.insert(cid, slot);
        }
    }
}

/// Maps one component as `{info, state}` children.
struct SlotAdapter<'a>(&'a mut ComponentSlot);

impl Persist for SlotAdapter<'_> {
    fn persist(&mut self, ser: &mut Serializer) {
        ser.named("info", &mut self.0.info);
        if let Some(instance) = self.0.instance.as_mut() {
            let mut state = PersistFn(|s: &mut Serializer| instance.persist(s));
            ser.named("state", &mut state);
        }
    }
}

struct PersistFn<F: FnMut(&mut Serializer)>(F);

impl<F: FnMut(&mut Serializer)> Persist for PersistFn<F> {
    fn persist(&mut self, ser: &mut Serializer) {
        (self.0)(ser);
    }
}

// ----------------------------------------------------------------------
// Writing
// ----------------------------------------------------------------------

fn registry_name(prefix: &str, id: u64) -> String {
    format!("{prefix}_{id}.registry")
}

fn globals_name(prefix: &str, id: u64) -> String {
    format!("{prefix}_{id}_globals.bin")
}

fn blob_name(prefix: &str, id: u64, rank: RankInfo) -> String {
    format!("{prefix}_{id}_{}_{}.bin", rank.rank, rank.thread)
}

pub(crate) fn write_checkpoint(sim: &mut Sim) -> Result<(), SimError> {
    let id = sim.checkpoint_next_id;
    sim.checkpoint_next_id += 1;
    let shared = sim.sync.shared.clone();

    // Rendezvous: with every sibling thread parked here, nothing is
    // mutating inboxes, so draining leaves the vortex complete.
    shared.barrier.wait();
    sim.drain_event_inbox()?;
    shared.barrier.wait();

    let dir = PathBuf::from(&sim.config.output_directory);
    let prefix = sim.config.checkpoint_prefix.clone();
    let blob = blob_name(&prefix, id, sim.my_rank);
    let block = write_partition_blob(sim, &dir.join(&blob), &blob).map_err(SimError::Checkpoint)?;
    shared
        .checkpoint_stage
        .lock()
        .expect("checkpoint stage poisoned")
        .push((sim.my_rank.thread, block));

    shared.barrier.wait();
    if sim.my_rank.thread == 0 {
        finalize_checkpoint(sim, id).map_err(SimError::Checkpoint)?;
    }
    shared.barrier.wait();

    tracing::info!(
        target: "checkpoint",
        id,
        sim_time = %sim.timelord().format_time(sim.now()),
        blob = %blob,
        "checkpoint written"
    );
    Ok(())
}

/// Writes this partition's blob and returns its registry text block.
fn write_partition_blob(
    sim: &mut Sim,
    path: &Path,
    blob: &str,
) -> Result<String, CheckpointError> {
    let mut file = std::fs::File::create(path)?;

    // Section A: loaded libraries.
    let mut libraries = sim.factory.loaded_libraries();
    write_record(&mut file, &pack_with(|ser| libraries.persist(ser)))?;

    // Section B: partition state. Stop activities carry run-control
    // intent from the command line, so they are not persisted; restart
    // re-seeds them from its own configuration.
    let entries = sim.vortex.drain();
    let mut stops = Vec::new();
    for entry in entries {
        if matches!(entry.activity, Activity::Stop { .. }) {
            stops.push(entry);
        } else {
            sim.vortex.insert_scheduled(entry);
        }
    }
    let section_b = pack_with(|ser| persist_partition(sim, ser));
    for stop in stops {
        sim.vortex.insert_scheduled(stop);
    }
    write_record(&mut file, &section_b)?;

    // Section C: component count.
    file.write_all(&(sim.components.len() as u64).to_le_bytes())?;

    // Section D: one record per component, offsets recorded for the
    // registry.
    let mut block = format!(
        "** ({}:{}): {}\n",
        sim.my_rank.rank, sim.my_rank.thread, blob
    );
    let ids: Vec<ComponentId> = sim.components.keys().copied().collect();
    for cid in ids {
        let offset = file.stream_position()?;
        let mut slot = sim.components.remove(&cid).expect("component vanished");
        let record = pack_with(|ser| {
            slot.info.persist(ser);
            if let Some(instance) = slot.instance.as_mut() {
                instance.persist(ser);
            }
        });
        let name = slot.info.name.clone();
        sim.components.insert(cid, slot);
        write_record(&mut file, &record)?;
        block.push_str(&format!("{cid} : {offset} ({name})\n"));
    }
    file.flush()?;
    Ok(block)
}

/// Thread 0: gather registry blocks (across ranks when parallel) and
/// write the registry plus the globals blob from rank 0.
fn finalize_checkpoint(sim: &mut Sim, id: u64) -> Result<(), CheckpointError> {
    let shared = sim.sync.shared.clone();
    let mut blocks: Vec<(ThreadId, String)> = std::mem::take(
        &mut *shared
            .checkpoint_stage
            .lock()
            .expect("checkpoint stage poisoned"),
    );
    blocks.sort_by_key(|(thread, _)| *thread);
    let local_text: String = blocks.into_iter().map(|(_, text)| text).collect();

    let all_text = if let Some(transport) = sim.transport.as_mut() {
        // Every rank ships its block to rank 0.
        let out = if transport.my_rank() == 0 {
            Vec::new()
        } else {
            vec![(0, local_text.clone().into_bytes())]
        };
        let received = transport
            .exchange(out)
            .map_err(|e| CheckpointError::Schema(format!("registry gather failed: {e}")))?;
        if transport.my_rank() != 0 {
            return Ok(());
        }
        let mut merged = local_text;
        let mut ordered = received;
        ordered.sort_by_key(|(from, _)| *from);
        for (_, bytes) in ordered {
            merged.push_str(&String::from_utf8_lossy(&bytes));
        }
        merged
    } else {
        local_text
    };

    let dir = PathBuf::from(&sim.config.output_directory);
    let prefix = sim.config.checkpoint_prefix.clone();

    // Globals blob.
    let globals_file = globals_name(&prefix, id);
    let mut globals = GlobalsRecord {
        num_ranks: sim.num_ranks.rank,
        num_threads: sim.num_ranks.thread,
        search_paths: sim.factory.search_paths().to_string(),
        timebase: sim.timelord().base_string().to_string(),
        output_directory: sim.config.output_directory.clone(),
        prefix: prefix.clone(),
        verbose: sim.config.verbose,
        globals_name: globals_file.clone(),
        checkpoint_prefix: prefix.clone(),
        params_keys: params::key_table_snapshot(),
    };
    let mut gfile = std::fs::File::create(dir.join(&globals_file))?;
    write_record(&mut gfile, &pack_with(|ser| globals.persist(ser)))?;
    gfile.flush()?;

    // Registry, text.
    let mut registry = String::new();
    registry.push_str("## parsim checkpoint registry\n");
    registry.push_str(&format!("checkpoint_id: {id}\n"));
    registry.push_str(&format!("simulated_time: {}\n", sim.now()));
    registry.push_str(&format!(
        "elapsed: {}s\n",
        sim.realtime.elapsed().as_secs()
    ));
    registry.push_str(&format!("ranks: {}\n", sim.num_ranks.rank));
    registry.push_str(&format!("threads: {}\n", sim.num_ranks.thread));
    registry.push_str(&format!("search_paths: {}\n", globals.search_paths));
    registry.push_str(&format!("timebase: {}\n", globals.timebase));
    registry.push_str(&format!("output_directory: {}\n", globals.output_directory));
    registry.push_str(&format!("prefix: {}\n", globals.prefix));
    registry.push_str(&format!("verbose: {}\n", globals.verbose));
    registry.push_str(&format!("globals: {globals_file}\n"));
    registry.push_str(&format!("checkpoint_prefix: {}\n", globals.checkpoint_prefix));
    registry.push('\n');
    registry.push_str(&all_text);
    std::fs::write(dir.join(registry_name(&prefix, id)), registry)?;
    Ok(())
}

// ----------------------------------------------------------------------
// Restart
// ----------------------------------------------------------------------

fn registry_field<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let want = format!("{key}: ");
    text.lines()
        .find_map(|line| line.strip_prefix(want.as_str()))
        .map(str::trim)
}

/// Finds this partition's blob file name in the registry text.
fn blob_for(text: &str, rank: RankInfo) -> Result<String, CheckpointError> {
    let marker = format!("** ({}:{}): ", rank.rank, rank.thread);
    text.lines()
        .find_map(|line| line.strip_prefix(marker.as_str()))
        .map(|name| name.trim().to_string())
        .ok_or(CheckpointError::RegistryEntryMissing {
            rank: rank.rank,
            thread: rank.thread,
        })
}

/// Restores every thread partition of this process from a checkpoint.
///
/// `config` is the restart invocation's configuration: its time base
/// must match the checkpoint's, and its run controls (`stop_at`,
/// `exit_after`) apply to the resumed run.
pub fn restart_process(
    registry_path: &Path,
    config: &RunConfig,
    factory: Arc<Factory>,
    transport: Option<Box<dyn RankTransport>>,
) -> Result<Vec<Sim>, SimError> {
    let text = std::fs::read_to_string(registry_path)
        .map_err(|e| SimError::Checkpoint(CheckpointError::Io(e)))?;
    let dir = registry_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let ranks: u32 = registry_field(&text, "ranks")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| SimError::Checkpoint(CheckpointError::Schema("ranks".into())))?;
    let threads: u32 = registry_field(&text, "threads")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| SimError::Checkpoint(CheckpointError::Schema("threads".into())))?;
    let globals_file = registry_field(&text, "globals")
        .ok_or_else(|| SimError::Checkpoint(CheckpointError::Schema("globals".into())))?
        .to_string();

    // Topology at restart must equal topology at checkpoint.
    let my_process_rank = transport.as_ref().map(|t| t.my_rank()).unwrap_or(0);
    let have_ranks = transport.as_ref().map(|t| t.num_ranks()).unwrap_or(1);
    if have_ranks != ranks {
        return Err(SimError::Checkpoint(CheckpointError::TopologyMismatch {
            expected: format!("{ranks} ranks x {threads} threads"),
            found: format!("{have_ranks} ranks"),
        }));
    }

    // Globals: time base check and params key table.
    let mut gfile = std::fs::File::open(dir.join(&globals_file))
        .map_err(|e| SimError::Checkpoint(CheckpointError::Io(e)))?;
    let mut globals = GlobalsRecord::default();
    unpack_record(
        read_record(&mut gfile, "globals").map_err(SimError::Checkpoint)?,
        &mut globals,
        "globals",
    )
    .map_err(SimError::Checkpoint)?;
    if globals.timebase != config.timebase {
        return Err(SimError::Checkpoint(CheckpointError::BaseTimeMismatch {
            ours: config.timebase.clone(),
            theirs: globals.timebase.clone(),
        }));
    }
    params::restore_key_table(globals.params_keys.clone());

    let timelord = Arc::new(TimeLord::new(&globals.timebase)?);
    let shared = SyncShared::new(threads as usize);

    let mut sims = Vec::with_capacity(threads as usize);
    for thread in 0..threads {
        let rank = RankInfo::new(my_process_rank, thread);
        let blob = blob_for(&text, rank).map_err(SimError::Checkpoint)?;
        sims.push(restore_partition(
            &dir.join(&blob),
            rank,
            RankInfo::new(ranks, threads),
            shared.clone(),
            timelord.clone(),
            factory.clone(),
            config,
        )?);
    }
    if let Some(transport) = transport {
        sims[0].transport = Some(transport);
    }
    Ok(sims)
}

fn restore_partition(
    blob_path: &Path,
    my_rank: RankInfo,
    num_ranks: RankInfo,
    shared: Arc<SyncShared>,
    timelord: Arc<TimeLord>,
    factory: Arc<Factory>,
    config: &RunConfig,
) -> Result<Sim, SimError> {
    let mut file = std::fs::File::open(blob_path)
        .map_err(|e| SimError::Checkpoint(CheckpointError::Io(e)))?;

    // Section A: libraries load through the factory before anything else
    // is deserialized.
    let mut libraries: std::collections::BTreeSet<String> = Default::default();
    unpack_record(
        read_record(&mut file, "libraries").map_err(SimError::Checkpoint)?,
        &mut libraries,
        "libraries",
    )
    .map_err(SimError::Checkpoint)?;
    for library in &libraries {
        factory.load_library(library)?;
    }

    // Fresh skeleton; sync manager, heartbeat, checkpoint schedule, and
    // TimeVortex are constructed, then populated from the blob.
    let mut sim = Sim {
        num_ranks,
        my_rank,
        timelord,
        factory,
        config: config.clone(),
        current_sim_cycle: 0,
        current_priority: 0,
        run_mode: RunMode::Run,
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
        exit: Exit::new(shared.exit_counts.clone(), my_rank.thread as usize),
        primary_count: 0,
        heartbeat: Default::default(),
        sync: SyncManager::new(shared.clone()),
        transport: None,
        realtime: RealTimeManager::from_config(config)?,
        rank_outbox: Vec::new(),
        rank_untimed_outbox: Vec::new(),
        checkpoint_sim_period: 0,
        checkpoint_next_id: 1,
        restarting: true,
        constructing: None,
        stats: SimStats::default(),
    };

    // Section B.
    let section_b = read_record(&mut file, "partition state").map_err(SimError::Checkpoint)?;
    let mut unpacker = Serializer::unpacker(section_b);
    persist_partition(&mut sim, &mut unpacker);
    if unpacker.truncated() {
        return Err(SimError::Checkpoint(CheckpointError::Truncated(
            "partition state".to_string(),
        )));
    }
    if sim.vortex.type_tag() != VORTEX_TYPE_PQ {
        return Err(SimError::Checkpoint(CheckpointError::Schema(format!(
            "unknown TimeVortex type '{}'",
            sim.vortex.type_tag()
        ))));
    }
    if sim.my_rank != my_rank {
        return Err(SimError::Checkpoint(CheckpointError::TopologyMismatch {
            expected: format!("partition {my_rank}"),
            found: format!("partition {}", sim.my_rank),
        }));
    }
    // The checkpoint interrupted a running partition.
    sim.end_sim = false;
    sim.run_mode = RunMode::Run;
    // Wall-clock controls belong to the restart invocation, not the
    // first life.
    sim.realtime = RealTimeManager::from_config(config)?;

    // The restored handler arena becomes the "old" side of the remap;
    // construction rebuilds a fresh one.
    let old_handlers = std::mem::replace(&mut sim.handlers, HandlerArena::new());

    // Section C.
    let mut count_raw = [0u8; 8];
    file.read_exact(&mut count_raw)
        .map_err(|_| SimError::Checkpoint(CheckpointError::Truncated("component count".into())))?;
    let count = u64::from_le_bytes(count_raw);

    // Section D, pass 1: restore every ComponentInfo and stash the
    // instance bytes.
    let mut instance_bytes: BTreeMap<ComponentId, Vec<u8>> = BTreeMap::new();
    for _ in 0..count {
        let record = read_record(&mut file, "component").map_err(SimError::Checkpoint)?;
        let mut unpacker = Serializer::unpacker(record);
        let mut info = ComponentInfo::default();
        info.persist(&mut unpacker);
        if unpacker.truncated() {
            return Err(SimError::Checkpoint(CheckpointError::Truncated(
                "component info".to_string(),
            )));
        }
        let cid = info.id;
        let mut rest = vec![0u8; unpacker.remaining()];
        unpacker.get_bytes(&mut rest);
        sim.names.insert(info.name.clone(), cid);
        sim.components.insert(cid, ComponentSlot::new(info));
        instance_bytes.insert(cid, rest);
    }

    // Pass 2: re-create instances through the factory. Constructors
    // replay their registrations against the restored state; scheduling
    // side effects are suppressed by the restart flag.
    let ids: Vec<ComponentId> = sim.components.keys().copied().collect();
    for cid in ids.iter().copied() {
        let missing = sim
            .components
            .get(&cid)
            .is_some_and(|slot| slot.instance.is_none());
        if missing {
            sim.construct_component(cid)?;
        }
    }

    // Pass 3: restore instance state.
    for cid in ids.iter().copied() {
        let bytes = instance_bytes.remove(&cid).unwrap_or_default();
        let mut unpacker = Serializer::unpacker(bytes);
        if let Some(slot) = sim.components.get_mut(&cid) {
            if let Some(instance) = slot.instance.as_mut() {
                instance.persist(&mut unpacker);
                if unpacker.truncated() {
                    return Err(SimError::Checkpoint(CheckpointError::Truncated(format!(
                        "component {} state",
                        slot.info.name
                    ))));
                }
            } else {
                return Err(SimError::Checkpoint(CheckpointError::Schema(format!(
                    "component {} resolved no instance",
                    slot.info.name
                ))));
            }
        }
    }

    // Pass 4: handler fix-ups. In-flight events and clock handler lists
    // rebind through the (owner, kind) join of the two arenas.
    let remap = sim.handlers.remap_from(&old_handlers);
    let map_handler = |id: Option<HandlerId>| -> Option<HandlerId> {
        id.and_then(|old| remap.get(&old).copied())
    };
    let entries = sim.vortex.drain();
    for mut entry in entries {
        if let Activity::Event(ref mut ev) = entry.activity {
            if ev.handler.is_some() {
                let mapped = map_handler(ev.handler);
                if mapped.is_none() {
                    return Err(SimError::Checkpoint(CheckpointError::Schema(format!(
                        "in-flight event handler {} did not survive restart",
                        ev.handler.map(|h| h.to_string()).unwrap_or_default()
                    ))));
                }
                ev.handler = mapped;
            }
        }
        sim.vortex.insert_scheduled(entry);
    }
    for (_, link) in sim.links.iter_mut() {
        if link.delivery_info.is_some() {
            if let Some(old) = link.delivery_info {
                if sim.handlers.get(old).is_none() {
                    link.delivery_info = remap.get(&old).copied();
                }
            }
        }
    }
    let clock_keys: Vec<_> = sim.clocks.keys().copied().collect();
    for key in clock_keys {
        let clock = sim.clocks.get_mut(&key).expect("clock vanished");
        let handler_ids = clock.handler_ids.clone();
        let missing = crate::clock::rebind_handlers(
            &handler_ids,
            &mut clock.handlers,
            &sim.handlers,
            |tag| HandlerKind::Clock { tag },
        );
        if !missing.is_empty() {
            return Err(SimError::Checkpoint(CheckpointError::Schema(format!(
                "clock {key:?} lost handlers {missing:?} at restart"
            ))));
        }
    }
    let oneshot_keys: Vec<_> = sim.oneshots.keys().copied().collect();
    for key in oneshot_keys {
        let oneshot = sim.oneshots.get_mut(&key).expect("oneshot vanished");
        let handler_ids = oneshot.handler_ids.clone();
        let missing = crate::clock::rebind_handlers(
            &handler_ids,
            &mut oneshot.handlers,
            &sim.handlers,
            |tag| HandlerKind::OneShot { tag },
        );
        if !missing.is_empty() {
            return Err(SimError::Checkpoint(CheckpointError::Schema(format!(
                "one-shot {key:?} lost handlers {missing:?} at restart"
            ))));
        }
    }

    // Pass 5: re-register sync pair names with the process-wide registry.
    for (name, _) in sim.sync.local_links.clone() {
        shared
            .registry
            .lock()
            .expect("sync registry poisoned")
            .insert(name, my_rank.thread);
    }
    shared
        .primary_registered
        .fetch_add(sim.primary_count, Ordering::SeqCst);

    // Run controls come from the restart invocation, not the blob.
    sim.vortex.insert(
        TIME_MAX,
        priority::STOP,
        Activity::Stop {
            message: Some("event queue exhausted".to_string()),
        },
    );
    if let Some(stop_at) = config.stop_at.clone() {
        let time = sim.timelord().sim_cycles(&stop_at)?;
        sim.vortex
            .insert(time, priority::STOP, Activity::Stop { message: None });
    }

    tracing::info!(
        target: "checkpoint",
        partition = %my_rank,
        sim_time = %sim.timelord().format_time(sim.now()),
        components = sim.components.len(),
        "partition restored"
    );
    Ok(sim)
}
