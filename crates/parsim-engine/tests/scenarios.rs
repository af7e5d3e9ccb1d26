//! End-to-end scenarios driving the full lifecycle: ping-pong delivery,
//! clock dispatch, polling links, cross-partition streaming, untimed
//! init rounds, the exit protocol, and checkpoint/restart.

use bytes::Bytes;
use parsim_engine::prelude::*;
use parsim_model::components::{Collector, PollingSink, Pinger, PulseSender, TickCounter, DEMO_LIBRARY};
use parsim_model::{Component, CoreCtx};
use parsim_types::ser::Serializer;
use std::sync::Arc;

fn demo_factory() -> Arc<Factory> {
    let factory = Arc::new(Factory::new("/opt/parsim/libs"));
    factory.register_library(&DEMO_LIBRARY);
    factory.load_library("demo").unwrap();
    factory
}

fn config(stop_at: &str) -> RunConfig {
    RunConfig {
        stop_at: Some(stop_at.to_string()),
        ..RunConfig::default()
    }
}

fn pingpong_builder(cfg: RunConfig, b_thread: u32) -> SimBuilder {
    let mut builder = SimBuilder::new(cfg, demo_factory());
    let mut starter = Params::new();
    starter.insert("starter", "true");
    builder.add_component("a", "demo.Pinger", starter);
    builder.add_component_on(
        "b",
        "demo.Pinger",
        Params::new(),
        RankInfo::new(0, b_thread),
    );
    builder.link(
        "ab",
        LinkEnd::new("a", "port", "5ns"),
        LinkEnd::new("b", "port", "5ns"),
    );
    builder
}

// Scenario A: two-component ping-pong, 5 ns latency, stop at 100 ns.
#[test]
fn ping_pong_delivers_twenty_events() {
    let mut sim = pingpong_builder(config("100ns"), 0).build().unwrap();
    sim.execute().unwrap();

    let a = sim.component_as::<Pinger>("a").unwrap();
    let b = sim.component_as::<Pinger>("b").unwrap();
    assert_eq!(a.delivered + b.delivered, 20);
    assert_eq!(a.last_payload, Some(19));
    assert_eq!(b.last_payload, Some(18));
    // 100 ns against the 1 ps base.
    assert_eq!(sim.end_sim_cycle(), 100_000);
}

// Scenario B: a 1 GHz clock for 1 us ticks exactly 1000 times.
#[test]
fn clock_driven_counter() {
    let mut builder = SimBuilder::new(config("1us"), demo_factory());
    let mut params = Params::new();
    params.insert("frequency", "1GHz");
    builder.add_component("counter", "demo.TickCounter", params);
    let mut sim = builder.build().unwrap();
    sim.execute().unwrap();

    let counter = sim.component_as::<TickCounter>("counter").unwrap();
    assert_eq!(counter.ticks, 1000);
    assert_eq!(sim.end_sim_cycle(), 1_000_000);
}

// Scenario C: two handlers on one clock; the second cancels itself on
// its fifth call while the first keeps counting.
#[test]
fn self_cancelling_clock_handler() {
    let mut builder = SimBuilder::new(config("10ns"), demo_factory());
    let mut params = Params::new();
    params.insert("frequency", "1GHz");
    params.insert("cancel_after", "5");
    builder.add_component("counter", "demo.TickCounter", params);
    let mut sim = builder.build().unwrap();
    sim.execute().unwrap();

    let counter = sim.component_as::<TickCounter>("counter").unwrap();
    assert_eq!(counter.ticks, 10);
    assert_eq!(counter.cancel_calls, 5);
}

// Scenario D: three pulses on a 5 ns link, drained by polling on a 3 ns
// clock. Each pulse is seen at the first poll at or after its stamped
// delivery time.
#[test]
fn polling_link_gates_on_delivery_time() {
    let mut builder = SimBuilder::new(config("30ns"), demo_factory());
    builder.add_component("source", "demo.PulseSender", Params::new());
    builder.add_component("sink", "demo.PollingSink", Params::new());
    builder.link(
        "pulse",
        LinkEnd::new("source", "port", "5ns"),
        LinkEnd::new("sink", "port", "5ns"),
    );
    let mut sim = builder.build().unwrap();
    sim.execute().unwrap();

    let source = sim.component_as::<PulseSender>("source").unwrap();
    let sink = sim.component_as::<PollingSink>("sink").unwrap();
    assert_eq!(source.sent, 3);
    assert_eq!(sink.received, vec![0, 1, 2]);
    // Deliveries stamped 5/15/25 ns, polls every 3 ns.
    assert_eq!(sink.recv_times, vec![6_000, 15_000, 27_000]);
    assert!(sink.empty_polls > 0);
}

// Scenario E: two ranks exchanging through the sync manager; every
// event lands exactly one link latency after it was sent.
#[test]
fn two_rank_stream_preserves_latency() {
    let mut transports = ChannelTransport::mesh(2);
    let t1 = transports.pop().unwrap();
    let t0 = transports.pop().unwrap();

    let spawn = |transport: ChannelTransport| {
        std::thread::spawn(move || {
            let mut builder = SimBuilder::new(config("2us"), demo_factory());
            builder.add_component_on(
                "source",
                "demo.Streamer",
                Params::new(),
                RankInfo::new(0, 0),
            );
            let mut sink = Params::new();
            sink.insert("expected_latency", "100ns");
            builder.add_component_on("sink", "demo.Collector", sink, RankInfo::new(1, 0));
            builder.link(
                "flow",
                LinkEnd::new("source", "port", "100ns"),
                LinkEnd::new("sink", "port", "100ns"),
            );
            let mut sims = builder.build_rank(Box::new(transport), 1).unwrap();
            sims[0].execute().unwrap();
            sims.remove(0)
        })
    };
    let rank0 = spawn(t0);
    let rank1 = spawn(t1);
    let sim0 = rank0.join().unwrap();
    let sim1 = rank1.join().unwrap();

    let source = sim0.component_as::<parsim_model::components::Streamer>("source").unwrap();
    let sink = sim1.component_as::<Collector>("sink").unwrap();
    assert_eq!(source.sent, 1000);
    assert_eq!(sink.received, 1000);
    assert_eq!(sink.out_of_order, 0);
    assert_eq!(sink.latency_violations, 0);
}

// Ping-pong split across two threads of one process: the same totals as
// the serial run, via the cross-thread sync path.
#[test]
fn two_thread_ping_pong_matches_serial() {
    let sims = pingpong_builder(config("100ns"), 1)
        .build_threads(2)
        .unwrap();
    let finished = run_process(sims).unwrap();

    let thread_a = &finished[0];
    let thread_b = &finished[1];
    let a = thread_a.component_as::<Pinger>("a").unwrap();
    let b = thread_b.component_as::<Pinger>("b").unwrap();
    assert_eq!(a.delivered + b.delivered, 20);
    assert_eq!(a.last_payload, Some(19));
    assert_eq!(thread_a.end_sim_cycle(), 100_000);
}

// The exit protocol: a primary component releasing its hold ends the
// run without any stop-at.
#[test]
fn primary_component_release_ends_run() {
    let mut builder = SimBuilder::new(RunConfig::default(), demo_factory());
    let mut params = Params::new();
    params.insert("frequency", "1GHz");
    params.insert("primary", "true");
    params.insert("release_at", "500");
    builder.add_component("counter", "demo.TickCounter", params);
    let mut sim = builder.build().unwrap();
    sim.execute().unwrap();

    let counter = sim.component_as::<TickCounter>("counter").unwrap();
    assert_eq!(counter.ticks, 500);
    assert_eq!(sim.end_sim_cycle(), 500_000);
}

// ----------------------------------------------------------------------
// Untimed init rounds
// ----------------------------------------------------------------------

/// Sends a greeting during init round 0, acks any greeting it receives,
/// and counts everything. The loop must settle after the ack round.
struct Handshaker {
    link: LinkId,
    received: Vec<String>,
    acked: bool,
}

impl Handshaker {
    fn new(_id: ComponentId, _params: &Params, ctx: &mut dyn CoreCtx) -> Self {
        let link = ctx.configure_link("port", "1ns", 0).unwrap();
        Self {
            link,
            received: Vec::new(),
            acked: false,
        }
    }
}

impl Component for Handshaker {
    fn init_phase(&mut self, phase: u64, ctx: &mut dyn CoreCtx) {
        if phase == 0 {
            ctx.send_untimed(self.link, Bytes::from_static(b"hello"))
                .unwrap();
        }
        while let Some(bytes) = ctx.recv_untimed(self.link) {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            let is_hello = text == "hello";
            self.received.push(text);
            if is_hello && !self.acked {
                self.acked = true;
                ctx.send_untimed(self.link, Bytes::from_static(b"ack"))
                    .unwrap();
            }
        }
    }

    fn persist(&mut self, _ser: &mut Serializer) {}

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

fn build_handshaker(
    id: ComponentId,
    params: &Params,
    ctx: &mut dyn CoreCtx,
) -> Box<dyn Component> {
    Box::new(Handshaker::new(id, params, ctx))
}

static TEST_LIBRARY: Library = Library {
    name: "testlib",
    builders: &[("Handshaker", build_handshaker)],
};

// The init loop terminates exactly when a whole round moves nothing,
// and both sides saw the greeting and the ack.
#[test]
fn untimed_init_rounds_settle() {
    let factory = Arc::new(Factory::new(""));
    factory.register_library(&DEMO_LIBRARY);
    factory.register_library(&TEST_LIBRARY);
    factory.load_library("testlib").unwrap();

    let mut builder = SimBuilder::new(config("1ns"), factory);
    builder.add_component("left", "testlib.Handshaker", Params::new());
    builder.add_component("right", "testlib.Handshaker", Params::new());
    builder.link(
        "wire",
        LinkEnd::new("left", "port", "1ns"),
        LinkEnd::new("right", "port", "1ns"),
    );
    let mut sim = builder.build().unwrap();
    sim.execute().unwrap();

    for name in ["left", "right"] {
        let side = sim.component_as::<Handshaker>(name).unwrap();
        let mut seen = side.received.clone();
        seen.sort();
        assert_eq!(seen, vec!["ack".to_string(), "hello".to_string()]);
    }
}

// ----------------------------------------------------------------------
// Scenario F: checkpoint at the midpoint, restart, identical totals
// ----------------------------------------------------------------------

#[test]
fn checkpoint_restart_matches_straight_run() {
    let dir = std::env::temp_dir().join(format!(
        "parsim-ckpt-{}-{:?}",
        std::process::id(),
        std::thread::current().id()
    ));
    std::fs::create_dir_all(&dir).unwrap();

    // Straight run for reference.
    let mut reference = pingpong_builder(config("100ns"), 0).build().unwrap();
    reference.execute().unwrap();
    let ref_a = reference.component_as::<Pinger>("a").unwrap();
    let ref_b = reference.component_as::<Pinger>("b").unwrap();
    let reference_totals = (
        ref_a.delivered + ref_b.delivered,
        ref_a.last_payload,
        reference.end_sim_cycle(),
    );

    // First segment: stop at 50 ns with a checkpoint scheduled there.
    let cfg = RunConfig {
        stop_at: Some("50ns".to_string()),
        checkpoint_sim_period: Some("50ns".to_string()),
        checkpoint_prefix: "ckpt".to_string(),
        output_directory: dir.to_string_lossy().into_owned(),
        ..RunConfig::default()
    };
    let mut first = pingpong_builder(cfg, 0).build().unwrap();
    first.execute().unwrap();
    assert_eq!(first.end_sim_cycle(), 50_000);
    assert_eq!(first.stats().checkpoints_written, 1);

    // Restart from the registry and run to 100 ns.
    let registry = dir.join("ckpt_1.registry");
    assert!(registry.exists(), "registry missing at {registry:?}");
    let mut sims = restart_process(
        &registry,
        &config("100ns"),
        demo_factory(),
        None,
    )
    .unwrap();
    let mut resumed = sims.remove(0);
    assert_eq!(resumed.now(), 50_000);
    resumed.execute_from_restart().unwrap();

    let a = resumed.component_as::<Pinger>("a").unwrap();
    let b = resumed.component_as::<Pinger>("b").unwrap();
    assert_eq!(
        (a.delivered + b.delivered, a.last_payload, resumed.end_sim_cycle()),
        reference_totals
    );

    std::fs::remove_dir_all(&dir).ok();
}

// Map mode walks the live partition into an introspection tree.
#[test]
fn object_map_exposes_partition_state() {
    let mut sim = pingpong_builder(config("100ns"), 0).build().unwrap();
    sim.execute().unwrap();

    let map = map_partition(&mut sim);
    let cycle = map.find("partition.current_sim_cycle").unwrap();
    assert_eq!(cycle.value(), Some("100000".to_string()));
    // Component state appears under its own name.
    let delivered = map.find("partition.a.state.delivered").unwrap();
    assert_eq!(delivered.value(), Some("10".to_string()));
    assert!(map.find("partition.a.info.name").is_some());
}

// A restart with a different time base must be refused.
#[test]
fn restart_rejects_base_time_mismatch() {
    let dir = std::env::temp_dir().join(format!(
        "parsim-ckpt-mismatch-{}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();

    let cfg = RunConfig {
        stop_at: Some("20ns".to_string()),
        checkpoint_sim_period: Some("10ns".to_string()),
        checkpoint_prefix: "mm".to_string(),
        output_directory: dir.to_string_lossy().into_owned(),
        ..RunConfig::default()
    };
    let mut first = pingpong_builder(cfg, 0).build().unwrap();
    first.execute().unwrap();

    let registry = dir.join("mm_1.registry");
    let bad = RunConfig {
        stop_at: Some("100ns".to_string()),
        timebase: "1ns".to_string(),
        ..RunConfig::default()
    };
    let err = restart_process(&registry, &bad, demo_factory(), None);
    assert!(matches!(
        err,
        Err(SimError::Checkpoint(CheckpointError::BaseTimeMismatch { .. }))
    ));

    std::fs::remove_dir_all(&dir).ok();
}
