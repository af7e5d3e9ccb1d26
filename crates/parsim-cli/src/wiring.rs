//! # parsim-cli::wiring
//!
//! Demo wirings: small hardcoded graphs built from the demo component
//! library. A configuration front end would normally produce these
//! declarations from an input file; the core only sees the builder
//! calls either way.

use anyhow::{anyhow, Result};
use parsim_engine::prelude::*;
use parsim_model::components::DEMO_LIBRARY;
use std::sync::Arc;

pub const DEMOS: &[(&str, &str)] = &[
    ("pingpong", "two Pinger components bouncing an event over a 5ns link"),
    ("counter", "a 1GHz TickCounter running until --stop-at"),
    ("polling", "a PulseSender polled by a PollingSink over a 5ns link"),
    ("stream", "a Streamer flooding a Collector over a 100ns link"),
];

/// A factory with the demo library registered and loaded.
pub fn demo_factory() -> Result<Arc<Factory>> {
    let factory = Arc::new(Factory::new(""));
    factory.register_library(&DEMO_LIBRARY);
    factory.load_library("demo")?;
    Ok(factory)
}

/// Builds the named demo wiring across `threads` partitions.
pub fn build_demo(name: &str, config: RunConfig, threads: u32) -> Result<Vec<Sim>> {
    let factory = demo_factory()?;
    let mut builder = SimBuilder::new(config, factory);
    match name {
        "pingpong" => {
            let mut starter = Params::new();
            starter.insert("starter", "true");
            builder.add_component("a", "demo.Pinger", starter);
            builder.add_component_on(
                "b",
                "demo.Pinger",
                Params::new(),
                RankInfo::new(0, (threads - 1).min(1)),
            );
            builder.link(
                "ab",
                LinkEnd::new("a", "port", "5ns"),
                LinkEnd::new("b", "port", "5ns"),
            );
        }
        "counter" => {
            let mut params = Params::new();
            params.insert("frequency", "1GHz");
            builder.add_component("counter", "demo.TickCounter", params);
        }
        "polling" => {
            builder.add_component("source", "demo.PulseSender", Params::new());
            builder.add_component("sink", "demo.PollingSink", Params::new());
            builder.link(
                "pulse",
                LinkEnd::new("source", "port", "5ns"),
                LinkEnd::new("sink", "port", "5ns"),
            );
        }
        "stream" => {
            builder.add_component("source", "demo.Streamer", Params::new());
            let mut sink = Params::new();
            sink.insert("expected_latency", "100ns");
            builder.add_component_on(
                "sink",
                "demo.Collector",
                sink,
                RankInfo::new(0, (threads - 1).min(1)),
            );
            builder.link(
                "flow",
                LinkEnd::new("source", "port", "100ns"),
                LinkEnd::new("sink", "port", "100ns"),
            );
        }
        other => return Err(anyhow!("unknown demo '{other}'; see list-demos")),
    }
    Ok(builder.build_threads(threads)?)
}
