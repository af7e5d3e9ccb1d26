//! # parsim-model::components
//!
//! Demo components used by the CLI demo wirings and the engine's
//! end-to-end tests. They are deliberately small; real component
//! libraries live outside this workspace and are registered with the
//! factory the same way.

pub mod counter;
pub mod ping;
pub mod pulse;
pub mod stream;

use crate::api::{Component, CoreCtx};
use crate::factory::Library;
use crate::params::Params;
use parsim_types::ids::ComponentId;

pub use counter::TickCounter;
pub use ping::Pinger;
pub use pulse::{PollingSink, PulseSender};
pub use stream::{Collector, Streamer};

fn build_pinger(id: ComponentId, p: &Params, ctx: &mut dyn CoreCtx) -> Box<dyn Component> {
    Box::new(Pinger::new(id, p, ctx))
}
fn build_counter(id: ComponentId, p: &Params, ctx: &mut dyn CoreCtx) -> Box<dyn Component> {
    Box::new(TickCounter::new(id, p, ctx))
}
fn build_pulse(id: ComponentId, p: &Params, ctx: &mut dyn CoreCtx) -> Box<dyn Component> {
    Box::new(PulseSender::new(id, p, ctx))
}
fn build_sink(id: ComponentId, p: &Params, ctx: &mut dyn CoreCtx) -> Box<dyn Component> {
    Box::new(PollingSink::new(id, p, ctx))
}
fn build_streamer(id: ComponentId, p: &Params, ctx: &mut dyn CoreCtx) -> Box<dyn Component> {
    Box::new(Streamer::new(id, p, ctx))
}
fn build_collector(id: ComponentId, p: &Params, ctx: &mut dyn CoreCtx) -> Box<dyn Component> {
    Box::new(Collector::new(id, p, ctx))
}

/// The built-in demo library. Type names resolve as `demo.<Type>`.
pub static DEMO_LIBRARY: Library = Library {
    name: "demo",
    builders: &[
        ("Pinger", build_pinger),
        ("TickCounter", build_counter),
        ("PulseSender", build_pulse),
        ("PollingSink", build_sink),
        ("Streamer", build_streamer),
        ("Collector", build_collector),
    ],
};
