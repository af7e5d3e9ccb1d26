//! # parsim-model::api
//!
//! The two-sided contract between the core and component libraries: the
//! core drives a component through the object-safe [`Component`] trait,
//! and a component calls back into the core through [`CoreCtx`]. Both
//! sides traffic in opaque `Bytes` payloads; typed components encode
//! their messages with `postcard` (see [`crate::components`]).

use crate::params::Params;
use bytes::Bytes;
use parsim_types::errors::SimError;
use parsim_types::ids::{ClockTag, ComponentId, LinkId, PortTag};
use parsim_types::ser::Serializer;
use parsim_types::time::{CoreTime, Cycle, Priority, TimeConverter};
use std::any::Any;

/// The object-safe trait every simulated component implements.
///
/// Construction happens through the factory ([`crate::factory`]); the
/// constructor receives a [`CoreCtx`] and is the only place where
/// `register_as_primary` is legal. Handlers run to completion on the
/// partition's thread; there is no preemption.
pub trait Component: Send {
    /// One untimed init round. Rounds repeat until no partition sends
    /// untimed data in a whole round.
    fn init_phase(&mut self, _phase: u64, _ctx: &mut dyn CoreCtx) {}

    /// Called once after init completes and before the run loop starts.
    fn setup(&mut self, _ctx: &mut dyn CoreCtx) {}

    /// An event arrived on one of this component's configured ports.
    /// `payload` is `None` for a null event.
    fn on_event(&mut self, _port: PortTag, _payload: Option<Bytes>, _ctx: &mut dyn CoreCtx) {}

    /// A registered clock handler fires. Return `true` to unregister
    /// this handler after the tick.
    fn on_clock(&mut self, _tag: ClockTag, _cycle: Cycle, _ctx: &mut dyn CoreCtx) -> bool {
        false
    }

    /// A registered one-shot fires.
    fn on_oneshot(&mut self, _tag: ClockTag, _ctx: &mut dyn CoreCtx) {}

    /// One untimed completion round, after the run loop ends.
    fn complete_phase(&mut self, _phase: u64, _ctx: &mut dyn CoreCtx) {}

    /// Called once after completion rounds; last chance to report.
    fn finish(&mut self, _ctx: &mut dyn CoreCtx) {}

    /// Called on SIGINT/SIGTERM-driven aborts. Must not call the core.
    fn emergency_shutdown(&mut self) {}

    /// Checkpoints the component's state through the four-mode serializer.
    fn persist(&mut self, ser: &mut Serializer);

    /// Downcast support for wiring code and tests.
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// The callback surface the core exposes to components.
///
/// Phase rules are enforced behind these calls: timed sends are legal only
/// while the simulation is running, untimed sends only during init and
/// completion rounds, and `register_as_primary` only during construction.
pub trait CoreCtx {
    // -- identity and time -------------------------------------------------

    fn component_id(&self) -> ComponentId;
    fn now(&self) -> CoreTime;
    /// Parses a time string against the process time base and returns the
    /// equivalent tick count.
    fn sim_cycles(&self, time: &str) -> Result<CoreTime, SimError>;

    // -- links -------------------------------------------------------------

    /// Binds this component's handler to a wired port. Events arriving on
    /// the link are delivered to `on_event` with the given tag. The
    /// returned id is the send handle.
    fn configure_link(
        &mut self,
        port: &str,
        time_base: &str,
        tag: PortTag,
    ) -> Result<LinkId, SimError>;

    /// Like `configure_link`, but no handler: arrivals queue on the link
    /// until polled with [`CoreCtx::recv`].
    fn configure_polling_link(&mut self, port: &str, time_base: &str) -> Result<LinkId, SimError>;

    /// Creates a link from this component to itself with the given latency.
    fn configure_self_link(
        &mut self,
        name: &str,
        time_base: &str,
        latency: &str,
        tag: PortTag,
    ) -> Result<LinkId, SimError>;

    /// Sends an event. `delay` is in ticks of the link's default time
    /// base; the link latency is added on top. `None` sends a null event.
    fn send(&mut self, link: LinkId, delay: Cycle, payload: Option<Bytes>)
        -> Result<(), SimError>;

    /// Polls a polling link: the next event whose delivery time has been
    /// reached, or `None`.
    fn recv(&mut self, link: LinkId) -> Result<Option<Bytes>, SimError>;

    /// Sends data during an untimed (init/complete) round.
    fn send_untimed(&mut self, link: LinkId, payload: Bytes) -> Result<(), SimError>;

    /// Receives pending untimed data on a link.
    fn recv_untimed(&mut self, link: LinkId) -> Option<Bytes>;

    // -- clocks ------------------------------------------------------------

    /// Registers a clock handler. `freq` may be a frequency (`1GHz`) or a
    /// period (`1ns`). Returns the period converter.
    fn register_clock(
        &mut self,
        freq: &str,
        tag: ClockTag,
        priority: Priority,
    ) -> Result<TimeConverter, SimError>;

    /// Removes a previously registered clock handler.
    fn unregister_clock(&mut self, period_factor: CoreTime, tag: ClockTag, priority: Priority);

    /// The next cycle boundary of the identified clock.
    fn next_clock_cycle(&mut self, period_factor: CoreTime, priority: Priority) -> Cycle;

    /// Arms a one-shot that fires once, `delay` after now.
    fn register_oneshot(
        &mut self,
        delay: &str,
        tag: ClockTag,
        priority: Priority,
    ) -> Result<(), SimError>;

    // -- component tree ----------------------------------------------------

    /// Creates a subcomponent in the named slot and returns its id. With
    /// `share_ports` the child resolves unconnected ports against this
    /// component's link map.
    fn create_subcomponent(
        &mut self,
        slot: &str,
        type_name: &str,
        params: &Params,
        share_ports: bool,
    ) -> Result<ComponentId, SimError>;

    // -- exit protocol -----------------------------------------------------

    /// Marks this component as primary (exit-counting). Construction only;
    /// idempotent.
    fn register_as_primary(&mut self);
    /// Holds the simulation open until the matching `ok_to_end_sim`.
    fn do_not_end_sim(&mut self);
    /// Releases a hold taken with `do_not_end_sim`.
    fn ok_to_end_sim(&mut self);

    // -- observability -----------------------------------------------------

    fn log_kv(&mut self, key: &'static str, val: &str);
}
