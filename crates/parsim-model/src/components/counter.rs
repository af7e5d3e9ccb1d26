//! A clock-driven counter. Optionally registers a second handler on the
//! same clock that cancels itself after a fixed number of calls, and can
//! act as a primary component that releases the simulation at a given
//! cycle.

use crate::api::{Component, CoreCtx};
use crate::params::Params;
use parsim_types::ids::{ClockTag, ComponentId};
use parsim_types::persist_fields;
use parsim_types::ser::Serializer;
use parsim_types::time::{priority, Cycle};
use std::any::Any;

const TAG_COUNT: ClockTag = 0;
const TAG_CANCEL: ClockTag = 1;

pub struct TickCounter {
    id: ComponentId,
    pub ticks: u64,
    pub cancel_calls: u64,
    cancel_after: Option<u64>,
    release_at: Option<Cycle>,
    primary: bool,
}

impl TickCounter {
    pub fn new(id: ComponentId, params: &Params, ctx: &mut dyn CoreCtx) -> Self {
        let freq = params.get("frequency").unwrap_or("1GHz").to_string();
        ctx.register_clock(&freq, TAG_COUNT, priority::CLOCK)
            .expect("TickCounter: bad frequency");

        let cancel_after = params
            .get("cancel_after")
            .and_then(|v| v.parse::<u64>().ok());
        if cancel_after.is_some() {
            ctx.register_clock(&freq, TAG_CANCEL, priority::CLOCK)
                .expect("TickCounter: bad frequency");
        }

        let primary = params.find("primary", false);
        let release_at = params.get("release_at").and_then(|v| v.parse::<Cycle>().ok());
        if primary {
            ctx.register_as_primary();
            ctx.do_not_end_sim();
        }

        Self {
            id,
            ticks: 0,
            cancel_calls: 0,
            cancel_after,
            release_at,
            primary,
        }
    }
}

impl Component for TickCounter {
    fn on_clock(&mut self, tag: ClockTag, cycle: Cycle, ctx: &mut dyn CoreCtx) -> bool {
        match tag {
            TAG_COUNT => {
                self.ticks += 1;
                if self.primary && self.release_at == Some(cycle) {
                    ctx.ok_to_end_sim();
                }
                false
            }
            TAG_CANCEL => {
                self.cancel_calls += 1;
                self.cancel_calls >= self.cancel_after.unwrap_or(u64::MAX)
            }
            _ => false,
        }
    }

    fn persist(&mut self, ser: &mut Serializer) {
        persist_fields!(
            ser,
            self.id,
            self.ticks,
            self.cancel_calls,
            self.cancel_after,
            self.release_at,
            self.primary
        );
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
