//! A fixed-count pulse source and a polling receiver. The sender emits
//! numbered pulses (the first at t=0, the rest on its clock); the sink
//! has no handler on its port and drains it from a polling clock.

use crate::api::{Component, CoreCtx};
use crate::params::Params;
use bytes::Bytes;
use parsim_types::ids::{ClockTag, ComponentId, LinkId, PortTag};
use parsim_types::persist_fields;
use parsim_types::ser::Serializer;
use parsim_types::time::{priority, CoreTime, Cycle};
use std::any::Any;

const PORT: PortTag = 0;
const TAG_SEED: ClockTag = 0;
const TAG_PULSE: ClockTag = 1;

pub struct PulseSender {
    id: ComponentId,
    link: LinkId,
    count: u64,
    pub sent: u64,
}

impl PulseSender {
    pub fn new(id: ComponentId, params: &Params, ctx: &mut dyn CoreCtx) -> Self {
        let link = ctx
            .configure_link("port", "1ns", PORT)
            .expect("PulseSender: port 'port' is not wired");
        let period = params.get("period").unwrap_or("10ns").to_string();
        let count = params.find("count", 3u64);
        ctx.register_oneshot("0s", TAG_SEED, priority::ONESHOT)
            .expect("PulseSender: bad seed delay");
        ctx.register_clock(&period, TAG_PULSE, priority::CLOCK)
            .expect("PulseSender: bad period");
        Self {
            id,
            link,
            count,
            sent: 0,
        }
    }

    fn send_pulse(&mut self, ctx: &mut dyn CoreCtx) {
        let bytes = postcard::to_allocvec(&self.sent).expect("PulseSender: encode");
        ctx.send(self.link, 0, Some(Bytes::from(bytes)))
            .expect("PulseSender: send failed");
        self.sent += 1;
    }
}

impl Component for PulseSender {
    fn on_oneshot(&mut self, _tag: ClockTag, ctx: &mut dyn CoreCtx) {
        self.send_pulse(ctx);
    }

    fn on_clock(&mut self, _tag: ClockTag, _cycle: Cycle, ctx: &mut dyn CoreCtx) -> bool {
        if self.sent < self.count {
            self.send_pulse(ctx);
        }
        self.sent >= self.count
    }

    fn persist(&mut self, ser: &mut Serializer) {
        persist_fields!(ser, self.id, self.link, self.count, self.sent);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub struct PollingSink {
    id: ComponentId,
    link: LinkId,
    /// Polls that returned nothing.
    pub empty_polls: u64,
    /// Received payloads, in arrival order.
    pub received: Vec<u64>,
    /// Simulated time of each non-empty poll.
    pub recv_times: Vec<CoreTime>,
}

impl PollingSink {
    pub fn new(id: ComponentId, params: &Params, ctx: &mut dyn CoreCtx) -> Self {
        let link = ctx
            .configure_polling_link("port", "1ns")
            .expect("PollingSink: port 'port' is not wired");
        let poll = params.get("poll_period").unwrap_or("3ns").to_string();
        ctx.register_clock(&poll, TAG_PULSE, priority::CLOCK)
            .expect("PollingSink: bad poll period");
        Self {
            id,
            link,
            empty_polls: 0,
            received: Vec::new(),
            recv_times: Vec::new(),
        }
    }
}

impl Component for PollingSink {
    fn on_clock(&mut self, _tag: ClockTag, _cycle: Cycle, ctx: &mut dyn CoreCtx) -> bool {
        loop {
            match ctx.recv(self.link).expect("PollingSink: recv failed") {
                Some(bytes) => {
                    let value: u64 = postcard::from_bytes(&bytes).expect("PollingSink: decode");
                    self.received.push(value);
                    self.recv_times.push(ctx.now());
                }
                None => {
                    self.empty_polls += 1;
                    break;
                }
            }
        }
        false
    }

    fn persist(&mut self, ser: &mut Serializer) {
        persist_fields!(
            ser,
            self.id,
            self.link,
            self.empty_polls,
            self.received,
            self.recv_times
        );
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
