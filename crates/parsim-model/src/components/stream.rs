//! A high-rate event source and a latency-checking counter sink, used by
//! the cross-partition scenarios: the streamer emits one event per clock
//! cycle, stamped with its send time, and the collector verifies every
//! arrival landed exactly one link latency after it was sent.

use crate::api::{Component, CoreCtx};
use crate::params::Params;
use bytes::Bytes;
use parsim_types::ids::{ClockTag, ComponentId, LinkId, PortTag};
use parsim_types::persist_fields;
use parsim_types::ser::Serializer;
use parsim_types::time::{priority, CoreTime, Cycle};
use std::any::Any;

const PORT: PortTag = 0;
const TAG_STREAM: ClockTag = 0;

#[derive(serde::Serialize, serde::Deserialize)]
struct Stamp {
    seq: u64,
    sent_at: CoreTime,
}

pub struct Streamer {
    id: ComponentId,
    link: LinkId,
    count: u64,
    pub sent: u64,
}

impl Streamer {
    pub fn new(id: ComponentId, params: &Params, ctx: &mut dyn CoreCtx) -> Self {
        let link = ctx
            .configure_link("port", "1ps", PORT)
            .expect("Streamer: port 'port' is not wired");
        let freq = params.get("frequency").unwrap_or("1GHz").to_string();
        let count = params.find("count", 1000u64);
        ctx.register_clock(&freq, TAG_STREAM, priority::CLOCK)
            .expect("Streamer: bad frequency");
        Self {
            id,
            link,
            count,
            sent: 0,
        }
    }
}

impl Component for Streamer {
    fn on_clock(&mut self, _tag: ClockTag, _cycle: Cycle, ctx: &mut dyn CoreCtx) -> bool {
        let stamp = Stamp {
            seq: self.sent,
            sent_at: ctx.now(),
        };
        let bytes = postcard::to_allocvec(&stamp).expect("Streamer: encode");
        ctx.send(self.link, 0, Some(Bytes::from(bytes)))
            .expect("Streamer: send failed");
        self.sent += 1;
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

pub struct Collector {
    id: ComponentId,
    expected_latency: CoreTime,
    pub received: u64,
    pub out_of_order: u64,
    pub latency_violations: u64,
    next_seq: u64,
}

impl Collector {
    pub fn new(id: ComponentId, params: &Params, ctx: &mut dyn CoreCtx) -> Self {
        ctx.configure_link("port", "1ps", PORT)
            .expect("Collector: port 'port' is not wired");
        let latency = params.get("expected_latency").unwrap_or("100ns").to_string();
        let expected_latency = ctx
            .sim_cycles(&latency)
            .expect("Collector: bad expected_latency");
        Self {
            id,
            expected_latency,
            received: 0,
            out_of_order: 0,
            latency_violations: 0,
            next_seq: 0,
        }
    }
}

impl Component for Collector {
    fn on_event(&mut self, _port: PortTag, payload: Option<Bytes>, ctx: &mut dyn CoreCtx) {
        let stamp: Stamp = match payload {
            Some(bytes) => postcard::from_bytes(&bytes).expect("Collector: decode"),
            None => return,
        };
        self.received += 1;
        if stamp.seq != self.next_seq {
            self.out_of_order += 1;
        }
        self.next_seq = stamp.seq + 1;
        if ctx.now() != stamp.sent_at + self.expected_latency {
            self.latency_violations += 1;
        }
    }

    fn finish(&mut self, ctx: &mut dyn CoreCtx) {
        ctx.log_kv("received", &self.received.to_string());
    }

    fn persist(&mut self, ser: &mut Serializer) {
        persist_fields!(
            ser,
            self.id,
            self.expected_latency,
            self.received,
            self.out_of_order,
            self.latency_violations,
            self.next_seq
        );
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
