//! A ping-pong endpoint: every received payload is re-sent incremented by
//! one with zero delay, so two connected `Pinger`s bounce an event back
//! and forth at the link latency.

use crate::api::{Component, CoreCtx};
use crate::params::Params;
use bytes::Bytes;
use parsim_types::ids::{ClockTag, ComponentId, LinkId, PortTag};
use parsim_types::ser::Serializer;
use parsim_types::time::priority;
use parsim_types::persist_fields;
use std::any::Any;

const PORT: PortTag = 0;

pub struct Pinger {
    id: ComponentId,
    link: LinkId,
    starter: bool,
    pub sent: u64,
    pub delivered: u64,
    pub last_payload: Option<u64>,
}

impl Pinger {
    pub fn new(id: ComponentId, params: &Params, ctx: &mut dyn CoreCtx) -> Self {
        let link = ctx
            .configure_link("port", "1ps", PORT)
            .expect("Pinger: port 'port' is not wired");
        let starter = params.find("starter", false);
        if starter {
            // Seed the exchange with a payload-0 event at t=0.
            ctx.register_oneshot("0s", 0, priority::ONESHOT)
                .expect("Pinger: bad seed delay");
        }
        Self {
            id,
            link,
            starter,
            sent: 0,
            delivered: 0,
            last_payload: None,
        }
    }

    fn send_value(&mut self, value: u64, ctx: &mut dyn CoreCtx) {
        let bytes = postcard::to_allocvec(&value).expect("Pinger: payload encode");
        ctx.send(self.link, 0, Some(Bytes::from(bytes)))
            .expect("Pinger: send failed");
        self.sent += 1;
    }
}

impl Component for Pinger {
    fn on_oneshot(&mut self, _tag: ClockTag, ctx: &mut dyn CoreCtx) {
        self.send_value(0, ctx);
    }

    fn on_event(&mut self, _port: PortTag, payload: Option<Bytes>, ctx: &mut dyn CoreCtx) {
        let value: u64 = match payload {
            Some(bytes) => postcard::from_bytes(&bytes).expect("Pinger: payload decode"),
            None => 0,
        };
        self.delivered += 1;
        self.last_payload = Some(value);
        self.send_value(value + 1, ctx);
    }

    fn finish(&mut self, ctx: &mut dyn CoreCtx) {
        ctx.log_kv("delivered", &self.delivered.to_string());
    }

    fn persist(&mut self, ser: &mut Serializer) {
        persist_fields!(
            ser,
            self.id,
            self.link,
            self.starter,
            self.sent,
            self.delivered,
            self.last_payload
        );
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
