//! # parsim-engine::prelude
//!
//! Re-exports of the most commonly used types from the engine and its
//! dependencies, to simplify imports for crates building on the engine.

pub use crate::{
    activity::{Activity, EventEnvelope, Scheduled},
    builder::{run_process, LinkEnd, SimBuilder},
    checkpoint::{map_partition, restart_process},
    clock::{Clock, OneShot},
    component::ComponentInfo,
    exit::Exit,
    link::{Link, LinkArena, LinkKind, LinkMode, LinkTool},
    linkmap::LinkMap,
    sim::{RunMode, Sim},
    sync::{
        transport::{ChannelTransport, LoopbackTransport, RankTransport},
        SyncManager,
    },
    timelord::TimeLord,
    timevortex::TimeVortex,
};

pub use parsim_types::{config::*, errors::*, ids::*, time::*, units::*};

pub use parsim_model::{api::*, factory::*, params::Params};
