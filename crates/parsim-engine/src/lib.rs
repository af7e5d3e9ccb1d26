//! # parsim-engine
//!
//! The parallel discrete-event simulation core. This crate contains the
//! per-partition activity queue (the TimeVortex), the link and event
//! delivery machinery, the clock scheduler, the component tree, the
//! partition synchronization manager, the checkpoint/restart engine, and
//! the simulation lifecycle driver.

pub mod activity;
pub mod builder;
pub mod checkpoint;
pub mod clock;
pub mod component;
pub mod exit;
pub mod handler;
pub mod link;
pub mod linkmap;
pub mod prelude;
pub mod realtime;
pub mod sim;
pub mod sync;
pub mod timelord;
pub mod timevortex;
