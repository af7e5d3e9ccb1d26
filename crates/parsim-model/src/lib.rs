//! # parsim-model
//!
//! The component API surface of the parsim workspace. It separates the
//! engine-facing dynamic trait (`Component`) and the core's callback
//! surface (`CoreCtx`) from the engine internals, so component libraries
//! depend only on this crate and `parsim-types`.
//!
//! Also home to the factory registry the core consumes to build component
//! instances from type names, and a handful of demo components used by
//! the CLI demo wirings and the engine's end-to-end tests.

pub mod api;
pub mod components;
pub mod factory;
pub mod params;

pub use api::{Component, CoreCtx};
pub use factory::{BuildFn, Factory, Library};
pub use params::Params;
