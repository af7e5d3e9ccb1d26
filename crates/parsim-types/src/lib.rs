//! # parsim-types
//!
//! Leaf crate of the parsim workspace. It holds the vocabulary shared by
//! every other crate: the core time representation, unit algebra, identifier
//! types, the error taxonomy, run configuration, and the checkpoint
//! serialization framework (sizer/pack/unpack/map) with its object-map
//! introspection tree.

pub mod config;
pub mod errors;
pub mod ids;
pub mod ser;
pub mod time;
pub mod units;
