//! # parsim-types::errors
//!
//! The error taxonomy for the parsim workspace. Every fatal contract
//! violation maps onto one of these variants; the driver formats them with
//! the partition identity before aborting. `thiserror` keeps the
//! definitions declarative and the `Display` output deterministic.

use crate::time::CoreTime;
use thiserror::Error;

/// An error while parsing a unit-bearing quantity like `2.5GHz` or `1ps`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnitParseError {
    #[error("invalid unit type '{0}'")]
    InvalidUnit(String),
    #[error("invalid numeric literal '{0}'")]
    InvalidNumber(String),
    #[error("units are incompatible: '{0}' vs '{1}'")]
    IncompatibleUnits(String, String),
    #[error("'{0}' does not carry a time unit (s or Hz)")]
    NoTimeUnit(String),
}

/// A fatal contract violation inside the simulation core.
#[derive(Error, Debug)]
pub enum SimError {
    #[error("simulated time overflow: {base} + {offset}")]
    TimeOverflow { base: CoreTime, offset: CoreTime },
    #[error("simulated time underflow: {base} - {offset}")]
    TimeUnderflow { base: CoreTime, offset: CoreTime },
    #[error(transparent)]
    Units(#[from] UnitParseError),
    #[error("requested period {requested} is smaller than the core time base {base}")]
    UnderflowPeriod { requested: String, base: String },
    #[error("requested period {requested} does not fit in the core time base {base}")]
    OverflowPeriod { requested: String, base: String },
    #[error("wire-up error: {0}")]
    WireUp(String),
    #[error("phase error: {0}")]
    Phase(String),
    #[error("polling link misuse: {0}")]
    PollingMisuse(String),
    #[error(
        "time fault: activity delivered at {event_time} after simulated time \
         had already reached {current} (likely a 64-bit core time overflow; \
         check the --timebase setting)"
    )]
    TimeFault {
        event_time: CoreTime,
        current: CoreTime,
    },
    #[error("unknown component type '{0}'")]
    UnknownComponentType(String),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A failure while synchronizing partitions. Transport failures have no
/// in-band retry; they are fatal.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    #[error("rank transport failure: {0}")]
    Transport(String),
    #[error("sync link '{0}' is not registered on this partition")]
    UnknownSyncLink(String),
}

/// An error while writing or reading a checkpoint.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint blob truncated while reading {0}")]
    Truncated(String),
    #[error("checkpoint schema mismatch: {0}")]
    Schema(String),
    #[error("no registry entry for partition ({rank}:{thread})")]
    RegistryEntryMissing { rank: u32, thread: u32 },
    #[error("time base mismatch: checkpoint was taken with '{theirs}', this run uses '{ours}'")]
    BaseTimeMismatch { ours: String, theirs: String },
    #[error("topology mismatch: checkpoint was taken with {expected}, this run has {found}")]
    TopologyMismatch { expected: String, found: String },
}

/// An error in the command line or run configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unparseable interval '{0}'")]
    BadInterval(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
