//! # parsim-types::time
//!
//! The core time representation. All simulated time is a dimensionless count
//! of ticks of the process-wide base period (set once at startup, e.g. 1 ps);
//! the unit algebra in [`crate::units`] converts human-readable periods and
//! frequencies into tick counts.

use crate::errors::SimError;
use crate::ser::{Persist, Serializer};

/// A count of core ticks. Interpreted against the process-wide base period.
pub type CoreTime = u64;

/// A count of ticks of some coarser clock (a multiple of the base period).
pub type Cycle = u64;

/// The start of simulated time.
pub const TIME_EPOCH: CoreTime = 0;

/// Distinguished "never" value.
pub const TIME_MAX: CoreTime = u64::MAX;

/// Activity priority. Lower numbers fire first among activities scheduled
/// at the same instant.
pub type Priority = u64;

/// Well-known priorities. Events sit below clocks so that at an equal
/// instant a delivery is seen before the tick that might consume it, and
/// Stop runs after all same-instant work so a `--stop-at T` run includes
/// everything scheduled at `T`.
pub mod priority {
    use super::Priority;

    pub const THREAD_SYNC: Priority = 20;
    pub const RANK_SYNC: Priority = 25;
    pub const INTERACTIVE: Priority = 30;
    pub const CHECKPOINT: Priority = 35;
    pub const HEARTBEAT: Priority = 45;
    pub const EVENT: Priority = 50;
    pub const CLOCK: Priority = 60;
    pub const ONESHOT: Priority = 80;
    pub const STOP: Priority = 98;
    pub const EXIT: Priority = 99;
}

/// Converts between core ticks and the ticks of a coarser time base.
///
/// One tick of this converter equals `factor` core ticks. A factor of zero
/// means the converter has not been initialized; using an uninitialized
/// converter for conversion is a caller bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeConverter {
    factor: CoreTime,
}

impl TimeConverter {
    /// The uninitialized converter.
    pub const UNINIT: TimeConverter = TimeConverter { factor: 0 };

    pub const fn new(factor: CoreTime) -> Self {
        Self { factor }
    }

    pub const fn factor(&self) -> CoreTime {
        self.factor
    }

    pub const fn is_initialized(&self) -> bool {
        self.factor != 0
    }

    /// Converts a core-tick count into ticks of this converter's base.
    pub fn from_core(&self, core: CoreTime) -> Cycle {
        core / self.factor
    }

    /// Converts a tick count of this converter's base into core ticks.
    pub fn to_core(&self, cycles: Cycle) -> CoreTime {
        cycles * self.factor
    }
}

impl Persist for TimeConverter {
    fn persist(&mut self, ser: &mut Serializer) {
        self.factor.persist(ser);
    }
}

/// Checked addition on `CoreTime`, erroring on wraparound.
pub fn checked_add(base: CoreTime, offset: CoreTime) -> Result<CoreTime, SimError> {
    base.checked_add(offset)
        .ok_or(SimError::TimeOverflow { base, offset })
}

/// Checked subtraction on `CoreTime`, erroring on underflow.
pub fn checked_sub(base: CoreTime, offset: CoreTime) -> Result<CoreTime, SimError> {
    base.checked_sub(offset)
        .ok_or(SimError::TimeUnderflow { base, offset })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converter_round_trip() {
        let tc = TimeConverter::new(1000);
        assert_eq!(tc.to_core(3), 3000);
        assert_eq!(tc.from_core(3500), 3);
    }

    #[test]
    fn uninitialized_converter_is_flagged() {
        assert!(!TimeConverter::UNINIT.is_initialized());
        assert!(TimeConverter::new(1).is_initialized());
    }

    #[test]
    fn checked_arithmetic() {
        assert_eq!(checked_add(1, 2).unwrap(), 3);
        assert!(checked_add(TIME_MAX, 1).is_err());
        assert!(checked_sub(0, 1).is_err());
    }
}
