//! # parsim-engine::timelord
//!
//! Owner of the process-wide time base and the deduplicated
//! `factor -> TimeConverter` map. All period and frequency strings resolve
//! through here: a period divides by the base, a frequency divides the
//! inverted base. Shared read-only after initialization.

use fxhash::FxHashMap;
use parsim_types::errors::SimError;
use parsim_types::time::{CoreTime, TimeConverter};
use parsim_types::units::UnitAlgebra;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub struct TimeLord {
    base: UnitAlgebra,
    base_string: String,
    tc_map: Mutex<BTreeMap<CoreTime, Arc<TimeConverter>>>,
    parse_cache: Mutex<FxHashMap<String, Arc<TimeConverter>>>,
}

impl TimeLord {
    /// Initializes the time base from a string like `1ps`. The base must
    /// be a time (seconds) quantity.
    pub fn new(timebase: &str) -> Result<Self, SimError> {
        let base = UnitAlgebra::parse(timebase)?;
        if !base.has_units("s") || base.is_zero() {
            return Err(SimError::Units(
                parsim_types::errors::UnitParseError::NoTimeUnit(timebase.to_string()),
            ));
        }
        Ok(Self {
            base,
            base_string: timebase.to_string(),
            tc_map: Mutex::new(BTreeMap::new()),
            parse_cache: Mutex::new(FxHashMap::default()),
        })
    }

    pub fn base_string(&self) -> &str {
        &self.base_string
    }

    pub fn time_base(&self) -> &UnitAlgebra {
        &self.base
    }

    /// The deduplicated converter for a raw factor.
    pub fn converter_for_factor(&self, factor: CoreTime) -> Arc<TimeConverter> {
        let mut map = self.tc_map.lock().expect("timelord map poisoned");
        map.entry(factor)
            .or_insert_with(|| Arc::new(TimeConverter::new(factor)))
            .clone()
    }

    /// Parses a period or frequency string into a converter, with a
    /// parse cache in front of the unit algebra.
    pub fn converter(&self, spec: &str) -> Result<Arc<TimeConverter>, SimError> {
        {
            let cache = self.parse_cache.lock().expect("timelord cache poisoned");
            if let Some(tc) = cache.get(spec) {
                return Ok(tc.clone());
            }
        }
        let ua = UnitAlgebra::parse(spec)?;
        let tc = self.converter_from(&ua)?;
        self.parse_cache
            .lock()
            .expect("timelord cache poisoned")
            .insert(spec.to_string(), tc.clone());
        Ok(tc)
    }

    pub fn converter_from(&self, ua: &UnitAlgebra) -> Result<Arc<TimeConverter>, SimError> {
        let factor = self.factor_for(ua)?;
        Ok(self.converter_for_factor(factor))
    }

    /// The tick count for a period/frequency string.
    pub fn sim_cycles(&self, spec: &str) -> Result<CoreTime, SimError> {
        Ok(self.converter(spec)?.factor())
    }

    /// Resolves a quantity to core ticks. A seconds quantity divides by
    /// the base; a frequency divides the inverted base. Exact zero is
    /// allowed; anything else below one base tick underflows and anything
    /// above `u64::MAX` ticks overflows.
    pub fn factor_for(&self, ua: &UnitAlgebra) -> Result<CoreTime, SimError> {
        let ratio = if ua.has_units("s") {
            ua.clone() / self.base.clone()
        } else if ua.has_units("Hz") {
            self.base.clone().invert() / ua.clone()
        } else {
            return Err(SimError::Units(
                parsim_types::errors::UnitParseError::NoTimeUnit(ua.to_string()),
            ));
        };
        if ratio.is_zero() {
            return Ok(0);
        }
        if ratio.value().cmp_value(&parsim_types::units::Decimal::ONE) == std::cmp::Ordering::Less {
            return Err(SimError::UnderflowPeriod {
                requested: ua.to_string_best_si(),
                base: self.base.to_string_best_si(),
            });
        }
        ratio.rounded().ok_or_else(|| SimError::OverflowPeriod {
            requested: ua.to_string_best_si(),
            base: self.base.to_string_best_si(),
        })
    }

    /// Renders a tick count as a best-SI time string (for heartbeats and
    /// checkpoint headers).
    pub fn format_time(&self, ticks: CoreTime) -> String {
        let scaled = self.base.clone()
            * UnitAlgebra::from_value(parsim_types::units::Decimal::from_u64(ticks));
        scaled.to_string_best_si()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lord() -> TimeLord {
        TimeLord::new("1ps").unwrap()
    }

    #[test]
    fn period_and_frequency_agree() {
        let tl = lord();
        assert_eq!(tl.sim_cycles("1ns").unwrap(), 1000);
        assert_eq!(tl.sim_cycles("1GHz").unwrap(), 1000);
        assert_eq!(tl.sim_cycles("2.5GHz").unwrap(), 400);
        assert_eq!(tl.sim_cycles("100ns").unwrap(), 100_000);
    }

    #[test]
    fn converters_are_deduplicated() {
        let tl = lord();
        let a = tl.converter("1ns").unwrap();
        let b = tl.converter("1GHz").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn underflow_and_overflow() {
        let tl = lord();
        assert!(matches!(
            tl.sim_cycles("1fs"),
            Err(SimError::UnderflowPeriod { .. })
        ));
        // Exact zero is special-cased.
        assert_eq!(tl.sim_cycles("0s").unwrap(), 0);
        assert!(matches!(
            tl.sim_cycles("1000000000s"),
            Err(SimError::OverflowPeriod { .. })
        ));
    }

    #[test]
    fn rejects_non_time_quantities() {
        let tl = lord();
        assert!(tl.sim_cycles("5B").is_err());
        assert!(TimeLord::new("10MiB").is_err());
    }

    #[test]
    fn formats_sim_time() {
        let tl = lord();
        assert_eq!(tl.format_time(1000), "1ns");
        assert_eq!(tl.format_time(100_000), "100ns");
    }
}
