//! # parsim-types::units
//!
//! Decimal unit algebra for parsing and manipulating quantities like
//! `2.5GHz`, `1ps` or `8GiB/s`. A [`UnitAlgebra`] couples an exact decimal
//! value with a reduced rational of base units, so that dividing a period
//! by the core time base yields an exact tick count with no floating-point
//! rounding.
//!
//! Base units are `s`, `B`, `b` and `events`; `Hz`, `hz`, `Bps`, `bps` and
//! `event` are compound aliases. SI prefixes cover `a` through `E` plus the
//! binary `Ki`..`Ei` forms.

use crate::errors::UnitParseError;
use std::cmp::Ordering;
use std::fmt;

// ---------------------------------------------------------------------------
// Decimal arithmetic
// ---------------------------------------------------------------------------

/// An unsigned decimal number `mant * 10^exp`, normalized so the mantissa
/// carries no trailing zeros. Precision degrades gracefully (low digits are
/// shed) only when an operation would overflow the 128-bit mantissa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimal {
    mant: u128,
    exp: i32,
}

impl Decimal {
    pub const ZERO: Decimal = Decimal { mant: 0, exp: 0 };
    pub const ONE: Decimal = Decimal { mant: 1, exp: 0 };

    pub fn new(mant: u128, exp: i32) -> Self {
        let mut d = Decimal { mant, exp };
        d.normalize();
        d
    }

    pub fn from_u64(v: u64) -> Self {
        Decimal::new(v as u128, 0)
    }

    fn normalize(&mut self) {
        if self.mant == 0 {
            self.exp = 0;
            return;
        }
        while self.mant % 10 == 0 {
            self.mant /= 10;
            self.exp += 1;
        }
    }

    pub fn is_zero(&self) -> bool {
        self.mant == 0
    }

    /// Parses a decimal literal: digits, optional fraction, optional
    /// `e`/`E` exponent. No sign; simulated quantities are non-negative.
    pub fn parse(s: &str) -> Result<Self, UnitParseError> {
        let bad = || UnitParseError::InvalidNumber(s.to_string());
        let (num_part, exp_part) = match s.find(['e', 'E']) {
            Some(i) => (&s[..i], Some(&s[i + 1..])),
            None => (s, None),
        };
        if num_part.is_empty() {
            return Err(bad());
        }
        let mut mant: u128 = 0;
        let mut exp: i32 = 0;
        let mut seen_point = false;
        let mut seen_digit = false;
        for c in num_part.chars() {
            match c {
                '0'..='9' => {
                    seen_digit = true;
                    let digit = (c as u8 - b'0') as u128;
                    match mant.checked_mul(10).and_then(|m| m.checked_add(digit)) {
                        Some(m) => {
                            mant = m;
                            if seen_point {
                                exp -= 1;
                            }
                        }
                        // Mantissa is full; drop the digit, track magnitude.
                        None => {
                            if !seen_point {
                                exp += 1;
                            }
                        }
                    }
                }
                '.' if !seen_point => seen_point = true,
                _ => return Err(bad()),
            }
        }
        if !seen_digit {
            return Err(bad());
        }
        if let Some(e) = exp_part {
            let parsed: i32 = e.parse().map_err(|_| bad())?;
            exp += parsed;
        }
        Ok(Decimal::new(mant, exp))
    }

    pub fn mul(self, other: Decimal) -> Decimal {
        let (mut a, mut b) = (self, other);
        loop {
            match a.mant.checked_mul(b.mant) {
                Some(m) => return Decimal::new(m, a.exp + b.exp),
                None => {
                    // Shed one digit of precision from the larger mantissa.
                    if a.mant >= b.mant {
                        a.mant /= 10;
                        a.exp += 1;
                    } else {
                        b.mant /= 10;
                        b.exp += 1;
                    }
                }
            }
        }
    }

    pub fn div(self, other: Decimal) -> Decimal {
        if other.mant == 0 {
            // Division by zero has no meaning for simulated quantities;
            // surface it loudly rather than produce garbage.
            panic!("decimal division by zero");
        }
        if self.mant == 0 {
            return Decimal::ZERO;
        }
        // Scale the dividend as far up as it will go so the integer
        // quotient retains full precision.
        let mut mant = self.mant;
        let mut exp = self.exp;
        while mant <= u128::MAX / 10 {
            mant *= 10;
            exp -= 1;
        }
        Decimal::new(mant / other.mant, exp - other.exp)
    }

    /// Aligns two decimals to a common exponent, shedding low digits when
    /// the scale-up would overflow.
    fn align(mut a: Decimal, mut b: Decimal) -> (u128, u128, i32) {
        loop {
            let (hi, lo) = if a.exp >= b.exp {
                (&mut a, &mut b)
            } else {
                (&mut b, &mut a)
            };
            let diff = (hi.exp - lo.exp) as u32;
            match 10u128
                .checked_pow(diff.min(39))
                .and_then(|p| hi.mant.checked_mul(p))
            {
                Some(scaled) if diff <= 39 => {
                    hi.mant = scaled;
                    hi.exp = lo.exp;
                    return (a.mant, b.mant, a.exp);
                }
                _ => {
                    // The low value is negligible at this precision.
                    lo.mant /= 10;
                    lo.exp += 1;
                    if lo.mant == 0 {
                        lo.exp = hi.exp;
                        return (a.mant, b.mant, a.exp);
                    }
                }
            }
        }
    }

    pub fn add(self, other: Decimal) -> Decimal {
        let (a, b, exp) = Decimal::align(self, other);
        match a.checked_add(b) {
            Some(m) => Decimal::new(m, exp),
            None => Decimal::new(a / 10 + b / 10, exp + 1),
        }
    }

    pub fn sub(self, other: Decimal) -> Option<Decimal> {
        let (a, b, exp) = Decimal::align(self, other);
        a.checked_sub(b).map(|m| Decimal::new(m, exp))
    }

    pub fn cmp_value(&self, other: &Decimal) -> Ordering {
        let (a, b, _) = Decimal::align(*self, *other);
        a.cmp(&b)
    }

    /// The value rounded to the nearest integer, or `None` if it exceeds
    /// `u64::MAX`.
    pub fn round_u64(&self) -> Option<u64> {
        if self.exp >= 0 {
            let p = 10u128.checked_pow(self.exp as u32)?;
            let v = self.mant.checked_mul(p)?;
            u64::try_from(v).ok()
        } else {
            let neg = (-self.exp) as u32;
            if neg > 38 {
                return Some(0);
            }
            let d = 10u128.pow(neg);
            let q = self.mant / d;
            let r = self.mant % d;
            let rounded = q + u128::from(r * 2 >= d);
            u64::try_from(rounded).ok()
        }
    }

    /// Decimal exponent of the leading digit (`1500 -> 3`, `0.02 -> -2`).
    fn magnitude(&self) -> i32 {
        if self.mant == 0 {
            return 0;
        }
        self.exp + self.mant.ilog10() as i32
    }

    /// Renders `mant * 10^shift` as a plain decimal string.
    fn to_plain_string(mut self, shift: i32) -> String {
        self.exp += shift;
        self.normalize();
        let digits = self.mant.to_string();
        if self.exp >= 0 {
            let mut s = digits;
            s.extend(std::iter::repeat('0').take(self.exp as usize));
            s
        } else {
            let frac = (-self.exp) as usize;
            if digits.len() > frac {
                let (int_part, frac_part) = digits.split_at(digits.len() - frac);
                format!("{int_part}.{frac_part}")
            } else {
                let zeros = "0".repeat(frac - digits.len());
                format!("0.{zeros}{digits}")
            }
        }
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_plain_string(0))
    }
}

// ---------------------------------------------------------------------------
// Units
// ---------------------------------------------------------------------------

const BASE_UNITS: &[&str] = &["s", "B", "b", "events"];

// (alias, expansion-as-units); all alias multipliers are 1.
const COMPOUND_UNITS: &[(&str, &str)] = &[
    ("Hz", "1/s"),
    // Wrong case, but common enough to accept.
    ("hz", "1/s"),
    ("Bps", "B/s"),
    ("bps", "b/s"),
    ("event", "events"),
];

fn si_prefix(prefix: &str) -> Option<Decimal> {
    let d = match prefix {
        "a" => Decimal::new(1, -18),
        "f" => Decimal::new(1, -15),
        "p" => Decimal::new(1, -12),
        "n" => Decimal::new(1, -9),
        "u" => Decimal::new(1, -6),
        "m" => Decimal::new(1, -3),
        "k" | "K" => Decimal::new(1, 3),
        "M" => Decimal::new(1, 6),
        "G" => Decimal::new(1, 9),
        "T" => Decimal::new(1, 12),
        "P" => Decimal::new(1, 15),
        "E" => Decimal::new(1, 18),
        "ki" | "Ki" => Decimal::from_u64(1 << 10),
        "Mi" => Decimal::from_u64(1 << 20),
        "Gi" => Decimal::from_u64(1 << 30),
        "Ti" => Decimal::from_u64(1 << 40),
        "Pi" => Decimal::from_u64(1 << 50),
        "Ei" => Decimal::from_u64(1 << 60),
        _ => return None,
    };
    Some(d)
}

/// A reduced rational of base-unit ids.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Units {
    num: Vec<u8>,
    den: Vec<u8>,
}

impl Units {
    /// Parses a unit expression like `B/s` or `Mi-b/s`, accumulating SI
    /// prefix factors into `multiplier`.
    pub fn parse(units: &str, multiplier: &mut Decimal) -> Result<Self, UnitParseError> {
        let mut out = Units::default();
        let (num_str, den_str) = match units.find('/') {
            Some(i) => (&units[..i], Some(&units[i + 1..])),
            None => (units, None),
        };
        for token in num_str.split('-').filter(|t| !t.is_empty()) {
            out.add_unit(token, multiplier, false)?;
        }
        if let Some(den) = den_str {
            for token in den.split('-').filter(|t| !t.is_empty()) {
                out.add_unit(token, multiplier, true)?;
            }
        }
        out.reduce();
        Ok(out)
    }

    fn base_unit_id(token: &str) -> Option<u8> {
        BASE_UNITS.iter().position(|u| *u == token).map(|i| i as u8)
    }

    fn compound_unit(token: &str) -> Option<&'static str> {
        COMPOUND_UNITS
            .iter()
            .find(|(alias, _)| *alias == token)
            .map(|(_, expansion)| *expansion)
    }

    fn add_unit(
        &mut self,
        token: &str,
        multiplier: &mut Decimal,
        invert: bool,
    ) -> Result<(), UnitParseError> {
        // Direct matches take precedence over prefix stripping, so that
        // e.g. `s` is the unit, not a prefix-less oddity.
        let mut si_len = 0;
        if Units::base_unit_id(token).is_none() && Units::compound_unit(token).is_none() {
            let bytes = token.as_bytes();
            si_len = match bytes.first() {
                Some(b'a' | b'f' | b'p' | b'n' | b'u' | b'm') => 1,
                Some(b'k' | b'K' | b'M' | b'G' | b'T' | b'P' | b'E') => {
                    if bytes.get(1) == Some(&b'i') {
                        2
                    } else {
                        1
                    }
                }
                _ => 0,
            };
        }
        if si_len > 0 {
            let prefix = si_prefix(&token[..si_len])
                .ok_or_else(|| UnitParseError::InvalidUnit(token.to_string()))?;
            if invert {
                *multiplier = multiplier.div(prefix);
            } else {
                *multiplier = multiplier.mul(prefix);
            }
        }

        let kind = &token[si_len..];
        if let Some(id) = Units::base_unit_id(kind) {
            if invert {
                self.den.push(id);
            } else {
                self.num.push(id);
            }
        } else if let Some(expansion) = Units::compound_unit(kind) {
            let mut sub_mult = Decimal::ONE;
            let sub = Units::parse(expansion, &mut sub_mult)?;
            if invert {
                self.div_assign(&sub);
            } else {
                self.mul_assign(&sub);
            }
        } else if kind == "1" {
            // Bare numeral numerator, e.g. the "1" in "1/s".
        } else {
            return Err(UnitParseError::InvalidUnit(kind.to_string()));
        }
        Ok(())
    }

    fn reduce(&mut self) {
        self.num.sort_unstable();
        self.den.sort_unstable();
        let mut n = 0;
        while n < self.num.len() {
            if let Some(d) = self.den.iter().position(|d| *d == self.num[n]) {
                self.num.remove(n);
                self.den.remove(d);
            } else {
                n += 1;
            }
        }
    }

    pub fn mul_assign(&mut self, other: &Units) {
        self.num.extend_from_slice(&other.num);
        self.den.extend_from_slice(&other.den);
        self.reduce();
    }

    pub fn div_assign(&mut self, other: &Units) {
        self.num.extend_from_slice(&other.den);
        self.den.extend_from_slice(&other.num);
        self.reduce();
    }

    pub fn invert(&mut self) {
        std::mem::swap(&mut self.num, &mut self.den);
    }

    pub fn is_dimensionless(&self) -> bool {
        self.num.is_empty() && self.den.is_empty()
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dimensionless() {
            return Ok(());
        }
        // Special-case the most common compound.
        let mut hz_mult = Decimal::ONE;
        if *self == Units::parse("1/s", &mut hz_mult).unwrap() {
            return write!(f, "Hz");
        }
        if self.num.is_empty() {
            write!(f, "1")?;
        } else {
            for (i, id) in self.num.iter().enumerate() {
                if i > 0 {
                    write!(f, "-")?;
                }
                write!(f, "{}", BASE_UNITS[*id as usize])?;
            }
        }
        if !self.den.is_empty() {
            write!(f, "/")?;
            for (i, id) in self.den.iter().enumerate() {
                if i > 0 {
                    write!(f, "-")?;
                }
                write!(f, "{}", BASE_UNITS[*id as usize])?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// UnitAlgebra
// ---------------------------------------------------------------------------

/// A decimal value with units.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitAlgebra {
    value: Decimal,
    units: Units,
}

impl UnitAlgebra {
    /// Parses a quantity: a decimal literal followed by an optional unit
    /// expression, e.g. `1ps`, `2.5GHz`, `512MiB/s`.
    pub fn parse(s: &str) -> Result<Self, UnitParseError> {
        let trimmed = s.trim();
        // The number ends at the last digit or decimal point, scanning
        // from the back. An exponent ('e'/'E' followed by digits) is part
        // of the number, which the scan handles naturally.
        let mut split = 0;
        for (i, c) in trimmed.char_indices().rev() {
            if c.is_ascii_digit() || c == '.' {
                split = i + c.len_utf8();
                break;
            }
        }
        if split == 0 {
            return Err(UnitParseError::InvalidNumber(trimmed.to_string()));
        }
        let number = trimmed[..split].trim();
        let unit_str = trimmed[split..].trim();

        let mut multiplier = Decimal::ONE;
        let units = Units::parse(unit_str, &mut multiplier)?;
        let value = Decimal::parse(number)?.mul(multiplier);
        Ok(UnitAlgebra { value, units })
    }

    pub fn from_value(value: Decimal) -> Self {
        UnitAlgebra {
            value,
            units: Units::default(),
        }
    }

    pub fn value(&self) -> Decimal {
        self.value
    }

    pub fn units(&self) -> &Units {
        &self.units
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    /// True if this quantity's units reduce to the units of `expr`.
    pub fn has_units(&self, expr: &str) -> bool {
        let mut mult = Decimal::ONE;
        match Units::parse(expr, &mut mult) {
            Ok(u) => u == self.units,
            Err(_) => false,
        }
    }

    pub fn invert(mut self) -> Self {
        self.value = Decimal::ONE.div(self.value);
        self.units.invert();
        self
    }

    /// The value rounded to a u64, or `None` when it does not fit.
    pub fn rounded(&self) -> Option<u64> {
        self.value.round_u64()
    }

    pub fn checked_add(&self, other: &UnitAlgebra) -> Result<UnitAlgebra, UnitParseError> {
        if self.units != other.units {
            return Err(UnitParseError::IncompatibleUnits(
                self.units.to_string(),
                other.units.to_string(),
            ));
        }
        Ok(UnitAlgebra {
            value: self.value.add(other.value),
            units: self.units.clone(),
        })
    }

    pub fn checked_sub(&self, other: &UnitAlgebra) -> Result<UnitAlgebra, UnitParseError> {
        if self.units != other.units {
            return Err(UnitParseError::IncompatibleUnits(
                self.units.to_string(),
                other.units.to_string(),
            ));
        }
        let value = self.value.sub(other.value).ok_or_else(|| {
            UnitParseError::InvalidNumber(format!("{} - {} is negative", self, other))
        })?;
        Ok(UnitAlgebra {
            value,
            units: self.units.clone(),
        })
    }

    /// Renders with the SI prefix that keeps the numeral in `[1, 1000)`.
    pub fn to_string_best_si(&self) -> String {
        const PREFIXES: &[(i32, &str)] = &[
            (-18, "a"),
            (-15, "f"),
            (-12, "p"),
            (-9, "n"),
            (-6, "u"),
            (-3, "m"),
            (0, ""),
            (3, "k"),
            (6, "M"),
            (9, "G"),
            (12, "T"),
            (15, "P"),
            (18, "E"),
        ];
        if self.value.is_zero() {
            return format!("0{}", self.units);
        }
        let mag = self.value.magnitude();
        let target = (mag.div_euclid(3) * 3).clamp(-18, 18);
        let prefix = PREFIXES
            .iter()
            .find(|(e, _)| *e == target)
            .map(|(_, p)| *p)
            .unwrap_or("");
        format!(
            "{}{}{}",
            self.value.to_plain_string(-target),
            prefix,
            self.units
        )
    }
}

impl std::ops::Mul for UnitAlgebra {
    type Output = UnitAlgebra;
    fn mul(mut self, rhs: UnitAlgebra) -> UnitAlgebra {
        self.value = self.value.mul(rhs.value);
        self.units.mul_assign(&rhs.units);
        self
    }
}

impl std::ops::Div for UnitAlgebra {
    type Output = UnitAlgebra;
    fn div(mut self, rhs: UnitAlgebra) -> UnitAlgebra {
        self.value = self.value.div(rhs.value);
        self.units.div_assign(&rhs.units);
        self
    }
}

impl PartialOrd for UnitAlgebra {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.units != other.units {
            return None;
        }
        Some(self.value.cmp_value(&other.value))
    }
}

impl fmt::Display for UnitAlgebra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.units)
    }
}

impl std::str::FromStr for UnitAlgebra {
    type Err = UnitParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UnitAlgebra::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ua(s: &str) -> UnitAlgebra {
        UnitAlgebra::parse(s).unwrap()
    }

    #[test]
    fn parse_simple_times() {
        assert!(ua("1ps").has_units("s"));
        assert!(ua("2.5GHz").has_units("Hz"));
        assert!(ua("10ns").has_units("s"));
        assert_eq!(ua("1ns").value(), Decimal::new(1, -9));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(UnitAlgebra::parse("fast").is_err());
        assert!(UnitAlgebra::parse("12 parsecs").is_err());
        assert!(UnitAlgebra::parse("1.2.3s").is_err());
    }

    #[test]
    fn period_over_base_is_exact() {
        let factor = (ua("1ns") / ua("1ps")).rounded().unwrap();
        assert_eq!(factor, 1000);
        let factor = (ua("100ns") / ua("1ps")).rounded().unwrap();
        assert_eq!(factor, 100_000);
    }

    #[test]
    fn frequency_inverts_to_period() {
        // 1 GHz against a 1 ps base: 1000 ticks per cycle.
        let base = ua("1ps");
        let freq = ua("1GHz");
        let factor = (base.invert() / freq).rounded().unwrap();
        assert_eq!(factor, 1000);
    }

    #[test]
    fn binary_prefixes() {
        assert_eq!(ua("1KiB").value(), Decimal::from_u64(1024));
        assert_eq!(ua("1MiB").value(), Decimal::from_u64(1024 * 1024));
    }

    #[test]
    fn compound_units_reduce() {
        let rate = ua("8Gbps");
        assert!(rate.has_units("b/s"));
        let per_sec = ua("10events") / ua("2s");
        assert!(per_sec.has_units("events/s"));
        assert_eq!(per_sec.value(), Decimal::from_u64(5));
    }

    #[test]
    fn addition_needs_matching_units() {
        let sum = ua("1ns").checked_add(&ua("500ps")).unwrap();
        assert_eq!(sum.value(), Decimal::new(15, -10));
        assert!(ua("1ns").checked_add(&ua("1B")).is_err());
    }

    #[test]
    fn best_si_display() {
        assert_eq!(ua("1000ps").to_string_best_si(), "1ns");
        assert_eq!(ua("2500ps").to_string_best_si(), "2.5ns");
        assert_eq!(ua("1GHz").to_string_best_si(), "1GHz");
    }

    #[test]
    fn comparison() {
        assert!(ua("1ns") > ua("500ps"));
        assert!(ua("1ns").partial_cmp(&ua("1B")).is_none());
    }

    #[test]
    fn decimal_rounding() {
        assert_eq!(Decimal::parse("1.5").unwrap().round_u64(), Some(2));
        assert_eq!(Decimal::parse("1.49").unwrap().round_u64(), Some(1));
        assert_eq!(Decimal::new(1, 30).round_u64(), None);
    }
}
