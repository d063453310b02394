//! fixed point amounts
//!
//! every amount that crosses the contract boundary is an integer scaled by
//! 10^decimals (18 for the engine, the stablecoin and weth). conversion to
//! and from human decimal strings happens only at the edges, and all math in
//! between is exact integer math with the contract's truncation order.

use std::fmt;

use primitive_types::U256;

use crate::error::{EngineError, Result};

/// protocol fixed point convention
pub const DEFAULT_DECIMALS: u8 = 18;

/// largest scale we accept (10^38 still leaves headroom in a uint256)
pub const MAX_DECIMALS: u8 = 38;

/// divisor used by `percentage_of`
pub const PERCENT: u64 = 100;

/// integer amount scaled by 10^18
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScaledAmount(U256);

impl ScaledAmount {
    pub const ZERO: ScaledAmount = ScaledAmount(U256([0; 4]));

    /// wrap a raw integer already in scaled form
    pub const fn from_raw(raw: U256) -> Self {
        Self(raw)
    }

    /// raw scaled integer as the contract sees it
    pub const fn raw(&self) -> U256 {
        self.0
    }

    /// whole units, e.g. `units(10)` is 10.0
    pub fn units(whole: u64) -> Self {
        Self(U256::from(whole) * scale(DEFAULT_DECIMALS))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(self, other: Self) -> Result<Self> {
        self.0.checked_add(other.0).map(Self).ok_or(EngineError::Overflow)
    }

    pub fn checked_sub(self, other: Self) -> Result<Self> {
        self.0.checked_sub(other.0).map(Self).ok_or(EngineError::Overflow)
    }

    /// subtraction clamped at zero
    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for ScaledAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&from_scaled(*self, DEFAULT_DECIMALS))
    }
}

impl fmt::Debug for ScaledAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScaledAmount({})", self)
    }
}

impl From<U256> for ScaledAmount {
    fn from(raw: U256) -> Self {
        Self(raw)
    }
}

/// 10^decimals
pub fn scale(decimals: u8) -> U256 {
    U256::exp10(decimals as usize)
}

/// parse a human decimal string ("12.5") into a scaled amount
///
/// rejects empty input, signs, non-digits and more fractional digits than
/// `decimals` can carry. nothing is rounded.
pub fn to_scaled(input: &str, decimals: u8) -> Result<ScaledAmount> {
    if decimals > MAX_DECIMALS {
        return Err(EngineError::Parse(format!("unsupported decimals: {}", decimals)));
    }

    let s = input.trim();
    if s.is_empty() {
        return Err(EngineError::Parse("empty amount".into()));
    }
    if s.starts_with('-') {
        return Err(EngineError::Parse(format!("negative amount: {}", s)));
    }

    let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
    if whole.is_empty() && frac.is_empty() {
        return Err(EngineError::Parse(format!("not a number: {}", s)));
    }
    let is_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if !is_digits(whole) || !is_digits(frac) {
        return Err(EngineError::Parse(format!("not a number: {}", s)));
    }
    if frac.len() > decimals as usize {
        return Err(EngineError::Parse(format!(
            "too many decimal places: {} (max {})",
            frac.len(),
            decimals
        )));
    }

    let whole_value = parse_digits(whole)?;
    let frac_value = parse_digits(frac)?
        .checked_mul(scale(decimals - frac.len() as u8))
        .ok_or(EngineError::Overflow)?;

    whole_value
        .checked_mul(scale(decimals))
        .and_then(|v| v.checked_add(frac_value))
        .map(ScaledAmount)
        .ok_or(EngineError::Overflow)
}

fn parse_digits(digits: &str) -> Result<U256> {
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_dec_str(digits).map_err(|_| EngineError::Overflow)
}

/// exact decimal rendering, trailing zeros trimmed ("1.5", "16000")
pub fn from_scaled(amount: ScaledAmount, decimals: u8) -> String {
    let unit = scale(decimals);
    let whole = amount.0 / unit;
    let frac = amount.0 % unit;
    if frac.is_zero() {
        return whole.to_string();
    }

    let frac = format!("{:0>width$}", frac.to_string(), width = decimals as usize);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

/// presentation only: truncates (never rounds) to `precision` fractional digits
pub fn format_display(amount: ScaledAmount, decimals: u8, precision: u8) -> String {
    let exact = from_scaled(amount, decimals);
    match exact.split_once('.') {
        Some((whole, frac)) => {
            let cut = &frac[..frac.len().min(precision as usize)];
            let cut = cut.trim_end_matches('0');
            if cut.is_empty() {
                whole.to_string()
            } else {
                format!("{}.{}", whole, cut)
            }
        }
        None => exact,
    }
}

/// floor(a * b / c), multiply first like the contract does
pub fn mul_div(a: U256, b: U256, c: U256) -> Result<U256> {
    if c.is_zero() {
        return Err(EngineError::DivisionByZero);
    }
    a.checked_mul(b).map(|p| p / c).ok_or(EngineError::Overflow)
}

/// `amount * numerator / denominator`, floored
pub fn fraction_of(amount: ScaledAmount, numerator: u64, denominator: u64) -> Result<ScaledAmount> {
    mul_div(amount.0, U256::from(numerator), U256::from(denominator)).map(ScaledAmount)
}

/// `amount * percent / 100`, floored
pub fn percentage_of(amount: ScaledAmount, percent: u64) -> Result<ScaledAmount> {
    fraction_of(amount, percent, PERCENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scaled(s: &str) -> ScaledAmount {
        to_scaled(s, DEFAULT_DECIMALS).unwrap()
    }

    #[test]
    fn test_parse_whole_and_fraction() {
        assert_eq!(scaled("1"), ScaledAmount::units(1));
        assert_eq!(scaled("0.5").raw(), U256::exp10(17) * U256::from(5u64));
        assert_eq!(scaled(".25").raw(), U256::exp10(16) * U256::from(25u64));
        assert_eq!(scaled("7.").raw(), U256::exp10(18) * U256::from(7u64));
        assert_eq!(scaled("0.000000000000000001").raw(), U256::one());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "   ", ".", "-1", "1e5", "abc", "1.2.3", "0x10", "1,5"] {
            let err = to_scaled(bad, DEFAULT_DECIMALS).unwrap_err();
            assert!(matches!(err, EngineError::Parse(_)), "{bad:?} gave {err:?}");
        }
    }

    #[test]
    fn test_parse_rejects_excess_precision() {
        assert!(to_scaled("0.0000000000000000001", 18).is_err());
        assert!(to_scaled("1.234", 2).is_err());
        assert_eq!(to_scaled("1.23", 2).unwrap().raw(), U256::from(123));
    }

    #[test]
    fn test_parse_overflow() {
        let huge = "9".repeat(80);
        assert_eq!(to_scaled(&huge, 18), Err(EngineError::Overflow));
    }

    #[test]
    fn test_from_scaled_trims() {
        assert_eq!(from_scaled(scaled("1.50"), 18), "1.5");
        assert_eq!(from_scaled(scaled("16000"), 18), "16000");
        assert_eq!(from_scaled(ScaledAmount::ZERO, 18), "0");
        assert_eq!(from_scaled(ScaledAmount::from_raw(U256::one()), 18), "0.000000000000000001");
    }

    #[test]
    fn test_display_truncates() {
        let amount = scaled("2.777777777777777777");
        assert_eq!(format_display(amount, 18, 4), "2.7777");
        assert_eq!(format_display(scaled("3.0001"), 18, 2), "3");
        assert_eq!(format_display(scaled("42"), 18, 2), "42");
    }

    #[test]
    fn test_percentage_truncates() {
        assert_eq!(percentage_of(scaled("10"), 33).unwrap(), scaled("3.3"));
        assert_eq!(percentage_of(scaled("1"), 1).unwrap(), scaled("0.01"));

        // 199 * 1 / 100 = 1.99 -> 1, never 2
        let tiny = ScaledAmount::from_raw(U256::from(199));
        assert_eq!(percentage_of(tiny, 1).unwrap().raw(), U256::one());
        let dust = ScaledAmount::from_raw(U256::from(99));
        assert!(percentage_of(dust, 1).unwrap().is_zero());
    }

    #[test]
    fn test_percentage_multiplies_before_dividing() {
        // dividing first would give 0 * 33
        let amount = ScaledAmount::from_raw(U256::from(50));
        assert_eq!(percentage_of(amount, 33).unwrap().raw(), U256::from(16));
    }

    #[test]
    fn test_fraction_of_other_precision() {
        assert_eq!(fraction_of(scaled("0.05"), 10, 1000).unwrap(), scaled("0.0005"));
        assert_eq!(fraction_of(scaled("10"), 33, 100), percentage_of(scaled("10"), 33));
        assert_eq!(fraction_of(scaled("1"), 1, 0), Err(EngineError::DivisionByZero));
    }

    #[test]
    fn test_mul_div_errors() {
        assert_eq!(mul_div(U256::one(), U256::one(), U256::zero()), Err(EngineError::DivisionByZero));
        assert_eq!(mul_div(U256::MAX, U256::from(2), U256::one()), Err(EngineError::Overflow));
    }

    #[test]
    fn test_saturating_sub_clamps() {
        assert_eq!(scaled("1").saturating_sub(scaled("2")), ScaledAmount::ZERO);
        assert!(scaled("1").checked_sub(scaled("2")).is_err());
    }

    proptest! {
        #[test]
        fn prop_roundtrip(whole in 0u64..u64::MAX, frac in proptest::collection::vec(0u8..10, 0..18)) {
            let mut digits: String = frac.iter().map(|d| char::from(b'0' + d)).collect();
            while digits.ends_with('0') {
                digits.pop();
            }
            let input = if digits.is_empty() {
                whole.to_string()
            } else {
                format!("{}.{}", whole, digits)
            };
            let parsed = to_scaled(&input, DEFAULT_DECIMALS).unwrap();
            prop_assert_eq!(from_scaled(parsed, DEFAULT_DECIMALS), input);
        }
    }
}
