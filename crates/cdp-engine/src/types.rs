//! shared types: addresses, health factor, positions

use std::fmt;
use std::str::FromStr;

use primitive_types::{H160, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{EngineError, Result};
use crate::fixed_point::{format_display, ScaledAmount, DEFAULT_DECIMALS};

/// 20-byte account or contract address
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(H160);

impl Address {
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(H160(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        self.0.as_fixed_bytes()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// reject the zero address before it reaches a read or a write
    pub fn ensure_valid(&self) -> Result<()> {
        if self.is_zero() {
            return Err(EngineError::InvalidAddress("zero address".into()));
        }
        Ok(())
    }

    /// `0x1234…abcdef` form for compact display
    pub fn short(&self) -> String {
        format_address(&self.to_string())
    }
}

impl FromStr for Address {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| EngineError::InvalidAddress(format!("missing 0x prefix: {}", s)))?;
        if digits.len() != 40 {
            return Err(EngineError::InvalidAddress(format!(
                "expected 40 hex digits, got {}: {}",
                digits.len(),
                s
            )));
        }
        let bytes = hex::decode(digits).map_err(|e| EngineError::InvalidAddress(format!("{}: {}", s, e)))?;
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self::from_bytes(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.as_bytes()))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// shorten an address string to its first 6 and last 6 characters
pub fn format_address(addr: &str) -> String {
    let chars: Vec<char> = addr.chars().collect();
    if chars.len() <= 12 {
        return addr.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 6..].iter().collect();
    format!("{}…{}", head, tail)
}

/// transaction hash
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TxHash(pub [u8; 32]);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// health factor as reported by the engine
///
/// the contract returns uint256::MAX when nothing is minted; that case is
/// kept as its own variant instead of a huge number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthFactor {
    Finite(ScaledAmount),
    /// no debt, cannot be liquidated
    Infinite,
}

impl HealthFactor {
    /// map a raw contract return value
    pub fn from_raw(raw: U256) -> Self {
        if raw == U256::MAX {
            HealthFactor::Infinite
        } else {
            HealthFactor::Finite(ScaledAmount::from_raw(raw))
        }
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, HealthFactor::Infinite)
    }

    pub fn value(&self) -> Option<ScaledAmount> {
        match self {
            HealthFactor::Finite(v) => Some(*v),
            HealthFactor::Infinite => None,
        }
    }

    pub fn is_below(&self, min: ScaledAmount) -> bool {
        match self {
            HealthFactor::Finite(v) => *v < min,
            HealthFactor::Infinite => false,
        }
    }

    pub fn display(&self, precision: u8) -> String {
        match self {
            HealthFactor::Finite(v) => format_display(*v, DEFAULT_DECIMALS, precision),
            HealthFactor::Infinite => "∞".into(),
        }
    }
}

impl Default for HealthFactor {
    fn default() -> Self {
        HealthFactor::Infinite
    }
}

impl fmt::Display for HealthFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthFactor::Finite(v) => write!(f, "{}", v),
            HealthFactor::Infinite => f.write_str("∞"),
        }
    }
}

/// `getAccountInformation` result
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccountInfo {
    pub debt_minted: ScaledAmount,
    pub collateral_value_usd: ScaledAmount,
}

/// cached view of one account's position
///
/// only ever built from contract reads, never from preview math
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Position {
    pub debt_minted: ScaledAmount,
    pub collateral_value_usd: ScaledAmount,
    /// collateral deposited in the configured collateral token
    pub collateral_deposited: ScaledAmount,
    pub health_factor: HealthFactor,
}

impl Position {
    /// descaled strings for rendering
    pub fn view(&self, precision: u8) -> PositionView {
        PositionView {
            debt_minted: format_display(self.debt_minted, DEFAULT_DECIMALS, precision),
            collateral_value_usd: format_display(self.collateral_value_usd, DEFAULT_DECIMALS, precision),
            collateral_deposited: format_display(self.collateral_deposited, DEFAULT_DECIMALS, precision),
            health_factor: self.health_factor.display(precision),
        }
    }
}

/// position rendered for the ui
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PositionView {
    pub debt_minted: String,
    pub collateral_value_usd: String,
    pub collateral_deposited: String,
    pub health_factor: String,
}

/// engine parameters, read from the contract
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtocolParams {
    /// percent of collateral value counted toward solvency (e.g. 50)
    pub liquidation_threshold: u64,
    /// divisor for threshold and bonus (100)
    pub liquidation_precision: u64,
    /// extra collateral paid to liquidators, in percent (e.g. 10)
    pub liquidation_bonus: u64,
    /// positions below this are liquidatable (1e18)
    pub min_health_factor: ScaledAmount,
    /// fixed point precision (1e18)
    pub precision: U256,
}

impl ProtocolParams {
    pub fn is_liquidatable(&self, health_factor: HealthFactor) -> bool {
        health_factor.is_below(self.min_health_factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WETH: &str = "0x7b79995e5f793A07Bc00c21412e50Ecae098E7f9";

    #[test]
    fn test_address_parse_and_display() {
        let addr: Address = WETH.parse().unwrap();
        assert_eq!(addr.to_string(), WETH.to_lowercase());
        assert!(!addr.is_zero());
    }

    #[test]
    fn test_address_rejects_garbage() {
        for bad in ["", "0x", "7b79995e5f793a07bc00c21412e50ecae098e7f9", "0x123", "0xzz79995e5f793a07bc00c21412e50ecae098e7f9"] {
            assert!(matches!(bad.parse::<Address>(), Err(EngineError::InvalidAddress(_))), "{bad}");
        }
    }

    #[test]
    fn test_zero_address_invalid() {
        let zero = Address::default();
        assert!(zero.ensure_valid().is_err());
    }

    #[test]
    fn test_format_address() {
        let addr: Address = WETH.parse().unwrap();
        assert_eq!(addr.short(), "0x7b79…98e7f9");
        assert_eq!(format_address("0xabc"), "0xabc");
    }

    #[test]
    fn test_address_serde() {
        let addr: Address = WETH.parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(addr, back);
    }

    #[test]
    fn test_health_factor_sentinel() {
        assert!(HealthFactor::from_raw(U256::MAX).is_infinite());
        let one = ScaledAmount::units(1);
        let hf = HealthFactor::from_raw(one.raw());
        assert_eq!(hf.value(), Some(one));
        assert!(!HealthFactor::Infinite.is_below(one));
        assert!(HealthFactor::Finite(ScaledAmount::ZERO).is_below(one));
        assert_eq!(HealthFactor::Infinite.to_string(), "∞");
    }

    #[test]
    fn test_empty_position_view() {
        let view = Position::default().view(4);
        assert_eq!(view.debt_minted, "0");
        assert_eq!(view.health_factor, "∞");
    }
}
