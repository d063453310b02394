//! network and contract configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::fixed_point::DEFAULT_DECIMALS;
use crate::types::Address;

/// deployed contract addresses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contracts {
    /// cdp engine (deposit, mint, burn, redeem, liquidate, views)
    pub engine: Address,
    /// pegged stablecoin (erc20)
    pub stablecoin: Address,
    /// wrapped native collateral (weth: `deposit()` + erc20)
    pub wrapped_collateral: Address,
}

impl Contracts {
    /// sepolia deployment
    pub const fn sepolia() -> Self {
        Self {
            engine: Address::from_bytes(hex_addr("db1b8fc2a20f7b85cf7571a6fefd74124ddde037")),
            stablecoin: Address::from_bytes(hex_addr("bddf447bc2cadac318b97d47b37589235b48d8bc")),
            wrapped_collateral: Address::from_bytes(hex_addr("7b79995e5f793a07bc00c21412e50ecae098e7f9")),
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, addr) in [
            ("engine", self.engine),
            ("stablecoin", self.stablecoin),
            ("wrapped_collateral", self.wrapped_collateral),
        ] {
            if addr.is_zero() {
                return Err(EngineError::Config(format!("{} address is zero", name)));
            }
        }
        Ok(())
    }
}

// const-friendly hex for the built-in deployments
const fn hex_addr(s: &str) -> [u8; 20] {
    const fn nibble(c: u8) -> u8 {
        match c {
            b'0'..=b'9' => c - b'0',
            b'a'..=b'f' => c - b'a' + 10,
            _ => panic!("bad hex"),
        }
    }
    let bytes = s.as_bytes();
    let mut out = [0u8; 20];
    let mut i = 0;
    while i < 20 {
        out[i] = nibble(bytes[2 * i]) << 4 | nibble(bytes[2 * i + 1]);
        i += 1;
    }
    out
}

/// rpc endpoint the wallet layer talks to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// network name
    pub name: String,
    /// json-rpc endpoint
    pub rpc_endpoint: String,
    /// eip-155 chain id
    pub chain_id: u64,
}

impl NetworkConfig {
    pub fn sepolia() -> Self {
        Self {
            name: "sepolia".into(),
            rpc_endpoint: "https://rpc.sepolia.org".into(),
            chain_id: 11_155_111,
        }
    }
}

/// engine client configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub network: NetworkConfig,
    pub contracts: Contracts,
    /// token decimals; only 18 is accepted (engine, stablecoin and weth share one scale)
    pub decimals: u8,
    /// how long to wait for each step's confirmation
    pub confirmation_timeout_secs: u64,
    /// fractional digits shown in the ui (display only)
    pub display_precision: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::sepolia(),
            contracts: Contracts::sepolia(),
            decimals: DEFAULT_DECIMALS,
            confirmation_timeout_secs: 120,
            display_precision: 4,
        }
    }
}

impl EngineConfig {
    /// load from a toml file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.contracts.validate()?;
        // engine, stablecoin and weth all use 18; positions are rendered at that scale
        if self.decimals != DEFAULT_DECIMALS {
            return Err(EngineError::Config(format!(
                "decimals must be {}, got {}",
                DEFAULT_DECIMALS, self.decimals
            )));
        }
        if self.confirmation_timeout_secs == 0 {
            return Err(EngineError::Config("confirmation timeout must be non-zero".into()));
        }
        Ok(())
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}
