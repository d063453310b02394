//! cdp-engine: client-side core for a collateralized stablecoin engine
//!
//! reads positions from the engine contract, previews what a deposit, mint,
//! redeem or liquidation would do, and runs the multi-step transaction plans
//! those actions need.
//!
//! ## contracts (sepolia)
//!
//! - engine: `0xdb1b8fc2a20f7b85cf7571a6fefd74124ddde037`
//! - stablecoin: `0xbddf447bc2cadac318b97d47b37589235b48d8bc`
//! - weth: `0x7b79995e5f793a07bc00c21412e50ecae098e7f9`
//!
//! ## usage
//!
//! ```rust,ignore
//! let store = Arc::new(PositionStateStore::new(config.contracts.wrapped_collateral));
//! store.connect(account).await?;
//!
//! let orchestrator = Orchestrator::new(oracle, wallet, store.clone(), &config);
//! let outcome = orchestrator
//!     .deposit_and_mint(to_scaled("10", 18)?, to_scaled("16000", 18)?)
//!     .await?
//!     .into_result()?;
//! ```

pub mod config;
pub mod error;
pub mod fixed_point;
pub mod oracle;
pub mod orchestrator;
pub mod plan;
pub mod preview;
pub mod sim;
pub mod solvency;
pub mod store;
pub mod types;

pub use config::*;
pub use error::*;
pub use fixed_point::{
    fraction_of, from_scaled, format_display, percentage_of, to_scaled, ScaledAmount, DEFAULT_DECIMALS,
};
pub use oracle::*;
pub use orchestrator::*;
pub use plan::*;
pub use preview::*;
pub use solvency::*;
pub use store::*;
pub use types::*;
