//! read-only view of the engine contract
//!
//! every read takes the account it is about, so the same oracle serves the
//! connected wallet and any position being inspected for liquidation. a failed
//! read is an error, never a zero.

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::fixed_point::ScaledAmount;
use crate::types::{AccountInfo, Address, HealthFactor, Position, ProtocolParams};

#[async_trait]
pub trait PositionOracle: Send + Sync {
    /// `getUsdValue(token, amount)`
    async fn get_usd_value(&self, token: Address, amount: ScaledAmount) -> Result<ScaledAmount>;

    /// `getAccountInformation(account)`
    async fn get_account_info(&self, account: Address) -> Result<AccountInfo>;

    /// `getCollateralDeposited(account, token)`
    async fn get_collateral_deposited(&self, account: Address, token: Address) -> Result<ScaledAmount>;

    /// `getHealthFactor(account)`
    async fn get_health_factor(&self, account: Address) -> Result<HealthFactor>;

    /// `getTokenAmountFromDebt(token, debt)`
    async fn get_token_amount_for_debt(&self, token: Address, debt: ScaledAmount) -> Result<ScaledAmount>;

    /// `calculateHealthFactor(debt, collateralUsd)`, pure on the contract side
    async fn calculate_health_factor(
        &self,
        debt_minted: ScaledAmount,
        collateral_value_usd: ScaledAmount,
    ) -> Result<HealthFactor>;

    /// threshold, bonus and minimum health factor
    async fn get_protocol_params(&self) -> Result<ProtocolParams>;

    /// `getCollateralTokens()`
    async fn get_collateral_tokens(&self) -> Result<Vec<Address>>;

    /// stablecoin `balanceOf(account)`
    async fn get_stablecoin_balance(&self, account: Address) -> Result<ScaledAmount>;
}

/// read a full position for one account
pub async fn fetch_position(
    oracle: &dyn PositionOracle,
    account: Address,
    collateral_token: Address,
) -> Result<Position> {
    account.ensure_valid()?;

    let (info, deposited, health_factor) = tokio::try_join!(
        oracle.get_account_info(account),
        oracle.get_collateral_deposited(account, collateral_token),
        oracle.get_health_factor(account),
    )?;

    debug!(%account, debt = %info.debt_minted, collateral_usd = %info.collateral_value_usd, "fetched position");

    Ok(Position {
        debt_minted: info.debt_minted,
        collateral_value_usd: info.collateral_value_usd,
        collateral_deposited: deposited,
        health_factor,
    })
}
