//! solvency previews
//!
//! reproduces the engine's fixed point arithmetic so the ui can show what a
//! transaction would do before it is sent. operation order matches the
//! contract: multiply before divide, and the bonus is taken on the truncated
//! token amount before the total is valued.
//!
//! previews are advisory. the contract's own checks decide whether a
//! transaction goes through.

use std::cmp::min;

use primitive_types::U256;

use crate::error::Result;
use crate::fixed_point::{fraction_of, mul_div, percentage_of, ScaledAmount};
use crate::oracle::PositionOracle;
use crate::types::{Address, HealthFactor, Position, ProtocolParams};

/// the contract's `_calculateHealthFactor`
///
/// `(collateral_usd * threshold / precision) * 1e18 / debt`, infinite when
/// nothing is minted
pub fn compute_health_factor(
    params: &ProtocolParams,
    debt_minted: ScaledAmount,
    collateral_value_usd: ScaledAmount,
) -> Result<HealthFactor> {
    if debt_minted.is_zero() {
        return Ok(HealthFactor::Infinite);
    }
    let adjusted = mul_div(
        collateral_value_usd.raw(),
        U256::from(params.liquidation_threshold),
        U256::from(params.liquidation_precision),
    )?;
    let hf = mul_div(adjusted, params.precision, debt_minted.raw())?;
    Ok(HealthFactor::Finite(ScaledAmount::from_raw(hf)))
}

/// most debt a collateral value can back at the liquidation threshold
pub fn max_mintable(collateral_value_usd: ScaledAmount, liquidation_threshold_percent: u64) -> Result<ScaledAmount> {
    percentage_of(collateral_value_usd, liquidation_threshold_percent)
}

/// zero debt is reported as infinite without asking the contract
async fn project(
    oracle: &dyn PositionOracle,
    debt_minted: ScaledAmount,
    collateral_value_usd: ScaledAmount,
) -> Result<HealthFactor> {
    if debt_minted.is_zero() {
        return Ok(HealthFactor::Infinite);
    }
    oracle.calculate_health_factor(debt_minted, collateral_value_usd).await
}

/// health factor if `redeem_usd` worth of collateral left the position
pub async fn projected_health_factor_after_redeem(
    oracle: &dyn PositionOracle,
    current_collateral_usd: ScaledAmount,
    current_debt: ScaledAmount,
    redeem_usd: ScaledAmount,
) -> Result<HealthFactor> {
    let collateral = current_collateral_usd.saturating_sub(redeem_usd);
    project(oracle, current_debt, collateral).await
}

/// health factor if `burn_amount` of debt were repaid
pub async fn projected_health_factor_after_burn(
    oracle: &dyn PositionOracle,
    current_collateral_usd: ScaledAmount,
    current_debt: ScaledAmount,
    burn_amount: ScaledAmount,
) -> Result<HealthFactor> {
    let debt = current_debt.saturating_sub(burn_amount);
    project(oracle, debt, current_collateral_usd).await
}

/// health factor if `added_collateral_usd` were deposited and `mint_amount` minted
pub async fn projected_health_factor_after_mint(
    oracle: &dyn PositionOracle,
    current_collateral_usd: ScaledAmount,
    current_debt: ScaledAmount,
    added_collateral_usd: ScaledAmount,
    mint_amount: ScaledAmount,
) -> Result<HealthFactor> {
    let collateral = current_collateral_usd.checked_add(added_collateral_usd)?;
    let debt = current_debt.checked_add(mint_amount)?;
    project(oracle, debt, collateral).await
}

/// what a liquidation would pay out and leave behind
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiquidationPreview {
    /// amount as typed by the user, kept for display
    pub requested_burn: ScaledAmount,
    /// amount the numbers below were computed with
    pub clamped_burn: ScaledAmount,
    pub base_collateral: ScaledAmount,
    pub bonus_collateral: ScaledAmount,
    pub total_collateral: ScaledAmount,
    /// usd value of `total_collateral`
    pub usd_value: ScaledAmount,
    pub projected_target_health_factor: HealthFactor,
    /// request exceeded the target's debt and was clamped
    pub over_debt: bool,
}

/// preview `liquidate(collateral_token, target, requested_burn)`
pub async fn liquidation_preview(
    oracle: &dyn PositionOracle,
    collateral_token: Address,
    target_debt: ScaledAmount,
    target_collateral_usd: ScaledAmount,
    requested_burn: ScaledAmount,
    params: &ProtocolParams,
) -> Result<LiquidationPreview> {
    let over_debt = requested_burn > target_debt;
    let clamped_burn = min(requested_burn, target_debt);

    let base_collateral = oracle.get_token_amount_for_debt(collateral_token, clamped_burn).await?;
    let bonus_collateral = fraction_of(base_collateral, params.liquidation_bonus, params.liquidation_precision)?;
    let total_collateral = base_collateral.checked_add(bonus_collateral)?;
    let usd_value = oracle.get_usd_value(collateral_token, total_collateral).await?;

    let new_debt = target_debt.saturating_sub(clamped_burn);
    let new_collateral_usd = target_collateral_usd.saturating_sub(usd_value);
    let projected_target_health_factor = project(oracle, new_debt, new_collateral_usd).await?;

    Ok(LiquidationPreview {
        requested_burn,
        clamped_burn,
        base_collateral,
        bonus_collateral,
        total_collateral,
        usd_value,
        projected_target_health_factor,
        over_debt,
    })
}

/// deposit-and-mint preview for the connected position
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MintPreview {
    /// usd value of the collateral being added
    pub collateral_usd: ScaledAmount,
    /// what the added collateral alone can back
    pub max_mintable: ScaledAmount,
    pub requested_mint: ScaledAmount,
    pub projected_health_factor: HealthFactor,
    /// the contract would revert this mint
    pub breaks_health_factor: bool,
}

pub async fn mint_preview(
    oracle: &dyn PositionOracle,
    params: &ProtocolParams,
    collateral_token: Address,
    current: &Position,
    collateral_amount: ScaledAmount,
    requested_mint: ScaledAmount,
) -> Result<MintPreview> {
    let collateral_usd = oracle.get_usd_value(collateral_token, collateral_amount).await?;
    let max = fraction_of(collateral_usd, params.liquidation_threshold, params.liquidation_precision)?;
    let projected = projected_health_factor_after_mint(
        oracle,
        current.collateral_value_usd,
        current.debt_minted,
        collateral_usd,
        requested_mint,
    )
    .await?;

    Ok(MintPreview {
        collateral_usd,
        max_mintable: max,
        requested_mint,
        projected_health_factor: projected,
        breaks_health_factor: params.is_liquidatable(projected),
    })
}

/// redeem preview for the connected position
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RedeemPreview {
    pub redeem_usd: ScaledAmount,
    pub projected_health_factor: HealthFactor,
    /// more than the position holds
    pub exceeds_deposit: bool,
    pub breaks_health_factor: bool,
}

pub async fn redeem_preview(
    oracle: &dyn PositionOracle,
    params: &ProtocolParams,
    collateral_token: Address,
    current: &Position,
    redeem_amount: ScaledAmount,
) -> Result<RedeemPreview> {
    let redeem_usd = oracle.get_usd_value(collateral_token, redeem_amount).await?;
    let projected = projected_health_factor_after_redeem(
        oracle,
        current.collateral_value_usd,
        current.debt_minted,
        redeem_usd,
    )
    .await?;

    Ok(RedeemPreview {
        redeem_usd,
        projected_health_factor: projected,
        exceeds_deposit: redeem_amount > current.collateral_deposited,
        breaks_health_factor: params.is_liquidatable(projected),
    })
}
