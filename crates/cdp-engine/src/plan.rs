//! transaction plans
//!
//! a plan is the ordered list of contract calls one user action needs, e.g.
//! wrap -> approve -> depositCollateralAndMint. builders validate inputs up
//! front; nothing here talks to the chain.

use std::fmt;

use serde::Serialize;

use crate::config::Contracts;
use crate::error::{EngineError, Result};
use crate::fixed_point::ScaledAmount;
use crate::types::Address;

/// kind of contract call a step makes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepAction {
    Wrap,
    Approve,
    DepositAndMint,
    Mint,
    Burn,
    Redeem,
    BurnAndRedeem,
    Liquidate,
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepAction::Wrap => "WRAP",
            StepAction::Approve => "APPROVE",
            StepAction::DepositAndMint => "DEPOSIT_AND_MINT",
            StepAction::Mint => "MINT",
            StepAction::Burn => "BURN",
            StepAction::Redeem => "REDEEM",
            StepAction::BurnAndRedeem => "BURN_AND_REDEEM",
            StepAction::Liquidate => "LIQUIDATE",
        };
        f.write_str(name)
    }
}

/// call parameters, one variant per contract entry point
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepCall {
    /// weth `deposit()` with `amount` of native value attached
    Wrap { amount: ScaledAmount },
    /// erc20 `approve(spender, amount)`
    Approve { spender: Address, amount: ScaledAmount },
    /// `depositCollateralAndMint(token, collateral, mint)`
    DepositAndMint {
        token: Address,
        collateral: ScaledAmount,
        mint: ScaledAmount,
    },
    /// `mint(amount)`
    Mint { amount: ScaledAmount },
    /// `burn(amount)`
    Burn { amount: ScaledAmount },
    /// `redeemCollateral(token, amount)`
    Redeem { token: Address, amount: ScaledAmount },
    /// `burnAndRedeemCollateral(token, collateral, burn)`
    BurnAndRedeem {
        token: Address,
        collateral: ScaledAmount,
        burn: ScaledAmount,
    },
    /// `liquidate(collateral, user, debtToCover)`
    Liquidate {
        collateral_token: Address,
        target: Address,
        debt_to_cover: ScaledAmount,
    },
}

impl StepCall {
    pub fn action(&self) -> StepAction {
        match self {
            StepCall::Wrap { .. } => StepAction::Wrap,
            StepCall::Approve { .. } => StepAction::Approve,
            StepCall::DepositAndMint { .. } => StepAction::DepositAndMint,
            StepCall::Mint { .. } => StepAction::Mint,
            StepCall::Burn { .. } => StepAction::Burn,
            StepCall::Redeem { .. } => StepAction::Redeem,
            StepCall::BurnAndRedeem { .. } => StepAction::BurnAndRedeem,
            StepCall::Liquidate { .. } => StepAction::Liquidate,
        }
    }
}

/// one contract call in a plan
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionStep {
    /// contract the call is sent to
    pub target: Address,
    pub call: StepCall,
    /// needs the previous step mined first (approval before spend, wrap before deposit)
    pub depends_on_prior_confirmation: bool,
}

impl TransactionStep {
    pub fn action(&self) -> StepAction {
        self.call.action()
    }
}

/// user action a plan implements
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    DepositAndMint,
    Mint,
    Burn,
    Redeem,
    BurnAndRedeem,
    Liquidate,
}

/// ordered steps plus the accounts whose positions they change
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionPlan {
    pub kind: PlanKind,
    pub caller: Address,
    pub steps: Vec<TransactionStep>,
    /// refreshed after the plan completes
    pub affected: Vec<Address>,
}

fn nonzero(amount: ScaledAmount) -> Result<()> {
    if amount.is_zero() {
        return Err(EngineError::ZeroAmount);
    }
    Ok(())
}

impl TransactionPlan {
    fn new(kind: PlanKind, caller: Address, affected: Vec<Address>) -> Self {
        Self {
            kind,
            caller,
            steps: Vec::new(),
            affected,
        }
    }

    fn push(mut self, target: Address, call: StepCall) -> Self {
        let depends_on_prior_confirmation = !self.steps.is_empty();
        self.steps.push(TransactionStep {
            target,
            call,
            depends_on_prior_confirmation,
        });
        self
    }

    pub fn actions(&self) -> Vec<StepAction> {
        self.steps.iter().map(|s| s.action()).collect()
    }

    /// WRAP -> APPROVE(engine) -> DEPOSIT_AND_MINT
    pub fn deposit_and_mint(
        contracts: &Contracts,
        caller: Address,
        collateral: ScaledAmount,
        mint: ScaledAmount,
    ) -> Result<Self> {
        caller.ensure_valid()?;
        nonzero(collateral)?;
        nonzero(mint)?;

        let token = contracts.wrapped_collateral;
        Ok(Self::new(PlanKind::DepositAndMint, caller, vec![caller])
            .push(token, StepCall::Wrap { amount: collateral })
            .push(
                token,
                StepCall::Approve {
                    spender: contracts.engine,
                    amount: collateral,
                },
            )
            .push(
                contracts.engine,
                StepCall::DepositAndMint {
                    token,
                    collateral,
                    mint,
                },
            ))
    }

    /// MINT against collateral already deposited
    pub fn mint(contracts: &Contracts, caller: Address, amount: ScaledAmount) -> Result<Self> {
        caller.ensure_valid()?;
        nonzero(amount)?;
        Ok(Self::new(PlanKind::Mint, caller, vec![caller]).push(contracts.engine, StepCall::Mint { amount }))
    }

    /// APPROVE(engine, stablecoin) -> BURN
    pub fn burn(contracts: &Contracts, caller: Address, amount: ScaledAmount) -> Result<Self> {
        caller.ensure_valid()?;
        nonzero(amount)?;
        Ok(Self::new(PlanKind::Burn, caller, vec![caller])
            .push(
                contracts.stablecoin,
                StepCall::Approve {
                    spender: contracts.engine,
                    amount,
                },
            )
            .push(contracts.engine, StepCall::Burn { amount }))
    }

    /// REDEEM, single step
    pub fn redeem(contracts: &Contracts, caller: Address, token: Address, amount: ScaledAmount) -> Result<Self> {
        caller.ensure_valid()?;
        token.ensure_valid()?;
        nonzero(amount)?;
        Ok(Self::new(PlanKind::Redeem, caller, vec![caller])
            .push(contracts.engine, StepCall::Redeem { token, amount }))
    }

    /// APPROVE(engine, stablecoin) -> BURN_AND_REDEEM
    pub fn burn_and_redeem(
        contracts: &Contracts,
        caller: Address,
        token: Address,
        collateral: ScaledAmount,
        burn: ScaledAmount,
    ) -> Result<Self> {
        caller.ensure_valid()?;
        token.ensure_valid()?;
        nonzero(collateral)?;
        nonzero(burn)?;
        Ok(Self::new(PlanKind::BurnAndRedeem, caller, vec![caller])
            .push(
                contracts.stablecoin,
                StepCall::Approve {
                    spender: contracts.engine,
                    amount: burn,
                },
            )
            .push(
                contracts.engine,
                StepCall::BurnAndRedeem {
                    token,
                    collateral,
                    burn,
                },
            ))
    }

    /// APPROVE(engine, stablecoin) -> LIQUIDATE
    pub fn liquidate(
        contracts: &Contracts,
        caller: Address,
        collateral_token: Address,
        target: Address,
        debt_to_cover: ScaledAmount,
    ) -> Result<Self> {
        caller.ensure_valid()?;
        collateral_token.ensure_valid()?;
        target
            .ensure_valid()
            .map_err(|_| EngineError::InvalidAddress("liquidation target is the zero address".into()))?;
        if target == caller {
            return Err(EngineError::InvalidAddress("cannot liquidate own position".into()));
        }
        nonzero(debt_to_cover)?;

        Ok(Self::new(PlanKind::Liquidate, caller, vec![caller, target])
            .push(
                contracts.stablecoin,
                StepCall::Approve {
                    spender: contracts.engine,
                    amount: debt_to_cover,
                },
            )
            .push(
                contracts.engine,
                StepCall::Liquidate {
                    collateral_token,
                    target,
                    debt_to_cover,
                },
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Address {
        Address::from_bytes([0xa1; 20])
    }

    fn bob() -> Address {
        Address::from_bytes([0xb0; 20])
    }

    #[test]
    fn test_deposit_and_mint_order() {
        let contracts = Contracts::sepolia();
        let plan = TransactionPlan::deposit_and_mint(&contracts, alice(), ScaledAmount::units(10), ScaledAmount::units(16000))
            .unwrap();

        assert_eq!(
            plan.actions(),
            vec![StepAction::Wrap, StepAction::Approve, StepAction::DepositAndMint]
        );
        assert_eq!(plan.steps[0].target, contracts.wrapped_collateral);
        assert_eq!(plan.steps[1].target, contracts.wrapped_collateral);
        assert_eq!(plan.steps[2].target, contracts.engine);
        assert!(!plan.steps[0].depends_on_prior_confirmation);
        assert!(plan.steps[1..].iter().all(|s| s.depends_on_prior_confirmation));
        assert_eq!(plan.affected, vec![alice()]);
    }

    #[test]
    fn test_burn_approves_stablecoin() {
        let contracts = Contracts::sepolia();
        let plan = TransactionPlan::burn(&contracts, alice(), ScaledAmount::units(5)).unwrap();
        assert_eq!(plan.actions(), vec![StepAction::Approve, StepAction::Burn]);
        assert_eq!(
            plan.steps[0].call,
            StepCall::Approve {
                spender: contracts.engine,
                amount: ScaledAmount::units(5)
            }
        );
        assert_eq!(plan.steps[0].target, contracts.stablecoin);
    }

    #[test]
    fn test_redeem_single_step() {
        let contracts = Contracts::sepolia();
        let plan = TransactionPlan::redeem(&contracts, alice(), contracts.wrapped_collateral, ScaledAmount::units(1)).unwrap();
        assert_eq!(plan.actions(), vec![StepAction::Redeem]);
    }

    #[test]
    fn test_liquidate_affects_both() {
        let contracts = Contracts::sepolia();
        let plan = TransactionPlan::liquidate(
            &contracts,
            alice(),
            contracts.wrapped_collateral,
            bob(),
            ScaledAmount::units(100),
        )
        .unwrap();
        assert_eq!(plan.actions(), vec![StepAction::Approve, StepAction::Liquidate]);
        assert_eq!(plan.affected, vec![alice(), bob()]);
    }

    #[test]
    fn test_liquidate_rejects_bad_target() {
        let contracts = Contracts::sepolia();
        let weth = contracts.wrapped_collateral;
        let zero = TransactionPlan::liquidate(&contracts, alice(), weth, Address::default(), ScaledAmount::units(1));
        assert!(matches!(zero, Err(EngineError::InvalidAddress(_))));
        let own = TransactionPlan::liquidate(&contracts, alice(), weth, alice(), ScaledAmount::units(1));
        assert!(matches!(own, Err(EngineError::InvalidAddress(_))));
    }

    #[test]
    fn test_zero_amounts_rejected() {
        let contracts = Contracts::sepolia();
        assert_eq!(
            TransactionPlan::burn(&contracts, alice(), ScaledAmount::ZERO),
            Err(EngineError::ZeroAmount)
        );
        assert_eq!(
            TransactionPlan::deposit_and_mint(&contracts, alice(), ScaledAmount::units(1), ScaledAmount::ZERO),
            Err(EngineError::ZeroAmount)
        );
    }

    #[test]
    fn test_action_names() {
        assert_eq!(StepAction::DepositAndMint.to_string(), "DEPOSIT_AND_MINT");
        assert_eq!(StepAction::Wrap.to_string(), "WRAP");
    }
}
