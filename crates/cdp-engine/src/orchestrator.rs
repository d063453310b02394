//! plan execution
//!
//! steps run strictly in order and each one must be confirmed before the next
//! is submitted. the first failure ends the plan; nothing is retried or rolled
//! back, the outcome records exactly how far it got.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Mutex;

use crate::config::{Contracts, EngineConfig};
use crate::error::{EngineError, Result, TxError};
use crate::fixed_point::ScaledAmount;
use crate::oracle::PositionOracle;
use crate::plan::{PlanKind, StepAction, TransactionPlan, TransactionStep};
use crate::store::PositionStateStore;
use crate::types::{Address, TxHash};

/// signs, sends and watches transactions (wallet + rpc)
#[async_trait]
pub trait TxSubmitter: Send + Sync {
    /// sign and broadcast one step, returning its hash
    async fn submit(&self, from: Address, step: &TransactionStep) -> std::result::Result<TxHash, TxError>;

    /// wait until `tx` is mined; a revert is an error
    async fn wait_for_confirmation(&self, tx: TxHash) -> std::result::Result<Receipt, TxError>;
}

/// mined transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
}

/// plan state machine
///
/// `Pending -> StepSubmitted -> StepConfirmed -> (next step | Complete)`, or
/// `Failed` from any step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlanState {
    Pending,
    StepSubmitted { index: usize, tx: TxHash },
    StepConfirmed { index: usize, receipt: Receipt },
    Complete,
    Failed {
        index: usize,
        action: StepAction,
        error: TxError,
    },
}

impl PlanState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlanState::Complete | PlanState::Failed { .. })
    }
}

/// a confirmed step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepRecord {
    pub index: usize,
    pub action: StepAction,
    pub receipt: Receipt,
}

/// how a plan ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanOutcome {
    pub kind: PlanKind,
    pub state: PlanState,
    /// steps confirmed before the plan ended
    pub completed: Vec<StepRecord>,
    /// every state the plan passed through, in order
    pub history: Vec<PlanState>,
    /// addresses whose cached position was refreshed afterwards
    pub refreshed: Vec<Address>,
}

impl PlanOutcome {
    fn new(kind: PlanKind) -> Self {
        Self {
            kind,
            state: PlanState::Pending,
            completed: Vec::new(),
            history: vec![PlanState::Pending],
            refreshed: Vec::new(),
        }
    }

    fn transition(&mut self, next: PlanState) {
        self.history.push(next.clone());
        self.state = next;
    }

    pub fn is_complete(&self) -> bool {
        self.state == PlanState::Complete
    }

    /// index and action of the step that failed
    pub fn failed_step(&self) -> Option<(usize, StepAction)> {
        match &self.state {
            PlanState::Failed { index, action, .. } => Some((*index, *action)),
            _ => None,
        }
    }

    /// `StepFailed` for a failed plan
    pub fn into_result(self) -> Result<Self> {
        match &self.state {
            PlanState::Failed { index, action, error } => Err(EngineError::StepFailed {
                index: *index,
                action: *action,
                cause: error.clone(),
            }),
            _ => Ok(self),
        }
    }
}

/// builds plans for the connected account and runs them
pub struct Orchestrator {
    oracle: Arc<dyn PositionOracle>,
    submitter: Arc<dyn TxSubmitter>,
    store: Arc<PositionStateStore>,
    contracts: Contracts,
    confirmation_timeout: Duration,
    // one plan at a time against the signer
    signer: Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        oracle: Arc<dyn PositionOracle>,
        submitter: Arc<dyn TxSubmitter>,
        store: Arc<PositionStateStore>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            oracle,
            submitter,
            store,
            contracts: config.contracts,
            confirmation_timeout: config.confirmation_timeout(),
            signer: Mutex::new(()),
        }
    }

    pub fn contracts(&self) -> &Contracts {
        &self.contracts
    }

    pub fn store(&self) -> &Arc<PositionStateStore> {
        &self.store
    }

    /// run every step in order, then refresh the affected positions
    pub async fn execute(&self, plan: &TransactionPlan) -> PlanOutcome {
        let _signer = self.signer.lock().await;
        let mut outcome = PlanOutcome::new(plan.kind);
        let total = plan.steps.len();

        tracing::info!("executing {:?} plan: {} steps for {}", plan.kind, total, plan.caller.short());

        for (index, step) in plan.steps.iter().enumerate() {
            let action = step.action();

            tracing::info!("step {}/{}: submitting {}", index + 1, total, action);
            let tx = match self.submitter.submit(plan.caller, step).await {
                Ok(tx) => tx,
                Err(error) => return Self::fail(outcome, index, action, error),
            };
            outcome.transition(PlanState::StepSubmitted { index, tx });

            tracing::debug!("step {}/{}: waiting for {}", index + 1, total, tx);
            let receipt = match tokio::time::timeout(self.confirmation_timeout, self.submitter.wait_for_confirmation(tx)).await {
                Ok(Ok(receipt)) => receipt,
                Ok(Err(error)) => return Self::fail(outcome, index, action, error),
                Err(_) => return Self::fail(outcome, index, action, TxError::Timeout),
            };

            tracing::info!("step {}/{}: {} confirmed in block {}", index + 1, total, action, receipt.block_number);
            outcome.transition(PlanState::StepConfirmed { index, receipt });
            outcome.completed.push(StepRecord { index, action, receipt });
        }

        outcome.transition(PlanState::Complete);
        tracing::info!("{:?} plan complete", plan.kind);

        let mut tracked = Vec::with_capacity(plan.affected.len());
        for &address in &plan.affected {
            if self.store.is_tracked(address).await {
                tracked.push(address);
            }
        }

        let results = join_all(tracked.iter().map(|&address| self.store.refresh(self.oracle.as_ref(), address))).await;
        for (address, result) in tracked.into_iter().zip(results) {
            // a failed refresh leaves the old position marked stale
            match result {
                Ok(()) => outcome.refreshed.push(address),
                Err(e) => tracing::warn!("position refresh after plan failed for {}: {}", address.short(), e),
            }
        }

        outcome
    }

    fn fail(mut outcome: PlanOutcome, index: usize, action: StepAction, error: TxError) -> PlanOutcome {
        tracing::warn!(
            "step {} ({}) failed: {}; {} step(s) confirmed before it",
            index + 1,
            action,
            error,
            outcome.completed.len()
        );
        outcome.transition(PlanState::Failed { index, action, error });
        outcome
    }

    async fn ensure_stablecoin(&self, account: Address, need: ScaledAmount) -> Result<()> {
        let have = self.oracle.get_stablecoin_balance(account).await?;
        if have < need {
            return Err(EngineError::InsufficientBalance { have, need });
        }
        Ok(())
    }

    /// wrap, approve and deposit `collateral`, minting `mint` against it
    pub async fn deposit_and_mint(&self, collateral: ScaledAmount, mint: ScaledAmount) -> Result<PlanOutcome> {
        let account = self.store.require_account().await?;
        let plan = TransactionPlan::deposit_and_mint(&self.contracts, account, collateral, mint)?;
        Ok(self.execute(&plan).await)
    }

    /// mint against collateral already deposited
    pub async fn mint(&self, amount: ScaledAmount) -> Result<PlanOutcome> {
        let account = self.store.require_account().await?;
        let plan = TransactionPlan::mint(&self.contracts, account, amount)?;
        Ok(self.execute(&plan).await)
    }

    /// repay debt; fails before submitting if the wallet holds too little
    pub async fn burn(&self, amount: ScaledAmount) -> Result<PlanOutcome> {
        let account = self.store.require_account().await?;
        let plan = TransactionPlan::burn(&self.contracts, account, amount)?;
        self.ensure_stablecoin(account, amount).await?;
        Ok(self.execute(&plan).await)
    }

    /// withdraw collateral
    pub async fn redeem(&self, amount: ScaledAmount) -> Result<PlanOutcome> {
        let account = self.store.require_account().await?;
        let plan = TransactionPlan::redeem(&self.contracts, account, self.contracts.wrapped_collateral, amount)?;
        Ok(self.execute(&plan).await)
    }

    /// repay debt and withdraw collateral in one engine call
    pub async fn burn_and_redeem(&self, collateral: ScaledAmount, burn: ScaledAmount) -> Result<PlanOutcome> {
        let account = self.store.require_account().await?;
        let plan = TransactionPlan::burn_and_redeem(
            &self.contracts,
            account,
            self.contracts.wrapped_collateral,
            collateral,
            burn,
        )?;
        self.ensure_stablecoin(account, burn).await?;
        Ok(self.execute(&plan).await)
    }

    /// cover `debt_to_cover` of `target`'s debt for its collateral plus bonus
    pub async fn liquidate(&self, target: Address, debt_to_cover: ScaledAmount) -> Result<PlanOutcome> {
        let account = self.store.require_account().await?;
        let plan = TransactionPlan::liquidate(
            &self.contracts,
            account,
            self.contracts.wrapped_collateral,
            target,
            debt_to_cover,
        )?;
        self.ensure_stablecoin(account, debt_to_cover).await?;
        Ok(self.execute(&plan).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimEngine;

    fn alice() -> Address {
        Address::from_bytes([0xa1; 20])
    }

    async fn setup(engine: &Arc<SimEngine>) -> Orchestrator {
        let config = EngineConfig {
            contracts: engine.contracts(),
            confirmation_timeout_secs: 5,
            ..EngineConfig::default()
        };
        let store = Arc::new(PositionStateStore::new(engine.contracts().wrapped_collateral));
        store.connect(alice()).await.unwrap();
        Orchestrator::new(engine.clone(), engine.clone(), store, &config)
    }

    #[tokio::test]
    async fn test_deposit_and_mint_walks_states() {
        let engine = Arc::new(SimEngine::with_threshold(80));
        engine.fund_native(alice(), ScaledAmount::units(10)).await;
        let orchestrator = setup(&engine).await;

        let outcome = orchestrator
            .deposit_and_mint(ScaledAmount::units(10), ScaledAmount::units(16000))
            .await
            .unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.completed.len(), 3);
        // pending + (submitted, confirmed) x3 + complete
        assert_eq!(outcome.history.len(), 8);
        assert!(matches!(outcome.history[1], PlanState::StepSubmitted { index: 0, .. }));
        assert!(matches!(outcome.history[2], PlanState::StepConfirmed { index: 0, .. }));
        assert_eq!(outcome.refreshed, vec![alice()]);

        let blocks: Vec<u64> = outcome.completed.iter().map(|r| r.receipt.block_number).collect();
        assert!(blocks.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_rejected_first_step() {
        let engine = Arc::new(SimEngine::sepolia_like());
        engine.fund_native(alice(), ScaledAmount::units(1)).await;
        engine.reject_submission(0).await;
        let orchestrator = setup(&engine).await;

        let outcome = orchestrator
            .deposit_and_mint(ScaledAmount::units(1), ScaledAmount::units(100))
            .await
            .unwrap();

        assert_eq!(outcome.failed_step(), Some((0, StepAction::Wrap)));
        assert!(outcome.completed.is_empty());
        assert!(engine.submitted().await.is_empty());
        assert!(outcome.refreshed.is_empty());

        let err = outcome.into_result().unwrap_err();
        assert_eq!(
            err,
            EngineError::StepFailed {
                index: 0,
                action: StepAction::Wrap,
                cause: TxError::Rejected
            }
        );
    }

    #[tokio::test]
    async fn test_contract_revert_surfaces_reason() {
        let engine = Arc::new(SimEngine::with_threshold(80));
        engine.fund_native(alice(), ScaledAmount::units(10)).await;
        let orchestrator = setup(&engine).await;

        // one over the max the collateral can back
        let outcome = orchestrator
            .deposit_and_mint(ScaledAmount::units(10), ScaledAmount::units(16001))
            .await
            .unwrap();

        match outcome.state {
            PlanState::Failed { index, action, error } => {
                assert_eq!(index, 2);
                assert_eq!(action, StepAction::DepositAndMint);
                assert!(matches!(error, TxError::Reverted(_)));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(outcome.completed.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_timeout() {
        let engine = Arc::new(SimEngine::sepolia_like());
        engine.seed_position(alice(), ScaledAmount::units(10), ScaledAmount::units(100)).await;
        engine.stall_submission(0).await;
        let orchestrator = setup(&engine).await;

        let outcome = orchestrator.redeem(ScaledAmount::units(1)).await.unwrap();
        assert_eq!(
            outcome.state,
            PlanState::Failed {
                index: 0,
                action: StepAction::Redeem,
                error: TxError::Timeout
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_plan_waits_for_signer() {
        let engine = Arc::new(SimEngine::sepolia_like());
        engine.seed_position(alice(), ScaledAmount::units(10), ScaledAmount::units(100)).await;
        engine.stall_submission(0).await;
        let orchestrator = Arc::new(setup(&engine).await);
        let contracts = engine.contracts();

        let redeem =
            TransactionPlan::redeem(&contracts, alice(), contracts.wrapped_collateral, ScaledAmount::units(1)).unwrap();
        let mint = TransactionPlan::mint(&contracts, alice(), ScaledAmount::units(10)).unwrap();

        let first = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.execute(&redeem).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.execute(&mint).await }
        });

        // the redeem is still unconfirmed, so the mint must not be signed yet
        tokio::time::sleep(Duration::from_secs(1)).await;
        let actions: Vec<StepAction> = engine.submitted().await.into_iter().map(|(_, a)| a).collect();
        assert_eq!(actions, vec![StepAction::Redeem]);

        let first = first.await.unwrap();
        assert_eq!(first.failed_step(), Some((0, StepAction::Redeem)));
        let second = second.await.unwrap();
        assert!(second.is_complete());

        let actions: Vec<StepAction> = engine.submitted().await.into_iter().map(|(_, a)| a).collect();
        assert_eq!(actions, vec![StepAction::Redeem, StepAction::Mint]);
    }

    #[tokio::test]
    async fn test_requires_connected_wallet() {
        let engine = Arc::new(SimEngine::sepolia_like());
        let orchestrator = setup(&engine).await;
        orchestrator.store().disconnect().await;

        let err = orchestrator.mint(ScaledAmount::units(1)).await.unwrap_err();
        assert_eq!(err, EngineError::NotConnected);
    }

    #[tokio::test]
    async fn test_burn_and_redeem_checks_balance() {
        let engine = Arc::new(SimEngine::sepolia_like());
        engine.seed_position(alice(), ScaledAmount::units(10), ScaledAmount::units(100)).await;
        let orchestrator = setup(&engine).await;

        let err = orchestrator
            .burn_and_redeem(ScaledAmount::units(1), ScaledAmount::units(101))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));

        let outcome = orchestrator
            .burn_and_redeem(ScaledAmount::units(1), ScaledAmount::units(100))
            .await
            .unwrap();
        assert!(outcome.is_complete());
        let position = orchestrator.store().position().await.unwrap().position;
        assert!(position.debt_minted.is_zero());
        assert_eq!(position.collateral_deposited, ScaledAmount::units(9));
        assert!(position.health_factor.is_infinite());
    }
}
