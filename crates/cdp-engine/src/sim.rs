//! in-memory cdp engine
//!
//! mirrors the engine contract closely enough to drive the client end to end:
//! usd valuation through an 8 decimal price feed, health factor checks after
//! every state change, liquidation bonus and the improved-health check,
//! erc20 allowances, and weth wrapping. reverts are reported when a
//! transaction is confirmed, like a mined-but-failed transaction.
//!
//! faults can be injected for reads, submission and confirmation.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use primitive_types::U256;
use tokio::sync::Mutex;

use crate::config::Contracts;
use crate::error::{EngineError, Result, TxError};
use crate::fixed_point::{fraction_of, mul_div, scale, ScaledAmount, DEFAULT_DECIMALS};
use crate::oracle::PositionOracle;
use crate::orchestrator::{Receipt, TxSubmitter};
use crate::plan::{StepAction, StepCall, TransactionStep};
use crate::solvency::compute_health_factor;
use crate::types::{AccountInfo, Address, HealthFactor, ProtocolParams, TxHash};

/// chainlink usd feeds report 8 decimals
pub const FEED_DECIMALS: u8 = 8;

/// scales a feed price up to 18 decimals
const ADDITIONAL_FEED_PRECISION: u8 = DEFAULT_DECIMALS - FEED_DECIMALS;

type Revert = std::result::Result<(), String>;

/// contract storage; cloned before each transaction so a revert leaves it untouched
#[derive(Clone, Debug, Default)]
struct Ledger {
    /// usd price per collateral token, 8 decimals
    prices: HashMap<Address, U256>,
    /// (user, token) -> deposited
    collateral: HashMap<(Address, Address), U256>,
    minted: HashMap<Address, U256>,
    /// (token, owner) -> erc20 balance
    balances: HashMap<(Address, Address), U256>,
    /// (token, owner, spender) -> allowance
    allowances: HashMap<(Address, Address, Address), U256>,
    native: HashMap<Address, U256>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_reads: bool,
    reject: BTreeSet<usize>,
    revert: BTreeSet<usize>,
    stall: BTreeSet<usize>,
}

#[derive(Debug)]
struct PendingTx {
    seq: usize,
    from: Address,
    step: TransactionStep,
}

#[derive(Debug, Default)]
struct SimState {
    ledger: Ledger,
    pending: HashMap<TxHash, PendingTx>,
    /// submit attempts, rejected ones included
    attempts: usize,
    block: u64,
    submitted: Vec<(Address, StepAction)>,
    faults: Faults,
}

/// simulated engine, usable as both oracle and submitter
#[derive(Clone)]
pub struct SimEngine {
    contracts: Contracts,
    params: ProtocolParams,
    state: Arc<Mutex<SimState>>,
}

impl SimEngine {
    /// empty engine with weth priced at `weth_usd`
    pub fn new(contracts: Contracts, params: ProtocolParams, weth_usd: u64) -> Self {
        let mut state = SimState::default();
        state
            .ledger
            .prices
            .insert(contracts.wrapped_collateral, U256::from(weth_usd) * scale(FEED_DECIMALS));
        Self {
            contracts,
            params,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// sepolia addresses, weth at 2000 usd, default parameters
    pub fn sepolia_like() -> Self {
        Self::new(Contracts::sepolia(), Self::default_params(), 2000)
    }

    pub fn with_threshold(liquidation_threshold: u64) -> Self {
        let params = ProtocolParams {
            liquidation_threshold,
            ..Self::default_params()
        };
        Self::new(Contracts::sepolia(), params, 2000)
    }

    /// the deployed engine's constants
    pub fn default_params() -> ProtocolParams {
        ProtocolParams {
            liquidation_threshold: 50,
            liquidation_precision: 100,
            liquidation_bonus: 10,
            min_health_factor: ScaledAmount::units(1),
            precision: scale(DEFAULT_DECIMALS),
        }
    }

    pub fn contracts(&self) -> Contracts {
        self.contracts
    }

    /// move the feed for `token` to a whole usd price
    pub async fn set_price(&self, token: Address, usd: u64) {
        let mut state = self.state.lock().await;
        state.ledger.prices.insert(token, U256::from(usd) * scale(FEED_DECIMALS));
    }

    /// native balance available for wrapping
    pub async fn fund_native(&self, account: Address, amount: ScaledAmount) {
        let mut state = self.state.lock().await;
        let native = state.ledger.native.entry(account).or_default();
        *native = native.saturating_add(amount.raw());
    }

    /// open a position directly: weth collateral deposited, debt minted and
    /// held as stablecoin
    pub async fn seed_position(&self, account: Address, collateral: ScaledAmount, debt: ScaledAmount) {
        let weth = self.contracts.wrapped_collateral;
        let stablecoin = self.contracts.stablecoin;
        let mut state = self.state.lock().await;
        let ledger = &mut state.ledger;
        let deposited = ledger.collateral.entry((account, weth)).or_default();
        *deposited = deposited.saturating_add(collateral.raw());
        let minted = ledger.minted.entry(account).or_default();
        *minted = minted.saturating_add(debt.raw());
        let held = ledger.balances.entry((stablecoin, account)).or_default();
        *held = held.saturating_add(debt.raw());
    }

    pub async fn credit_stablecoin(&self, account: Address, amount: ScaledAmount) {
        let stablecoin = self.contracts.stablecoin;
        let mut state = self.state.lock().await;
        let held = state.ledger.balances.entry((stablecoin, account)).or_default();
        *held = held.saturating_add(amount.raw());
    }

    pub async fn token_balance(&self, token: Address, account: Address) -> ScaledAmount {
        let state = self.state.lock().await;
        ScaledAmount::from_raw(get(&state.ledger.balances, &(token, account)))
    }

    /// make every read fail with `OracleUnavailable`
    pub async fn fail_reads(&self, fail: bool) {
        self.state.lock().await.faults.fail_reads = fail;
    }

    /// the `n`th submit attempt (0-based) is rejected by the signer
    pub async fn reject_submission(&self, n: usize) {
        self.state.lock().await.faults.reject.insert(n);
    }

    /// the `n`th submit attempt (0-based) reverts when mined
    pub async fn revert_submission(&self, n: usize) {
        self.state.lock().await.faults.revert.insert(n);
    }

    /// the `n`th submit attempt (0-based) is never mined
    pub async fn stall_submission(&self, n: usize) {
        self.state.lock().await.faults.stall.insert(n);
    }

    /// accepted submissions, in order
    pub async fn submitted(&self) -> Vec<(Address, StepAction)> {
        self.state.lock().await.submitted.clone()
    }

    async fn read(&self) -> Result<tokio::sync::MutexGuard<'_, SimState>> {
        let state = self.state.lock().await;
        if state.faults.fail_reads {
            return Err(EngineError::OracleUnavailable("rpc unreachable".into()));
        }
        Ok(state)
    }
}

fn get<K: std::hash::Hash + Eq>(map: &HashMap<K, U256>, key: &K) -> U256 {
    map.get(key).copied().unwrap_or_default()
}

fn math(e: EngineError) -> String {
    e.to_string()
}

impl Ledger {
    fn price(&self, token: Address) -> std::result::Result<U256, String> {
        self.prices
            .get(&token)
            .copied()
            .ok_or_else(|| format!("TokenNotAllowed({})", token))
    }

    /// `price * 1e10 * amount / 1e18`
    fn usd_value(&self, token: Address, amount: U256) -> std::result::Result<U256, String> {
        let price = self.price(token)?;
        let adjusted = price
            .checked_mul(scale(ADDITIONAL_FEED_PRECISION))
            .ok_or_else(|| "overflow".to_string())?;
        mul_div(adjusted, amount, scale(DEFAULT_DECIMALS)).map_err(math)
    }

    /// `usd * 1e18 / (price * 1e10)`
    fn token_amount_from_usd(&self, token: Address, usd: U256) -> std::result::Result<U256, String> {
        let price = self.price(token)?;
        let adjusted = price
            .checked_mul(scale(ADDITIONAL_FEED_PRECISION))
            .ok_or_else(|| "overflow".to_string())?;
        mul_div(usd, scale(DEFAULT_DECIMALS), adjusted).map_err(math)
    }

    fn collateral_value(&self, user: Address) -> std::result::Result<U256, String> {
        let mut total = U256::zero();
        for (&(owner, token), &amount) in &self.collateral {
            if owner == user && !amount.is_zero() {
                total = total
                    .checked_add(self.usd_value(token, amount)?)
                    .ok_or_else(|| "overflow".to_string())?;
            }
        }
        Ok(total)
    }

    fn account_info(&self, user: Address) -> std::result::Result<AccountInfo, String> {
        Ok(AccountInfo {
            debt_minted: ScaledAmount::from_raw(get(&self.minted, &user)),
            collateral_value_usd: ScaledAmount::from_raw(self.collateral_value(user)?),
        })
    }

    fn health_factor(&self, params: &ProtocolParams, user: Address) -> std::result::Result<HealthFactor, String> {
        let info = self.account_info(user)?;
        compute_health_factor(params, info.debt_minted, info.collateral_value_usd).map_err(math)
    }

    fn revert_if_broken(&self, params: &ProtocolParams, user: Address) -> Revert {
        let hf = self.health_factor(params, user)?;
        if params.is_liquidatable(hf) {
            return Err(format!("BreaksHealthFactor({})", hf));
        }
        Ok(())
    }

    fn debit(map: &mut HashMap<(Address, Address), U256>, key: (Address, Address), amount: U256, what: &str) -> Revert {
        let entry = map.entry(key).or_default();
        *entry = entry
            .checked_sub(amount)
            .ok_or_else(|| format!("{}: insufficient", what))?;
        Ok(())
    }

    fn credit(map: &mut HashMap<(Address, Address), U256>, key: (Address, Address), amount: U256) -> Revert {
        let entry = map.entry(key).or_default();
        *entry = entry.checked_add(amount).ok_or_else(|| "overflow".to_string())?;
        Ok(())
    }

    fn transfer_from(&mut self, token: Address, owner: Address, spender: Address, to: Address, amount: U256) -> Revert {
        let allowance = self.allowances.entry((token, owner, spender)).or_default();
        *allowance = allowance
            .checked_sub(amount)
            .ok_or_else(|| "ERC20InsufficientAllowance".to_string())?;
        Self::debit(&mut self.balances, (token, owner), amount, "ERC20InsufficientBalance")?;
        Self::credit(&mut self.balances, (token, to), amount)
    }

    fn redeem(&mut self, token: Address, amount: U256, from: Address, to: Address) -> Revert {
        Self::debit(&mut self.collateral, (from, token), amount, "redeem exceeds deposit")?;
        Self::credit(&mut self.balances, (token, to), amount)
    }

    /// pull stablecoin from `payer` and burn it against `on_behalf_of`'s debt
    fn burn(&mut self, contracts: &Contracts, amount: U256, on_behalf_of: Address, payer: Address) -> Revert {
        let minted = self.minted.entry(on_behalf_of).or_default();
        *minted = minted
            .checked_sub(amount)
            .ok_or_else(|| "burn exceeds debt".to_string())?;
        self.transfer_from(contracts.stablecoin, payer, contracts.engine, contracts.engine, amount)?;
        Self::debit(&mut self.balances, (contracts.stablecoin, contracts.engine), amount, "burn")?;
        Ok(())
    }

    fn mint(&mut self, contracts: &Contracts, params: &ProtocolParams, user: Address, amount: U256) -> Revert {
        let minted = self.minted.entry(user).or_default();
        *minted = minted.checked_add(amount).ok_or_else(|| "overflow".to_string())?;
        self.revert_if_broken(params, user)?;
        Self::credit(&mut self.balances, (contracts.stablecoin, user), amount)
    }

    fn deposit(&mut self, contracts: &Contracts, user: Address, token: Address, amount: U256) -> Revert {
        self.price(token)?;
        Self::credit(&mut self.collateral, (user, token), amount)?;
        self.transfer_from(token, user, contracts.engine, contracts.engine, amount)
    }

    fn apply(&mut self, contracts: &Contracts, params: &ProtocolParams, from: Address, step: &TransactionStep) -> Revert {
        let nonzero = |amount: ScaledAmount| -> Revert {
            if amount.is_zero() {
                return Err("NeedsMoreThanZero".into());
            }
            Ok(())
        };

        match &step.call {
            StepCall::Wrap { amount } => {
                if step.target != contracts.wrapped_collateral {
                    return Err("deposit() sent to a non-weth contract".into());
                }
                let native = self.native.entry(from).or_default();
                *native = native
                    .checked_sub(amount.raw())
                    .ok_or_else(|| "insufficient native balance".to_string())?;
                Self::credit(&mut self.balances, (step.target, from), amount.raw())?;
            }
            StepCall::Approve { spender, amount } => {
                self.allowances.insert((step.target, from, *spender), amount.raw());
            }
            StepCall::DepositAndMint { token, collateral, mint } => {
                nonzero(*collateral)?;
                nonzero(*mint)?;
                self.deposit(contracts, from, *token, collateral.raw())?;
                self.mint(contracts, params, from, mint.raw())?;
            }
            StepCall::Mint { amount } => {
                nonzero(*amount)?;
                self.mint(contracts, params, from, amount.raw())?;
            }
            StepCall::Burn { amount } => {
                nonzero(*amount)?;
                self.burn(contracts, amount.raw(), from, from)?;
                self.revert_if_broken(params, from)?;
            }
            StepCall::Redeem { token, amount } => {
                nonzero(*amount)?;
                self.redeem(*token, amount.raw(), from, from)?;
                self.revert_if_broken(params, from)?;
            }
            StepCall::BurnAndRedeem { token, collateral, burn } => {
                nonzero(*collateral)?;
                self.burn(contracts, burn.raw(), from, from)?;
                self.redeem(*token, collateral.raw(), from, from)?;
                self.revert_if_broken(params, from)?;
            }
            StepCall::Liquidate {
                collateral_token,
                target,
                debt_to_cover,
            } => {
                nonzero(*debt_to_cover)?;
                let starting = self.health_factor(params, *target)?;
                if !params.is_liquidatable(starting) {
                    return Err("HealthFactorOk".into());
                }
                let base = self.token_amount_from_usd(*collateral_token, debt_to_cover.raw())?;
                let bonus = fraction_of(
                    ScaledAmount::from_raw(base),
                    params.liquidation_bonus,
                    params.liquidation_precision,
                )
                .map_err(math)?;
                let total = base
                    .checked_add(bonus.raw())
                    .ok_or_else(|| "overflow".to_string())?;
                self.redeem(*collateral_token, total, *target, from)?;
                self.burn(contracts, debt_to_cover.raw(), *target, from)?;

                let ending = self.health_factor(params, *target)?;
                let improved = match (starting, ending) {
                    (_, HealthFactor::Infinite) => true,
                    (HealthFactor::Finite(s), HealthFactor::Finite(e)) => e > s,
                    (HealthFactor::Infinite, HealthFactor::Finite(_)) => false,
                };
                if !improved {
                    return Err("HealthFactorNotImproved".into());
                }
                self.revert_if_broken(params, from)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PositionOracle for SimEngine {
    async fn get_usd_value(&self, token: Address, amount: ScaledAmount) -> Result<ScaledAmount> {
        let state = self.read().await?;
        state
            .ledger
            .usd_value(token, amount.raw())
            .map(ScaledAmount::from_raw)
            .map_err(EngineError::OracleUnavailable)
    }

    async fn get_account_info(&self, account: Address) -> Result<AccountInfo> {
        let state = self.read().await?;
        state.ledger.account_info(account).map_err(EngineError::OracleUnavailable)
    }

    async fn get_collateral_deposited(&self, account: Address, token: Address) -> Result<ScaledAmount> {
        let state = self.read().await?;
        Ok(ScaledAmount::from_raw(get(&state.ledger.collateral, &(account, token))))
    }

    async fn get_health_factor(&self, account: Address) -> Result<HealthFactor> {
        let state = self.read().await?;
        state
            .ledger
            .health_factor(&self.params, account)
            .map_err(EngineError::OracleUnavailable)
    }

    async fn get_token_amount_for_debt(&self, token: Address, debt: ScaledAmount) -> Result<ScaledAmount> {
        let state = self.read().await?;
        state
            .ledger
            .token_amount_from_usd(token, debt.raw())
            .map(ScaledAmount::from_raw)
            .map_err(EngineError::OracleUnavailable)
    }

    async fn calculate_health_factor(
        &self,
        debt_minted: ScaledAmount,
        collateral_value_usd: ScaledAmount,
    ) -> Result<HealthFactor> {
        let _state = self.read().await?;
        compute_health_factor(&self.params, debt_minted, collateral_value_usd)
    }

    async fn get_protocol_params(&self) -> Result<ProtocolParams> {
        let _state = self.read().await?;
        Ok(self.params)
    }

    async fn get_collateral_tokens(&self) -> Result<Vec<Address>> {
        let state = self.read().await?;
        let mut tokens: Vec<Address> = state.ledger.prices.keys().copied().collect();
        tokens.sort();
        Ok(tokens)
    }

    async fn get_stablecoin_balance(&self, account: Address) -> Result<ScaledAmount> {
        let state = self.read().await?;
        Ok(ScaledAmount::from_raw(get(&state.ledger.balances, &(self.contracts.stablecoin, account))))
    }
}

#[async_trait]
impl TxSubmitter for SimEngine {
    async fn submit(&self, from: Address, step: &TransactionStep) -> std::result::Result<TxHash, TxError> {
        let mut state = self.state.lock().await;
        let seq = state.attempts;
        state.attempts += 1;

        if state.faults.reject.contains(&seq) {
            return Err(TxError::Rejected);
        }

        let mut hash = [0u8; 32];
        hash[..20].copy_from_slice(from.as_bytes());
        hash[24..].copy_from_slice(&(seq as u64).to_be_bytes());
        let tx = TxHash(hash);

        state.submitted.push((from, step.action()));
        state.pending.insert(
            tx,
            PendingTx {
                seq,
                from,
                step: step.clone(),
            },
        );
        Ok(tx)
    }

    async fn wait_for_confirmation(&self, tx: TxHash) -> std::result::Result<Receipt, TxError> {
        let mut state = self.state.lock().await;
        let pending = state
            .pending
            .remove(&tx)
            .ok_or_else(|| TxError::Rpc(format!("unknown transaction {}", tx)))?;

        if state.faults.stall.contains(&pending.seq) {
            drop(state);
            std::future::pending::<()>().await;
            return Err(TxError::Timeout);
        }

        state.block += 1;
        let block_number = state.block;

        if state.faults.revert.contains(&pending.seq) {
            return Err(TxError::Reverted("execution reverted".into()));
        }

        let mut next = state.ledger.clone();
        next.apply(&self.contracts, &self.params, pending.from, &pending.step)
            .map_err(TxError::Reverted)?;
        state.ledger = next;

        Ok(Receipt {
            tx_hash: tx,
            block_number,
        })
    }
}
