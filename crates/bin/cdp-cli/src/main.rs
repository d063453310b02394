use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cdp_engine::sim::SimEngine;
use cdp_engine::{
    format_address, liquidation_preview, mint_preview, redeem_preview, to_scaled, Address, EngineConfig,
    Orchestrator, PlanOutcome, PlanState, PositionOracle, PositionStateStore, ProtocolParams, ScaledAmount,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cdp-cli")]
#[command(about = "cdp engine previews and transaction plans against an in-memory engine", long_about = None)]
struct Args {
    /// engine config (toml); defaults to the sepolia deployment
    #[arg(long, env = "CDP_CONFIG")]
    config: Option<PathBuf>,

    /// weth price in whole usd
    #[arg(long, default_value_t = 2000)]
    price: u64,

    /// liquidation threshold override, in percent
    #[arg(long)]
    threshold: Option<u64>,

    /// account acting as the connected wallet
    #[arg(long, default_value = "0x00000000000000000000000000000000000a11ce")]
    account: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// usd value, max mintable and projected health factor for a deposit
    PreviewMint {
        #[arg(long)]
        collateral: String,
        #[arg(long)]
        mint: String,
    },
    /// health factor after withdrawing collateral from a seeded position
    PreviewRedeem {
        #[arg(long)]
        deposited: String,
        #[arg(long)]
        debt: String,
        #[arg(long)]
        redeem: String,
    },
    /// collateral paid out for covering part of a target's debt
    PreviewLiquidation {
        /// target's debt
        #[arg(long)]
        debt: String,
        /// target's collateral value in usd
        #[arg(long)]
        collateral_usd: String,
        /// debt to cover
        #[arg(long)]
        burn: String,
    },
    /// wrap, approve and deposit-and-mint, then show the refreshed position
    DepositAndMint {
        #[arg(long)]
        collateral: String,
        #[arg(long)]
        mint: String,
    },
    /// print the effective configuration
    ShowConfig,
}

struct Session {
    config: EngineConfig,
    params: ProtocolParams,
    engine: Arc<SimEngine>,
    account: Address,
}

impl Session {
    fn amount(&self, input: &str) -> Result<ScaledAmount> {
        to_scaled(input, self.config.decimals).with_context(|| format!("invalid amount {:?}", input))
    }

    fn show(&self, amount: ScaledAmount) -> String {
        cdp_engine::format_display(amount, self.config.decimals, self.config.display_precision)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cdp_cli=info,cdp_engine=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let mut params = SimEngine::default_params();
    if let Some(threshold) = args.threshold {
        params.liquidation_threshold = threshold;
    }
    let engine = Arc::new(SimEngine::new(config.contracts, params, args.price));
    let account: Address = args.account.parse().context("invalid --account")?;
    // previews use what the engine reports, not the local defaults
    let params = engine.get_protocol_params().await?;

    info!("network: {} (chain {})", config.network.name, config.network.chain_id);
    info!("engine: {}", format_address(&config.contracts.engine.to_string()));

    let session = Session {
        config,
        params,
        engine,
        account,
    };

    let output = match args.command {
        Command::PreviewMint { collateral, mint } => preview_mint(&session, &collateral, &mint).await?,
        Command::PreviewRedeem { deposited, debt, redeem } => {
            preview_redeem(&session, &deposited, &debt, &redeem).await?
        }
        Command::PreviewLiquidation {
            debt,
            collateral_usd,
            burn,
        } => preview_liquidation(&session, &debt, &collateral_usd, &burn).await?,
        Command::DepositAndMint { collateral, mint } => deposit_and_mint(&session, &collateral, &mint).await?,
        Command::ShowConfig => serde_json::to_value(&session.config)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn preview_mint(session: &Session, collateral: &str, mint: &str) -> Result<serde_json::Value> {
    let collateral = session.amount(collateral)?;
    let mint = session.amount(mint)?;
    let token = session.config.contracts.wrapped_collateral;

    let current = cdp_engine::fetch_position(session.engine.as_ref(), session.account, token).await?;
    let preview = mint_preview(session.engine.as_ref(), &session.params, token, &current, collateral, mint).await?;

    Ok(json!({
        "collateral_usd": session.show(preview.collateral_usd),
        "max_mintable": session.show(preview.max_mintable),
        "projected_health_factor": preview.projected_health_factor.display(session.config.display_precision),
        "breaks_health_factor": preview.breaks_health_factor,
    }))
}

async fn preview_redeem(session: &Session, deposited: &str, debt: &str, redeem: &str) -> Result<serde_json::Value> {
    let token = session.config.contracts.wrapped_collateral;
    session
        .engine
        .seed_position(session.account, session.amount(deposited)?, session.amount(debt)?)
        .await;

    let current = cdp_engine::fetch_position(session.engine.as_ref(), session.account, token).await?;
    let preview = redeem_preview(
        session.engine.as_ref(),
        &session.params,
        token,
        &current,
        session.amount(redeem)?,
    )
    .await?;

    Ok(json!({
        "position": current.view(session.config.display_precision),
        "redeem_usd": session.show(preview.redeem_usd),
        "projected_health_factor": preview.projected_health_factor.display(session.config.display_precision),
        "exceeds_deposit": preview.exceeds_deposit,
        "breaks_health_factor": preview.breaks_health_factor,
    }))
}

async fn preview_liquidation(
    session: &Session,
    debt: &str,
    collateral_usd: &str,
    burn: &str,
) -> Result<serde_json::Value> {
    let token = session.config.contracts.wrapped_collateral;
    let preview = liquidation_preview(
        session.engine.as_ref(),
        token,
        session.amount(debt)?,
        session.amount(collateral_usd)?,
        session.amount(burn)?,
        &session.params,
    )
    .await?;

    Ok(json!({
        // as typed; the numbers below use the clamped amount
        "requested_burn": session.show(preview.requested_burn),
        "clamped_burn": session.show(preview.clamped_burn),
        "over_debt": preview.over_debt,
        "base_collateral": session.show(preview.base_collateral),
        "bonus_collateral": session.show(preview.bonus_collateral),
        "total_collateral": session.show(preview.total_collateral),
        "usd_value": session.show(preview.usd_value),
        "projected_target_health_factor": preview
            .projected_target_health_factor
            .display(session.config.display_precision),
    }))
}

async fn deposit_and_mint(session: &Session, collateral: &str, mint: &str) -> Result<serde_json::Value> {
    let collateral = session.amount(collateral)?;
    let mint = session.amount(mint)?;

    session.engine.fund_native(session.account, collateral).await;
    let store = Arc::new(PositionStateStore::new(session.config.contracts.wrapped_collateral));
    store.connect(session.account).await?;

    let orchestrator = Orchestrator::new(session.engine.clone(), session.engine.clone(), store.clone(), &session.config);
    let outcome = orchestrator.deposit_and_mint(collateral, mint).await?;

    let position = store.position().await.context("wallet disconnected during plan")?;
    let balance = session.engine.get_stablecoin_balance(session.account).await?;

    Ok(json!({
        "plan": summarize(&outcome),
        "position": position.position.view(session.config.display_precision),
        "stale": position.stale,
        "stablecoin_balance": session.show(balance),
    }))
}

fn summarize(outcome: &PlanOutcome) -> serde_json::Value {
    let steps: Vec<serde_json::Value> = outcome
        .completed
        .iter()
        .map(|r| {
            json!({
                "step": r.index + 1,
                "action": r.action,
                "tx": r.receipt.tx_hash.to_string(),
                "block": r.receipt.block_number,
            })
        })
        .collect();

    let status = match &outcome.state {
        PlanState::Complete => json!("complete"),
        PlanState::Failed { index, action, error } => json!({
            "failed_at": index + 1,
            "action": action,
            "error": error.to_string(),
        }),
        other => json!(format!("{:?}", other)),
    };

    json!({
        "kind": outcome.kind,
        "status": status,
        "confirmed": steps,
    })
}
