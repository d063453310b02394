//! cached positions for the connected wallet and an inspected target
//!
//! the cache is only ever filled from contract reads. a refresh fetches
//! outside the lock and swaps the whole position in one write, so readers see
//! either the old position or the new one.

use tokio::sync::RwLock;

use crate::error::{EngineError, Result};
use crate::oracle::{fetch_position, PositionOracle};
use crate::types::{Address, Position};

/// cached position plus whether the last refresh failed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub address: Address,
    pub position: Position,
    /// last refresh failed; `position` is the previous value
    pub stale: bool,
}

impl Snapshot {
    fn empty(address: Address) -> Self {
        Self {
            address,
            position: Position::default(),
            stale: false,
        }
    }
}

#[derive(Default)]
struct StoreState {
    own: Option<Snapshot>,
    target: Option<Snapshot>,
}

impl StoreState {
    fn slot(&self, address: Address) -> Option<&Snapshot> {
        [self.own.as_ref(), self.target.as_ref()]
            .into_iter()
            .flatten()
            .find(|s| s.address == address)
    }

    fn slot_mut(&mut self, address: Address) -> Option<&mut Snapshot> {
        if self.own.is_some_and(|s| s.address == address) {
            return self.own.as_mut();
        }
        if self.target.is_some_and(|s| s.address == address) {
            return self.target.as_mut();
        }
        None
    }
}

/// position cache shared by the orchestrator and the ui
pub struct PositionStateStore {
    collateral_token: Address,
    state: RwLock<StoreState>,
}

impl PositionStateStore {
    /// positions are read against `collateral_token` for the deposited amount
    pub fn new(collateral_token: Address) -> Self {
        Self {
            collateral_token,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// start tracking `account` with an empty position
    pub async fn connect(&self, account: Address) -> Result<()> {
        account.ensure_valid()?;
        let mut state = self.state.write().await;
        state.own = Some(Snapshot::empty(account));
        state.target = None;
        tracing::info!("wallet connected: {}", account.short());
        Ok(())
    }

    /// drop everything, including the inspected target
    pub async fn disconnect(&self) {
        let mut state = self.state.write().await;
        *state = StoreState::default();
        tracing::info!("wallet disconnected, position cache cleared");
    }

    pub async fn account(&self) -> Option<Address> {
        self.state.read().await.own.map(|s| s.address)
    }

    /// connected account or `NotConnected`
    pub async fn require_account(&self) -> Result<Address> {
        self.account().await.ok_or(EngineError::NotConnected)
    }

    pub async fn position(&self) -> Option<Snapshot> {
        self.state.read().await.own
    }

    pub async fn target(&self) -> Option<Snapshot> {
        self.state.read().await.target
    }

    /// load another account's position for liquidation
    pub async fn inspect_target(&self, oracle: &dyn PositionOracle, address: Address) -> Result<Position> {
        address.ensure_valid()?;
        let position = fetch_position(oracle, address, self.collateral_token).await?;
        let mut state = self.state.write().await;
        state.target = Some(Snapshot {
            address,
            position,
            stale: false,
        });
        Ok(position)
    }

    pub async fn clear_target(&self) {
        self.state.write().await.target = None;
    }

    /// re-read a tracked address and replace its cached position
    ///
    /// on failure the previous position is kept and marked stale. addresses
    /// that are not tracked are ignored.
    pub async fn refresh(&self, oracle: &dyn PositionOracle, address: Address) -> Result<()> {
        if !self.is_tracked(address).await {
            tracing::debug!("skipping refresh for untracked {}", address.short());
            return Ok(());
        }

        let fetched = fetch_position(oracle, address, self.collateral_token).await;

        let mut state = self.state.write().await;
        // disconnected or switched while the reads were in flight
        let Some(slot) = state.slot_mut(address) else {
            tracing::debug!("dropping refresh for {}, no longer tracked", address.short());
            return Ok(());
        };

        match fetched {
            Ok(position) => {
                slot.position = position;
                slot.stale = false;
                tracing::debug!("refreshed {}: hf {}", address.short(), position.health_factor);
                Ok(())
            }
            Err(e) => {
                slot.stale = true;
                tracing::warn!("refresh failed for {}: {}", address.short(), e);
                Err(e)
            }
        }
    }

    pub async fn is_tracked(&self, address: Address) -> bool {
        self.state.read().await.slot(address).is_some()
    }

    pub async fn is_stale(&self, address: Address) -> bool {
        self.state.read().await.slot(address).is_some_and(|s| s.stale)
    }

    pub async fn mark_stale(&self, address: Address) {
        if let Some(slot) = self.state.write().await.slot_mut(address) {
            slot.stale = true;
        }
    }
}
