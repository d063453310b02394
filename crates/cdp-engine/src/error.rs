//! error types for the position engine

use thiserror::Error;

use crate::fixed_point::ScaledAmount;
use crate::plan::StepAction;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: ScaledAmount, need: ScaledAmount },

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("step {index} ({action}) failed: {cause}")]
    StepFailed {
        index: usize,
        action: StepAction,
        cause: TxError,
    },

    #[error("stale response: request {token} superseded by {latest}")]
    StaleResponse { token: u64, latest: u64 },

    #[error("arithmetic overflow")]
    Overflow,

    #[error("division by zero")]
    DivisionByZero,

    #[error("config error: {0}")]
    Config(String),

    #[error("no wallet connected")]
    NotConnected,
}

impl EngineError {
    /// stale responses are dropped silently by callers, never shown
    pub fn is_stale(&self) -> bool {
        matches!(self, EngineError::StaleResponse { .. })
    }

    /// failures that leave a preview "unavailable" instead of surfacing an error
    pub fn is_preview_local(&self) -> bool {
        matches!(
            self,
            EngineError::Parse(_)
                | EngineError::OracleUnavailable(_)
                | EngineError::InvalidAddress(_)
                | EngineError::Overflow
                | EngineError::DivisionByZero
        )
    }
}

/// why a single transaction step did not reach confirmation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("rejected by signer")]
    Rejected,

    #[error("reverted: {0}")]
    Reverted(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("timed out waiting for confirmation")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl From<toml::de::Error> for EngineError {
    fn from(e: toml::de::Error) -> Self {
        EngineError::Config(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Config(e.to_string())
    }
}
