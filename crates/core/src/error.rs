//! Error taxonomy for the risk engine.

use thiserror::Error;

use liqmon_api::CurveError;
use liqmon_chain::LedgerError;

/// Anything that can go wrong between a ledger snapshot and a risk report.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Curve(#[from] CurveError),

    /// A token in a position has no quoted price.
    #[error("no price available for {0}")]
    MissingPrice(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}
