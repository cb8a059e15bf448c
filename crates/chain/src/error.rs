//! Ledger error taxonomy.

use alloy::primitives::U256;
use thiserror::Error;

/// Errors raised while folding an event stream into loan positions.
///
/// `MalformedEvent` and `UnknownToken` are recoverable under the default fold
/// policy (skip and continue, surfaced as structured warnings). `Regression`
/// and `Precision` indicate a data-integrity problem upstream and always abort
/// the affected protocol's replay.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Event payload had unexpected arity or an unparseable field.
    #[error("malformed event at block {block}, index {index}: {reason}")]
    MalformedEvent {
        block: u64,
        index: u64,
        reason: String,
    },

    /// An interest accumulator sync tried to move an index backward.
    #[error("accumulator for {token} would regress: stored {stored}, incoming {incoming}")]
    Regression {
        token: &'static str,
        stored: U256,
        incoming: U256,
    },

    /// A raw/face conversion would overflow 256-bit arithmetic.
    #[error("precision loss converting amount for {token}: {detail}")]
    Precision {
        token: &'static str,
        detail: &'static str,
    },

    /// A token outside the protocol's configured set was referenced.
    #[error("token {0} is not configured for this protocol")]
    UnknownToken(String),
}
