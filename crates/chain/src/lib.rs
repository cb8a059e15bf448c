//! Event-sourced loan ledgers for Starknet lending protocols.
//!
//! This crate provides:
//! - Token registry with per-protocol risk parameters
//! - Interest accumulator tables (raw/face amount conversion)
//! - Per-wallet loan positions with fixed token sets
//! - Event decoding (felt payloads, event-name normalization)
//! - Loan ledgers for zkLend, Nostra Alpha and Nostra Mainnet
//!
//! Ledgers fold an ordered event stream into per-wallet positions; they never
//! fetch events themselves and own their state exclusively, so independent
//! protocols can replay on independent tasks without locking.

mod accumulator;
mod error;
mod event;
pub mod ledger;
mod position;
mod tokens;

pub use accumulator::{approx_f64, approx_f64_signed, AccumulatorTable, Side};
pub use error::LedgerError;
pub use event::{
    parse_amount, parse_felt, Event, NostraEventKind, PayloadReader, RawEventRecord,
    ZkLendEventKind,
};
pub use ledger::nostra::{NostraLedger, NostraToken, NostraTokenKind};
pub use ledger::zklend::ZkLendLedger;
pub use ledger::{
    replay, LedgerCore, LedgerSnapshot, OnMalformed, Protocol, ProtocolLedger, ReplaySummary,
};
pub use position::{LoanPosition, PositionTemplate, TokenBalances, TokenFlags, TokenSet};
pub use tokens::{felt, RiskParams, Token, TokenEntry, TokenRegistry, UNDERLYINGS};
