//! Risk engine over reconstructed lending positions.
//!
//! This crate turns ledger snapshots and DEX liquidity curves into risk
//! numbers:
//! - Position valuation and health factors
//! - Liquidation sizing per protocol
//! - Liquidable-debt-vs-price aggregation with slippage-cliff detection
//! - Output records for downstream storage
//! - Engine configuration

mod aggregator;
pub mod config;
mod error;
mod report;
mod risk;

pub use aggregator::{
    liquidable_debt_series, BranchFailure, LiquidableDebtSeries, LiquidablePoint, ProtocolState,
    SweepConfig,
};
pub use config::{EngineConfig, EndpointsConfig, FoldConfig, MalformedPolicy, PriceRangeConfig, RetryConfig};
pub use error::EngineError;
pub use report::{loan_state_records, order_book_record, LoanStateRecord, OrderBookRecord};
pub use risk::{
    collateral_value, debt_value, face_amount, health_factor, max_liquidatable_debt, Prices,
    LIQUIDATION_HEALTH_FACTOR_THRESHOLD, TARGET_HEALTH_FACTOR,
};
