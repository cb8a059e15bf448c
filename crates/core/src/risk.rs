//! Position valuation and liquidation sizing.
//!
//! Everything here runs at the float boundary: raw ledger integers are turned
//! into face amounts through the accumulator table, divided by the token's
//! decimal factor, and priced in USD. The ledger itself never sees a float.

use alloy::primitives::I256;

use liqmon_chain::{
    approx_f64_signed, AccumulatorTable, LoanPosition, Protocol, Side, TokenEntry, TokenRegistry,
};

use crate::error::EngineError;

use std::collections::HashMap;

/// Health factor below which a position is open to liquidation.
pub const LIQUIDATION_HEALTH_FACTOR_THRESHOLD: f64 = 1.0;

/// Health factor a Nostra liquidation restores the position to.
pub const TARGET_HEALTH_FACTOR: f64 = 1.25;

/// USD quotes per underlying token symbol.
#[derive(Debug, Clone, Default)]
pub struct Prices {
    by_symbol: HashMap<String, f64>,
}

impl Prices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, symbol: impl Into<String>, usd: f64) {
        self.by_symbol.insert(symbol.into(), usd);
    }

    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.by_symbol.get(symbol).copied()
    }

    pub fn require(&self, symbol: &str) -> Result<f64, EngineError> {
        self.get(symbol)
            .ok_or_else(|| EngineError::MissingPrice(symbol.to_string()))
    }

    /// Copy of the table with one symbol re-quoted, for hypothetical-price
    /// sweeps.
    pub fn with_price(&self, symbol: &str, usd: f64) -> Self {
        let mut prices = self.clone();
        prices.set(symbol, usd);
        prices
    }
}

/// Face amount of a raw balance in human units.
pub fn face_amount(
    entry: &TokenEntry,
    raw: I256,
    accumulators: &AccumulatorTable,
    side: Side,
) -> f64 {
    let index = accumulators.index_f64(entry.token.symbol, side);
    approx_f64_signed(raw) * index / 10f64.powi(entry.token.decimals as i32)
}

/// USD value of a position's collateral.
///
/// With `risk_adjusted` each token is haircut by its collateral factor.
pub fn collateral_value(
    position: &LoanPosition,
    registry: &TokenRegistry,
    accumulators: &AccumulatorTable,
    prices: &Prices,
    risk_adjusted: bool,
) -> Result<f64, EngineError> {
    let mut total = 0.0;
    for (symbol, raw) in position.effective_collateral() {
        if raw == I256::ZERO {
            continue;
        }
        let entry = registry.require(symbol)?;
        let price = prices.require(entry.underlying)?;
        let factor = if risk_adjusted {
            entry.risk.collateral_factor
        } else {
            1.0
        };
        total += face_amount(entry, raw, accumulators, Side::Lending) * price * factor;
    }
    Ok(total)
}

/// USD value of a position's debt.
///
/// With `risk_adjusted` each token is inflated by its debt factor.
pub fn debt_value(
    position: &LoanPosition,
    registry: &TokenRegistry,
    accumulators: &AccumulatorTable,
    prices: &Prices,
    risk_adjusted: bool,
) -> Result<f64, EngineError> {
    let mut total = 0.0;
    for (symbol, raw) in position.debt.iter() {
        if raw == I256::ZERO {
            continue;
        }
        let entry = registry.require(symbol)?;
        let price = prices.require(entry.underlying)?;
        let factor = if risk_adjusted { entry.risk.debt_factor } else { 1.0 };
        total += face_amount(entry, raw, accumulators, Side::Debt) * price / factor;
    }
    Ok(total)
}

/// Risk-adjusted collateral over risk-adjusted debt.
///
/// A position with no debt has a health factor of positive infinity; the
/// result is always an ordered float, never NaN.
pub fn health_factor(
    position: &LoanPosition,
    registry: &TokenRegistry,
    accumulators: &AccumulatorTable,
    prices: &Prices,
) -> Result<f64, EngineError> {
    let debt = debt_value(position, registry, accumulators, prices, true)?;
    if debt <= 0.0 {
        return Ok(f64::INFINITY);
    }
    let collateral = collateral_value(position, registry, accumulators, prices, true)?;
    Ok(collateral / debt)
}

/// Largest USD amount of one debt token a liquidator could repay against this
/// position, given a seized collateral underlying.
///
/// zkLend solves for the repayment that brings the position back to the edge
/// of solvency, paying the liquidator the per-token bonus. Nostra solves for
/// the repayment fraction restoring [`TARGET_HEALTH_FACTOR`], with a fee that
/// scales in how far below water the position is; across the wallet's
/// collateral tokens for the underlying, the one paying the liquidator the
/// most wins, first in address order on ties. Either way the repayment is
/// capped at the outstanding debt and at what the seizable collateral can
/// pay out.
///
/// Positions at or above the liquidation threshold return zero.
pub fn max_liquidatable_debt(
    protocol: Protocol,
    position: &LoanPosition,
    registry: &TokenRegistry,
    accumulators: &AccumulatorTable,
    prices: &Prices,
    collateral_underlying: &str,
    debt_underlying: &str,
) -> Result<f64, EngineError> {
    let hf = health_factor(position, registry, accumulators, prices)?;
    if hf >= LIQUIDATION_HEALTH_FACTOR_THRESHOLD {
        return Ok(0.0);
    }
    match protocol {
        Protocol::ZkLend => zklend_liquidatable_usd(
            position,
            registry,
            accumulators,
            prices,
            collateral_underlying,
            debt_underlying,
        ),
        Protocol::NostraAlpha | Protocol::NostraMainnet => nostra_liquidatable_usd(
            position,
            registry,
            accumulators,
            prices,
            hf,
            collateral_underlying,
            debt_underlying,
        ),
    }
}

/// zkLend sizing: `(debt - risk-adjusted collateral) / (1 - cf * (1 + bonus))`
/// in USD, capped at the outstanding amount of the debt token.
fn zklend_liquidatable_usd(
    position: &LoanPosition,
    registry: &TokenRegistry,
    accumulators: &AccumulatorTable,
    prices: &Prices,
    collateral_underlying: &str,
    debt_underlying: &str,
) -> Result<f64, EngineError> {
    let collateral_entry = registry.require(collateral_underlying)?;
    let debt_entry = registry.require(debt_underlying)?;

    let risk_adjusted_collateral =
        collateral_value(position, registry, accumulators, prices, true)?;
    let total_debt = debt_value(position, registry, accumulators, prices, false)?;

    let denominator = 1.0
        - collateral_entry.risk.collateral_factor
            * (1.0 + collateral_entry.risk.liquidation_bonus);
    if denominator <= 0.0 {
        return Ok(0.0);
    }
    let max_usd = (total_debt - risk_adjusted_collateral) / denominator;

    let outstanding = face_amount(
        debt_entry,
        position.debt.get(debt_entry.token.symbol)?,
        accumulators,
        Side::Debt,
    ) * prices.require(debt_entry.underlying)?;
    Ok(max_usd.clamp(0.0, outstanding.max(0.0)))
}

/// Nostra sizing over the wallet's collateral tokens for one underlying.
fn nostra_liquidatable_usd(
    position: &LoanPosition,
    registry: &TokenRegistry,
    accumulators: &AccumulatorTable,
    prices: &Prices,
    hf: f64,
    collateral_underlying: &str,
    debt_underlying: &str,
) -> Result<f64, EngineError> {
    // The borrowed token for the underlying of interest.
    let Some(debt_entry) = position
        .debt
        .iter()
        .filter(|&(_, raw)| raw.is_positive())
        .filter_map(|(symbol, _)| registry.get(symbol))
        .find(|entry| entry.underlying == debt_underlying)
    else {
        return Ok(0.0);
    };
    let debt_price = prices.require(debt_entry.underlying)?;
    let outstanding = face_amount(
        debt_entry,
        position.debt.get(debt_entry.token.symbol)?,
        accumulators,
        Side::Debt,
    );

    let collateral_price = prices.require(collateral_underlying)?;
    let mut candidates: Vec<(&TokenEntry, I256)> = position
        .effective_collateral()
        .into_iter()
        .filter(|&(_, raw)| raw.is_positive())
        .filter_map(|(symbol, raw)| registry.get(symbol).map(|entry| (entry, raw)))
        .filter(|(entry, _)| entry.underlying == collateral_underlying)
        .collect();
    candidates.sort_by_key(|(entry, _)| entry.token.address);

    let mut best_fee_usd = 0.0;
    let mut best_amount_usd = 0.0;
    for (entry, raw) in candidates {
        let risk = entry.risk;
        let liquidator_fee = (risk.liquidator_fee_beta
            * (LIQUIDATION_HEALTH_FACTOR_THRESHOLD - hf))
            .min(risk.liquidator_fee_max);
        let total_fee = liquidator_fee + risk.protocol_fee;
        let denominator = TARGET_HEALTH_FACTOR
            - risk.collateral_factor * debt_entry.risk.debt_factor * (1.0 + total_fee);
        if denominator <= 0.0 {
            continue;
        }
        let fraction = ((TARGET_HEALTH_FACTOR - hf) / denominator).clamp(0.0, 1.0);
        // The seized collateral pays out the repayment plus both fees, so the
        // candidate's balance bounds how much debt can actually be repaid.
        let seizable_usd =
            face_amount(entry, raw, accumulators, Side::Lending) * collateral_price;
        let amount_usd =
            (fraction * outstanding * debt_price).min(seizable_usd / (1.0 + total_fee));
        let fee_usd = liquidator_fee * amount_usd;
        if fee_usd > best_fee_usd {
            best_fee_usd = fee_usd;
            best_amount_usd = amount_usd;
        }
    }
    Ok(best_amount_usd)
}
