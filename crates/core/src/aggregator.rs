//! Liquidable debt versus available liquidity.
//!
//! For one collateral/debt underlying pair, sweep the collateral price over a
//! grid and at each hypothetical price sum the debt that would open up for
//! liquidation across every reconstructed protocol, next to the on-chain
//! liquidity that could absorb the resulting sales. Where liquidation demand
//! first exceeds the available depth on the way down is the slippage cliff.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use liqmon_api::{AmmPoolSet, OrderBookCurve};
use liqmon_chain::{AccumulatorTable, LedgerSnapshot, Protocol, TokenRegistry};

use crate::error::EngineError;
use crate::risk::{max_liquidatable_debt, Prices};

/// Reconstructed state of one protocol, ready for valuation.
#[derive(Debug, Clone)]
pub struct ProtocolState {
    pub protocol: Protocol,
    pub snapshot: LedgerSnapshot,
    pub registry: TokenRegistry,
    pub accumulators: AccumulatorTable,
}

/// Hypothetical collateral-price grid.
///
/// Prices run from just above zero to `upper_multiplier` times the current
/// price in `steps` even increments, so the grid covers both the crash
/// scenarios below the current price and a small band above it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_upper_multiplier")]
    pub upper_multiplier: f64,
    #[serde(default = "default_steps")]
    pub steps: usize,
}

fn default_upper_multiplier() -> f64 {
    1.2
}
fn default_steps() -> usize {
    50
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            upper_multiplier: default_upper_multiplier(),
            steps: default_steps(),
        }
    }
}

impl SweepConfig {
    pub fn grid(&self, current_price: f64) -> Vec<f64> {
        let top = current_price * self.upper_multiplier;
        (1..=self.steps)
            .map(|i| top * i as f64 / self.steps as f64)
            .collect()
    }
}

/// One point of the aggregated series, in debt-token units.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LiquidablePoint {
    pub collateral_price: f64,
    pub liquidable_debt: f64,
    pub available_liquidity: f64,
}

/// A protocol or venue that dropped out of the aggregation, and why.
#[derive(Debug, Clone, Serialize)]
pub struct BranchFailure {
    pub branch: String,
    pub reason: String,
}

/// The aggregated liquidable-debt curve for one pair.
#[derive(Debug, Clone, Serialize)]
pub struct LiquidableDebtSeries {
    pub collateral_symbol: String,
    pub debt_symbol: String,
    pub current_price: f64,
    pub points: Vec<LiquidablePoint>,
    /// Highest price below the current one where liquidation demand exceeds
    /// the available depth.
    pub cliff_price: Option<f64>,
    pub failed_branches: Vec<BranchFailure>,
}

impl LiquidableDebtSeries {
    pub fn record_failure(&mut self, branch: impl Into<String>, reason: impl Into<String>) {
        self.failed_branches.push(BranchFailure {
            branch: branch.into(),
            reason: reason.into(),
        });
    }
}

/// Aggregates protocol states and venue curves into one series.
///
/// A protocol branch that fails to value drops out with a labeled failure
/// instead of poisoning the whole series; the curves and pools passed in are
/// assumed already fetched, with fetch failures recorded by the caller.
pub fn liquidable_debt_series(
    states: &[ProtocolState],
    curves: &[OrderBookCurve],
    pools: &AmmPoolSet,
    prices: &Prices,
    collateral_underlying: &str,
    debt_underlying: &str,
    sweep: SweepConfig,
) -> Result<LiquidableDebtSeries, EngineError> {
    let current_price = prices.require(collateral_underlying)?;
    let grid = sweep.grid(current_price);

    let mut debt_totals = vec![0.0; grid.len()];
    let mut failed_branches = Vec::new();
    for state in states {
        match protocol_debt_at_prices(state, prices, collateral_underlying, debt_underlying, &grid)
        {
            Ok(per_price) => {
                for (total, value) in debt_totals.iter_mut().zip(per_price) {
                    *total += value;
                }
            }
            Err(err) => {
                warn!(
                    protocol = %state.protocol,
                    error = %err,
                    "excluding protocol branch from aggregation"
                );
                failed_branches.push(BranchFailure {
                    branch: state.protocol.as_str().to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }

    let points: Vec<LiquidablePoint> = grid
        .iter()
        .zip(debt_totals)
        .map(|(&price, liquidable_debt)| {
            let depth: f64 = curves
                .iter()
                .map(|curve| curve.depth_between(current_price, price))
                .sum();
            let amm =
                pools.supply_at_price(collateral_underlying, debt_underlying, price) * price;
            LiquidablePoint {
                collateral_price: price,
                liquidable_debt,
                available_liquidity: depth + amm,
            }
        })
        .collect();

    // First crossing on the way down from the current price.
    let cliff_price = points
        .iter()
        .rev()
        .filter(|point| point.collateral_price <= current_price)
        .find(|point| {
            point.liquidable_debt > 0.0 && point.liquidable_debt > point.available_liquidity
        })
        .map(|point| point.collateral_price);

    debug!(
        collateral = collateral_underlying,
        debt = debt_underlying,
        points = points.len(),
        cliff = ?cliff_price,
        "aggregated liquidable debt series"
    );
    Ok(LiquidableDebtSeries {
        collateral_symbol: collateral_underlying.to_string(),
        debt_symbol: debt_underlying.to_string(),
        current_price,
        points,
        cliff_price,
        failed_branches,
    })
}

/// Per-price liquidable debt for one protocol, in USD.
fn protocol_debt_at_prices(
    state: &ProtocolState,
    prices: &Prices,
    collateral_underlying: &str,
    debt_underlying: &str,
    grid: &[f64],
) -> Result<Vec<f64>, EngineError> {
    // Only wallets holding the collateral of interest and owing the debt of
    // interest contribute to this pair.
    let relevant: Vec<_> = state
        .snapshot
        .wallets
        .values()
        .filter(|position| {
            let holds = position.effective_collateral().iter().any(|&(symbol, raw)| {
                raw.is_positive()
                    && state
                        .registry
                        .get(symbol)
                        .is_some_and(|entry| entry.underlying == collateral_underlying)
            });
            let owes = position.debt.iter().any(|(symbol, raw)| {
                raw.is_positive()
                    && state
                        .registry
                        .get(symbol)
                        .is_some_and(|entry| entry.underlying == debt_underlying)
            });
            holds && owes
        })
        .collect();

    let mut totals = Vec::with_capacity(grid.len());
    for &price in grid {
        let changed = prices.with_price(collateral_underlying, price);
        let mut total = 0.0;
        for &position in &relevant {
            total += max_liquidatable_debt(
                state.protocol,
                position,
                &state.registry,
                &state.accumulators,
                &changed,
                collateral_underlying,
                debt_underlying,
            )?;
        }
        totals.push(total);
    }
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use alloy::primitives::{B256, I256};

    use liqmon_chain::{PositionTemplate, RiskParams, Token, TokenEntry, TokenSet};
    use liqmon_api::{PairTokens, PriceLevel};

    fn registry() -> TokenRegistry {
        let entry = |symbol: &'static str, last_byte: u8, decimals: u8| TokenEntry {
            token: Token {
                symbol,
                address: B256::with_last_byte(last_byte),
                decimals,
                dust: 0,
            },
            underlying: symbol,
            risk: RiskParams {
                collateral_factor: 0.8,
                liquidation_bonus: 0.1,
                ..RiskParams::NEUTRAL
            },
        };
        TokenRegistry::new(vec![entry("ETH", 1, 18), entry("USDC", 2, 6)])
    }

    fn underwater_state() -> ProtocolState {
        let set = Arc::new(TokenSet::new(vec![("ETH", 0), ("USDC", 0)]));
        let template = PositionTemplate {
            collateral: Arc::clone(&set),
            debt: set,
            deposit: None,
        };
        // 1 ETH collateral against 1200 USDC: goes under water once ETH
        // drops below $1500.
        let mut position = template.instantiate();
        position
            .collateral
            .increase("ETH", I256::try_from(1_000_000_000_000_000_000i128).unwrap())
            .unwrap();
        position
            .debt
            .increase("USDC", I256::try_from(1_200_000_000i128).unwrap())
            .unwrap();
        let mut wallets = HashMap::new();
        wallets.insert(B256::with_last_byte(9), position);
        ProtocolState {
            protocol: Protocol::ZkLend,
            snapshot: LedgerSnapshot {
                protocol: Protocol::ZkLend,
                last_processed_block: 100,
                wallets,
            },
            registry: registry(),
            accumulators: AccumulatorTable::new(27),
        }
    }

    fn prices() -> Prices {
        let mut prices = Prices::new();
        prices.set("ETH", 2_000.0);
        prices.set("USDC", 1.0);
        prices
    }

    fn flat_curve(supply_per_level: f64) -> OrderBookCurve {
        let pair = PairTokens {
            base_address: B256::with_last_byte(1),
            quote_address: B256::with_last_byte(2),
            base_symbol: "ETH".to_string(),
            quote_symbol: "USDC".to_string(),
            base_decimals: 18,
            quote_decimals: 6,
        };
        let bids = (1..=20)
            .map(|i| PriceLevel {
                price: i as f64 * 100.0,
                supply: supply_per_level,
            })
            .collect();
        OrderBookCurve::new("ekubo", &pair, 2_000.0, None, Vec::new(), bids)
    }

    #[test]
    fn debt_appears_only_below_the_solvency_price() {
        let state = underwater_state();
        let series = liquidable_debt_series(
            &[state],
            &[flat_curve(1_000_000.0)],
            &AmmPoolSet::new(),
            &prices(),
            "ETH",
            "USDC",
            SweepConfig::default(),
        )
        .unwrap();

        assert_eq!(series.points.len(), 50);
        // Solvent at the current price, so no cliff with deep liquidity.
        assert!(series.cliff_price.is_none());
        for point in &series.points {
            // hf = price * 0.8 / 1200; under water below $1500.
            if point.collateral_price >= 1_500.0 {
                assert_eq!(point.liquidable_debt, 0.0);
            } else if point.collateral_price > 200.0 {
                assert!(point.liquidable_debt > 0.0, "at {}", point.collateral_price);
            }
        }
    }

    #[test]
    fn shallow_liquidity_produces_a_cliff() {
        let state = underwater_state();
        let series = liquidable_debt_series(
            &[state],
            &[flat_curve(1.0)],
            &AmmPoolSet::new(),
            &prices(),
            "ETH",
            "USDC",
            SweepConfig::default(),
        )
        .unwrap();

        let cliff = series.cliff_price.expect("demand must exceed 20 quote units");
        assert!(cliff < 1_500.0);
        // The cliff is the highest underwater price with excess demand.
        for point in &series.points {
            if point.collateral_price > cliff && point.collateral_price <= 1_400.0 {
                assert!(point.liquidable_debt <= point.available_liquidity);
            }
        }
    }

    #[test]
    fn failed_branch_is_labeled_not_silent() {
        let state = underwater_state();
        // No ETH quote: the protocol branch cannot be valued.
        let mut sparse = Prices::new();
        sparse.set("ETH", 2_000.0);
        let series = liquidable_debt_series(
            &[state],
            &[],
            &AmmPoolSet::new(),
            &sparse,
            "ETH",
            "USDC",
            SweepConfig::default(),
        )
        .unwrap();

        assert_eq!(series.failed_branches.len(), 1);
        assert_eq!(series.failed_branches[0].branch, "zklend");
        assert!(series.points.iter().all(|p| p.liquidable_debt == 0.0));
    }
}
