//! Liquidity-curve abstractions over DEX order books.
//!
//! Each venue adapter turns its pool data into the same [`OrderBookCurve`]
//! shape: ask levels above the current price sorted ascending, bid levels
//! below it sorted descending, each level carrying the token supply available
//! at that price. The aggregator only ever consumes this shape, so venues can
//! be mixed freely.

pub mod constant_product;
pub mod ekubo;
pub mod haiko;

pub use constant_product::{pair_id, AmmPoolSet, ConstantProductPool};
pub use ekubo::{EkuboOrderBook, EkuboPoolState, TickLiquidity};
pub use haiko::{DepthLevel, HaikoOrderBook};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use alloy::primitives::B256;

use crate::error::CurveError;

/// The token pair a curve is quoted in: prices are quote per base, ask
/// supplies are base amounts, bid supplies are quote amounts.
#[derive(Debug, Clone)]
pub struct PairTokens {
    pub base_address: B256,
    pub quote_address: B256,
    pub base_symbol: String,
    pub quote_symbol: String,
    pub base_decimals: u8,
    pub quote_decimals: u8,
}

/// One price level of a curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceLevel {
    pub price: f64,
    pub supply: f64,
}

/// Multiplicative window around the current price that levels must fall in.
///
/// Levels far outside the trading range carry no information for liquidation
/// sizing and only distort depth sums.
#[derive(Debug, Clone, Copy)]
pub struct PriceRange {
    pub lower_multiplier: f64,
    pub upper_multiplier: f64,
}

impl Default for PriceRange {
    fn default() -> Self {
        Self {
            lower_multiplier: 0.0001,
            upper_multiplier: 100.0,
        }
    }
}

impl PriceRange {
    pub fn bounds(&self, current_price: f64) -> (f64, f64) {
        (
            current_price * self.lower_multiplier,
            current_price * self.upper_multiplier,
        )
    }

    pub fn contains(&self, current_price: f64, price: f64) -> bool {
        let (min, max) = self.bounds(current_price);
        min < price && price < max
    }
}

/// A two-sided liquidity curve for one pair on one venue.
#[derive(Debug, Clone)]
pub struct OrderBookCurve {
    pub dex: &'static str,
    pub base_symbol: String,
    pub quote_symbol: String,
    pub current_price: f64,
    pub block: Option<u64>,
    pub timestamp: DateTime<Utc>,
    asks: Vec<PriceLevel>,
    bids: Vec<PriceLevel>,
}

impl OrderBookCurve {
    /// Builds a curve, sorting asks ascending and bids descending.
    pub fn new(
        dex: &'static str,
        pair: &PairTokens,
        current_price: f64,
        block: Option<u64>,
        mut asks: Vec<PriceLevel>,
        mut bids: Vec<PriceLevel>,
    ) -> Self {
        asks.sort_by(|a, b| a.price.total_cmp(&b.price));
        bids.sort_by(|a, b| b.price.total_cmp(&a.price));
        Self {
            dex,
            base_symbol: pair.base_symbol.clone(),
            quote_symbol: pair.quote_symbol.clone(),
            current_price,
            block,
            timestamp: Utc::now(),
            asks,
            bids,
        }
    }

    pub fn empty(dex: &'static str, pair: &PairTokens, current_price: f64) -> Self {
        Self::new(dex, pair, current_price, None, Vec::new(), Vec::new())
    }

    pub fn asks(&self) -> &[PriceLevel] {
        &self.asks
    }

    pub fn bids(&self) -> &[PriceLevel] {
        &self.bids
    }

    pub fn is_empty(&self) -> bool {
        self.asks.is_empty() && self.bids.is_empty()
    }

    /// Supply available between the current price and a hypothetical price,
    /// in the traversed side's units (quote for drops, base for rises).
    ///
    /// A drop walks the bid side, a rise walks the ask side; levels outside
    /// the traversed interval contribute nothing.
    pub fn depth_between(&self, current_price: f64, hypothetical_price: f64) -> f64 {
        if hypothetical_price <= current_price {
            self.bids
                .iter()
                .filter(|level| hypothetical_price <= level.price && level.price <= current_price)
                .map(|level| level.supply)
                .sum()
        } else {
            self.asks
                .iter()
                .filter(|level| current_price <= level.price && level.price <= hypothetical_price)
                .map(|level| level.supply)
                .sum()
        }
    }
}

/// A venue that can produce a liquidity curve for a pair.
#[async_trait]
pub trait OrderBookProvider: Send + Sync {
    fn dex(&self) -> &'static str;

    async fn fetch_curve(&self, pair: &PairTokens) -> Result<OrderBookCurve, CurveError>;
}

/// Formats a felt address the way DEX APIs expect: `0x`-prefixed without
/// leading zeros.
pub(crate) fn short_hex(address: &B256) -> String {
    let hex = hex::encode(address.as_slice());
    let trimmed = hex.trim_start_matches('0');
    if trimmed.is_empty() {
        "0x0".to_string()
    } else {
        format!("0x{trimmed}")
    }
}

#[cfg(test)]
pub(crate) fn test_pair() -> PairTokens {
    PairTokens {
        base_address: B256::with_last_byte(1),
        quote_address: B256::with_last_byte(2),
        base_symbol: "ETH".to_string(),
        quote_symbol: "USDC".to_string(),
        base_decimals: 18,
        quote_decimals: 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: f64, supply: f64) -> PriceLevel {
        PriceLevel { price, supply }
    }

    #[test]
    fn construction_orders_both_sides() {
        let curve = OrderBookCurve::new(
            "test",
            &test_pair(),
            100.0,
            None,
            vec![level(105.0, 1.0), level(101.0, 2.0), level(103.0, 3.0)],
            vec![level(95.0, 1.0), level(99.0, 2.0), level(97.0, 3.0)],
        );
        let ask_prices: Vec<f64> = curve.asks().iter().map(|l| l.price).collect();
        let bid_prices: Vec<f64> = curve.bids().iter().map(|l| l.price).collect();
        assert_eq!(ask_prices, vec![101.0, 103.0, 105.0]);
        assert_eq!(bid_prices, vec![99.0, 97.0, 95.0]);
    }

    #[test]
    fn depth_walks_the_correct_side() {
        let curve = OrderBookCurve::new(
            "test",
            &test_pair(),
            100.0,
            None,
            vec![level(101.0, 5.0), level(110.0, 7.0)],
            vec![level(99.0, 2.0), level(90.0, 4.0), level(80.0, 8.0)],
        );
        // Price drop sums bids inside the interval only.
        assert_eq!(curve.depth_between(100.0, 90.0), 6.0);
        // Price rise sums asks.
        assert_eq!(curve.depth_between(100.0, 105.0), 5.0);
        // No movement, no bid in the degenerate interval.
        assert_eq!(curve.depth_between(100.0, 100.0), 0.0);
    }

    #[test]
    fn short_hex_trims_leading_zeros() {
        let address = B256::with_last_byte(0x1f);
        assert_eq!(short_hex(&address), "0x1f");
        assert_eq!(short_hex(&B256::ZERO), "0x0");
    }
}
