//! Ekubo tick-liquidity curves.
//!
//! Ekubo is a concentrated-liquidity AMM: pool liquidity is piecewise constant
//! between initialized ticks, and each tick carries the net liquidity change
//! crossing it. The price at tick `t` is `1.000001^t` adjusted for the pair's
//! decimals, so the square-root ratio between adjacent ticks gives the base
//! supply tradable inside the segment.

use tracing::debug;

use crate::client::{parse_number, EkuboClient};
use crate::error::CurveError;
use crate::orderbook::{
    short_hex, OrderBookCurve, OrderBookProvider, PairTokens, PriceLevel, PriceRange,
};

const TICK_BASE: f64 = 1.000001;

/// Pool-level state at the time the tick table was read.
#[derive(Debug, Clone, Copy)]
pub struct EkuboPoolState {
    pub tick: i64,
    pub tick_spacing: i64,
    pub liquidity: f64,
}

/// One initialized tick and the liquidity change across it.
#[derive(Debug, Clone, Copy)]
pub struct TickLiquidity {
    pub tick: i64,
    pub net_liquidity_delta_diff: f64,
}

fn sqrt_ratio(tick: i64) -> f64 {
    TICK_BASE.powf(tick as f64 / 2.0)
}

/// Price of the base token in quote units at a tick.
pub fn tick_to_price(tick: i64, base_decimals: u8, quote_decimals: u8) -> f64 {
    TICK_BASE.powi(tick as i32) * 10f64.powi(base_decimals as i32 - quote_decimals as i32)
}

/// Builds a two-sided curve from a pool's tick table.
///
/// `ticks` must be sorted ascending by tick. An empty table yields an empty
/// curve: a pool nobody LPs into has no depth at any price.
pub fn build_curve(
    pair: &PairTokens,
    state: EkuboPoolState,
    ticks: &[TickLiquidity],
    current_price: f64,
    range: PriceRange,
    block: Option<u64>,
) -> OrderBookCurve {
    if ticks.is_empty() {
        return OrderBookCurve::empty("ekubo", pair, current_price);
    }
    let mut asks = ask_levels(pair, state, ticks);
    let mut bids = bid_levels(pair, state, ticks);
    asks.retain(|level| range.contains(current_price, level.price));
    bids.retain(|level| range.contains(current_price, level.price));
    OrderBookCurve::new("ekubo", pair, current_price, block, asks, bids)
}

/// Walks initialized ticks at and above the current tick, accumulating
/// liquidity deltas. Each segment's base supply is
/// `|L/sqrt(lower) - L/sqrt(upper)| / 10^base_decimals`.
fn ask_levels(pair: &PairTokens, state: EkuboPoolState, ticks: &[TickLiquidity]) -> Vec<PriceLevel> {
    let ask_ticks: Vec<&TickLiquidity> = ticks.iter().filter(|t| t.tick >= state.tick).collect();
    let Some(first) = ask_ticks.first() else {
        return Vec::new();
    };

    let scale = 10f64.powi(pair.base_decimals as i32);
    let mut levels = Vec::with_capacity(ask_ticks.len());
    let mut liquidity = state.liquidity;

    // Segment from the current position up to the first initialized tick.
    let seed_tick = first.tick - state.tick_spacing;
    let supply = (liquidity / sqrt_ratio(seed_tick) - liquidity / sqrt_ratio(first.tick)).abs()
        / scale;
    levels.push(PriceLevel {
        price: tick_to_price(seed_tick, pair.base_decimals, pair.quote_decimals),
        supply,
    });

    for window in ask_ticks.windows(2) {
        liquidity += window[0].net_liquidity_delta_diff;
        let supply = (liquidity / sqrt_ratio(window[0].tick)
            - liquidity / sqrt_ratio(window[1].tick))
        .abs()
            / scale;
        levels.push(PriceLevel {
            price: tick_to_price(window[0].tick, pair.base_decimals, pair.quote_decimals),
            supply,
        });
    }
    levels
}

/// Walks initialized ticks at and below the current tick downwards, removing
/// the liquidity deltas added on the way up. Each segment's quote supply is
/// `|L*sqrt(upper) - L*sqrt(lower)| / 10^quote_decimals`.
fn bid_levels(pair: &PairTokens, state: EkuboPoolState, ticks: &[TickLiquidity]) -> Vec<PriceLevel> {
    let bid_ticks: Vec<&TickLiquidity> =
        ticks.iter().rev().filter(|t| t.tick <= state.tick).collect();
    let Some(first) = bid_ticks.first() else {
        return Vec::new();
    };

    let scale = 10f64.powi(pair.quote_decimals as i32);
    let mut levels = Vec::with_capacity(bid_ticks.len());
    let mut liquidity = state.liquidity;

    let seed_tick = first.tick + state.tick_spacing;
    let supply = (liquidity * sqrt_ratio(seed_tick) - liquidity * sqrt_ratio(first.tick)).abs()
        / scale;
    levels.push(PriceLevel {
        price: tick_to_price(seed_tick, pair.base_decimals, pair.quote_decimals),
        supply,
    });

    for window in bid_ticks.windows(2) {
        liquidity -= window[0].net_liquidity_delta_diff;
        let supply = (liquidity * sqrt_ratio(window[0].tick)
            - liquidity * sqrt_ratio(window[1].tick))
        .abs()
            / scale;
        levels.push(PriceLevel {
            price: tick_to_price(window[0].tick, pair.base_decimals, pair.quote_decimals),
            supply,
        });
    }
    levels
}

/// Curve provider backed by the Ekubo API.
pub struct EkuboOrderBook {
    client: EkuboClient,
    range: PriceRange,
}

impl EkuboOrderBook {
    pub fn new(client: EkuboClient) -> Self {
        Self {
            client,
            range: PriceRange::default(),
        }
    }

    pub fn with_range(mut self, range: PriceRange) -> Self {
        self.range = range;
        self
    }
}

#[async_trait::async_trait]
impl OrderBookProvider for EkuboOrderBook {
    fn dex(&self) -> &'static str {
        "ekubo"
    }

    async fn fetch_curve(&self, pair: &PairTokens) -> Result<OrderBookCurve, CurveError> {
        let base = short_hex(&pair.base_address);
        let quote = short_hex(&pair.quote_address);

        let price = self.client.get_pair_price(&base, &quote).await?;
        let current_price = parse_number(&price.price, "ekubo pair price")?;

        let pools = self.client.get_pools().await?;
        let mut asks = Vec::new();
        let mut bids = Vec::new();
        let mut block = None;
        for pool in pools
            .iter()
            .filter(|p| p.token0 == base && p.token1 == quote)
        {
            let mut ticks = Vec::new();
            for tick in self.client.get_pool_liquidity(&pool.key_hash).await? {
                ticks.push(TickLiquidity {
                    tick: tick.tick,
                    net_liquidity_delta_diff: parse_number(
                        &tick.net_liquidity_delta_diff,
                        "ekubo liquidity delta",
                    )?,
                });
            }
            ticks.sort_by_key(|t| t.tick);
            let state = EkuboPoolState {
                tick: pool.tick,
                tick_spacing: pool.tick_spacing,
                liquidity: parse_number(&pool.liquidity, "ekubo pool liquidity")?,
            };
            block = Some(pool.last_update.event_id);
            let curve = build_curve(pair, state, &ticks, current_price, self.range, block);
            debug!(
                pool = %pool.key_hash,
                asks = curve.asks().len(),
                bids = curve.bids().len(),
                "assembled ekubo pool curve"
            );
            asks.extend_from_slice(curve.asks());
            bids.extend_from_slice(curve.bids());
        }
        Ok(OrderBookCurve::new(
            "ekubo",
            pair,
            current_price,
            block,
            asks,
            bids,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::test_pair;

    fn tick(tick: i64, delta: f64) -> TickLiquidity {
        TickLiquidity {
            tick,
            net_liquidity_delta_diff: delta,
        }
    }

    #[test]
    fn tick_to_price_is_strictly_monotone() {
        let mut previous = f64::MIN;
        for t in (-2_000_000..=2_000_000).step_by(50_000) {
            let price = tick_to_price(t, 18, 6);
            assert!(price > previous, "price must grow with tick (tick {t})");
            previous = price;
        }
    }

    #[test]
    fn empty_tick_table_yields_empty_curve() {
        let state = EkuboPoolState {
            tick: 0,
            tick_spacing: 200,
            liquidity: 1e18,
        };
        let curve = build_curve(&test_pair(), state, &[], 1.0, PriceRange::default(), None);
        assert!(curve.is_empty());
    }

    #[test]
    fn sides_split_at_the_current_tick() {
        let state = EkuboPoolState {
            tick: 0,
            tick_spacing: 100,
            liquidity: 1e20,
        };
        let ticks = vec![
            tick(-300, 2e19),
            tick(-100, 1e19),
            tick(100, -1e19),
            tick(300, -2e19),
        ];
        let pair = test_pair();
        let current = tick_to_price(0, pair.base_decimals, pair.quote_decimals);
        let curve = build_curve(&pair, state, &ticks, current, PriceRange::default(), None);
        assert!(!curve.asks().is_empty());
        assert!(!curve.bids().is_empty());
        // Ascending asks, descending bids, every supply positive.
        assert!(curve.asks().windows(2).all(|w| w[0].price < w[1].price));
        assert!(curve.bids().windows(2).all(|w| w[0].price > w[1].price));
        assert!(curve.asks().iter().chain(curve.bids()).all(|l| l.supply >= 0.0));
    }

    #[test]
    fn range_filter_drops_far_levels() {
        let state = EkuboPoolState {
            tick: 0,
            tick_spacing: 100,
            liquidity: 1e20,
        };
        let ticks = vec![tick(100, 0.0), tick(200, 0.0)];
        let pair = test_pair();
        // Reported market price far below the pool's tick prices: every level
        // lands above the upper bound of the default window.
        let current = tick_to_price(0, pair.base_decimals, pair.quote_decimals) / 1e4;
        let curve = build_curve(&pair, state, &ticks, current, PriceRange::default(), None);
        assert!(curve.asks().is_empty());
        assert!(curve.bids().is_empty());
    }
}
