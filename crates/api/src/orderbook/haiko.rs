//! Haiko depth curves.
//!
//! Haiko's API exposes market depth directly: entries of `(price,
//! liquidityCumulative)` where the cumulative liquidity is the amount active
//! once the price reaches that level. Supply between adjacent levels follows
//! the same square-root interval rule as tick AMMs, with Haiko's finer tick
//! base of 1.00001.

use tracing::{debug, warn};

use crate::client::{parse_number, HaikoClient};
use crate::error::CurveError;
use crate::orderbook::{
    short_hex, OrderBookCurve, OrderBookProvider, PairTokens, PriceLevel, PriceRange,
};

const TICK_BASE: f64 = 1.00001;

/// One market depth entry.
#[derive(Debug, Clone, Copy)]
pub struct DepthLevel {
    pub price: f64,
    pub liquidity_cumulative: f64,
}

/// Price of the base token in quote units at a Haiko tick.
pub fn tick_to_price(tick: i64, base_decimals: u8, quote_decimals: u8) -> f64 {
    TICK_BASE.powi(tick as i32) * 10f64.powi(base_decimals as i32 - quote_decimals as i32)
}

/// Pairs with equal decimals scale by the base token's decimals.
fn decimals_scale(pair: &PairTokens) -> f64 {
    let diff = pair.base_decimals as i32 - pair.quote_decimals as i32;
    if diff == 0 {
        10f64.powi(pair.base_decimals as i32)
    } else {
        10f64.powi(diff)
    }
}

fn token_amount(liquidity: f64, from_sqrt: f64, to_sqrt: f64, scale: f64) -> f64 {
    if to_sqrt == 0.0 {
        return (liquidity / from_sqrt).abs() / scale;
    }
    (liquidity / to_sqrt - liquidity / from_sqrt).abs() / scale
}

/// Builds a two-sided curve from one market's depth table.
///
/// A market with depth on only one side of the current price yields an empty
/// curve; there is no top-of-book liquidity to anchor the other side on.
pub fn build_curve(
    pair: &PairTokens,
    levels: &[DepthLevel],
    current_price: f64,
    range: PriceRange,
) -> OrderBookCurve {
    let mut ask_levels: Vec<&DepthLevel> =
        levels.iter().filter(|l| l.price >= current_price).collect();
    let mut bid_levels: Vec<&DepthLevel> =
        levels.iter().filter(|l| l.price < current_price).collect();
    ask_levels.sort_by(|a, b| a.price.total_cmp(&b.price));
    bid_levels.sort_by(|a, b| b.price.total_cmp(&a.price));

    let (Some(best_ask), Some(best_bid)) = (ask_levels.first(), bid_levels.first()) else {
        return OrderBookCurve::empty("haiko", pair, current_price);
    };

    let scale = decimals_scale(pair);
    let current_sqrt = current_price.sqrt();

    // Top of book: the bid-side cumulative liquidity is what is active at the
    // current price, and it covers the gap up to the first ask level.
    let mut asks = vec![PriceLevel {
        price: current_price,
        supply: token_amount(
            best_bid.liquidity_cumulative,
            current_sqrt,
            best_ask.price.sqrt(),
            scale,
        ),
    }];
    for window in ask_levels.windows(2) {
        asks.push(PriceLevel {
            price: window[0].price,
            supply: token_amount(
                window[0].liquidity_cumulative,
                window[0].price.sqrt(),
                window[1].price.sqrt(),
                scale,
            ),
        });
    }

    let mut bids = vec![PriceLevel {
        price: best_bid.price,
        supply: token_amount(
            best_bid.liquidity_cumulative,
            current_sqrt,
            best_bid.price.sqrt(),
            scale,
        ),
    }];
    for window in bid_levels.windows(2) {
        bids.push(PriceLevel {
            price: window[0].price,
            supply: token_amount(
                window[1].liquidity_cumulative,
                window[0].price.sqrt(),
                window[1].price.sqrt(),
                scale,
            ),
        });
    }

    asks.retain(|level| range.contains(current_price, level.price));
    bids.retain(|level| range.contains(current_price, level.price));
    OrderBookCurve::new("haiko", pair, current_price, None, asks, bids)
}

/// Curve provider backed by the Haiko API.
pub struct HaikoOrderBook {
    client: HaikoClient,
    range: PriceRange,
}

impl HaikoOrderBook {
    pub fn new(client: HaikoClient) -> Self {
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
impl OrderBookProvider for HaikoOrderBook {
    fn dex(&self) -> &'static str {
        "haiko"
    }

    async fn fetch_curve(&self, pair: &PairTokens) -> Result<OrderBookCurve, CurveError> {
        let base = short_hex(&pair.base_address);
        let quote = short_hex(&pair.quote_address);
        let markets: Vec<_> = self
            .client
            .get_pair_markets(&base, &quote)
            .await?
            .into_iter()
            .filter(|m| m.base_token.address == base && m.quote_token.address == quote)
            .collect();
        if markets.is_empty() {
            return Err(CurveError::UnsupportedPair {
                dex: self.dex(),
                base: pair.base_symbol.clone(),
                quote: pair.quote_symbol.clone(),
            });
        }

        // The deepest market's price is authoritative for the pair.
        let mut reference = (0f64, 0f64);
        let mut asks = Vec::new();
        let mut bids = Vec::new();
        for market in &markets {
            let tvl = parse_number(&market.tvl, "haiko market tvl")?;
            let market_price = parse_number(&market.curr_price, "haiko market price")?;
            if tvl >= reference.0 {
                reference = (tvl, market_price);
            }

            let depth = self.client.get_market_depth(&market.market_id).await?;
            if depth.is_empty() {
                warn!(market = %market.market_id, "haiko market depth is empty");
                continue;
            }
            let mut levels = Vec::with_capacity(depth.len());
            for entry in depth {
                levels.push(DepthLevel {
                    price: parse_number(&entry.price, "haiko depth price")?,
                    liquidity_cumulative: parse_number(
                        &entry.liquidity_cumulative,
                        "haiko depth liquidity",
                    )?,
                });
            }
            let curve = build_curve(pair, &levels, market_price, self.range);
            debug!(
                market = %market.market_id,
                asks = curve.asks().len(),
                bids = curve.bids().len(),
                "assembled haiko market curve"
            );
            asks.extend_from_slice(curve.asks());
            bids.extend_from_slice(curve.bids());
        }
        Ok(OrderBookCurve::new("haiko", pair, reference.1, None, asks, bids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::test_pair;

    fn depth(price: f64, liquidity: f64) -> DepthLevel {
        DepthLevel {
            price,
            liquidity_cumulative: liquidity,
        }
    }

    #[test]
    fn tick_price_uses_finer_base() {
        let one_tick = tick_to_price(1, 6, 6) / tick_to_price(0, 6, 6);
        assert!((one_tick - 1.00001).abs() < 1e-12);
    }

    #[test]
    fn one_sided_depth_yields_empty_curve() {
        let pair = test_pair();
        let levels = vec![depth(101.0, 1e18), depth(102.0, 1e18)];
        let curve = build_curve(&pair, &levels, 100.0, PriceRange::default());
        assert!(curve.is_empty());
    }

    #[test]
    fn sides_are_ordered_and_anchored_at_top_of_book() {
        let pair = test_pair();
        let levels = vec![
            depth(95.0, 4e18),
            depth(98.0, 5e18),
            depth(103.0, 5e18),
            depth(106.0, 4e18),
        ];
        let curve = build_curve(&pair, &levels, 100.0, PriceRange::default());
        assert_eq!(curve.asks().first().map(|l| l.price), Some(100.0));
        assert_eq!(curve.bids().first().map(|l| l.price), Some(98.0));
        assert!(curve.asks().windows(2).all(|w| w[0].price < w[1].price));
        assert!(curve.bids().windows(2).all(|w| w[0].price > w[1].price));
        assert!(curve.asks().iter().chain(curve.bids()).all(|l| l.supply > 0.0));
    }
}
