//! DEX liquidity clients and curve builders.
//!
//! This crate provides:
//! - HTTP clients for the Ekubo and Haiko APIs
//! - Order-book curve builders over tick and depth data
//! - A constant-product fallback for pools without tick data

mod client;
mod error;
pub mod orderbook;

pub use client::{
    EkuboClient, EkuboLiquidityTick, EkuboPairPrice, EkuboPool, EkuboPoolUpdate, HaikoClient,
    HaikoDepthEntry, HaikoMarket, HaikoMarketToken, RetryPolicy,
};
pub use error::CurveError;
pub use orderbook::{
    AmmPoolSet, ConstantProductPool, DepthLevel, EkuboOrderBook, EkuboPoolState, HaikoOrderBook,
    OrderBookCurve, OrderBookProvider, PairTokens, PriceLevel, PriceRange, TickLiquidity,
};
