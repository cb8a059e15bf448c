//! Constant-product AMM pools.
//!
//! For venues without tick-level data the depth model is the classic `x*y=k`
//! curve: the base supply obtainable near a price without pushing the pool
//! more than 5% past it is `sqrt(price * k) * (1 - sqrt(0.95))`.

use std::collections::HashMap;

const SLIPPAGE_BOUND: f64 = 0.95;

/// Canonical pair id: symbols joined in sorted order.
pub fn pair_id(symbol_a: &str, symbol_b: &str) -> String {
    let (first, second) = if symbol_a <= symbol_b {
        (symbol_a, symbol_b)
    } else {
        (symbol_b, symbol_a)
    };
    format!("{first}/{second}")
}

/// One `x*y=k` pool with balances in human units.
#[derive(Debug, Clone)]
pub struct ConstantProductPool {
    pub base_symbol: String,
    pub quote_symbol: String,
    base_balance: f64,
    quote_balance: f64,
}

impl ConstantProductPool {
    pub fn new(
        base_symbol: impl Into<String>,
        quote_symbol: impl Into<String>,
        base_balance: f64,
        quote_balance: f64,
    ) -> Self {
        Self {
            base_symbol: base_symbol.into(),
            quote_symbol: quote_symbol.into(),
            base_balance,
            quote_balance,
        }
    }

    pub fn id(&self) -> String {
        pair_id(&self.base_symbol, &self.quote_symbol)
    }

    pub fn constant(&self) -> f64 {
        self.base_balance * self.quote_balance
    }

    /// Quote units per base unit at the current reserves.
    pub fn spot_price(&self) -> f64 {
        self.quote_balance / self.base_balance
    }

    /// Base supply tradable around `price` within the 5% slippage bound.
    pub fn supply_at_price(&self, price: f64) -> f64 {
        (price * self.constant()).sqrt() * (1.0 - SLIPPAGE_BOUND.sqrt())
    }

    /// Simulates buying `amount` of the base token; returns the quote paid
    /// and moves the reserves.
    pub fn buy_base(&mut self, amount: f64) -> f64 {
        let constant = self.constant();
        let new_base = self.base_balance - amount;
        let new_quote = constant / new_base;
        let paid = new_quote - self.quote_balance;
        self.base_balance = new_base;
        self.quote_balance = new_quote;
        paid
    }
}

/// Pools keyed by canonical pair id.
#[derive(Debug, Clone, Default)]
pub struct AmmPoolSet {
    pools: HashMap<String, ConstantProductPool>,
}

impl AmmPoolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pool(&mut self, pool: ConstantProductPool) {
        self.pools.insert(pool.id(), pool);
    }

    pub fn get(&self, symbol_a: &str, symbol_b: &str) -> Option<&ConstantProductPool> {
        self.pools.get(&pair_id(symbol_a, symbol_b))
    }

    /// Base supply near `price` for a pair, zero when no pool is tracked.
    pub fn supply_at_price(&self, symbol_a: &str, symbol_b: &str, price: f64) -> f64 {
        self.get(symbol_a, symbol_b)
            .map(|pool| pool.supply_at_price(price))
            .unwrap_or(0.0)
    }
}
