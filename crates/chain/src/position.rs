//! Per-wallet loan positions.
//!
//! Balances live in fixed token sets decided at ledger construction, so a
//! typo'd or unconfigured token surfaces as an error at the fold boundary
//! instead of silently growing the map. Amounts are signed raw units; interest
//! conversion happens at read time through the accumulator table.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::I256;
use smallvec::SmallVec;

use crate::error::LedgerError;

/// The ordered token universe of one balance map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSet {
    entries: Vec<(&'static str, u128)>,
    index: HashMap<&'static str, usize>,
}

impl TokenSet {
    /// Builds a set from `(symbol, dust threshold)` pairs.
    pub fn new(entries: Vec<(&'static str, u128)>) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, &(symbol, _))| (symbol, i))
            .collect();
        Self { entries, index }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|&(symbol, _)| symbol)
    }

    fn position_of(&self, symbol: &str) -> Result<usize, LedgerError> {
        self.index
            .get(symbol)
            .copied()
            .ok_or_else(|| LedgerError::UnknownToken(symbol.to_string()))
    }
}

/// Signed raw balances over a fixed token set.
#[derive(Debug, Clone)]
pub struct TokenBalances {
    set: Arc<TokenSet>,
    amounts: SmallVec<[I256; 8]>,
}

impl TokenBalances {
    pub fn new(set: Arc<TokenSet>) -> Self {
        let amounts = SmallVec::from_elem(I256::ZERO, set.len());
        Self { set, amounts }
    }

    pub fn get(&self, symbol: &str) -> Result<I256, LedgerError> {
        Ok(self.amounts[self.set.position_of(symbol)?])
    }

    /// Adds `delta` (possibly negative) to a token's balance, then snaps
    /// sub-dust residue to zero.
    pub fn increase(&mut self, symbol: &str, delta: I256) -> Result<(), LedgerError> {
        let i = self.set.position_of(symbol)?;
        let updated = self.amounts[i] + delta;
        let dust = I256::try_from(self.set.entries[i].1).map_err(|_| LedgerError::Precision {
            token: self.set.entries[i].0,
            detail: "dust threshold exceeds signed range",
        })?;
        self.amounts[i] = if updated.abs() < dust {
            I256::ZERO
        } else {
            updated
        };
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, I256)> + '_ {
        self.set
            .entries
            .iter()
            .zip(self.amounts.iter())
            .map(|(&(symbol, _), &amount)| (symbol, amount))
    }

    /// True if any balance is strictly positive.
    pub fn any_positive(&self) -> bool {
        self.amounts.iter().any(|a| a.is_positive())
    }
}

/// Per-token boolean flags over a fixed token set.
#[derive(Debug, Clone)]
pub struct TokenFlags {
    set: Arc<TokenSet>,
    flags: SmallVec<[bool; 8]>,
}

impl TokenFlags {
    pub fn new(set: Arc<TokenSet>) -> Self {
        let flags = SmallVec::from_elem(false, set.len());
        Self { set, flags }
    }

    pub fn get(&self, symbol: &str) -> Result<bool, LedgerError> {
        Ok(self.flags[self.set.position_of(symbol)?])
    }

    pub fn set(&mut self, symbol: &str, value: bool) -> Result<(), LedgerError> {
        let i = self.set.position_of(symbol)?;
        self.flags[i] = value;
        Ok(())
    }
}

/// Blueprint for the positions a ledger creates.
///
/// zkLend tracks deposits with per-token collateral opt-in; Nostra credits
/// collateral balances directly and leaves `deposit` unset.
#[derive(Debug, Clone)]
pub struct PositionTemplate {
    pub collateral: Arc<TokenSet>,
    pub debt: Arc<TokenSet>,
    pub deposit: Option<Arc<TokenSet>>,
}

impl PositionTemplate {
    pub fn instantiate(&self) -> LoanPosition {
        LoanPosition {
            collateral: TokenBalances::new(Arc::clone(&self.collateral)),
            debt: TokenBalances::new(Arc::clone(&self.debt)),
            deposit: self
                .deposit
                .as_ref()
                .map(|set| TokenBalances::new(Arc::clone(set))),
            collateral_enabled: self.deposit.as_ref().map(|set| TokenFlags::new(Arc::clone(set))),
        }
    }
}

/// One wallet's holdings under one protocol, in raw units.
#[derive(Debug, Clone)]
pub struct LoanPosition {
    pub collateral: TokenBalances,
    pub debt: TokenBalances,
    pub deposit: Option<TokenBalances>,
    pub collateral_enabled: Option<TokenFlags>,
}

impl LoanPosition {
    /// Raw balances that count as collateral for risk math.
    ///
    /// With a deposit map present, a token's deposit counts only while its
    /// collateral flag is on. Without one, the collateral balances are
    /// authoritative as-is.
    pub fn effective_collateral(&self) -> Vec<(&'static str, I256)> {
        match (&self.deposit, &self.collateral_enabled) {
            (Some(deposit), Some(flags)) => deposit
                .iter()
                .filter(|(symbol, _)| flags.get(symbol).unwrap_or(false))
                .collect(),
            _ => self.collateral.iter().collect(),
        }
    }

    pub fn has_debt(&self) -> bool {
        self.debt.any_positive()
    }

    /// True when nothing is held on either side.
    pub fn is_empty(&self) -> bool {
        let no_collateral = !self.collateral.any_positive()
            && !self
                .deposit
                .as_ref()
                .map(TokenBalances::any_positive)
                .unwrap_or(false);
        no_collateral && !self.debt.any_positive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> Arc<TokenSet> {
        Arc::new(TokenSet::new(vec![("ETH", 100), ("USDC", 10)]))
    }

    fn amount(v: i64) -> I256 {
        I256::try_from(v).unwrap()
    }

    #[test]
    fn unknown_token_is_an_error() {
        let mut balances = TokenBalances::new(set());
        assert!(matches!(
            balances.increase("DOGE", amount(1)),
            Err(LedgerError::UnknownToken(_))
        ));
        assert!(balances.get("DOGE").is_err());
    }

    #[test]
    fn dust_snaps_to_zero() {
        let mut balances = TokenBalances::new(set());
        balances.increase("ETH", amount(1_000)).unwrap();
        balances.increase("ETH", amount(-950)).unwrap();
        // |50| < 100 dust threshold.
        assert_eq!(balances.get("ETH").unwrap(), I256::ZERO);
        balances.increase("ETH", amount(-120)).unwrap();
        assert_eq!(balances.get("ETH").unwrap(), amount(-120));
    }

    #[test]
    fn collateral_flag_gates_deposit() {
        let template = PositionTemplate {
            collateral: set(),
            debt: set(),
            deposit: Some(set()),
        };
        let mut position = template.instantiate();
        position
            .deposit
            .as_mut()
            .unwrap()
            .increase("ETH", amount(5_000))
            .unwrap();
        assert!(position.effective_collateral().iter().all(|&(_, v)| v == I256::ZERO));

        position
            .collateral_enabled
            .as_mut()
            .unwrap()
            .set("ETH", true)
            .unwrap();
        let effective = position.effective_collateral();
        assert_eq!(effective, vec![("ETH", amount(5_000))]);
    }

    #[test]
    fn emptiness_tracks_both_sides() {
        let template = PositionTemplate {
            collateral: set(),
            debt: set(),
            deposit: None,
        };
        let mut position = template.instantiate();
        assert!(position.is_empty());
        position.debt.increase("USDC", amount(400)).unwrap();
        assert!(position.has_debt());
        assert!(!position.is_empty());
    }
}
