//! Underlying token table and per-protocol token registries.
//!
//! Addresses are Starknet felts stored as 32-byte words. Each protocol builds
//! a [`TokenRegistry`] from the shared underlying table plus its own risk
//! parameters, so risk math never has to special-case a protocol.

use std::collections::HashMap;

use alloy::primitives::{b256, B256};

use crate::error::LedgerError;

/// An ERC-20 underlying token on Starknet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub symbol: &'static str,
    pub address: B256,
    pub decimals: u8,
    /// Raw-amount threshold below which a balance is treated as rounding
    /// residue and snapped to zero.
    pub dust: u128,
}

/// Protocol risk parameters attached to a token.
///
/// zkLend only uses `collateral_factor` and `liquidation_bonus`; Nostra uses
/// the full set. Unused fields stay at their neutral defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskParams {
    pub collateral_factor: f64,
    pub debt_factor: f64,
    pub liquidation_bonus: f64,
    pub liquidator_fee_beta: f64,
    pub liquidator_fee_max: f64,
    pub protocol_fee: f64,
}

impl RiskParams {
    pub const NEUTRAL: Self = Self {
        collateral_factor: 0.0,
        debt_factor: 1.0,
        liquidation_bonus: 0.0,
        liquidator_fee_beta: 0.0,
        liquidator_fee_max: 0.0,
        protocol_fee: 0.0,
    };
}

impl Default for RiskParams {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

/// A token as configured for one protocol: the underlying it settles in plus
/// the protocol's risk parameters for it.
#[derive(Debug, Clone, Copy)]
pub struct TokenEntry {
    pub token: Token,
    pub underlying: &'static str,
    pub risk: RiskParams,
}

/// Token lookup table for one protocol, indexed by symbol and by address.
#[derive(Debug, Clone)]
pub struct TokenRegistry {
    entries: Vec<TokenEntry>,
    by_symbol: HashMap<&'static str, usize>,
    by_address: HashMap<B256, usize>,
}

impl TokenRegistry {
    pub fn new(entries: Vec<TokenEntry>) -> Self {
        let by_symbol = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.token.symbol, i))
            .collect();
        let by_address = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.token.address, i))
            .collect();
        Self {
            entries,
            by_symbol,
            by_address,
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&TokenEntry> {
        self.by_symbol.get(symbol).map(|&i| &self.entries[i])
    }

    pub fn require(&self, symbol: &str) -> Result<&TokenEntry, LedgerError> {
        self.get(symbol)
            .ok_or_else(|| LedgerError::UnknownToken(symbol.to_string()))
    }

    pub fn by_address(&self, address: &B256) -> Option<&TokenEntry> {
        self.by_address.get(address).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[TokenEntry] {
        &self.entries
    }

    pub fn symbols(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|e| e.token.symbol)
    }
}

/// Parses a Starknet felt (hex, `0x`-prefixed or not) into a left-padded
/// 32-byte word.
pub fn felt(s: &str) -> Result<B256, LedgerError> {
    let hex = s.strip_prefix("0x").unwrap_or(s);
    if hex.is_empty() || hex.len() > 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(LedgerError::UnknownToken(s.to_string()));
    }
    let mut padded = [0u8; 32];
    let bytes = hex::decode(format!("{:0>64}", hex))
        .map_err(|_| LedgerError::UnknownToken(s.to_string()))?;
    padded.copy_from_slice(&bytes);
    Ok(B256::from(padded))
}

// ============================================================================
// Underlying token table
// ============================================================================

/// Underlying tokens shared by all tracked protocols.
///
/// Dust thresholds follow the per-token rounding tolerances used when folding
/// events: half a unit at the precision interest math rounds to.
pub const UNDERLYINGS: &[Token] = &[
    Token {
        symbol: "ETH",
        address: b256!("049d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7"),
        decimals: 18,
        dust: 5_000_000_000_000,
    },
    Token {
        symbol: "WBTC",
        address: b256!("03fe2b97c1fd336e750087d68b9b867997fd64a2661ff3ca5a7c771641e8e7ac"),
        decimals: 8,
        dust: 100,
    },
    Token {
        symbol: "USDC",
        address: b256!("053c91253bc9682c04929ca02ed00b3e423f6710d2ee7e0d5ebb06f3ecf368a8"),
        decimals: 6,
        dust: 10_000,
    },
    Token {
        symbol: "DAI",
        address: b256!("00da114221cb83fa859dbdb4c44beeaa0bb37c7537ad5ae66fe5e0efd20e6eb3"),
        decimals: 18,
        dust: 10_000_000_000_000_000,
    },
    Token {
        symbol: "USDT",
        address: b256!("068f5c6a61780768455de69077e07e89787839bf8166decfbf92b645209c0fb8"),
        decimals: 6,
        dust: 10_000,
    },
    Token {
        symbol: "wstETH",
        address: b256!("042b8f0484674ca266ac5d08e4ac6a3fe65bd3129795def2dca5c34ecc5f96d2"),
        decimals: 18,
        dust: 5_000_000_000_000,
    },
    Token {
        symbol: "LORDS",
        address: b256!("0124aeb495b947201f5fac96fd1138e326ad86195b98df6dec9009158a533b49"),
        decimals: 18,
        dust: 10_000_000_000_000_000,
    },
    Token {
        symbol: "STRK",
        address: b256!("04718f5a0fc34cc1af16a1cdee98ffb20c31f5cd61d6ab07201858f4287c938d"),
        decimals: 18,
        dust: 5_000_000_000_000,
    },
];

/// Looks up an underlying token by symbol.
pub(crate) fn underlying(symbol: &str) -> Result<&'static Token, LedgerError> {
    UNDERLYINGS
        .iter()
        .find(|t| t.symbol == symbol)
        .ok_or_else(|| LedgerError::UnknownToken(symbol.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn felt_pads_short_addresses() {
        let a = felt("0x49d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7").unwrap();
        let b = felt("0x049d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, UNDERLYINGS[0].address);
    }

    #[test]
    fn felt_rejects_garbage() {
        assert!(felt("").is_err());
        assert!(felt("0xzz").is_err());
        assert!(felt(&"f".repeat(65)).is_err());
    }

    #[test]
    fn registry_lookups_agree() {
        let registry = TokenRegistry::new(
            UNDERLYINGS
                .iter()
                .map(|&token| TokenEntry {
                    token,
                    underlying: token.symbol,
                    risk: RiskParams::NEUTRAL,
                })
                .collect(),
        );
        let eth = registry.require("ETH").unwrap();
        assert_eq!(registry.by_address(&eth.token.address).unwrap().token.symbol, "ETH");
        assert!(registry.get("FOO").is_none());
        assert!(registry.require("FOO").is_err());
    }
}
