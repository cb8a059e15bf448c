//! Output records for downstream storage and dashboards.
//!
//! Amounts leave the engine here: raw integers become face amounts in human
//! units, keyed by token symbol. Everything is plain serde data so the
//! transport layer can stay dumb.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use liqmon_api::OrderBookCurve;
use liqmon_chain::Side;

use crate::aggregator::ProtocolState;
use crate::risk::{face_amount, health_factor, Prices};

/// One wallet's reconstructed loan state.
#[derive(Debug, Clone, Serialize)]
pub struct LoanStateRecord {
    pub protocol: String,
    pub wallet: String,
    pub block: u64,
    pub timestamp: DateTime<Utc>,
    pub collateral: BTreeMap<String, f64>,
    pub debt: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit: Option<BTreeMap<String, f64>>,
    /// Absent for debt-free positions (infinite) and when a price is missing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_factor: Option<f64>,
}

/// One venue's liquidity curve, flattened for storage.
#[derive(Debug, Clone, Serialize)]
pub struct OrderBookRecord {
    pub token_a: String,
    pub token_b: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub exchange: String,
    pub current_price: f64,
    pub asks: Vec<(f64, f64)>,
    pub bids: Vec<(f64, f64)>,
}

/// Flattens a protocol snapshot into per-wallet records, skipping wallets
/// that no longer hold anything.
pub fn loan_state_records(state: &ProtocolState, prices: &Prices) -> Vec<LoanStateRecord> {
    let timestamp = Utc::now();
    let mut records: Vec<LoanStateRecord> = state
        .snapshot
        .wallets
        .iter()
        .filter(|(_, position)| !position.is_empty())
        .map(|(wallet, position)| {
            let hf = health_factor(position, &state.registry, &state.accumulators, prices)
                .ok()
                .filter(|hf| hf.is_finite());
            LoanStateRecord {
                protocol: state.protocol.as_str().to_string(),
                wallet: format!("{wallet}"),
                block: state.snapshot.last_processed_block,
                timestamp,
                collateral: amounts(state, position.effective_collateral(), Side::Lending),
                debt: amounts(state, position.debt.iter().collect(), Side::Debt),
                deposit: position
                    .deposit
                    .as_ref()
                    .map(|deposit| amounts(state, deposit.iter().collect(), Side::Lending)),
                health_factor: hf,
            }
        })
        .collect();
    records.sort_by(|a, b| a.wallet.cmp(&b.wallet));
    records
}

fn amounts(
    state: &ProtocolState,
    balances: Vec<(&'static str, alloy::primitives::I256)>,
    side: Side,
) -> BTreeMap<String, f64> {
    balances
        .into_iter()
        .filter(|(_, raw)| !raw.is_zero())
        .filter_map(|(symbol, raw)| {
            let entry = state.registry.get(symbol)?;
            Some((
                symbol.to_string(),
                face_amount(entry, raw, &state.accumulators, side),
            ))
        })
        .collect()
}

/// Flattens a venue curve into a storage record.
pub fn order_book_record(curve: &OrderBookCurve) -> OrderBookRecord {
    let flatten = |levels: &[liqmon_api::PriceLevel]| {
        levels
            .iter()
            .map(|level| (level.price, level.supply))
            .collect()
    };
    OrderBookRecord {
        token_a: curve.base_symbol.clone(),
        token_b: curve.quote_symbol.clone(),
        block: curve.block,
        timestamp: curve.timestamp,
        exchange: curve.dex.to_string(),
        current_price: curve.current_price,
        asks: flatten(curve.asks()),
        bids: flatten(curve.bids()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use alloy::primitives::{B256, I256};

    use liqmon_api::{PairTokens, PriceLevel};
    use liqmon_chain::{
        AccumulatorTable, LedgerSnapshot, PositionTemplate, Protocol, RiskParams, Token,
        TokenEntry, TokenRegistry, TokenSet,
    };

    fn state() -> ProtocolState {
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
                debt_factor: 1.0,
                ..RiskParams::NEUTRAL
            },
        };
        let registry = TokenRegistry::new(vec![entry("ETH", 1, 18), entry("USDC", 2, 6)]);

        let set = Arc::new(TokenSet::new(vec![("ETH", 0), ("USDC", 0)]));
        let template = PositionTemplate {
            collateral: Arc::clone(&set),
            debt: set,
            deposit: None,
        };
        let mut indebted = template.instantiate();
        indebted
            .collateral
            .increase("ETH", I256::try_from(2_000_000_000_000_000_000i128).unwrap())
            .unwrap();
        indebted
            .debt
            .increase("USDC", I256::try_from(1_500_000_000i128).unwrap())
            .unwrap();
        let empty = template.instantiate();

        let mut wallets = HashMap::new();
        wallets.insert(B256::with_last_byte(7), indebted);
        wallets.insert(B256::with_last_byte(8), empty);
        ProtocolState {
            protocol: Protocol::ZkLend,
            snapshot: LedgerSnapshot {
                protocol: Protocol::ZkLend,
                last_processed_block: 1234,
                wallets,
            },
            registry,
            accumulators: AccumulatorTable::new(27),
        }
    }

    #[test]
    fn empty_wallets_are_dropped() {
        let mut prices = Prices::new();
        prices.set("ETH", 1_800.0);
        prices.set("USDC", 1.0);
        let records = loan_state_records(&state(), &prices);
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record.protocol, "zklend");
        assert_eq!(record.block, 1234);
        assert!((record.collateral["ETH"] - 2.0).abs() < 1e-12);
        assert!((record.debt["USDC"] - 1_500.0).abs() < 1e-9);
        assert!((record.health_factor.unwrap() - 1.92).abs() < 1e-9);
    }

    #[test]
    fn records_serialize_without_none_fields() {
        let mut prices = Prices::new();
        prices.set("ETH", 1_800.0);
        prices.set("USDC", 1.0);
        let records = loan_state_records(&state(), &prices);
        let json = serde_json::to_value(&records[0]).unwrap();
        assert!(json.get("deposit").is_none());
        assert_eq!(json["debt"]["USDC"], 1_500.0);
    }

    #[test]
    fn order_book_record_mirrors_the_curve() {
        let pair = PairTokens {
            base_address: B256::with_last_byte(1),
            quote_address: B256::with_last_byte(2),
            base_symbol: "ETH".to_string(),
            quote_symbol: "USDC".to_string(),
            base_decimals: 18,
            quote_decimals: 6,
        };
        let curve = OrderBookCurve::new(
            "ekubo",
            &pair,
            2_000.0,
            Some(55),
            vec![PriceLevel {
                price: 2_010.0,
                supply: 3.0,
            }],
            vec![PriceLevel {
                price: 1_990.0,
                supply: 4.0,
            }],
        );
        let record = order_book_record(&curve);
        assert_eq!(record.exchange, "ekubo");
        assert_eq!(record.token_a, "ETH");
        assert_eq!(record.block, Some(55));
        assert_eq!(record.asks, vec![(2_010.0, 3.0)]);
        assert_eq!(record.bids, vec![(1_990.0, 4.0)]);
    }
}
