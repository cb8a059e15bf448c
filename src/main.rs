//! liqmon: lending-risk reconstruction for Starknet money markets.
//!
//! One run of the binary:
//! - replays per-protocol event batches into loan ledgers (one task each)
//! - fetches DEX liquidity curves per venue and pair (one task each)
//! - values every reconstructed position and aggregates liquidable debt
//!   against available liquidity per collateral/debt pair
//! - emits JSON-lines records on stdout for downstream storage
//!
//! A failing protocol or venue branch is reported in the output instead of
//! taking the run down.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use futures::future::join_all;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use liqmon_api::{
    AmmPoolSet, EkuboClient, EkuboOrderBook, HaikoClient, HaikoOrderBook, OrderBookCurve,
    OrderBookProvider, PairTokens,
};
use liqmon_chain::{
    replay, Event, LedgerError, NostraLedger, OnMalformed, Protocol, ProtocolLedger,
    RawEventRecord, ZkLendLedger, UNDERLYINGS,
};
use liqmon_core::{
    liquidable_debt_series, loan_state_records, order_book_record, EngineConfig, Prices,
    ProtocolState,
};

/// Environment variable names.
mod env {
    pub const EVENTS_DIR: &str = "LIQMON_EVENTS_DIR";
}

/// Collateral/debt underlying pairs swept by the aggregator.
const PAIRS: &[(&str, &str)] = &[("ETH", "USDC"), ("WBTC", "USDC"), ("STRK", "USDC")];

/// Stable underlyings quoted at par when no venue quote is available.
const STABLES: &[&str] = &["USDC", "USDT", "DAI"];

/// Every volatile underlying quoted against USDC. A superset of the swept
/// pairs: valuation needs a price for every token a wallet can hold, not just
/// the pairs being swept.
fn quoted_pairs() -> Vec<(&'static str, &'static str)> {
    UNDERLYINGS
        .iter()
        .filter(|token| !STABLES.contains(&token.symbol))
        .map(|token| (token.symbol, "USDC"))
        .collect()
}

const PROTOCOLS: &[Protocol] = &[
    Protocol::ZkLend,
    Protocol::NostraAlpha,
    Protocol::NostraMainnet,
];

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,liqmon_core=debug,liqmon_chain=debug")),
        )
        .init();

    let config = EngineConfig::load()?;
    config.log_config();

    let events_dir =
        std::env::var(env::EVENTS_DIR).unwrap_or_else(|_| "events".to_string());
    info!(dir = %events_dir, "starting reconstruction run");

    let failures: Arc<DashMap<String, String>> = Arc::new(DashMap::new());

    let states = reconstruct_protocols(&events_dir, &config, &failures).await;
    let curves = fetch_curves(&config, &failures).await;
    let prices = spot_prices(&curves);

    emit_reports(&states, &curves, &prices, &config, &failures)?;
    Ok(())
}

// ============================================================================
// Ledger replay
// ============================================================================

/// Replays every protocol's event batch, one blocking task each. Folding
/// within a protocol is strictly sequential; protocols are independent.
async fn reconstruct_protocols(
    events_dir: &str,
    config: &EngineConfig,
    failures: &Arc<DashMap<String, String>>,
) -> Vec<ProtocolState> {
    let results: Arc<DashMap<&'static str, ProtocolState>> = Arc::new(DashMap::new());
    let policy = config.fold.policy();

    let mut tasks = Vec::new();
    for &protocol in PROTOCOLS {
        let path = Path::new(events_dir).join(format!("{protocol}.json"));
        let results = Arc::clone(&results);
        let failures = Arc::clone(failures);
        tasks.push(tokio::task::spawn_blocking(move || {
            match reconstruct(protocol, &path, policy) {
                Ok(state) => {
                    results.insert(protocol.as_str(), state);
                }
                Err(err) => {
                    warn!(%protocol, error = %err, "protocol reconstruction failed");
                    failures.insert(protocol.as_str().to_string(), err.to_string());
                }
            }
        }));
    }
    join_all(tasks).await;

    let mut states: Vec<ProtocolState> = results.iter().map(|entry| entry.value().clone()).collect();
    states.sort_by_key(|state| state.protocol.as_str());
    states
}

/// Reads, decodes, and folds one protocol's event batch.
fn reconstruct(protocol: Protocol, path: &Path, policy: OnMalformed) -> Result<ProtocolState> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading event batch {}", path.display()))?;
    let mut records: Vec<RawEventRecord> = serde_json::from_str(&content)
        .with_context(|| format!("decoding event batch {}", path.display()))?;
    records.sort_by_key(|record| (record.block_number, record.event_index));

    let state = match protocol {
        Protocol::ZkLend => {
            let mut ledger = ZkLendLedger::new();
            let events = decode_batch(&records, policy, Event::decode_zklend)?;
            fold(&mut ledger, events, policy)?;
            ProtocolState {
                protocol,
                snapshot: ledger.snapshot(),
                registry: ledger.registry().clone(),
                accumulators: ledger.core().accumulators.clone(),
            }
        }
        Protocol::NostraAlpha | Protocol::NostraMainnet => {
            let mut ledger = if protocol == Protocol::NostraAlpha {
                NostraLedger::alpha()
            } else {
                NostraLedger::mainnet()
            };
            let events = decode_batch(&records, policy, Event::decode_nostra)?;
            fold(&mut ledger, events, policy)?;
            ProtocolState {
                protocol,
                snapshot: ledger.snapshot(),
                registry: ledger.registry().clone(),
                accumulators: ledger.core().accumulators.clone(),
            }
        }
    };
    Ok(state)
}

fn decode_batch<K>(
    records: &[RawEventRecord],
    policy: OnMalformed,
    decode: impl Fn(&RawEventRecord) -> Result<Option<Event<K>>, LedgerError>,
) -> Result<Vec<Event<K>>> {
    let mut events = Vec::with_capacity(records.len());
    for record in records {
        match decode(record) {
            Ok(Some(event)) => events.push(event),
            Ok(None) => {}
            Err(err) if policy == OnMalformed::SkipAndContinue => {
                warn!(
                    block = record.block_number,
                    index = record.event_index,
                    error = %err,
                    "skipped undecodable event"
                );
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(events)
}

fn fold<L: ProtocolLedger>(
    ledger: &mut L,
    events: Vec<Event<L::Kind>>,
    policy: OnMalformed,
) -> Result<()> {
    let summary = replay(ledger, policy, events)?;
    info!(
        protocol = %ledger.protocol(),
        processed = summary.processed,
        skipped = summary.skipped_malformed,
        duplicates = summary.rejected_duplicates,
        last_block = summary.last_block,
        wallets = ledger.core().wallet_count(),
        "ledger replay complete"
    );
    Ok(())
}

// ============================================================================
// Curve fetching
// ============================================================================

/// Fetches every venue's curve for every quoted pair, one task each, with
/// bounded retries. A failed branch lands in `failures` instead of cancelling
/// the rest.
async fn fetch_curves(
    config: &EngineConfig,
    failures: &Arc<DashMap<String, String>>,
) -> Vec<OrderBookCurve> {
    let range = config.price_range.range();
    let providers: Vec<Arc<dyn OrderBookProvider>> = vec![
        Arc::new(
            EkuboOrderBook::new(EkuboClient::with_base_url(&config.endpoints.ekubo_base_url))
                .with_range(range),
        ),
        Arc::new(
            HaikoOrderBook::new(HaikoClient::with_base_url(&config.endpoints.haiko_base_url))
                .with_range(range),
        ),
    ];

    let curves: Arc<DashMap<String, OrderBookCurve>> = Arc::new(DashMap::new());
    let retry = config.retry.policy();

    let mut tasks = Vec::new();
    for (base, quote) in quoted_pairs() {
        let Some(pair) = pair_tokens(base, quote) else {
            warn!(base, quote, "pair references an unknown underlying");
            continue;
        };
        for provider in &providers {
            let provider = Arc::clone(provider);
            let pair = pair.clone();
            let curves = Arc::clone(&curves);
            let failures = Arc::clone(failures);
            tasks.push(tokio::spawn(async move {
                let branch = format!(
                    "{} {}/{}",
                    provider.dex(),
                    pair.base_symbol,
                    pair.quote_symbol
                );
                let fetched = retry
                    .run(&branch, || {
                        let provider = Arc::clone(&provider);
                        let pair = pair.clone();
                        async move { provider.fetch_curve(&pair).await }
                    })
                    .await;
                match fetched {
                    Ok(curve) => {
                        info!(
                            branch = %branch,
                            asks = curve.asks().len(),
                            bids = curve.bids().len(),
                            "fetched liquidity curve"
                        );
                        curves.insert(branch, curve);
                    }
                    Err(err) => {
                        warn!(branch = %branch, error = %err, "curve fetch failed");
                        failures.insert(branch, err.to_string());
                    }
                }
            }));
        }
    }
    join_all(tasks).await;

    let mut fetched: Vec<(String, OrderBookCurve)> = curves
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect();
    fetched.sort_by(|a, b| a.0.cmp(&b.0));
    fetched.into_iter().map(|(_, curve)| curve).collect()
}

fn pair_tokens(base: &str, quote: &str) -> Option<PairTokens> {
    let base = UNDERLYINGS.iter().find(|t| t.symbol == base)?;
    let quote = UNDERLYINGS.iter().find(|t| t.symbol == quote)?;
    Some(PairTokens {
        base_address: base.address,
        quote_address: quote.address,
        base_symbol: base.symbol.to_string(),
        quote_symbol: quote.symbol.to_string(),
        base_decimals: base.decimals,
        quote_decimals: quote.decimals,
    })
}

/// USD quotes: stables at par, everything else from the fetched curves
/// (Ekubo's quote wins when both venues list the pair).
fn spot_prices(curves: &[OrderBookCurve]) -> Prices {
    let mut prices = Prices::new();
    for &symbol in STABLES {
        prices.set(symbol, 1.0);
    }
    for curve in curves {
        if curve.quote_symbol != "USDC" || curve.current_price <= 0.0 {
            continue;
        }
        if prices.get(&curve.base_symbol).is_none() || curve.dex == "ekubo" {
            prices.set(curve.base_symbol.clone(), curve.current_price);
        }
    }
    prices
}

// ============================================================================
// Output
// ============================================================================

fn emit_reports(
    states: &[ProtocolState],
    curves: &[OrderBookCurve],
    prices: &Prices,
    config: &EngineConfig,
    failures: &Arc<DashMap<String, String>>,
) -> Result<()> {
    for state in states {
        for record in loan_state_records(state, prices) {
            emit("loan_state", &record);
        }
    }

    for curve in curves {
        emit("order_book", &order_book_record(curve));
    }

    let pools = AmmPoolSet::new();
    for &(collateral, debt) in PAIRS {
        let pair_curves: Vec<OrderBookCurve> = curves
            .iter()
            .filter(|curve| curve.base_symbol == collateral && curve.quote_symbol == debt)
            .cloned()
            .collect();
        match liquidable_debt_series(
            states,
            &pair_curves,
            &pools,
            prices,
            collateral,
            debt,
            config.sweep,
        ) {
            Ok(mut series) => {
                for entry in failures.iter() {
                    let pair_branch = entry.key().ends_with(&format!("{collateral}/{debt}"));
                    let protocol_branch =
                        PROTOCOLS.iter().any(|p| p.as_str() == entry.key().as_str());
                    if pair_branch || protocol_branch {
                        series.record_failure(entry.key().clone(), entry.value().clone());
                    }
                }
                emit("liquidable_debt", &series);
            }
            Err(err) => {
                warn!(collateral, debt, error = %err, "aggregation failed for pair");
            }
        }
    }
    Ok(())
}

fn emit<T: serde::Serialize>(kind: &str, data: &T) {
    let line = serde_json::json!({ "kind": kind, "data": data });
    println!("{line}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_underlying_is_quoted_or_stable() {
        let quoted = quoted_pairs();
        for token in UNDERLYINGS {
            let covered = STABLES.contains(&token.symbol)
                || quoted.iter().any(|&(base, _)| base == token.symbol);
            assert!(covered, "{} has no spot quote source", token.symbol);
        }
    }

    #[test]
    fn spot_prices_cover_curves_beyond_the_swept_pairs() {
        let pair = pair_tokens("wstETH", "USDC").unwrap();
        assert!(!PAIRS.iter().any(|&(base, _)| base == "wstETH"));

        let curve = OrderBookCurve::empty("ekubo", &pair, 2_100.0);
        let prices = spot_prices(&[curve]);
        assert_eq!(prices.get("wstETH"), Some(2_100.0));
        assert_eq!(prices.get("USDC"), Some(1.0));
    }
}
