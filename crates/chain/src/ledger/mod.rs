//! Ledger fold machinery shared by all protocols.
//!
//! A ledger folds an event stream ordered by `(block_number, event_index)`
//! into wallet positions. The fold keeps a high-water mark so duplicated or
//! re-delivered events are rejected instead of double-applied, which makes
//! replaying an overlapping event batch idempotent.

pub mod nostra;
pub mod zklend;

use std::collections::HashMap;

use alloy::primitives::B256;
use tracing::warn;

use crate::accumulator::AccumulatorTable;
use crate::error::LedgerError;
use crate::event::Event;
use crate::position::{LoanPosition, PositionTemplate};

/// Lending protocols this crate can reconstruct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    ZkLend,
    NostraAlpha,
    NostraMainnet,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ZkLend => "zklend",
            Self::NostraAlpha => "nostra_alpha",
            Self::NostraMainnet => "nostra_mainnet",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when an event fails to decode or apply.
///
/// Accumulator regressions and precision failures are exempt: they abort the
/// replay under either policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnMalformed {
    #[default]
    SkipAndContinue,
    Abort,
}

/// Counters describing one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub processed: u64,
    pub skipped_malformed: u64,
    pub rejected_duplicates: u64,
    pub last_block: u64,
}

/// State common to every protocol ledger.
#[derive(Debug, Clone)]
pub struct LedgerCore {
    wallets: HashMap<B256, LoanPosition>,
    pub accumulators: AccumulatorTable,
    template: PositionTemplate,
    high_water: Option<(u64, u64)>,
    pub last_processed_block: u64,
}

impl LedgerCore {
    pub fn new(template: PositionTemplate, accumulator_scale_pow10: u8) -> Self {
        Self {
            wallets: HashMap::new(),
            accumulators: AccumulatorTable::new(accumulator_scale_pow10),
            template,
            high_water: None,
            last_processed_block: 0,
        }
    }

    /// Admits an event key if it is strictly after everything seen so far,
    /// advancing the high-water mark.
    fn admit(&mut self, key: (u64, u64)) -> bool {
        if self.high_water.is_some_and(|seen| key <= seen) {
            return false;
        }
        self.high_water = Some(key);
        true
    }

    /// Wallet position, created from the template on first touch.
    pub fn position_mut(&mut self, wallet: B256) -> &mut LoanPosition {
        self.wallets
            .entry(wallet)
            .or_insert_with(|| self.template.instantiate())
    }

    pub fn position(&self, wallet: &B256) -> Option<&LoanPosition> {
        self.wallets.get(wallet)
    }

    pub fn wallets(&self) -> impl Iterator<Item = (&B256, &LoanPosition)> {
        self.wallets.iter()
    }

    pub fn wallet_count(&self) -> usize {
        self.wallets.len()
    }
}

/// Point-in-time copy of a ledger's reconstructed state.
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    pub protocol: Protocol,
    pub last_processed_block: u64,
    pub wallets: HashMap<B256, LoanPosition>,
}

/// A protocol-specific event fold over a [`LedgerCore`].
pub trait ProtocolLedger {
    type Kind;

    fn protocol(&self) -> Protocol;
    fn core(&self) -> &LedgerCore;
    fn core_mut(&mut self) -> &mut LedgerCore;

    /// Applies one admitted event to the ledger state.
    fn apply(&mut self, event: &Event<Self::Kind>) -> Result<(), LedgerError>;

    fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            protocol: self.protocol(),
            last_processed_block: self.core().last_processed_block,
            wallets: self.core().wallets.clone(),
        }
    }
}

/// Folds an ordered event batch into a ledger.
///
/// Duplicates (at or below the high-water mark) are rejected and counted.
/// Malformed events follow `policy`. Regression and precision errors always
/// abort: past them the reconstruction would be silently wrong.
pub fn replay<L: ProtocolLedger>(
    ledger: &mut L,
    policy: OnMalformed,
    events: impl IntoIterator<Item = Event<L::Kind>>,
) -> Result<ReplaySummary, LedgerError> {
    let protocol = ledger.protocol();
    let mut summary = ReplaySummary::default();
    for event in events {
        let key = event.order_key();
        if !ledger.core_mut().admit(key) {
            summary.rejected_duplicates += 1;
            warn!(
                protocol = %protocol,
                block = key.0,
                index = key.1,
                "rejected duplicate or out-of-order event"
            );
            continue;
        }
        match ledger.apply(&event) {
            Ok(()) => {
                summary.processed += 1;
                let core = ledger.core_mut();
                core.last_processed_block = key.0;
                summary.last_block = key.0;
            }
            Err(err @ (LedgerError::Regression { .. } | LedgerError::Precision { .. })) => {
                return Err(err);
            }
            Err(err) => match policy {
                OnMalformed::SkipAndContinue => {
                    summary.skipped_malformed += 1;
                    warn!(
                        protocol = %protocol,
                        block = key.0,
                        index = key.1,
                        error = %err,
                        "skipped malformed event"
                    );
                }
                OnMalformed::Abort => return Err(err),
            },
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::event::ZkLendEventKind;
    use crate::position::TokenSet;

    struct CountingLedger {
        core: LedgerCore,
        applied: Vec<(u64, u64)>,
    }

    impl CountingLedger {
        fn new() -> Self {
            let set = Arc::new(TokenSet::new(vec![("ETH", 0)]));
            let template = PositionTemplate {
                collateral: Arc::clone(&set),
                debt: set,
                deposit: None,
            };
            Self {
                core: LedgerCore::new(template, 27),
                applied: Vec::new(),
            }
        }
    }

    impl ProtocolLedger for CountingLedger {
        type Kind = ZkLendEventKind;

        fn protocol(&self) -> Protocol {
            Protocol::ZkLend
        }

        fn core(&self) -> &LedgerCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut LedgerCore {
            &mut self.core
        }

        fn apply(&mut self, event: &Event<Self::Kind>) -> Result<(), LedgerError> {
            if event.data.is_empty() {
                return Err(event.malformed("empty payload"));
            }
            self.applied.push(event.order_key());
            Ok(())
        }
    }

    fn event(block: u64, index: u64, data: Vec<&str>) -> Event<ZkLendEventKind> {
        Event {
            emitter: B256::ZERO,
            kind: ZkLendEventKind::Deposit,
            block_number: block,
            event_index: index,
            data: data.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn duplicates_and_stragglers_are_rejected() {
        let mut ledger = CountingLedger::new();
        let batch = vec![
            event(10, 0, vec!["x"]),
            event(10, 0, vec!["x"]),
            event(10, 1, vec!["x"]),
            event(9, 5, vec!["x"]),
        ];
        let summary = replay(&mut ledger, OnMalformed::SkipAndContinue, batch).unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.rejected_duplicates, 2);
        assert_eq!(ledger.applied, vec![(10, 0), (10, 1)]);
        assert_eq!(summary.last_block, 10);
    }

    #[test]
    fn overlapping_rebatch_is_idempotent() {
        let mut ledger = CountingLedger::new();
        let first = vec![event(1, 0, vec!["x"]), event(2, 0, vec!["x"])];
        replay(&mut ledger, OnMalformed::SkipAndContinue, first).unwrap();
        // Re-deliver block 2 along with block 3.
        let second = vec![event(2, 0, vec!["x"]), event(3, 0, vec!["x"])];
        let summary = replay(&mut ledger, OnMalformed::SkipAndContinue, second).unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.rejected_duplicates, 1);
        assert_eq!(ledger.applied, vec![(1, 0), (2, 0), (3, 0)]);
    }

    #[test]
    fn malformed_policy_skip_versus_abort() {
        let mut ledger = CountingLedger::new();
        let batch = vec![event(1, 0, vec![]), event(1, 1, vec!["x"])];
        let summary = replay(&mut ledger, OnMalformed::SkipAndContinue, batch).unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.skipped_malformed, 1);

        let mut strict = CountingLedger::new();
        let batch = vec![event(1, 0, vec![])];
        assert!(replay(&mut strict, OnMalformed::Abort, batch).is_err());
    }
}
