//! zkLend market ledger.
//!
//! All market events (Deposit, Withdrawal, Borrowing, Repayment, Liquidation,
//! AccumulatorsSync, collateral toggles) come from the singleton market
//! contract; z-token ERC-20 Transfers move deposits between wallets without a
//! market event. Deposits and the collateral leg of liquidations arrive as
//! face amounts and are stored raw through the lending accumulator; debt
//! amounts arrive raw. Accumulators are scaled by 1e27.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{b256, B256, I256};

use crate::accumulator::Side;
use crate::error::LedgerError;
use crate::event::{Event, ZkLendEventKind};
use crate::ledger::{LedgerCore, Protocol, ProtocolLedger};
use crate::position::{PositionTemplate, TokenSet};
use crate::tokens::{underlying, RiskParams, TokenEntry, TokenRegistry};

/// The zkLend market contract.
pub const ZKLEND_MARKET: B256 =
    b256!("04c0a5193d58f74fbace4b74dcf65481e734ed1714121bdc571da345540efa05");

struct MarketToken {
    underlying: &'static str,
    z_token: B256,
    collateral_factor: f64,
    liquidation_bonus: f64,
}

/// Assets listed on the zkLend market. zkLend has no debt factors.
const MARKET_TOKENS: &[MarketToken] = &[
    MarketToken {
        underlying: "ETH",
        z_token: b256!("01b5bd713e72fdc5d63ffd83762f81297f6175a5e0a4771cdadbc1dd5fe72cb1"),
        collateral_factor: 0.80,
        liquidation_bonus: 0.10,
    },
    MarketToken {
        underlying: "WBTC",
        z_token: b256!("02b9ea3acdb23da566cee8e8beae3125a1458e720dea68c4a9a7a2d8eb5bbb4a"),
        collateral_factor: 0.70,
        liquidation_bonus: 0.15,
    },
    MarketToken {
        underlying: "USDC",
        z_token: b256!("047ad51726d891f972e74e4ad858a261b43869f7126ce7436ee0b2529a98f486"),
        collateral_factor: 0.80,
        liquidation_bonus: 0.10,
    },
    MarketToken {
        underlying: "DAI",
        z_token: b256!("062fa7afe1ca2992f8d8015385a279f49fad36299754fb1e9866f4f052289376"),
        collateral_factor: 0.70,
        liquidation_bonus: 0.10,
    },
    MarketToken {
        underlying: "USDT",
        z_token: b256!("00811d8da5dc8a2206ea7fd0b28627c2d77280a515126e62baa4d78e22714c4a"),
        collateral_factor: 0.80,
        liquidation_bonus: 0.10,
    },
];

const ACCUMULATOR_SCALE_POW10: u8 = 27;

/// Event fold for the zkLend market.
pub struct ZkLendLedger {
    core: LedgerCore,
    registry: TokenRegistry,
    z_tokens: HashMap<B256, &'static str>,
}

impl ZkLendLedger {
    pub fn new() -> Self {
        let entries = MARKET_TOKENS
            .iter()
            .map(|market| {
                let token = *underlying(market.underlying)
                    .unwrap_or_else(|_| unreachable!("market tokens use listed underlyings"));
                TokenEntry {
                    token,
                    underlying: market.underlying,
                    risk: RiskParams {
                        collateral_factor: market.collateral_factor,
                        liquidation_bonus: market.liquidation_bonus,
                        ..RiskParams::NEUTRAL
                    },
                }
            })
            .collect();
        let registry = TokenRegistry::new(entries);
        let set = Arc::new(TokenSet::new(
            registry
                .entries()
                .iter()
                .map(|e| (e.token.symbol, e.token.dust))
                .collect(),
        ));
        let template = PositionTemplate {
            collateral: Arc::clone(&set),
            debt: Arc::clone(&set),
            deposit: Some(set),
        };
        let z_tokens = MARKET_TOKENS
            .iter()
            .map(|market| (market.z_token, market.underlying))
            .collect();
        Self {
            core: LedgerCore::new(template, ACCUMULATOR_SCALE_POW10),
            registry,
            z_tokens,
        }
    }

    pub fn registry(&self) -> &TokenRegistry {
        &self.registry
    }

    fn symbol_at(
        &self,
        event: &Event<ZkLendEventKind>,
        field: usize,
    ) -> Result<&'static str, LedgerError> {
        let address = event.reader().felt(field)?;
        self.registry
            .by_address(&address)
            .map(|entry| entry.token.symbol)
            .ok_or_else(|| event.malformed(format!("unlisted market token {address}")))
    }

    fn adjust_deposit(
        &mut self,
        wallet: B256,
        symbol: &'static str,
        raw_delta: I256,
    ) -> Result<(), LedgerError> {
        let position = self.core.position_mut(wallet);
        position
            .deposit
            .as_mut()
            .map(|deposit| deposit.increase(symbol, raw_delta))
            .transpose()?;
        Ok(())
    }

    fn apply_deposit_leg(
        &mut self,
        event: &Event<ZkLendEventKind>,
        sign: i8,
    ) -> Result<(), LedgerError> {
        let reader = event.reader();
        let wallet = reader.felt(0)?;
        let symbol = self.symbol_at(event, 1)?;
        let face = reader.int(2)?;
        let raw = self
            .core
            .accumulators
            .face_to_raw(symbol, face, Side::Lending)?;
        let delta = if sign < 0 { -raw } else { raw };
        self.adjust_deposit(wallet, symbol, delta)
    }

    fn apply_collateral_flag(
        &mut self,
        event: &Event<ZkLendEventKind>,
        enabled: bool,
    ) -> Result<(), LedgerError> {
        let reader = event.reader();
        let wallet = reader.felt(0)?;
        let symbol = self.symbol_at(event, 1)?;
        let position = self.core.position_mut(wallet);
        position
            .collateral_enabled
            .as_mut()
            .map(|flags| flags.set(symbol, enabled))
            .transpose()?;
        Ok(())
    }

    fn apply_liquidation(&mut self, event: &Event<ZkLendEventKind>) -> Result<(), LedgerError> {
        // [liquidator, user, debt_token, debt_raw, debt_face,
        //  collateral_token, collateral_face]
        let reader = event.reader();
        let wallet = reader.felt(1)?;
        let debt_symbol = self.symbol_at(event, 2)?;
        let debt_raw = reader.int(3)?;
        let collateral_symbol = self.symbol_at(event, 5)?;
        let collateral_face = reader.int(6)?;
        let collateral_raw =
            self.core
                .accumulators
                .face_to_raw(collateral_symbol, collateral_face, Side::Lending)?;
        let position = self.core.position_mut(wallet);
        position.debt.increase(debt_symbol, -debt_raw)?;
        position
            .deposit
            .as_mut()
            .map(|deposit| deposit.increase(collateral_symbol, -collateral_raw))
            .transpose()?;
        Ok(())
    }

    /// z-token Transfers move deposits. Zero-address legs are mints and
    /// burns, already covered by Deposit and Withdrawal events.
    fn apply_transfer(&mut self, event: &Event<ZkLendEventKind>) -> Result<(), LedgerError> {
        let symbol = *self
            .z_tokens
            .get(&event.emitter)
            .ok_or_else(|| event.malformed(format!("transfer from unlisted contract {}", event.emitter)))?;
        let reader = event.reader();
        let sender = reader.felt(0)?;
        let recipient = reader.felt(1)?;
        let face = reader.int(2)?;
        let raw = self
            .core
            .accumulators
            .face_to_raw(symbol, face, Side::Lending)?;
        if sender != B256::ZERO {
            self.adjust_deposit(sender, symbol, -raw)?;
        }
        if recipient != B256::ZERO {
            self.adjust_deposit(recipient, symbol, raw)?;
        }
        Ok(())
    }
}

impl Default for ZkLendLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolLedger for ZkLendLedger {
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

    fn apply(&mut self, event: &Event<ZkLendEventKind>) -> Result<(), LedgerError> {
        match event.kind {
            ZkLendEventKind::Deposit => self.apply_deposit_leg(event, 1),
            ZkLendEventKind::Withdrawal => self.apply_deposit_leg(event, -1),
            ZkLendEventKind::CollateralEnabled => self.apply_collateral_flag(event, true),
            ZkLendEventKind::CollateralDisabled => self.apply_collateral_flag(event, false),
            ZkLendEventKind::Borrowing => {
                // [user, token, raw_amount, face_amount]
                let reader = event.reader();
                let wallet = reader.felt(0)?;
                let symbol = self.symbol_at(event, 1)?;
                let raw = reader.int(2)?;
                self.core.position_mut(wallet).debt.increase(symbol, raw)
            }
            ZkLendEventKind::Repayment => {
                // [repayer, beneficiary, token, raw_amount, face_amount]
                let reader = event.reader();
                let wallet = reader.felt(1)?;
                let symbol = self.symbol_at(event, 2)?;
                let raw = reader.int(3)?;
                self.core.position_mut(wallet).debt.increase(symbol, -raw)
            }
            ZkLendEventKind::Liquidation => self.apply_liquidation(event),
            ZkLendEventKind::AccumulatorsSync => {
                // [token, lending_accumulator, debt_accumulator]
                let symbol = self.symbol_at(event, 0)?;
                let reader = event.reader();
                let lending = reader.uint(1)?;
                let debt = reader.uint(2)?;
                self.core.accumulators.apply_sync(symbol, lending, debt)
            }
            ZkLendEventKind::Transfer => self.apply_transfer(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{replay, OnMalformed};
    use alloy::primitives::U256;

    const ETH: &str = "0x049d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7";
    const USDC: &str = "0x053c91253bc9682c04929ca02ed00b3e423f6710d2ee7e0d5ebb06f3ecf368a8";
    const ALICE: &str = "0xa11ce";
    const BOB: &str = "0xb0b";

    fn event(
        block: u64,
        index: u64,
        kind: ZkLendEventKind,
        data: &[&str],
    ) -> Event<ZkLendEventKind> {
        Event {
            emitter: ZKLEND_MARKET,
            kind,
            block_number: block,
            event_index: index,
            data: data.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn wallet(hex: &str) -> B256 {
        crate::tokens::felt(hex).unwrap()
    }

    fn amount(v: i128) -> I256 {
        I256::try_from(v).unwrap()
    }

    #[test]
    fn deposit_withdraw_round_trip() {
        let mut ledger = ZkLendLedger::new();
        let events = vec![
            event(1, 0, ZkLendEventKind::Deposit, &[ALICE, ETH, "1000000000000000000"]),
            event(2, 0, ZkLendEventKind::CollateralEnabled, &[ALICE, ETH]),
            event(3, 0, ZkLendEventKind::Withdrawal, &[ALICE, ETH, "400000000000000000"]),
        ];
        replay(&mut ledger, OnMalformed::SkipAndContinue, events).unwrap();
        let position = ledger.core().position(&wallet(ALICE)).unwrap();
        assert_eq!(
            position.effective_collateral(),
            vec![("ETH", amount(600_000_000_000_000_000))]
        );
    }

    #[test]
    fn deposits_store_raw_through_lending_accumulator() {
        let mut ledger = ZkLendLedger::new();
        // Lending index 2.0 at scale 1e27.
        let index = "2000000000000000000000000000";
        let events = vec![
            event(1, 0, ZkLendEventKind::AccumulatorsSync, &[ETH, index, index]),
            event(2, 0, ZkLendEventKind::Deposit, &[ALICE, ETH, "1000000000000000000"]),
        ];
        replay(&mut ledger, OnMalformed::SkipAndContinue, events).unwrap();
        let position = ledger.core().position(&wallet(ALICE)).unwrap();
        // Face 1 ETH at index 2.0 is 0.5 ETH raw.
        assert_eq!(
            position.deposit.as_ref().unwrap().get("ETH").unwrap(),
            amount(500_000_000_000_000_000)
        );
    }

    #[test]
    fn duplicate_liquidation_applies_once() {
        let mut ledger = ZkLendLedger::new();
        let setup = vec![
            event(1, 0, ZkLendEventKind::Deposit, &[ALICE, ETH, "2000000000000000000"]),
            event(1, 1, ZkLendEventKind::CollateralEnabled, &[ALICE, ETH]),
            event(2, 0, ZkLendEventKind::Borrowing, &[ALICE, USDC, "3000000000", "3000000000"]),
        ];
        replay(&mut ledger, OnMalformed::SkipAndContinue, setup).unwrap();

        let liquidation = event(
            3,
            0,
            ZkLendEventKind::Liquidation,
            &[BOB, ALICE, USDC, "1000000000", "1000000000", ETH, "500000000000000000"],
        );
        let batch = vec![liquidation.clone(), liquidation];
        let summary = replay(&mut ledger, OnMalformed::SkipAndContinue, batch).unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.rejected_duplicates, 1);

        let position = ledger.core().position(&wallet(ALICE)).unwrap();
        assert_eq!(position.debt.get("USDC").unwrap(), amount(2_000_000_000));
        assert_eq!(
            position.deposit.as_ref().unwrap().get("ETH").unwrap(),
            amount(1_500_000_000_000_000_000)
        );
    }

    #[test]
    fn z_token_transfer_moves_deposit_and_skips_mint_legs() {
        let mut ledger = ZkLendLedger::new();
        let deposit = vec![
            event(1, 0, ZkLendEventKind::Deposit, &[ALICE, ETH, "1000000000000000000"]),
        ];
        replay(&mut ledger, OnMalformed::SkipAndContinue, deposit).unwrap();

        let z_eth = MARKET_TOKENS[0].z_token;
        let transfer = Event {
            emitter: z_eth,
            kind: ZkLendEventKind::Transfer,
            block_number: 2,
            event_index: 0,
            data: vec![ALICE.into(), BOB.into(), "250000000000000000".into()],
        };
        let mint = Event {
            emitter: z_eth,
            kind: ZkLendEventKind::Transfer,
            block_number: 3,
            event_index: 0,
            data: vec!["0x0".into(), BOB.into(), "100".into()],
        };
        replay(&mut ledger, OnMalformed::SkipAndContinue, vec![transfer, mint]).unwrap();

        let alice = ledger.core().position(&wallet(ALICE)).unwrap();
        let bob = ledger.core().position(&wallet(BOB)).unwrap();
        assert_eq!(
            alice.deposit.as_ref().unwrap().get("ETH").unwrap(),
            amount(750_000_000_000_000_000)
        );
        // The mint leg credits Bob but debits nobody.
        assert_eq!(
            bob.deposit.as_ref().unwrap().get("ETH").unwrap(),
            amount(250_000_000_000_000_100)
        );
    }

    #[test]
    fn accumulator_regression_aborts_and_preserves_index() {
        let mut ledger = ZkLendLedger::new();
        let high = "1100000000000000000000000000";
        let low = "1000000000000000000000000000";
        replay(
            &mut ledger,
            OnMalformed::SkipAndContinue,
            vec![event(1, 0, ZkLendEventKind::AccumulatorsSync, &[ETH, high, high])],
        )
        .unwrap();
        let err = replay(
            &mut ledger,
            OnMalformed::SkipAndContinue,
            vec![event(2, 0, ZkLendEventKind::AccumulatorsSync, &[ETH, low, high])],
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::Regression { token: "ETH", .. }));
        assert_eq!(
            ledger.core().accumulators.index("ETH", Side::Lending),
            U256::from_str_radix(high, 10).unwrap()
        );
    }

    #[test]
    fn unlisted_token_is_skippable_malformed() {
        let mut ledger = ZkLendLedger::new();
        let bogus = "0x0badc0de";
        let summary = replay(
            &mut ledger,
            OnMalformed::SkipAndContinue,
            vec![
                event(1, 0, ZkLendEventKind::Deposit, &[ALICE, bogus, "100"]),
                event(1, 1, ZkLendEventKind::Deposit, &[ALICE, ETH, "100000000000000000000"]),
            ],
        )
        .unwrap();
        assert_eq!(summary.skipped_malformed, 1);
        assert_eq!(summary.processed, 1);
    }
}
