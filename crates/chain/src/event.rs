//! Raw event records and protocol event decoding.
//!
//! Events arrive as felt-string payloads keyed by an event name. Cairo
//! components emit fully-qualified names (for example the OpenZeppelin ERC-20
//! `Transfer` or Nostra's token component `Mint`), so names normalize to their
//! last `::` segment before matching.

use alloy::primitives::{B256, I256, U256};
use serde::Deserialize;
use tracing::debug;

use crate::error::LedgerError;
use crate::tokens::felt;

/// One event as fetched from an indexer, before protocol decoding.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEventRecord {
    pub from_address: String,
    pub key_name: String,
    pub block_number: u64,
    pub event_index: u64,
    #[serde(default)]
    pub data: Vec<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
}

/// Parses an event amount field: hex with `0x` prefix, else decimal.
pub fn parse_amount(s: &str) -> Option<U256> {
    match s.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16).ok(),
        None => U256::from_str_radix(s, 10).ok(),
    }
}

/// Parses a felt address field into a padded 32-byte word.
pub fn parse_felt(s: &str) -> Option<B256> {
    felt(s).ok()
}

fn short_name(name: &str) -> &str {
    name.rsplit("::").next().unwrap_or(name)
}

/// Event kinds emitted by the zkLend market contract and its z-tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZkLendEventKind {
    Deposit,
    Withdrawal,
    CollateralEnabled,
    CollateralDisabled,
    Borrowing,
    Repayment,
    Liquidation,
    AccumulatorsSync,
    Transfer,
}

impl ZkLendEventKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match short_name(name) {
            "Deposit" => Some(Self::Deposit),
            "Withdrawal" => Some(Self::Withdrawal),
            "CollateralEnabled" => Some(Self::CollateralEnabled),
            "CollateralDisabled" => Some(Self::CollateralDisabled),
            "Borrowing" => Some(Self::Borrowing),
            "Repayment" => Some(Self::Repayment),
            "Liquidation" => Some(Self::Liquidation),
            "AccumulatorsSync" => Some(Self::AccumulatorsSync),
            "Transfer" => Some(Self::Transfer),
            _ => None,
        }
    }
}

/// Event kinds emitted by Nostra token contracts and the interest-rate model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NostraEventKind {
    InterestStateUpdated,
    Transfer,
    Mint,
    Burn,
}

impl NostraEventKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match short_name(name) {
            "InterestStateUpdated" => Some(Self::InterestStateUpdated),
            "Transfer" => Some(Self::Transfer),
            "Mint" => Some(Self::Mint),
            "Burn" => Some(Self::Burn),
            _ => None,
        }
    }
}

/// A decoded event, ready to fold into a ledger.
#[derive(Debug, Clone)]
pub struct Event<K> {
    /// Contract that emitted the event.
    pub emitter: B256,
    pub kind: K,
    pub block_number: u64,
    pub event_index: u64,
    pub data: Vec<String>,
}

impl<K> Event<K> {
    /// Total order of events within a stream.
    pub fn order_key(&self) -> (u64, u64) {
        (self.block_number, self.event_index)
    }

    pub fn reader(&self) -> PayloadReader<'_> {
        PayloadReader {
            block: self.block_number,
            index: self.event_index,
            data: &self.data,
        }
    }

    pub fn malformed(&self, reason: impl Into<String>) -> LedgerError {
        LedgerError::MalformedEvent {
            block: self.block_number,
            index: self.event_index,
            reason: reason.into(),
        }
    }
}

fn decode<K>(
    record: &RawEventRecord,
    kind: Option<K>,
) -> Result<Option<Event<K>>, LedgerError> {
    let Some(kind) = kind else {
        // Not in this protocol's handler table; skipping is never fatal.
        debug!(
            name = %record.key_name,
            block = record.block_number,
            index = record.event_index,
            "skipped event with unrecognized name"
        );
        return Ok(None);
    };
    let emitter = parse_felt(&record.from_address).ok_or_else(|| {
        LedgerError::MalformedEvent {
            block: record.block_number,
            index: record.event_index,
            reason: format!("bad emitter address {:?}", record.from_address),
        }
    })?;
    Ok(Some(Event {
        emitter,
        kind,
        block_number: record.block_number,
        event_index: record.event_index,
        data: record.data.clone(),
    }))
}

impl Event<ZkLendEventKind> {
    /// Decodes a raw record, or `None` when the name is not a zkLend event.
    pub fn decode_zklend(record: &RawEventRecord) -> Result<Option<Self>, LedgerError> {
        decode(record, ZkLendEventKind::from_name(&record.key_name))
    }
}

impl Event<NostraEventKind> {
    /// Decodes a raw record, or `None` when the name is not a Nostra event.
    pub fn decode_nostra(record: &RawEventRecord) -> Result<Option<Self>, LedgerError> {
        decode(record, NostraEventKind::from_name(&record.key_name))
    }
}

/// Cursor over a felt payload that turns arity and parse failures into
/// malformed-event errors carrying the event's position.
pub struct PayloadReader<'a> {
    block: u64,
    index: u64,
    data: &'a [String],
}

impl<'a> PayloadReader<'a> {
    fn field(&self, i: usize) -> Result<&'a str, LedgerError> {
        self.data.get(i).map(String::as_str).ok_or_else(|| {
            self.error(format!("payload has {} fields, wanted index {i}", self.data.len()))
        })
    }

    fn error(&self, reason: String) -> LedgerError {
        LedgerError::MalformedEvent {
            block: self.block,
            index: self.index,
            reason,
        }
    }

    pub fn felt(&self, i: usize) -> Result<B256, LedgerError> {
        let raw = self.field(i)?;
        parse_felt(raw).ok_or_else(|| self.error(format!("field {i} is not a felt: {raw:?}")))
    }

    pub fn uint(&self, i: usize) -> Result<U256, LedgerError> {
        let raw = self.field(i)?;
        parse_amount(raw).ok_or_else(|| self.error(format!("field {i} is not an amount: {raw:?}")))
    }

    /// Unsigned payload amount as a signed raw delta.
    pub fn int(&self, i: usize) -> Result<I256, LedgerError> {
        let value = self.uint(i)?;
        I256::try_from(value)
            .map_err(|_| self.error(format!("field {i} exceeds signed 256-bit range")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, data: Vec<&str>) -> RawEventRecord {
        RawEventRecord {
            from_address: "0x04c0a5193d58f74fbace4b74dcf65481e734ed1714121bdc571da345540efa05"
                .to_string(),
            key_name: name.to_string(),
            block_number: 42,
            event_index: 3,
            data: data.into_iter().map(String::from).collect(),
            transaction_hash: None,
        }
    }

    #[test]
    fn long_component_names_normalize() {
        assert_eq!(
            NostraEventKind::from_name(
                "nostra::core::tokenization::lib::nostra_token::NostraTokenComponent::Burn"
            ),
            Some(NostraEventKind::Burn)
        );
        assert_eq!(
            NostraEventKind::from_name("openzeppelin::token::erc20_v070::erc20::ERC20::Transfer"),
            Some(NostraEventKind::Transfer)
        );
        assert_eq!(ZkLendEventKind::from_name("Repayment"), Some(ZkLendEventKind::Repayment));
    }

    #[test]
    fn unrecognized_name_is_skipped_not_fatal() {
        assert!(Event::decode_zklend(&record("FlashLoan", vec![])).unwrap().is_none());
    }

    #[test]
    fn bad_emitter_address_is_malformed() {
        let mut raw = record("Deposit", vec![]);
        raw.from_address = "not-a-felt".to_string();
        let err = Event::decode_zklend(&raw).unwrap_err();
        assert!(matches!(err, LedgerError::MalformedEvent { block: 42, index: 3, .. }));
    }

    #[test]
    fn reader_reports_arity_and_parse_failures() {
        let event = Event::decode_zklend(&record("Deposit", vec!["0x1", "not-a-number"]))
            .unwrap()
            .unwrap();
        let reader = event.reader();
        assert!(reader.felt(0).is_ok());
        assert!(reader.uint(1).is_err());
        assert!(matches!(
            reader.felt(2),
            Err(LedgerError::MalformedEvent { block: 42, .. })
        ));
    }

    #[test]
    fn amounts_parse_hex_and_decimal() {
        assert_eq!(parse_amount("0x10"), Some(U256::from(16)));
        assert_eq!(parse_amount("10"), Some(U256::from(10)));
        assert_eq!(parse_amount("0xzz"), None);
    }
}
