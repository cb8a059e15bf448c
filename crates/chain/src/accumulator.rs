//! Interest accumulator tables.
//!
//! Lending protocols store balances as "raw" amounts that accrue interest
//! implicitly: the face amount is `raw * index / scale`, where the index only
//! ever grows. zkLend syncs both indices per token at scale 1e27; Nostra
//! updates each side independently at scale 1e18.

use std::collections::HashMap;

use alloy::primitives::{I256, U256};

use crate::error::LedgerError;

/// Which interest index a conversion runs through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Lending,
    Debt,
}

#[derive(Debug, Clone, Copy)]
struct Accumulators {
    lending: U256,
    debt: U256,
}

/// Per-token interest indices for one protocol, all at a common scale.
///
/// Unseen tokens report the unity index (`scale`), so conversions before the
/// first sync are identity maps. Indices are monotone: a sync that would move
/// an index backward is rejected and leaves the stored value untouched.
#[derive(Debug, Clone)]
pub struct AccumulatorTable {
    scale: U256,
    entries: HashMap<&'static str, Accumulators>,
}

impl AccumulatorTable {
    /// Creates a table with scale `10^scale_pow10`.
    pub fn new(scale_pow10: u8) -> Self {
        Self {
            scale: U256::from(10u8).pow(U256::from(scale_pow10)),
            entries: HashMap::new(),
        }
    }

    pub fn scale(&self) -> U256 {
        self.scale
    }

    /// Returns the stored index for a token side, defaulting to unity.
    pub fn index(&self, token: &str, side: Side) -> U256 {
        match self.entries.get(token) {
            Some(acc) => match side {
                Side::Lending => acc.lending,
                Side::Debt => acc.debt,
            },
            None => self.scale,
        }
    }

    /// Index as a plain multiplier, for the float boundary of risk math.
    pub fn index_f64(&self, token: &str, side: Side) -> f64 {
        approx_f64(self.index(token, side)) / approx_f64(self.scale)
    }

    /// Stores one side's index for a token, rejecting regressions.
    pub fn set_index(
        &mut self,
        token: &'static str,
        side: Side,
        value: U256,
    ) -> Result<(), LedgerError> {
        let stored = self.index(token, side);
        if value < stored {
            return Err(LedgerError::Regression {
                token,
                stored,
                incoming: value,
            });
        }
        let entry = self.entries.entry(token).or_insert(Accumulators {
            lending: self.scale,
            debt: self.scale,
        });
        match side {
            Side::Lending => entry.lending = value,
            Side::Debt => entry.debt = value,
        }
        Ok(())
    }

    /// Syncs both sides at once (zkLend `AccumulatorsSync`).
    ///
    /// Either both sides apply or neither does.
    pub fn apply_sync(
        &mut self,
        token: &'static str,
        lending: U256,
        debt: U256,
    ) -> Result<(), LedgerError> {
        let stored_lending = self.index(token, Side::Lending);
        let stored_debt = self.index(token, Side::Debt);
        if lending < stored_lending {
            return Err(LedgerError::Regression {
                token,
                stored: stored_lending,
                incoming: lending,
            });
        }
        if debt < stored_debt {
            return Err(LedgerError::Regression {
                token,
                stored: stored_debt,
                incoming: debt,
            });
        }
        self.entries.insert(token, Accumulators { lending, debt });
        Ok(())
    }

    /// Converts a raw amount into its interest-accrued face amount.
    pub fn raw_to_face(
        &self,
        token: &'static str,
        raw: I256,
        side: Side,
    ) -> Result<I256, LedgerError> {
        let index = signed(self.index(token, side), token)?;
        let scale = signed(self.scale, token)?;
        raw.checked_mul(index)
            .map(|scaled| scaled / scale)
            .ok_or(LedgerError::Precision {
                token,
                detail: "raw * index overflows 256 bits",
            })
    }

    /// Converts a face amount back into the raw amount that produces it.
    pub fn face_to_raw(
        &self,
        token: &'static str,
        face: I256,
        side: Side,
    ) -> Result<I256, LedgerError> {
        let index = signed(self.index(token, side), token)?;
        let scale = signed(self.scale, token)?;
        face.checked_mul(scale)
            .map(|scaled| scaled / index)
            .ok_or(LedgerError::Precision {
                token,
                detail: "face * scale overflows 256 bits",
            })
    }
}

/// Lossy U256 -> f64, for the float boundary only.
pub fn approx_f64(value: U256) -> f64 {
    if value <= U256::from(u128::MAX) {
        value.to::<u128>() as f64
    } else {
        let limbs = value.as_limbs();
        let word = u64::MAX as f64 + 1.0;
        ((limbs[3] as f64 * word + limbs[2] as f64) * word + limbs[1] as f64) * word
            + limbs[0] as f64
    }
}

/// Lossy I256 -> f64, for the float boundary only.
pub fn approx_f64_signed(value: I256) -> f64 {
    let (sign, abs) = value.into_sign_and_abs();
    let magnitude = approx_f64(abs);
    if sign.is_negative() {
        -magnitude
    } else {
        magnitude
    }
}

fn signed(value: U256, token: &'static str) -> Result<I256, LedgerError> {
    I256::try_from(value).map_err(|_| LedgerError::Precision {
        token,
        detail: "index exceeds signed 256-bit range",
    })
}
