//! Money Module
//!
//! Fixed-point monetary values for bookings, escrow and payouts.
//!
//! ## Internal Representation
//! - All amounts are stored as `i64` minor units (kobo, cents)
//! - The scale factor is `10^MINOR_UNIT_DECIMALS`
//! - Binary floats never touch an amount; fee math goes through `Decimal`
//!
//! ## Escrow Split
//! `platform_fee + escrow_amount == total_amount` holds exactly for every
//! [`EscrowSplit`], because the escrow side is derived by subtraction.
//!
//! ## Usage
//! ```rust
//! use escrow_engine::money::{Amount, EscrowSplit, parse_amount, format_amount};
//!
//! let total = parse_amount("500").unwrap();
//! assert_eq!(total.minor(), 50_000);
//!
//! let split = EscrowSplit::new(total, parse_amount("50").unwrap()).unwrap();
//! assert_eq!(format_amount(split.escrow), "450.00");
//! ```

use std::fmt;

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Decimal places of the settlement currency's minor unit
pub const MINOR_UNIT_DECIMALS: u32 = 2;

/// Basis points in 100%
pub const BPS_DENOMINATOR: u32 = 10_000;

// ============================================================================
// Error Types
// ============================================================================

/// Money conversion and arithmetic errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Platform fee {fee} exceeds total {total}")]
    FeeExceedsTotal { fee: i64, total: i64 },

    #[error("Fee rate {0} bps exceeds 100%")]
    InvalidFeeRate(u32),

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

// ============================================================================
// Amount
// ============================================================================

/// Monetary amount in minor units
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    #[inline]
    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Build from whole major units (e.g. 500 NGN = 50_000 kobo)
    pub fn from_major(major: i64) -> Result<Self, MoneyError> {
        major
            .checked_mul(10i64.pow(MINOR_UNIT_DECIMALS))
            .map(Self)
            .ok_or(MoneyError::Overflow)
    }

    #[inline]
    pub const fn minor(&self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    /// Value in major units as an exact decimal
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, MINOR_UNIT_DECIMALS)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_amount(*self))
    }
}

// ============================================================================
// Parse / Format
// ============================================================================

/// Convert a client major-unit string ("500", "12.50") to an [`Amount`]
///
/// Rejects signs, more than [`MINOR_UNIT_DECIMALS`] fractional digits and
/// ambiguous forms like ".5" or "5." (no silent truncation).
pub fn parse_amount(amount_str: &str) -> Result<Amount, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    if amount_str.starts_with('-') || amount_str.starts_with('+') {
        return Err(MoneyError::InvalidAmount);
    }

    let parts: Vec<&str> = amount_str.split('.').collect();
    let (whole, frac) = match parts.len() {
        1 => (parts[0], ""),
        2 => {
            if parts[0].is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing leading zero (e.g., use 0.5 instead of .5)".into(),
                ));
            }
            if parts[1].is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
                ));
            }
            (parts[0], parts[1])
        }
        _ => return Err(MoneyError::InvalidFormat("multiple decimal points".into())),
    };

    if frac.len() > MINOR_UNIT_DECIMALS as usize {
        return Err(MoneyError::PrecisionOverflow {
            provided: frac.len() as u32,
            max: MINOR_UNIT_DECIMALS,
        });
    }

    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(format!(
            "invalid character in amount: {}",
            amount_str
        )));
    }

    let whole_num: i64 = whole.parse().map_err(|_| MoneyError::Overflow)?;
    let frac_str = format!("{:0<width$}", frac, width = MINOR_UNIT_DECIMALS as usize);
    let frac_num: i64 = frac_str
        .parse()
        .map_err(|_| MoneyError::InvalidFormat(format!("invalid fraction: {}", frac)))?;

    whole_num
        .checked_mul(10i64.pow(MINOR_UNIT_DECIMALS))
        .and_then(|w| w.checked_add(frac_num))
        .map(Amount)
        .ok_or(MoneyError::Overflow)
}

/// Format an [`Amount`] as a major-unit string with full minor precision
pub fn format_amount(amount: Amount) -> String {
    format!("{:.prec$}", amount.to_decimal(), prec = MINOR_UNIT_DECIMALS as usize)
}

// ============================================================================
// Fees and Escrow Split
// ============================================================================

/// Platform fee for `total` at `fee_bps` basis points, rounded half away
/// from zero to the minor unit.
pub fn platform_fee(total: Amount, fee_bps: u32) -> Result<Amount, MoneyError> {
    if fee_bps > BPS_DENOMINATOR {
        return Err(MoneyError::InvalidFeeRate(fee_bps));
    }
    if !total.is_positive() {
        return Err(MoneyError::InvalidAmount);
    }

    let fee = Decimal::from(total.minor()) * Decimal::from(fee_bps)
        / Decimal::from(BPS_DENOMINATOR);
    let fee = fee.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);

    fee.to_i64().map(Amount).ok_or(MoneyError::Overflow)
}

/// How a booking total divides between the platform and escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscrowSplit {
    pub total: Amount,
    pub platform_fee: Amount,
    pub escrow: Amount,
}

impl EscrowSplit {
    /// Split `total` into fee and escrow; `escrow = total - fee`.
    pub fn new(total: Amount, platform_fee: Amount) -> Result<Self, MoneyError> {
        if !total.is_positive() {
            return Err(MoneyError::InvalidAmount);
        }
        if platform_fee.minor() < 0 {
            return Err(MoneyError::InvalidAmount);
        }
        if platform_fee > total {
            return Err(MoneyError::FeeExceedsTotal {
                fee: platform_fee.minor(),
                total: total.minor(),
            });
        }

        let escrow = total.checked_sub(platform_fee).ok_or(MoneyError::Overflow)?;
        Ok(Self {
            total,
            platform_fee,
            escrow,
        })
    }

    /// Conservation check used when reloading persisted rows
    pub fn is_balanced(&self) -> bool {
        self.platform_fee.checked_add(self.escrow) == Some(self.total)
    }
}
