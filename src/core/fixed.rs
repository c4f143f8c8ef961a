//! Fixed-Point Decimal Types
//!
//! The engine never compares floating point values. Multipliers are stored
//! as integer hundredths and money as integer minor units (cents), both
//! matching the two-decimal precision of the ledger.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Multiplier: u32 hundredths     2.90x  =  290               │
//! │  Amount:     u64 minor units    7.50   =  750               │
//! │                                                             │
//! │  payout = floor(stake * multiplier / 100)                   │
//! │         = floor(500 * 150 / 100) = 750  (5.00 @ 1.50x)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Floats only appear at the wire boundary (`From<_> for f64` and
//! `TryFrom<f64>`), where values are rounded to the nearest hundredth.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of fixed-point units per whole number (two decimal places).
pub const DECIMAL_SCALE: u64 = 100;

/// Error converting a wire decimal into a fixed-point value.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("invalid decimal value: {0}")]
pub struct InvalidDecimal(pub f64);

/// Round a non-negative finite float to hundredths.
fn to_hundredths(value: f64, max: u64) -> Option<u64> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let scaled = (value * DECIMAL_SCALE as f64).round();
    if scaled > max as f64 {
        return None;
    }
    Some(scaled as u64)
}

// =============================================================================
// MULTIPLIER
// =============================================================================

/// A payout multiplier in hundredths (`100` = 1.00x).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "f64", try_from = "f64")]
pub struct Multiplier(u32);

impl Multiplier {
    /// 1.00x, the value every flight starts at.
    pub const ONE: Multiplier = Multiplier(100);

    /// Create from raw hundredths.
    pub const fn from_hundredths(hundredths: u32) -> Self {
        Self(hundredths)
    }

    /// Raw hundredths.
    pub const fn hundredths(self) -> u32 {
        self.0
    }

    /// Parse a wire decimal (e.g. `1.5`), rounding to hundredths.
    pub fn from_decimal(value: f64) -> Option<Self> {
        to_hundredths(value, u32::MAX as u64).map(|h| Self(h as u32))
    }

    /// Convert to a float for display and the wire only.
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / DECIMAL_SCALE as f64
    }
}

impl From<Multiplier> for f64 {
    fn from(m: Multiplier) -> f64 {
        m.as_f64()
    }
}

impl TryFrom<f64> for Multiplier {
    type Error = InvalidDecimal;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::from_decimal(value).ok_or(InvalidDecimal(value))
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}x", self.0 / 100, self.0 % 100)
    }
}

// =============================================================================
// AMOUNT
// =============================================================================

/// A currency amount in minor units (`750` = 7.50).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "f64", try_from = "f64")]
pub struct Amount(u64);

impl Amount {
    /// Zero.
    pub const ZERO: Amount = Amount(0);

    /// Create from minor units.
    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    /// Minor units.
    pub const fn minor(self) -> u64 {
        self.0
    }

    /// Parse a wire decimal (e.g. `7.5`), rounding to minor units.
    pub fn from_decimal(value: f64) -> Option<Self> {
        to_hundredths(value, u64::MAX >> 11).map(Self)
    }

    /// Convert to a float for display and the wire only.
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / DECIMAL_SCALE as f64
    }

    /// Whether this is zero.
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Stake multiplied by a multiplier, floored to minor units.
    ///
    /// Saturates instead of overflowing.
    pub fn scaled_by(self, multiplier: Multiplier) -> Amount {
        let wide = self.0 as u128 * multiplier.hundredths() as u128 / DECIMAL_SCALE as u128;
        Amount(u64::try_from(wide).unwrap_or(u64::MAX))
    }

    /// Saturating sum.
    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }

    /// Saturating difference.
    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }
}

impl From<Amount> for f64 {
    fn from(a: Amount) -> f64 {
        a.as_f64()
    }
}

impl TryFrom<f64> for Amount {
    type Error = InvalidDecimal;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::from_decimal(value).ok_or(InvalidDecimal(value))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}
