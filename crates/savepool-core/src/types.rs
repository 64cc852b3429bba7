use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SavingsError;

/// Minimal token units. One whole token is [`UNIT`] units.
pub type Amount = u128;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

pub const TOKEN_DECIMALS: u32 = 18;
pub const UNIT: Amount = 1_000_000_000_000_000_000; // 1 token = 1e18 minimal units

/// Basis points in one whole (100 bps = 1%).
pub const BPS_DENOMINATOR: u32 = 10_000;

pub const SECONDS_PER_DAY: u64 = 86_400;

/// Opaque account identifier shared with the token ledger.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// `0x0…0` style addresses are treated as "no account".
    pub fn is_zero(&self) -> bool {
        let digits = self.0.strip_prefix("0x").unwrap_or(&self.0);
        !digits.is_empty() && digits.bytes().all(|b| b == b'0')
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolId(pub u64);

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GoalId(pub u64);

impl fmt::Display for GoalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "goal#{}", self.0)
    }
}

/// Caller-chosen key that makes a mutating request safe to resubmit.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

pub(crate) fn checked_add(lhs: Amount, rhs: Amount) -> Result<Amount, SavingsError> {
    lhs.checked_add(rhs).ok_or(SavingsError::AmountOverflow)
}

/// Whole tokens to minimal units.
pub fn tokens(whole: u64) -> Amount {
    whole as Amount * UNIT
}

/// Parse a decimal token string ("20", "0.2", "1_000.5") into minimal units.
pub fn parse_units(text: &str) -> Result<Amount, SavingsError> {
    let cleaned: String = text.trim().chars().filter(|c| *c != '_').collect();
    let invalid = || SavingsError::InvalidAmount(text.to_string());
    let (whole, frac) = match cleaned.split_once('.') {
        Some((w, f)) => (w, f),
        None => (cleaned.as_str(), ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }
    if frac.len() > TOKEN_DECIMALS as usize {
        return Err(invalid());
    }
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !digits(whole) || !digits(frac) {
        return Err(invalid());
    }
    let whole_units = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<Amount>()
            .map_err(|_| invalid())?
            .checked_mul(UNIT)
            .ok_or(SavingsError::AmountOverflow)?
    };
    let frac_units = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<width$}", width = TOKEN_DECIMALS as usize);
        padded.parse::<Amount>().map_err(|_| invalid())?
    };
    checked_add(whole_units, frac_units)
}

/// Render minimal units as a decimal token string without trailing zeros.
pub fn format_units(amount: Amount) -> String {
    let whole = amount / UNIT;
    let frac = amount % UNIT;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:0>width$}", width = TOKEN_DECIMALS as usize);
    format!("{whole}.{}", frac.trim_end_matches('0'))
}
