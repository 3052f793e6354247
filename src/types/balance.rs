//! Arbitrary-precision balance values
//!
//! Balances are unbounded signed integers. They never pass through a float
//! inside the ledger; float inputs are only accepted at the boundary through
//! [`Balance::from_input`], which reports whether precision may have been lost.

use super::error::{LedgerError, LedgerResult};
use num_bigint::BigInt;
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

/// Largest integer a 64-bit float represents exactly (2^53 - 1)
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// Monetary balance (or delta) with exact, unbounded arithmetic
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Balance(BigInt);

/// Raw amount as it arrives from a caller
#[derive(Debug, Clone)]
pub enum AmountInput<'a> {
    /// Already an arbitrary-precision integer
    Big(BigInt),
    /// Machine integer
    Int(i64),
    /// Floating-point number
    Float(f64),
    /// Decimal string
    Text(&'a str),
}

/// Result of a boundary conversion
#[derive(Debug, Clone, PartialEq)]
pub struct Converted {
    /// The converted value
    pub value: Balance,
    /// Set when the input may not have represented the intended integer exactly
    pub precision_loss: bool,
}

impl Converted {
    fn exact(value: Balance) -> Self {
        Self {
            value,
            precision_loss: false,
        }
    }
}

impl Balance {
    /// Zero balance
    pub fn zero() -> Self {
        Balance(BigInt::zero())
    }

    /// Convert a boundary input into a balance
    ///
    /// # Errors
    ///
    /// Returns `NonNumericInput` for strings that are not integers and for
    /// NaN or infinite floats.
    pub fn from_input(input: AmountInput<'_>) -> LedgerResult<Converted> {
        match input {
            AmountInput::Big(value) => Ok(Converted::exact(Balance(value))),
            AmountInput::Int(value) => Ok(Converted {
                value: Balance::from(value),
                precision_loss: value.unsigned_abs() > MAX_SAFE_INTEGER as u64,
            }),
            AmountInput::Float(value) => Self::from_f64(value),
            AmountInput::Text(text) => text.parse().map(Converted::exact),
        }
    }

    fn from_f64(value: f64) -> LedgerResult<Converted> {
        if !value.is_finite() {
            return Err(LedgerError::non_numeric(value.to_string()));
        }
        let truncated = value.trunc();
        let big = BigInt::from_f64(truncated).ok_or_else(|| LedgerError::non_numeric(value.to_string()))?;
        let precision_loss = truncated != value || truncated.abs() > MAX_SAFE_INTEGER as f64;
        Ok(Converted {
            value: Balance(big),
            precision_loss,
        })
    }

    /// Borrow the underlying integer
    pub fn as_bigint(&self) -> &BigInt {
        &self.0
    }

    /// Narrow to `i64`, if it fits
    pub fn to_i64(&self) -> Option<i64> {
        self.0.to_i64()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    pub fn is_positive(&self) -> bool {
        self.0.is_positive()
    }
}

impl FromStr for Balance {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix('-')
            .or_else(|| trimmed.strip_prefix('+'))
            .unwrap_or(trimmed);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(LedgerError::non_numeric(s));
        }
        BigInt::from_str(trimmed)
            .map(Balance)
            .map_err(|_| LedgerError::non_numeric(s))
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<BigInt> for Balance {
    fn from(value: BigInt) -> Self {
        Balance(value)
    }
}

macro_rules! balance_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Balance {
            fn from(value: $t) -> Self {
                Balance(BigInt::from(value))
            }
        })*
    };
}

balance_from_int!(i32, i64, i128, u32, u64, u128);

impl Add for Balance {
    type Output = Balance;

    fn add(self, rhs: Balance) -> Balance {
        Balance(self.0 + rhs.0)
    }
}

impl<'a> Add<&'a Balance> for &'a Balance {
    type Output = Balance;

    fn add(self, rhs: &'a Balance) -> Balance {
        Balance(&self.0 + &rhs.0)
    }
}

impl Sub for Balance {
    type Output = Balance;

    fn sub(self, rhs: Balance) -> Balance {
        Balance(self.0 - rhs.0)
    }
}

impl<'a> Sub<&'a Balance> for &'a Balance {
    type Output = Balance;

    fn sub(self, rhs: &'a Balance) -> Balance {
        Balance(&self.0 - &rhs.0)
    }
}

impl Neg for Balance {
    type Output = Balance;

    fn neg(self) -> Balance {
        Balance(-self.0)
    }
}

impl AddAssign<&Balance> for Balance {
    fn add_assign(&mut self, rhs: &Balance) {
        self.0 += &rhs.0;
    }
}

impl SubAssign<&Balance> for Balance {
    fn sub_assign(&mut self, rhs: &Balance) {
        self.0 -= &rhs.0;
    }
}

// Balances cross every boundary as decimal strings
impl Serialize for Balance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

struct BalanceVisitor;

impl Visitor<'_> for BalanceVisitor {
    type Value = Balance;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer or a decimal integer string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Balance, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Balance, E> {
        Ok(Balance::from(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Balance, E> {
        Ok(Balance::from(v))
    }
}

impl<'de> Deserialize<'de> for Balance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Balance, D::Error> {
        deserializer.deserialize_any(BalanceVisitor)
    }
}
