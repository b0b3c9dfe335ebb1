//! Monetary amounts in the smallest unit.

use crate::encode::{Decodable, Encodable, Error};
use std::fmt;
use std::io::{self, Read, Write};

/// One whole coin in base units.
pub const COIN: i64 = 100_000_000;

/// No amount larger than this is valid.
pub const MAX_MONEY: i64 = i64::MAX;

/// Hard cap on the quantity of any single token.
pub const MAX_MONEY_TOKENS: i64 = 25_000_000_000 * COIN;

/// A signed amount of base units. Arithmetic is checked; overflow is an
/// error, never a wrap.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);
    pub const COIN: Amount = Amount(COIN);
    pub const MAX_MONEY: Amount = Amount(MAX_MONEY);

    pub const fn from_sat(sat: i64) -> Self {
        Amount(sat)
    }

    pub const fn to_sat(self) -> i64 {
        self.0
    }

    /// True iff the amount lies in `[0, MAX_MONEY]`.
    pub const fn is_money_range(self) -> bool {
        self.0 >= 0 && self.0 <= MAX_MONEY
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn checked_mul(self, n: i64) -> Option<Amount> {
        self.0.checked_mul(n).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:08}", abs / COIN as u64, abs % COIN as u64)
    }
}

impl Encodable for Amount {
    fn encode_to<W: Write>(&self, w: &mut W) -> io::Result<usize> {
        self.0.encode_to(w)
    }
}

impl Decodable for Amount {
    fn decode_from<R: Read>(r: &mut R) -> Result<Self, Error> {
        Ok(Amount(i64::decode_from(r)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_range() {
        assert!(Amount::ZERO.is_money_range());
        assert!(Amount::from_sat(MAX_MONEY).is_money_range());
        assert!(!Amount::from_sat(-1).is_money_range());
    }

    #[test]
    fn checked_arithmetic_refuses_overflow() {
        assert_eq!(Amount::MAX_MONEY.checked_add(Amount::COIN), None);
        assert_eq!(Amount::from_sat(i64::MIN).checked_sub(Amount::COIN), None);
        assert_eq!(Amount::MAX_MONEY.checked_mul(2), None);
        assert_eq!(
            Amount::COIN.checked_mul(3),
            Some(Amount::from_sat(3 * COIN))
        );
    }

    #[test]
    fn display_units() {
        assert_eq!(Amount::from_sat(150_000_000).to_string(), "1.50000000");
        assert_eq!(Amount::from_sat(-1).to_string(), "-0.00000001");
    }
}
