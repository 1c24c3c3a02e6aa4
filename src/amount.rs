use std::fmt;
use std::ops::Add;
use std::str::FromStr;

use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::LedgerError;

/// A monetary quantity in an asset's smallest unit.
///
/// Arbitrary precision and non-negative by construction; it is never a
/// floating-point value and crosses every boundary as a base-10 string.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(BigUint);

impl Amount {
    pub fn zero() -> Self {
        Self(BigUint::default())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == BigUint::default()
    }

    /// Parse a base-10 digit string. Signs, whitespace, decimal points and
    /// exponents are all rejected.
    pub fn parse(s: &str) -> Result<Self, LedgerError> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(LedgerError::InvalidAmount);
        }
        BigUint::from_str(s)
            .map(Self)
            .map_err(|_| LedgerError::InvalidAmount)
    }

    /// None when the subtraction would go negative.
    pub fn checked_sub(&self, rhs: &Amount) -> Option<Amount> {
        if self.0 >= rhs.0 {
            Some(Self(&self.0 - &rhs.0))
        } else {
            None
        }
    }
}

impl From<u64> for Amount {
    fn from(v: u64) -> Self {
        Self(BigUint::from(v))
    }
}

impl Add<&Amount> for &Amount {
    type Output = Amount;

    fn add(self, rhs: &Amount) -> Amount {
        Amount(&self.0 + &rhs.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Amount {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_only_plain_digit_strings() {
        assert_eq!(Amount::parse("0").unwrap(), Amount::zero());
        assert_eq!(Amount::parse("1000").unwrap(), Amount::from(1000));
        assert!(Amount::parse("").is_err());
        assert!(Amount::parse("-5").is_err());
        assert!(Amount::parse("+5").is_err());
        assert!(Amount::parse("1.5").is_err());
        assert!(Amount::parse("1e9").is_err());
        assert!(Amount::parse(" 1").is_err());
    }

    #[test]
    fn survives_beyond_u64() {
        let big = Amount::parse("340282366920938463463374607431768211456").unwrap();
        assert_eq!(
            big.to_string(),
            "340282366920938463463374607431768211456"
        );
        let sum = &big + &Amount::from(1);
        assert_eq!(sum.to_string(), "340282366920938463463374607431768211457");
    }

    #[test]
    fn checked_sub_refuses_to_go_negative() {
        let a = Amount::from(10);
        let b = Amount::from(30);
        assert_eq!(a.checked_sub(&b), None);
        assert_eq!(b.checked_sub(&a), Some(Amount::from(20)));
    }

    #[test]
    fn serde_round_trips_as_string() {
        let a = Amount::from(12345);
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, "\"12345\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }
}
