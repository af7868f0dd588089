use crate::error::GroupBuyError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};

/// A monetary value in the platform's single currency.
///
/// Wraps `rust_decimal::Decimal` so prices, totals and savings cannot be mixed up with
/// counts or percentages. May be negative (e.g. "savings" against a malformed schedule).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(pub Decimal);

/// A strictly positive monetary amount. Tier prices and authorizations use this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, GroupBuyError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(GroupBuyError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = GroupBuyError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Money {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl Money {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Rounds half-away-from-zero to kopecks/cents.
    pub fn round_cents(self) -> Self {
        Self(
            self.0
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Whole units with a space as thousands separator, e.g. `19 000`.
    pub fn display_whole(&self) -> String {
        let whole = self.0.trunc().abs().to_string();
        let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
        for (i, ch) in whole.chars().enumerate() {
            if i > 0 && (whole.len() - i) % 3 == 0 {
                grouped.push(' ');
            }
            grouped.push(ch);
        }
        if self.0.is_sign_negative() && !self.0.trunc().is_zero() {
            format!("-{grouped}")
        } else {
            grouped
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Money {
    type Output = Self;
    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money_arithmetic() {
        let a = Money::new(dec!(22000));
        let b = Money::new(dec!(490));
        assert_eq!(a + b, Money::new(dec!(22490)));
        assert_eq!(a - b, Money::new(dec!(21510)));
        assert_eq!(a * dec!(0.02), Money::new(dec!(440)));
    }

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(dec!(1.0)).is_ok());
        assert!(matches!(
            Amount::new(dec!(0.0)),
            Err(GroupBuyError::ValidationError(_))
        ));
        assert!(matches!(
            Amount::new(dec!(-1.0)),
            Err(GroupBuyError::ValidationError(_))
        ));
    }

    #[test]
    fn test_display_whole_groups_thousands() {
        assert_eq!(Money::new(dec!(19000)).display_whole(), "19 000");
        assert_eq!(Money::new(dec!(1234567.89)).display_whole(), "1 234 567");
        assert_eq!(Money::new(dec!(490)).display_whole(), "490");
        assert_eq!(Money::new(dec!(-2500)).display_whole(), "-2 500");
    }

    #[test]
    fn test_round_cents() {
        assert_eq!(Money::new(dec!(10.005)).round_cents(), Money::new(dec!(10.01)));
        assert_eq!(Money::new(dec!(10.004)).round_cents(), Money::new(dec!(10.00)));
    }
}
