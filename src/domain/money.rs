//! Fixed-point money, grounded in the teacher's `ticketing::types::Money`
//! (an integer-cents newtype) — simpler and exact compared to floats, and
//! matches spec §3's "fixed-point decimal, non-negative" requirement for
//! tier prices and booking totals.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul};

/// An amount of money stored as integer cents. Never negative in this
/// domain (ticket prices and totals are always >= 0).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// Zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Builds from a whole-cents amount.
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Builds from a whole-currency-unit amount (e.g. whole shillings).
    #[must_use]
    pub const fn from_units(units: i64) -> Self {
        Self(units * 100)
    }

    /// The amount in integer cents.
    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Multiplies by a ticket quantity.
    #[must_use]
    pub fn multiply(self, quantity: u32) -> Self {
        Self(self.0 * i64::from(quantity))
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Mul<u32> for Money {
    type Output = Self;
    fn mul(self, rhs: u32) -> Self {
        self.multiply(rhs)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, (self.0 % 100).abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplies_by_quantity() {
        let unit = Money::from_units(500);
        assert_eq!(unit.multiply(2), Money::from_units(1000));
    }

    #[test]
    fn displays_with_two_decimals() {
        assert_eq!(Money::from_cents(100050).to_string(), "1000.50");
    }

    proptest::proptest! {
        /// `from_cents`/`cents` must round-trip exactly — no floats
        /// involved, so there's no rounding to lose.
        #[test]
        fn cents_round_trips(cents in 0i64..1_000_000_000) {
            proptest::prop_assert_eq!(Money::from_cents(cents).cents(), cents);
        }

        /// Multiplying by a quantity distributes over addition, the same
        /// way `total = unit_price * quantity` should behave for a split
        /// across two partial quantities.
        #[test]
        fn multiply_distributes_over_quantity(unit_cents in 0i64..1_000_000, a in 0u32..50, b in 0u32..50) {
            let unit = Money::from_cents(unit_cents);
            let combined = unit.multiply(a + b);
            let split = unit.multiply(a) + unit.multiply(b);
            proptest::prop_assert_eq!(combined, split);
        }
    }
}
