//! Precision-safe price and size types.
//!
//! Prices on a binary-outcome market are quoted in cents of a one-dollar
//! payout. Internally they travel as integer pips (1/100 of a cent) so that
//! sub-cent ticks never go through floating point. Sizes use `rust_decimal`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use crate::error::CoreError;

/// Pips per cent.
pub const PIPS_PER_CENT: i64 = 100;

/// Combined payout of the two complementary tokens, in cents.
pub const UNIT_TOTAL_CENTS: i64 = 100;

/// Lowest quotable price in cents.
pub const MIN_QUOTE_CENTS: i64 = 1;

/// Highest quotable price in cents.
pub const MAX_QUOTE_CENTS: i64 = 99;

/// Price in pips (1/100 of a cent, four decimal digits of a unit price).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pips(pub i64);

impl Pips {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn new(pips: i64) -> Self {
        Self(pips)
    }

    #[inline]
    pub fn from_cents(cents: i64) -> Self {
        Self(cents * PIPS_PER_CENT)
    }

    #[inline]
    pub fn inner(&self) -> i64 {
        self.0
    }

    /// Whole cents, rounding half away from zero.
    #[inline]
    pub fn to_cents(&self) -> i64 {
        let whole = self.0 / PIPS_PER_CENT;
        let rem = self.0 % PIPS_PER_CENT;
        if rem.abs() * 2 >= PIPS_PER_CENT {
            whole + rem.signum()
        } else {
            whole
        }
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// True when the price lies inside the quotable 1..=99 cent band.
    #[inline]
    pub fn is_quotable(&self) -> bool {
        self.0 >= MIN_QUOTE_CENTS * PIPS_PER_CENT && self.0 <= MAX_QUOTE_CENTS * PIPS_PER_CENT
    }

    /// Unit price as a decimal fraction of one dollar (4000 pips = 0.40).
    #[inline]
    pub fn as_unit_price(&self) -> Decimal {
        Decimal::new(self.0, 4)
    }
}

impl fmt::Display for Pips {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}c", Decimal::new(self.0, 2))
    }
}

impl FromStr for Pips {
    type Err = CoreError;

    /// Parses a price given in cents (e.g. `"40"` or `"40.5"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cents: Decimal = s
            .trim()
            .parse()
            .map_err(|e| CoreError::InvalidPrice(format!("{s}: {e}")))?;
        let pips = (cents * Decimal::from(PIPS_PER_CENT)).round();
        i64::try_from(pips)
            .map(Self)
            .map_err(|e| CoreError::InvalidPrice(format!("{s}: {e}")))
    }
}

impl Add for Pips {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Pips {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

/// Size/quantity with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Size(pub Decimal);

impl Size {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Subtraction floored at zero.
    #[inline]
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self((self.0 - rhs.0).max(Decimal::ZERO))
    }

    /// Dollar notional of this size at the given price.
    #[inline]
    pub fn notional(&self, price: Pips) -> Decimal {
        self.0 * price.as_unit_price()
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Size {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse()
            .map(Self)
            .map_err(|e| CoreError::InvalidSize(format!("{s}: {e}")))
    }
}

impl From<Decimal> for Size {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Size {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Size {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_to_cents_rounds_half_away_from_zero() {
        assert_eq!(Pips(4000).to_cents(), 40);
        assert_eq!(Pips(4049).to_cents(), 40);
        assert_eq!(Pips(4050).to_cents(), 41);
        assert_eq!(Pips(-150).to_cents(), -2);
        assert_eq!(Pips(-149).to_cents(), -1);
    }

    #[test]
    fn test_quotable_band() {
        assert!(Pips::from_cents(1).is_quotable());
        assert!(Pips::from_cents(99).is_quotable());
        assert!(!Pips::from_cents(0).is_quotable());
        assert!(!Pips::from_cents(100).is_quotable());
    }

    #[test]
    fn test_parse_cents() {
        assert_eq!("40".parse::<Pips>().unwrap(), Pips(4000));
        assert_eq!("40.25".parse::<Pips>().unwrap(), Pips(4025));
        assert!("abc".parse::<Pips>().is_err());
    }

    #[test]
    fn test_display_in_cents() {
        assert_eq!(Pips(4025).to_string(), "40.25c");
    }

    #[test]
    fn test_notional() {
        let size = Size::new(dec!(10));
        assert_eq!(size.notional(Pips::from_cents(40)), dec!(4.0000));
    }

    #[test]
    fn test_saturating_sub_floors_at_zero() {
        let a = Size::new(dec!(3));
        let b = Size::new(dec!(5));
        assert_eq!(a.saturating_sub(b), Size::ZERO);
        assert_eq!(b.saturating_sub(a), Size::new(dec!(2)));
    }
}
