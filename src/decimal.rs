use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Sub, SubAssign};
use std::str::FromStr;

/// decimal places kept on every monetary figure
pub const MONEY_SCALE: u32 = 2;

fn round_money(d: Decimal) -> Decimal {
    d.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Money type with 2 decimal places precision.
///
/// Every constructor and operator rounds its result, so a chain of
/// arithmetic steps is rounded after each step rather than once at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(from = "Decimal")]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);
    pub const ONE: Money = Money(Decimal::ONE);
    /// rounding tolerance used when comparing sums of rounded figures
    pub const CENT: Money = Money(Decimal::from_parts(1, 0, 0, false, 2));

    /// create from decimal
    pub fn from_decimal(d: Decimal) -> Self {
        Money(round_money(d))
    }

    /// create from string with exact parsing
    pub fn from_str_exact(s: &str) -> Result<Self, rust_decimal::Error> {
        Ok(Money(round_money(Decimal::from_str(s)?)))
    }

    /// create from integer amount in major units
    pub fn from_major(amount: i64) -> Self {
        Money(Decimal::from(amount))
    }

    /// create from minor amount (cents)
    pub fn from_minor(amount: i64) -> Self {
        Money(Decimal::new(amount, MONEY_SCALE))
    }

    /// get underlying decimal
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// strictly greater than zero
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// strictly less than zero
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    pub fn min(self, other: Self) -> Self {
        Money(self.0.min(other.0))
    }

    pub fn max(self, other: Self) -> Self {
        Money(self.0.max(other.0))
    }

    /// clamp to a floor of zero
    pub fn floor_zero(self) -> Self {
        self.max(Money::ZERO)
    }

    /// true when both values are within one cent of each other
    pub fn approx_eq(&self, other: Money) -> bool {
        (*self - other).abs() <= Money::CENT
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::from_str_exact(s)
    }
}

impl From<Decimal> for Money {
    fn from(d: Decimal) -> Self {
        Money::from_decimal(d)
    }
}

impl From<i32> for Money {
    fn from(i: i32) -> Self {
        Money::from_major(i as i64)
    }
}

impl From<u32> for Money {
    fn from(i: u32) -> Self {
        Money::from_major(i as i64)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, other: Money) -> Money {
        Money(round_money(self.0 + other.0))
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, other: Money) {
        self.0 = round_money(self.0 + other.0);
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, other: Money) -> Money {
        Money(round_money(self.0 - other.0))
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, other: Money) {
        self.0 = round_money(self.0 - other.0);
    }
}

impl Mul<Decimal> for Money {
    type Output = Money;

    fn mul(self, other: Decimal) -> Money {
        Money(round_money(self.0 * other))
    }
}

impl Div<Decimal> for Money {
    type Output = Money;

    fn div(self, other: Decimal) -> Money {
        Money(round_money(self.0 / other))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, x| acc + x)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, x| acc + *x)
    }
}

/// rate type for interest rates, penalty rates, and ratios
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Rate(Decimal);

impl Rate {
    pub const ZERO: Rate = Rate(Decimal::ZERO);
    pub const ONE: Rate = Rate(Decimal::ONE);

    /// create from decimal (e.g., 0.05 for 5%)
    pub fn from_decimal(d: Decimal) -> Self {
        Rate(d)
    }

    /// create from percentage (e.g., 5 for 5%)
    pub fn from_percentage(p: u32) -> Self {
        Rate(Decimal::from(p) / Decimal::from(100))
    }

    /// create from basis points (e.g., 500 for 5%)
    pub fn from_bps(bps: u32) -> Self {
        Rate(Decimal::from(bps) / Decimal::from(10000))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn as_percentage(&self) -> Decimal {
        self.0 * Decimal::from(100)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.as_percentage())
    }
}

impl From<Decimal> for Rate {
    fn from(d: Decimal) -> Self {
        Rate::from_decimal(d)
    }
}

/// whole days from `from` to `to`, negative when `to` is earlier
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}
