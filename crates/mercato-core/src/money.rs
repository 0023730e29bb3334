//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely, plus the
//! `Discount` type used by promotion rules.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  In floating point:                                                     │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Minor Units                                      │
//! │    Every amount is a whole number of the currency's smallest unit.      │
//! │    10% of 30000 = 3000, exactly, every time.                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rounding
//! Percentage discounts round to the minor unit with standard half-up
//! rounding: `(amount * bps + 5000) / 10000`. Fixed-amount discounts are
//! clamped so they never drive a line below zero.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};

// =============================================================================
// Money Type
// =============================================================================

/// Represents a monetary value in the smallest currency unit.
///
/// ## Design Decisions
/// - **i64 (signed)**: Allows negative values for refunds and credits
/// - **Single field tuple struct**: Zero-cost abstraction over i64
/// - **Derives**: Full serde support for JSON serialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from minor units (the smallest currency unit).
    #[inline]
    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn minor(&self) -> i64 {
        self.0
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the smaller of two amounts.
    #[inline]
    pub fn min(self, other: Money) -> Money {
        Money(self.0.min(other.0))
    }

    /// Calculates a percentage of this amount, in basis points, rounded
    /// half-up to the minor unit.
    ///
    /// ## Example
    /// ```rust
    /// use mercato_core::money::Money;
    ///
    /// let subtotal = Money::from_minor(30000);
    /// let ten_percent = subtotal.percent_of(1000); // 1000 bps = 10%
    /// assert_eq!(ten_percent.minor(), 3000);
    /// ```
    pub fn percent_of(&self, bps: u32) -> Money {
        // i128 to prevent overflow on large amounts
        let part = (self.0 as i128 * bps as i128 + 5000) / 10000;
        Money(part as i64)
    }
}

// =============================================================================
// Discount
// =============================================================================

/// A discount as configured on a promotion rule.
///
/// ## Variants
/// - `Percent`: basis points (1000 = 10%), rounded half-up to the minor unit
/// - `Fixed`: an absolute amount, clamped so the discounted base never goes
///   below zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discount {
    /// Percentage discount in basis points.
    Percent { bps: u32 },
    /// Fixed amount off, in minor units.
    Fixed { amount_minor: i64 },
}

impl Discount {
    /// Computes the discount amount against a base.
    ///
    /// The result is never negative and never exceeds the base: a fixed
    /// discount larger than the base clamps to the base (a line total is
    /// clamped at zero, it does not go negative).
    pub fn amount_off(&self, base: Money) -> Money {
        if !base.is_positive() {
            return Money::zero();
        }
        match *self {
            Discount::Percent { bps } => base.percent_of(bps).min(base),
            Discount::Fixed { amount_minor } => Money::from_minor(amount_minor.max(0)).min(base),
        }
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display implementation shows the raw minor-unit amount.
///
/// Currency formatting is a presentation concern and lives with the callers.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Default money is zero.
impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

/// Addition of two Money values.
impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

/// Addition assignment (+=).
impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

/// Subtraction of two Money values.
impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

/// Subtraction assignment (-=).
impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

/// Multiplication by i64 (for quantity calculations).
impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
