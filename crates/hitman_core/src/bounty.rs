//! # Bounty Fixed-Point Arithmetic
//!
//! **NO FLOATING POINT IN BOUNTIES**
//!
//! A bounty is persisted as `decimal(18,2)`: 16 integer digits and 2
//! fractional digits. Internally we store hundredths in a `u64`, which keeps
//! every sum exact and independent of summation order.
//!
//! Parsing never rounds. Input with more precision than the column can hold
//! is rejected rather than silently truncated.

use std::fmt;
use std::str::FromStr;

use crate::error::{HitError, HitResult};

/// Number of fractional digits (the `2` in `decimal(18,2)`).
const DECIMAL_PLACES: u32 = 2;

/// Hundredths per whole unit.
const MULTIPLIER: u64 = 10u64.pow(DECIMAL_PLACES);

/// Largest value the column can hold: 9999999999999999.99
const MAX_RAW: u64 = 10u64.pow(18) - 1;

/// Non-negative monetary amount with two decimal places.
///
/// # Range
///
/// - Minimum: 0.00
/// - Maximum: 9,999,999,999,999,999.99
///
/// # Example
///
/// ```rust
/// use hitman_core::Bounty;
///
/// let a: Bounty = "50".parse().unwrap();
/// let b = Bounty::from_parts(25, 50);
/// assert_eq!(a.checked_add(b).unwrap().to_string(), "75.50");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Bounty(u64);

impl Bounty {
    /// Zero value.
    pub const ZERO: Self = Self(0);

    /// One unit (1.00).
    pub const ONE: Self = Self(MULTIPLIER);

    /// Maximum representable value.
    pub const MAX: Self = Self(MAX_RAW);

    /// Creates a bounty from a whole number of currency units.
    ///
    /// # Errors
    ///
    /// Returns `HitError::ArithmeticOverflow` if the value exceeds the range.
    pub fn from_whole(whole: u64) -> HitResult<Self> {
        whole
            .checked_mul(MULTIPLIER)
            .filter(|raw| *raw <= MAX_RAW)
            .map(Self)
            .ok_or(HitError::ArithmeticOverflow)
    }

    /// Creates a bounty from parts. `cents` is taken modulo 100 and the
    /// result saturates at [`Bounty::MAX`].
    ///
    /// Intended for constants and tests; prefer `from_whole` or parsing for
    /// untrusted input.
    #[inline]
    #[must_use]
    pub const fn from_parts(whole: u64, cents: u8) -> Self {
        let raw = match whole.checked_mul(MULTIPLIER) {
            Some(w) => w.saturating_add(cents as u64 % MULTIPLIER),
            None => MAX_RAW,
        };
        if raw > MAX_RAW {
            Self::MAX
        } else {
            Self(raw)
        }
    }

    /// Creates a bounty from raw hundredths.
    ///
    /// # Errors
    ///
    /// Returns `HitError::ArithmeticOverflow` if the value exceeds the range.
    pub fn from_cents(cents: u64) -> HitResult<Self> {
        if cents > MAX_RAW {
            return Err(HitError::ArithmeticOverflow);
        }
        Ok(Self(cents))
    }

    /// Returns the raw value in hundredths.
    #[inline]
    #[must_use]
    pub const fn cents(self) -> u64 {
        self.0
    }

    /// Returns the whole number part.
    #[inline]
    #[must_use]
    pub const fn whole(self) -> u64 {
        self.0 / MULTIPLIER
    }

    /// Returns the fractional part (0-99).
    #[inline]
    #[must_use]
    pub const fn fraction(self) -> u8 {
        (self.0 % MULTIPLIER) as u8
    }

    /// Checked addition. Returns `None` if the sum leaves the column range.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(v) if v <= MAX_RAW => Some(Self(v)),
            _ => None,
        }
    }

    /// Safe addition with error on overflow.
    ///
    /// # Errors
    ///
    /// Returns `HitError::ArithmeticOverflow` if the sum leaves the range.
    #[inline]
    pub fn safe_add(self, rhs: Self) -> HitResult<Self> {
        self.checked_add(rhs).ok_or(HitError::ArithmeticOverflow)
    }

    /// Returns true if this value is zero.
    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl FromStr for Bounty {
    type Err = HitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let invalid = |reason: &str| HitError::InvalidArgument(format!("bounty {text:?}: {reason}"));

        if text.is_empty() {
            return Err(invalid("empty"));
        }
        if text.starts_with('-') {
            return Err(invalid("must not be negative"));
        }
        let text_unsigned = text.strip_prefix('+').unwrap_or(text);

        let (whole_str, frac_str) = match text_unsigned.split_once('.') {
            Some((w, f)) => (w, f),
            None => (text_unsigned, ""),
        };

        if whole_str.is_empty() && frac_str.is_empty() {
            return Err(invalid("no digits"));
        }
        if !whole_str.bytes().all(|b| b.is_ascii_digit())
            || !frac_str.bytes().all(|b| b.is_ascii_digit())
        {
            // Covers NaN, inf, exponents and stray characters.
            return Err(invalid("not a finite decimal number"));
        }
        if frac_str.len() > DECIMAL_PLACES as usize {
            return Err(invalid("more than 2 decimal places"));
        }

        let whole: u64 = if whole_str.is_empty() {
            0
        } else {
            whole_str.parse().map_err(|_| invalid("out of range"))?
        };
        let mut cents: u64 = if frac_str.is_empty() {
            0
        } else {
            frac_str.parse().map_err(|_| invalid("out of range"))?
        };
        if frac_str.len() == 1 {
            cents *= 10;
        }

        whole
            .checked_mul(MULTIPLIER)
            .and_then(|w| w.checked_add(cents))
            .filter(|raw| *raw <= MAX_RAW)
            .map(Self)
            .ok_or_else(|| invalid("out of range"))
    }
}

impl fmt::Debug for Bounty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bounty({}.{:02})", self.whole(), self.fraction())
    }
}

impl fmt::Display for Bounty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.whole(), self.fraction())
    }
}
