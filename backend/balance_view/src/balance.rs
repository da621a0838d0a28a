//! Fixed-point monetary arithmetic on wallet balances.
//!
//! All balance math is integer-only. Rates enter the system as decimal text
//! and are held as [`FixedRate`] with eight fractional digits, so a given
//! balance and quote always convert to the same number of base units.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::InvariantViolation;

/// Base units in one coin.
pub const COIN: u64 = 100_000_000;

/// Fractional precision of [`FixedRate`]; one unit of rate is `1 / RATE_SCALE`.
pub const RATE_SCALE: u64 = COIN;

/// From this balance on the wallet counts as holding "some" money.
pub const SOME_BALANCE_THRESHOLD: Balance = Balance(1_000 * COIN);

/// Balances strictly above this get a warning on display.
pub const TOO_MUCH_BALANCE_THRESHOLD: Balance = Balance(2_500_000 * COIN);

const RATE_DIGITS: i32 = 8;

/// A non-negative amount of base units.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Balance(u64);

impl Balance {
    pub const ZERO: Balance = Balance(0);

    pub const fn from_base_units(units: u64) -> Self {
        Balance(units)
    }

    /// Whole coins, saturating at the largest representable balance.
    pub const fn coins(coins: u64) -> Self {
        Balance(coins.saturating_mul(COIN))
    }

    /// Accept a signed amount from an integration boundary.
    pub fn from_signed(units: i64) -> Result<Self, InvariantViolation> {
        u64::try_from(units)
            .map(Balance)
            .map_err(|_| InvariantViolation(format!("negative balance: {units}")))
    }

    pub const fn base_units(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08}", self.0 / COIN, self.0 % COIN)
    }
}

/// Quote-currency units per wallet coin, scaled by [`RATE_SCALE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixedRate(u64);

impl FixedRate {
    pub const fn from_scaled(scaled: u64) -> Self {
        FixedRate(scaled)
    }

    pub const fn scaled(self) -> u64 {
        self.0
    }

    /// Parse a non-negative decimal such as `0.00315893`, `12`, or `3.2e-5`.
    ///
    /// Digits beyond the eighth fractional place are rounded half-up.
    /// Returns `None` for negative, malformed or out-of-range input.
    pub fn parse_decimal(text: &str) -> Option<Self> {
        let text = text.trim();
        let text = text.strip_prefix('+').unwrap_or(text);

        let (number, exponent) = match text.find(['e', 'E']) {
            Some(pos) => (&text[..pos], text[pos + 1..].parse::<i32>().ok()?),
            None => (text, 0),
        };
        let (int_part, frac_part) = match number.split_once('.') {
            Some((i, f)) => (i, f),
            None => (number, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }

        // Only the rounding digit past the eighth fractional place can still matter.
        let significant = i64::from(RATE_DIGITS) + 1 + i64::from(exponent);
        let keep = usize::try_from(significant.max(0))
            .unwrap_or(usize::MAX)
            .min(frac_part.len());
        let frac_part = &frac_part[..keep];

        let digits = format!("{int_part}{frac_part}");
        let digits = digits.trim_start_matches('0');
        let mantissa: u128 = if digits.is_empty() { 0 } else { digits.parse().ok()? };

        let frac_len = i32::try_from(frac_part.len()).ok()?;
        let shift = exponent.checked_sub(frac_len)?.checked_add(RATE_DIGITS)?;

        let scaled = if shift >= 0 {
            let factor = 10u128.checked_pow(u32::try_from(shift).ok()?)?;
            mantissa.checked_mul(factor)?
        } else {
            match 10u128.checked_pow(shift.unsigned_abs()) {
                Some(divisor) => div_round_half_up(mantissa, divisor),
                // Divisor beyond u128 exceeds any parsable mantissa.
                None => 0,
            }
        };

        u64::try_from(scaled).ok().map(FixedRate)
    }
}

impl fmt::Display for FixedRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08}", self.0 / RATE_SCALE, self.0 % RATE_SCALE)
    }
}

/// Where a balance sits relative to the fixed display thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub above_some: bool,
    pub above_too_much: bool,
}

pub fn classify_threshold(balance: Balance) -> Thresholds {
    Thresholds {
        above_some: balance >= SOME_BALANCE_THRESHOLD,
        above_too_much: balance > TOO_MUCH_BALANCE_THRESHOLD,
    }
}

/// Convert `balance` into base units of the rate's quote currency.
pub fn convert(balance: Balance, rate: FixedRate) -> Balance {
    convert_at_scale(balance, rate, RATE_SCALE)
}

/// Convert with the rate rounded to `scale` steps per unit before multiplying.
///
/// `scaled_rate = round(rate * scale)`, `converted = balance * scaled_rate / scale`.
/// A zero scale yields zero. Results past `u64::MAX` saturate.
pub fn convert_at_scale(balance: Balance, rate: FixedRate, scale: u64) -> Balance {
    if scale == 0 {
        return Balance::ZERO;
    }
    let scale = u128::from(scale);
    let scaled_rate = div_round_half_up(u128::from(rate.0) * scale, u128::from(RATE_SCALE));
    let converted = u128::from(balance.0)
        .checked_mul(scaled_rate)
        .map_or(u128::MAX, |product| product / scale);
    Balance(u64::try_from(converted).unwrap_or(u64::MAX))
}

fn div_round_half_up(numerator: u128, divisor: u128) -> u128 {
    let quotient = numerator / divisor;
    if numerator % divisor >= divisor - divisor / 2 {
        quotient + 1
    } else {
        quotient
    }
}
