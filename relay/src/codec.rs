//! Fixed-point price codec
//!
//! Prices arrive as `mantissa * 10^exponent`. Decoding keeps the value
//! exact by mapping a negative exponent onto the decimal scale.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{RelayError, Result};

/// Largest scale a `Decimal` can carry
pub const MAX_SCALE: u32 = 28;

/// Decode `mantissa * 10^exponent` into a decimal
///
/// Fails with `PrecisionOverflow` instead of truncating when the value does
/// not fit the decimal representation.
pub fn decode_price(mantissa: impl Into<i128>, exponent: i32) -> Result<Decimal> {
    let mantissa = mantissa.into();
    let overflow = || RelayError::PrecisionOverflow { mantissa, exponent };

    if exponent <= 0 {
        let shift = exponent.unsigned_abs();
        if shift > MAX_SCALE {
            return Err(overflow());
        }
        return Decimal::try_from_i128_with_scale(mantissa, shift).map_err(|_| overflow());
    }

    let scaled = 10i128
        .checked_pow(exponent.unsigned_abs())
        .and_then(|factor| mantissa.checked_mul(factor))
        .ok_or_else(overflow)?;

    Decimal::try_from_i128_with_scale(scaled, 0).map_err(|_| overflow())
}

/// Widest exponent [`format_price`] expands into plain digits
pub const MAX_FORMAT_EXPONENT: u32 = 64;

/// Render `mantissa * 10^exponent` as a decimal string for logs
///
/// Unlike [`decode_price`] this never fails; it splits the digit string at
/// the exponent, padding with zeros so there is always an integer digit.
/// Exponents wider than [`MAX_FORMAT_EXPONENT`] are rendered as `<digits>e<exponent>`.
pub fn format_price(mantissa: i64, exponent: i32) -> String {
    let sign = if mantissa < 0 { "-" } else { "" };
    let digits = mantissa.unsigned_abs().to_string();

    if exponent.unsigned_abs() > MAX_FORMAT_EXPONENT {
        return format!("{sign}{digits}e{exponent}");
    }

    if exponent >= 0 {
        let zeros = "0".repeat(exponent as usize);
        return if mantissa == 0 {
            "0".to_string()
        } else {
            format!("{sign}{digits}{zeros}")
        };
    }

    let shift = exponent.unsigned_abs() as usize;
    let padded = if digits.len() <= shift {
        format!("{digits:0>width$}", width = shift + 1)
    } else {
        digits
    };
    let (int_part, frac_part) = padded.split_at(padded.len() - shift);
    format!("{sign}{int_part}.{frac_part}")
}

/// Convert a token amount into integer base units, rounding half away from zero
pub fn tokens_to_base_units(amount: Decimal, decimals: u32) -> Result<i128> {
    let overflow = || RelayError::PrecisionOverflow {
        mantissa: amount.mantissa(),
        exponent: -(decimals.min(i32::MAX as u32) as i32),
    };

    if decimals > MAX_SCALE {
        return Err(overflow());
    }

    let factor = Decimal::try_from_i128_with_scale(10i128.pow(decimals), 0).map_err(|_| overflow())?;

    amount
        .checked_mul(factor)
        .map(|v| v.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|v| v.to_i128())
        .ok_or_else(overflow)
}

/// Convert integer base units back into a token amount
pub fn base_units_to_tokens(units: i128, decimals: u32) -> Result<Decimal> {
    let exponent = -(decimals.min(i32::MAX as u32) as i32);
    Ok(decode_price(units, exponent)?.normalize())
}
