//! Shared numeric and time helpers.
//!
//! All price/size/amount math uses `rust_decimal::Decimal` for exact
//! arithmetic; on-wire amounts are integer base units scaled by 10^6.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::error::SdkError;

/// Number of fractional decimal places in USDC base units.
pub const USDC_DECIMALS: u32 = 6;

/// Maximum fractional decimal places on a share quantity.
pub const LOT_SIZE_SCALE: u32 = 2;

/// Fractional decimal places of a value, ignoring trailing zeros.
pub fn decimal_places(d: Decimal) -> u32 {
    d.normalize().scale()
}

/// Converts a decimal amount into integer USDC base units (x 10^6),
/// truncating any fraction beyond six places.
pub fn to_fixed_units(d: Decimal) -> Result<u64, SdkError> {
    let scaled = d
        .trunc_with_scale(USDC_DECIMALS)
        .checked_mul(Decimal::from(1_000_000u64))
        .ok_or_else(|| SdkError::validation("amount overflows fixed-point range"))?
        .trunc();
    scaled
        .to_u64()
        .ok_or_else(|| SdkError::validation("amount does not fit in u64 base units"))
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
