//! Fixed-point money helpers.
//!
//! Prices and quantities carry 8 fractional digits, fees in quote carry 2.
//! All arithmetic goes through [`rust_decimal::Decimal`]; binary floating
//! point is never used for money.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Fractional digits for prices and quantities.
pub const PRICE_SCALE: u32 = 8;

/// Fractional digits for fees denominated in the quote asset.
pub const FEE_SCALE: u32 = 2;

/// Comparison epsilon for increment checks (1e-8).
pub const EPSILON: Decimal = dec!(0.00000001);

/// Returns true when `value` is a whole multiple of `increment`,
/// within [`EPSILON`].
///
/// An `increment` of zero disables the check (everything passes).
#[must_use]
pub fn is_multiple_of(value: Decimal, increment: Decimal) -> bool {
    if increment.is_zero() {
        return true;
    }
    let rem = value % increment;
    rem.abs() < EPSILON || (increment - rem.abs()).abs() < EPSILON
}

/// Round a price or quantity to the canonical 8 decimal places.
#[must_use]
#[inline]
pub fn round_amount(value: Decimal) -> Decimal {
    value.round_dp(PRICE_SCALE)
}

/// Round a quote-denominated fee to 2 decimal places.
#[must_use]
#[inline]
pub fn round_fee(value: Decimal) -> Decimal {
    value.round_dp(FEE_SCALE)
}

/// Notional value of an order or fill: `price × quantity` in quote.
#[must_use]
#[inline]
pub fn notional(price: Decimal, quantity: Decimal) -> Decimal {
    round_amount(price * quantity)
}
