//! Margin arithmetic: initial/maintenance requirements, margin ratio, and
//! liquidation / bankruptcy price derivation.
//!
//! All formulas operate on fixed-point decimals. For a position of size Q
//! at entry E with leverage L, maintenance rate r, and mark M:
//!
//! - initial margin         = Q·E / L
//! - maintenance margin     = r · Q · P (at the price being evaluated)
//! - unrealized PnL         = (M − E) · Q · sign(side)
//! - margin ratio           = maintenance / equity
//! - liquidation price Long = E·(1 − 1/L + r) − extra/Q
//! - liquidation price Short= E·(1 + 1/L − r) + extra/Q
//! - bankruptcy price       = liquidation price with r = 0
//!
//! where `extra` is isolated margin beyond the initial requirement,
//! treated as additional equity.

use rust_decimal::Decimal;

use crate::position::{MarginMode, Position, PositionSide};

/// Initial margin requirement `Q·E / L`.
#[must_use]
pub fn initial_margin(quantity: Decimal, entry_price: Decimal, leverage: Decimal) -> Decimal {
    if leverage <= Decimal::ZERO {
        return quantity * entry_price;
    }
    quantity * entry_price / leverage
}

/// Maintenance margin requirement `r · Q · price`.
#[must_use]
#[inline]
pub fn maintenance_margin(quantity: Decimal, price: Decimal, rate: Decimal) -> Decimal {
    rate * quantity * price
}

/// Maintenance-margin-to-equity ratio. A ratio of 1 or more means the
/// position is liquidatable. Non-positive equity maps to `Decimal::MAX`.
#[must_use]
pub fn margin_ratio(maintenance: Decimal, equity: Decimal) -> Decimal {
    if equity <= Decimal::ZERO {
        return Decimal::MAX;
    }
    maintenance / equity
}

/// Equity backing a position: dedicated margin plus PnL for isolated mode,
/// wallet equity plus unrealized PnL for cross mode.
#[must_use]
pub fn position_equity(position: &Position, wallet_equity: Decimal) -> Decimal {
    match position.margin_mode {
        MarginMode::Isolated => {
            position.isolated_margin + position.unrealized_pnl() + position.realized_pnl
        }
        MarginMode::Cross => wallet_equity + position.unrealized_pnl(),
    }
}

/// Price at which the position's equity hits its maintenance requirement.
///
/// `maintenance_rate` comes from the leverage tier at the current notional;
/// isolated margin beyond the initial requirement pushes the price further
/// away by `extra / Q`. Flat positions have no liquidation price (zero).
#[must_use]
pub fn liquidation_price(position: &Position, maintenance_rate: Decimal) -> Decimal {
    price_at_margin_floor(position, maintenance_rate)
}

/// Price at which equity reaches zero before fees: the liquidation price
/// with the maintenance rate set to zero.
#[must_use]
pub fn bankruptcy_price(position: &Position) -> Decimal {
    price_at_margin_floor(position, Decimal::ZERO)
}

fn price_at_margin_floor(position: &Position, rate: Decimal) -> Decimal {
    if !position.is_open() || position.leverage <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let entry = position.entry_price;
    let inv_leverage = Decimal::ONE / position.leverage;

    let extra = match position.margin_mode {
        MarginMode::Isolated => {
            let base = initial_margin(position.quantity, entry, position.leverage);
            (position.isolated_margin - base).max(Decimal::ZERO)
        }
        MarginMode::Cross => Decimal::ZERO,
    };
    let shift = extra / position.quantity;

    let px = match position.side {
        PositionSide::Long => entry * (Decimal::ONE - inv_leverage + rate) - shift,
        PositionSide::Short => entry * (Decimal::ONE + inv_leverage - rate) + shift,
        PositionSide::Flat => Decimal::ZERO,
    };
    px.max(Decimal::ZERO)
}

/// Whether the mark price has crossed the liquidation price for this
/// position's side.
#[must_use]
pub fn mark_breaches_liquidation(position: &Position) -> bool {
    if !position.is_open() || position.liquidation_price.is_zero() {
        return false;
    }
    match position.side {
        PositionSide::Long => position.mark_price <= position.liquidation_price,
        PositionSide::Short => position.mark_price >= position.liquidation_price,
        PositionSide::Flat => false,
    }
}
