//! Risk assessment: the pure evaluation the risk monitor runs over every
//! position on each mark tick.
//!
//! The shard walks its positions, feeds each through [`assess`], and acts
//! on the verdict: a margin call is informational, a liquidation verdict
//! flips the position to `Closing` and enqueues a forced close. Positions
//! already `Closing` are never re-assessed, which makes the monitor
//! idempotent.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::margin;
use crate::market::Market;
use crate::position::{Position, PositionStatus};

/// Margin ratio at which an informational margin call is emitted.
pub const MARGIN_CALL_RATIO: Decimal = dec!(0.8);

/// Verdict for one position at the current mark.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RiskAction {
    /// Ratio is elevated but below 1; warn the user.
    MarginCall {
        /// The current maintenance-to-equity ratio.
        ratio: Decimal,
    },
    /// Maintenance margin breached (ratio ≥ 1) or the mark crossed the
    /// liquidation price; the position must be force-closed.
    Liquidate {
        /// The ratio observed at breach time.
        ratio: Decimal,
    },
}

/// Evaluate one position against the current mark.
///
/// The position's `mark_price` and `liquidation_price` must already be
/// refreshed for this tick. Returns `None` for flat or non-`Open`
/// positions and for healthy ratios.
#[must_use]
pub fn assess(position: &Position, market: &Market, wallet_equity: Decimal) -> Option<RiskAction> {
    if !position.is_open() || position.status != PositionStatus::Open {
        return None;
    }
    let rate = market.maintenance_rate_for(position.notional());
    let maintenance = margin::maintenance_margin(position.quantity, position.mark_price, rate);
    let equity = margin::position_equity(position, wallet_equity);
    let ratio = margin::margin_ratio(maintenance, equity);

    if ratio >= Decimal::ONE || margin::mark_breaches_liquidation(position) {
        Some(RiskAction::Liquidate { ratio })
    } else if ratio >= MARGIN_CALL_RATIO {
        Some(RiskAction::MarginCall { ratio })
    } else {
        None
    }
}
