//! Trade records produced by the matching engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{OrderId, Seq, TradeId, UserId};
use super::order::Side;

/// A single match between a taker (incoming) and a maker (resting) order.
///
/// The execution price is always the maker's price. Fees are denominated in
/// the quote asset and rounded to 2 decimal places; a negative maker fee is
/// a rebate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Unique trade id.
    pub id: TradeId,
    /// Trading symbol.
    pub symbol: String,
    /// The incoming (aggressive) order.
    pub taker_order_id: OrderId,
    /// The resting (passive) order.
    pub maker_order_id: OrderId,
    /// Owner of the taker order.
    pub taker_user_id: UserId,
    /// Owner of the maker order.
    pub maker_user_id: UserId,
    /// Side of the taker order.
    pub taker_side: Side,
    /// Execution price (the maker's resting price).
    pub price: Decimal,
    /// Executed quantity.
    pub quantity: Decimal,
    /// Fee charged to the taker, in quote.
    pub taker_fee: Decimal,
    /// Fee charged to the maker, in quote. Negative values are rebates.
    pub maker_fee: Decimal,
    /// Sequence number of the intake command that produced this trade.
    pub seq: Seq,
    /// Ingress timestamp in milliseconds.
    pub ts: u64,
}

impl Trade {
    /// Notional value of this trade in quote.
    #[must_use]
    #[inline]
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}
