//! User-surface error taxonomy and the wire payload adapters serialize.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{OrderId, OrderKind, Side};

/// Reasons an order request or engine operation is refused.
///
/// These are the enumerated, client-correctable errors: they are returned
/// synchronously, never panic the engine, and map 1:1 onto the wire codes
/// in [`RejectReason::code`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum RejectReason {
    /// Symbol is unknown, suspended, halted, or delisted.
    MarketClosed {
        /// The symbol that was addressed.
        symbol: String,
    },

    /// Order type not in the market's allowed set.
    OrderKindNotAllowed {
        /// The refused kind.
        kind: OrderKind,
    },

    /// A field required by the order type is missing or malformed.
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },

    /// Price is not a multiple of the market tick size.
    InvalidTick {
        /// The offending price.
        price: Decimal,
        /// The market tick size.
        tick_size: Decimal,
    },

    /// Quantity is not a multiple of the market step size.
    InvalidStep {
        /// The offending quantity.
        quantity: Decimal,
        /// The market step size.
        step_size: Decimal,
    },

    /// `price × quantity` is below the market minimum.
    BelowMinNotional {
        /// The computed notional.
        notional: Decimal,
        /// The market floor.
        min_notional: Decimal,
    },

    /// Flags are inconsistent with the order type or position state.
    InvalidFlags {
        /// What was wrong.
        detail: &'static str,
    },

    /// A one-cancels-other pair is not legally formed.
    InvalidOcoPair {
        /// What was wrong.
        detail: &'static str,
    },

    /// Trailing-stop configuration out of range or mis-directed.
    InvalidTrailing {
        /// What was wrong.
        detail: &'static str,
    },

    /// The user (or the engine) has too many open orders.
    TooManyOrders {
        /// Open orders counted against the cap.
        open: usize,
        /// The cap that was hit.
        cap: usize,
    },

    /// The wallet cannot reserve the required margin or notional.
    InsufficientBalance {
        /// Asset that was short.
        asset: String,
        /// Amount the reservation needed.
        need: Decimal,
        /// Amount that was available.
        available: Decimal,
    },

    /// Leverage outside `[1, max]` for the order's notional tier.
    InvalidLeverage {
        /// The requested leverage.
        requested: Decimal,
        /// Maximum allowed at this notional.
        max: Decimal,
    },

    /// A post-only order would have crossed the spread.
    PostOnlyWouldCross {
        /// The order's limit price.
        price: Decimal,
        /// The opposite best price it would have crossed.
        opposite: Decimal,
    },

    /// A fill-or-kill order could not be fully filled.
    FokNotFillable {
        /// Quantity requested.
        requested: Decimal,
        /// Quantity that was fillable.
        fillable: Decimal,
    },

    /// The order would have matched the user's own resting order and the
    /// market's self-trade policy cancelled it.
    SelfTrade,

    /// Reduce-only order without a sufficient opposite position.
    ReduceOnlyViolation {
        /// Side of the order.
        side: Side,
        /// Quantity requested.
        quantity: Decimal,
        /// Opposite position quantity actually open.
        position_qty: Decimal,
    },

    /// A market order found no (or not enough) liquidity.
    InsufficientLiquidity {
        /// Quantity requested.
        requested: Decimal,
        /// Quantity that was available.
        available: Decimal,
    },

    /// Cancel/modify of an order already in a terminal state.
    NotCancellable {
        /// The order addressed.
        order_id: OrderId,
    },

    /// The addressed order or position does not exist.
    NotFound,

    /// Internal engine failure; the shard may have faulted.
    Internal {
        /// Diagnostic detail.
        detail: String,
    },
}

impl RejectReason {
    /// Stable wire code for this reason.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::MarketClosed { .. } => "MARKET_CLOSED",
            RejectReason::OrderKindNotAllowed { .. }
            | RejectReason::MissingField { .. }
            | RejectReason::InvalidTick { .. }
            | RejectReason::InvalidStep { .. }
            | RejectReason::BelowMinNotional { .. }
            | RejectReason::InvalidFlags { .. }
            | RejectReason::InvalidOcoPair { .. }
            | RejectReason::InvalidTrailing { .. }
            | RejectReason::TooManyOrders { .. } => "VALIDATION",
            RejectReason::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            RejectReason::InvalidLeverage { .. } => "INVALID_LEVERAGE",
            RejectReason::PostOnlyWouldCross { .. } => "POST_ONLY_WOULD_CROSS",
            RejectReason::FokNotFillable { .. } => "FOK_NOT_FILLABLE",
            RejectReason::SelfTrade => "SELF_TRADE",
            RejectReason::ReduceOnlyViolation { .. } => "REDUCE_ONLY_VIOLATION",
            RejectReason::InsufficientLiquidity { .. } => "VALIDATION",
            RejectReason::NotCancellable { .. } => "NOT_CANCELLABLE",
            RejectReason::NotFound => "NOT_FOUND",
            RejectReason::Internal { .. } => "INTERNAL",
        }
    }

    /// Convert into the wire payload form.
    #[must_use]
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code().to_string(),
            message: self.to_string(),
            details: serde_json::to_value(self).ok(),
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MarketClosed { symbol } => {
                write!(f, "market {symbol} is not accepting orders")
            }
            RejectReason::OrderKindNotAllowed { kind } => {
                write!(f, "order kind {kind} not allowed on this market")
            }
            RejectReason::MissingField { field } => {
                write!(f, "required field missing: {field}")
            }
            RejectReason::InvalidTick { price, tick_size } => {
                write!(f, "price {price} is not a multiple of tick size {tick_size}")
            }
            RejectReason::InvalidStep {
                quantity,
                step_size,
            } => {
                write!(
                    f,
                    "quantity {quantity} is not a multiple of step size {step_size}"
                )
            }
            RejectReason::BelowMinNotional {
                notional,
                min_notional,
            } => {
                write!(f, "notional {notional} below minimum {min_notional}")
            }
            RejectReason::InvalidFlags { detail } => write!(f, "invalid flags: {detail}"),
            RejectReason::InvalidOcoPair { detail } => write!(f, "invalid OCO pair: {detail}"),
            RejectReason::InvalidTrailing { detail } => {
                write!(f, "invalid trailing config: {detail}")
            }
            RejectReason::TooManyOrders { open, cap } => {
                write!(f, "open order count {open} at cap {cap}")
            }
            RejectReason::InsufficientBalance {
                asset,
                need,
                available,
            } => {
                write!(
                    f,
                    "insufficient {asset} balance: need {need}, available {available}"
                )
            }
            RejectReason::InvalidLeverage { requested, max } => {
                write!(f, "leverage {requested} outside [1, {max}]")
            }
            RejectReason::PostOnlyWouldCross { price, opposite } => {
                write!(f, "post-only at {price} would cross opposite best {opposite}")
            }
            RejectReason::FokNotFillable {
                requested,
                fillable,
            } => {
                write!(
                    f,
                    "fill-or-kill not fillable: requested {requested}, fillable {fillable}"
                )
            }
            RejectReason::SelfTrade => write!(f, "order would self-trade"),
            RejectReason::ReduceOnlyViolation {
                side,
                quantity,
                position_qty,
            } => {
                write!(
                    f,
                    "reduce-only {side} {quantity} exceeds opposite position {position_qty}"
                )
            }
            RejectReason::InsufficientLiquidity {
                requested,
                available,
            } => {
                write!(
                    f,
                    "insufficient liquidity: requested {requested}, available {available}"
                )
            }
            RejectReason::NotCancellable { order_id } => {
                write!(f, "order {order_id} is terminal and cannot be cancelled")
            }
            RejectReason::NotFound => write!(f, "not found"),
            RejectReason::Internal { detail } => write!(f, "internal error: {detail}"),
        }
    }
}

impl std::error::Error for RejectReason {}

/// Wire form of an error: `{code, message, details?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Structured detail, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
