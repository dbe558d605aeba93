//! The order model: sides, kinds, statuses, time-in-force, flags, and the
//! order record that flows through validation, matching, and the book.

use bitflags::bitflags;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{OrderId, Seq, UserId};
use crate::position::MarginMode;

/// Side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Buy (bid side).
    Buy,
    /// Sell (ask side).
    Sell,
}

impl Side {
    /// The opposite side.
    #[must_use]
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1 for Buy, -1 for Sell. Used in signed PnL arithmetic.
    #[must_use]
    #[inline]
    pub fn sign(self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "Buy"),
            Side::Sell => write!(f, "Sell"),
        }
    }
}

/// Execution style of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderKind {
    /// Execute immediately against the best available prices.
    Market,
    /// Execute at the limit price or better; the remainder rests.
    Limit,
    /// Converts to a Market order when the stop price is crossed.
    Stop,
    /// Converts to a Limit order when the stop price is crossed.
    StopLimit,
    /// Converts to a Market order when the price moves favourably through
    /// the trigger.
    TakeProfit,
    /// Stop whose trigger trails the high-water mark by a callback rate.
    TrailingStop,
}

impl OrderKind {
    /// Whether this kind parks in the trigger set instead of entering the
    /// book directly.
    #[must_use]
    #[inline]
    pub fn is_conditional(self) -> bool {
        matches!(
            self,
            OrderKind::Stop | OrderKind::StopLimit | OrderKind::TakeProfit | OrderKind::TrailingStop
        )
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderKind::Market => "Market",
            OrderKind::Limit => "Limit",
            OrderKind::Stop => "Stop",
            OrderKind::StopLimit => "StopLimit",
            OrderKind::TakeProfit => "TakeProfit",
            OrderKind::TrailingStop => "TrailingStop",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle status of an order.
///
/// `Filled`, `Cancelled`, and `Rejected` are terminal and write-once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Accepted but not yet processed by the engine.
    Pending,
    /// Resting in the book (or parked awaiting a trigger).
    Open,
    /// Some quantity filled, remainder still live.
    PartiallyFilled,
    /// Fully filled.
    Filled,
    /// Cancelled before completion; partial fills stand.
    Cancelled,
    /// Rejected by validation or the engine; nothing executed.
    Rejected,
    /// A conditional order whose trigger fired; it has been converted and
    /// resubmitted.
    Triggered,
}

impl OrderStatus {
    /// Terminal statuses never change again.
    #[must_use]
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Open => "Open",
            OrderStatus::PartiallyFilled => "PartiallyFilled",
            OrderStatus::Filled => "Filled",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Rejected => "Rejected",
            OrderStatus::Triggered => "Triggered",
        };
        write!(f, "{s}")
    }
}

/// How long an order remains eligible to rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good till cancelled (default).
    #[default]
    Gtc,
    /// Immediate or cancel: fill what crosses now, cancel the rest.
    Ioc,
    /// Fill or kill: fill the full quantity now or execute nothing.
    Fok,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
        };
        write!(f, "{s}")
    }
}

bitflags! {
    /// Behaviour flags carried by an order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct OrderFlags: u8 {
        /// Only reduce an existing position; never increase or flip it.
        const REDUCE_ONLY = 0b0000_0001;
        /// Reject instead of taking liquidity (maker-only).
        const POST_ONLY = 0b0000_0010;
        /// Close the entire open position (implies Market).
        const CLOSE_POSITION = 0b0000_0100;
        /// Internal marker for forced closes submitted by the liquidation
        /// engine. Never accepted from adapters.
        const LIQUIDATION = 0b1000_0000;
    }
}

/// Trailing-stop configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingConfig {
    /// Mark price at which the trail activates.
    pub activation_price: Decimal,
    /// Callback rate as a fraction (0.01 = 1%).
    pub callback_rate: Decimal,
    /// Best mark observed since activation; `None` until activated.
    pub high_water_mark: Option<Decimal>,
}

/// A request to place an order, as received from an adapter.
///
/// The validator turns a request into a normalized [`Order`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Owner of the order.
    pub user_id: UserId,
    /// Trading symbol, e.g. `BTCUSDT`.
    pub symbol: String,
    /// Buy or Sell.
    pub side: Side,
    /// Execution style.
    pub kind: OrderKind,
    /// Quantity in base asset.
    pub quantity: Decimal,
    /// Limit price; required for Limit and StopLimit.
    pub price: Option<Decimal>,
    /// Trigger price; required for Stop, StopLimit, and TakeProfit.
    pub stop_price: Option<Decimal>,
    /// Time-in-force policy.
    pub time_in_force: TimeInForce,
    /// Behaviour flags.
    pub flags: OrderFlags,
    /// Leverage to open with.
    pub leverage: Decimal,
    /// Cross or isolated margining for the resulting position.
    pub margin_mode: MarginMode,
    /// Trailing configuration; required for TrailingStop.
    pub trailing: Option<TrailingConfig>,
    /// Peer order for a one-cancels-other pair.
    pub oco_peer: Option<OrderId>,
    /// Client-supplied id for idempotent submission.
    pub client_order_id: Option<String>,
}

/// A normalized order owned by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Unique id, monotonic within the engine.
    pub id: OrderId,
    /// Owner.
    pub user_id: UserId,
    /// Trading symbol.
    pub symbol: String,
    /// Buy or Sell.
    pub side: Side,
    /// Execution style.
    pub kind: OrderKind,
    /// Original quantity.
    pub quantity: Decimal,
    /// Limit price, when applicable.
    pub price: Option<Decimal>,
    /// Trigger price, when applicable.
    pub stop_price: Option<Decimal>,
    /// Time-in-force policy.
    pub time_in_force: TimeInForce,
    /// Behaviour flags.
    pub flags: OrderFlags,
    /// Leverage the margin reservation was computed with.
    pub leverage: Decimal,
    /// Cross or isolated margining for the resulting position.
    pub margin_mode: MarginMode,
    /// Quantity filled so far.
    pub filled_qty: Decimal,
    /// Size-weighted average fill price; zero until the first fill.
    pub avg_fill_price: Decimal,
    /// Cumulative fees charged to this order, in quote.
    pub fees_paid: Decimal,
    /// Lifecycle status.
    pub status: OrderStatus,
    /// Arrival sequence number: the price-time tie breaker.
    pub created_at: Seq,
    /// Trailing configuration for TrailingStop orders.
    pub trailing: Option<TrailingConfig>,
    /// Peer order of a one-cancels-other pair.
    pub oco_peer: Option<OrderId>,
    /// Client-supplied idempotency key.
    pub client_order_id: Option<String>,
}

impl Order {
    /// Remaining (unfilled) quantity.
    #[must_use]
    #[inline]
    pub fn remaining(&self) -> Decimal {
        self.quantity - self.filled_qty
    }

    /// Whether any quantity is still live.
    #[must_use]
    #[inline]
    pub fn is_live(&self) -> bool {
        !self.status.is_terminal() && self.remaining() > Decimal::ZERO
    }

    /// Apply a fill: update filled quantity, weighted average price, and
    /// status. Caller guarantees `qty <= remaining()`.
    pub fn apply_fill(&mut self, price: Decimal, qty: Decimal, fee: Decimal) {
        debug_assert!(qty <= self.remaining());
        let prev_notional = self.avg_fill_price * self.filled_qty;
        self.filled_qty += qty;
        if self.filled_qty > Decimal::ZERO {
            self.avg_fill_price = (prev_notional + price * qty) / self.filled_qty;
        }
        self.fees_paid += fee;
        self.status = if self.remaining().is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
    }
}
