//! Core value types shared across the engine: identifiers, fixed-point
//! money helpers, the order model, and trade records.

pub mod ids;
pub mod order;
pub mod qty;
pub mod trade;

pub use ids::{IdGenerator, OrderId, Seq, TradeId, UserId};
pub use order::{
    Order, OrderFlags, OrderKind, OrderRequest, OrderStatus, Side, TimeInForce, TrailingConfig,
};
pub use trade::Trade;
