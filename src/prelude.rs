//! Prelude module that re-exports the types most programs need.
//!
//! ```rust
//! use perp_engine::prelude::*;
//! ```

pub use crate::book::{OrderBook, OrderBookSnapshot};
pub use crate::engine::{CancelReport, ShardCore, SubmitReport, SymbolShard};
pub use crate::errors::{ErrorPayload, RejectReason};
pub use crate::events::{EventBus, EventListener, ExchangeEvent};
pub use crate::exchange::Exchange;
pub use crate::feed::{MarkPrice, PriceFeed};
pub use crate::liquidation::InsuranceFund;
pub use crate::market::{
    FeeSchedule, LeverageTier, Market, MarketRegistry, MarketStatus, SelfTradePolicy,
};
pub use crate::position::{MarginMode, Position, PositionSide, PositionStatus};
pub use crate::sequencer::{IntakeCommand, IntakeRecord, Journal, MemoryJournal, ModifyRequest};
pub use crate::types::{
    IdGenerator, Order, OrderFlags, OrderId, OrderKind, OrderRequest, OrderStatus, Seq, Side,
    TimeInForce, Trade, TrailingConfig, UserId,
};
pub use crate::wallet::{Balance, WalletBook};
