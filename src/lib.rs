//! # Deterministic Matching & Risk Engine for Simulated Crypto Derivatives
//!
//! An in-memory exchange core: it accepts orders, matches them with strict
//! price-time priority against a per-symbol limit order book, maintains
//! leveraged positions under cross or isolated margin, and continuously
//! evaluates liquidation risk against a live mark price.
//!
//! ## Architecture
//!
//! The core is **sharded by symbol**. Each listed market owns a
//! single-writer actor ([`engine::SymbolShard`]) that drains its intake
//! mailbox in arrival order; the book, positions, and trigger set for that
//! symbol are owned by the shard and never touched from outside.
//! Cross-shard state (wallets, the insurance fund, the market registry,
//! the price feed) is shared behind concurrent maps with narrow,
//! well-defined mutation APIs. Queries cross into a shard only as messages with
//! explicit reply channels.
//!
//! Every command a shard applies is stamped with a shard-local sequence
//! number and appended to an intake journal before execution, so replaying
//! the journal through a fresh core reproduces books, positions, and
//! events exactly. Nothing on the matching path reads the wall clock.
//!
//! ## Components
//!
//! - [`market`]: symbol metadata: tick/step filters, fee schedules,
//!   leverage tiers, administrative status and halts
//! - [`feed`]: mark-price ingress and the shared last-price cache
//! - [`validate`]: the pure order validator
//! - [`book`]: the limit order book: FIFO price levels, O(1) removal,
//!   depth snapshots with integrity checksums
//! - [`engine`]: the matching walk, conditional-order triggers, and the
//!   shard actor
//! - [`position`]: per-(user, symbol) position aggregation and PnL
//! - [`margin`]: initial/maintenance margin, liquidation and bankruptcy
//!   prices
//! - [`risk`]: the mark-tick risk sweep
//! - [`liquidation`]: forced closes, the insurance fund, and
//!   auto-deleveraging
//! - [`wallet`]: per-user balances with two-phase margin reservation
//! - [`events`]: the outbound event stream and its channel bridges
//! - [`sequencer`]: intake commands, records, and the journal contract
//! - [`exchange`]: the control-plane facade tying it all together
//!
//! ## Example
//!
//! ```
//! use perp_engine::prelude::*;
//! use rust_decimal_macros::dec;
//!
//! let exchange = Exchange::new();
//! exchange.list_market(Market::new("BTCUSDT", "BTC", "USDT"));
//! exchange.wallets().deposit(UserId(1), "USDT", dec!(10_000));
//!
//! let report = exchange.submit_order(OrderRequest {
//!     user_id: UserId(1),
//!     symbol: "BTCUSDT".into(),
//!     side: Side::Sell,
//!     kind: OrderKind::Limit,
//!     quantity: dec!(1),
//!     price: Some(dec!(100)),
//!     stop_price: None,
//!     time_in_force: TimeInForce::Gtc,
//!     flags: OrderFlags::empty(),
//!     leverage: dec!(10),
//!     margin_mode: MarginMode::Cross,
//!     trailing: None,
//!     oco_peer: None,
//!     client_order_id: None,
//! });
//! assert_eq!(report.status, OrderStatus::Open);
//!
//! let depth = exchange.order_book("BTCUSDT", 5).unwrap();
//! assert_eq!(depth.best_ask().map(|(px, _)| px), Some(dec!(100)));
//! exchange.shutdown();
//! ```

pub mod book;
pub mod engine;
pub mod errors;
pub mod events;
pub mod exchange;
pub mod feed;
pub mod liquidation;
pub mod margin;
pub mod market;
pub mod position;
pub mod prelude;
pub mod risk;
pub mod sequencer;
pub mod types;
pub mod validate;
pub mod wallet;

mod utils;

pub use book::{BookError, LevelSnapshot, OrderBook, OrderBookSnapshot, PriceLevel};
pub use engine::{
    ApplyOutcome, CancelReport, ShardCommand, ShardCore, ShardRouter, ShardSender, SubmitReport,
    SymbolShard,
};
pub use errors::{ErrorPayload, RejectReason};
pub use events::{EventBus, EventListener, ExchangeEvent};
pub use exchange::Exchange;
pub use feed::{FeedError, MarkPrice, PriceFeed};
pub use liquidation::{InsuranceFund, LiquidationRequest, Liquidator};
pub use market::{FeeSchedule, LeverageTier, Market, MarketRegistry, MarketStatus, SelfTradePolicy};
pub use position::{FillOutcome, MarginMode, Position, PositionBook, PositionSide, PositionStatus};
pub use risk::RiskAction;
pub use sequencer::{
    IntakeCommand, IntakeRecord, Journal, JournalError, MemoryJournal, ModifyRequest,
};
pub use types::{
    IdGenerator, Order, OrderFlags, OrderId, OrderKind, OrderRequest, OrderStatus, Seq, Side,
    TimeInForce, Trade, TradeId, TrailingConfig, UserId,
};
pub use utils::{current_time_millis, current_time_nanos};
pub use validate::{ValidationContext, normalize, required_margin, validate};
pub use wallet::{Balance, WalletBook};
