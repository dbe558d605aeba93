//! Shared fixtures: a synchronous shard core with captured events, plus
//! request builders.

use crossbeam::channel::Receiver;
use perp_engine::prelude::*;
use perp_engine::{ApplyOutcome, IntakeCommand, ShardCore};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A shard core driven directly (no threads), with its event stream
/// captured on a channel.
pub struct Rig {
    pub core: ShardCore,
    pub wallets: Arc<WalletBook>,
    pub insurance: Arc<InsuranceFund>,
    pub events: Receiver<ExchangeEvent>,
    next_order_id: AtomicU64,
}

impl Rig {
    pub fn new(market: Market) -> Self {
        let wallets = Arc::new(WalletBook::new());
        let insurance = Arc::new(InsuranceFund::default());
        let bus = Arc::new(EventBus::new());
        let (tx, rx) = crossbeam::channel::unbounded();
        bus.subscribe(perp_engine::events::channel_listener(tx));
        let core = ShardCore::new(
            market,
            wallets.clone(),
            insurance.clone(),
            bus,
            None,
        );
        Self {
            core,
            wallets,
            insurance,
            events: rx,
            next_order_id: AtomicU64::new(1),
        }
    }

    pub fn default_market() -> Market {
        let mut market = Market::new("BTCUSDT", "BTC", "USDT");
        market.tick_size = dec!(0.1);
        market.step_size = dec!(0.001);
        market
    }

    pub fn deposit(&self, user: u64, amount: Decimal) {
        self.wallets.deposit(UserId(user), "USDT", amount);
    }

    pub fn mark(&mut self, price: Decimal) {
        let tick = MarkPrice {
            bid: None,
            ask: None,
            mark: price,
            ts: 1,
        };
        let _ = self.core.apply(IntakeCommand::Mark(tick));
    }

    pub fn mark_at(&mut self, price: Decimal, ts: u64) {
        let tick = MarkPrice {
            bid: None,
            ask: None,
            mark: price,
            ts,
        };
        let _ = self.core.apply(IntakeCommand::Mark(tick));
    }

    pub fn submit(&mut self, request: OrderRequest) -> SubmitReport {
        let order_id = OrderId(self.next_order_id.fetch_add(1, Ordering::Relaxed));
        match self.core.apply(IntakeCommand::Submit {
            order_id,
            request,
            ts: 1,
        }) {
            ApplyOutcome::Submit(report) => report,
            other => panic!("expected submit outcome, got {other:?}"),
        }
    }

    pub fn cancel(&mut self, order_id: OrderId) -> CancelReport {
        match self.core.apply(IntakeCommand::Cancel { order_id }) {
            ApplyOutcome::Cancel(report) => report,
            other => panic!("expected cancel outcome, got {other:?}"),
        }
    }

    pub fn position(&self, user: u64) -> Option<Position> {
        self.core
            .positions_snapshot(Some(UserId(user)))
            .into_iter()
            .next()
    }

    pub fn snapshot(&self) -> OrderBookSnapshot {
        self.core.snapshot(32)
    }

    pub fn drain_events(&self) -> Vec<ExchangeEvent> {
        self.events.try_iter().collect()
    }
}

pub fn limit(user: u64, side: Side, price: Decimal, qty: Decimal) -> OrderRequest {
    OrderRequest {
        user_id: UserId(user),
        symbol: "BTCUSDT".into(),
        side,
        kind: OrderKind::Limit,
        quantity: qty,
        price: Some(price),
        stop_price: None,
        time_in_force: TimeInForce::Gtc,
        flags: OrderFlags::empty(),
        leverage: dec!(10),
        margin_mode: MarginMode::Isolated,
        trailing: None,
        oco_peer: None,
        client_order_id: None,
    }
}

pub fn market_order(user: u64, side: Side, qty: Decimal) -> OrderRequest {
    OrderRequest {
        user_id: UserId(user),
        symbol: "BTCUSDT".into(),
        side,
        kind: OrderKind::Market,
        quantity: qty,
        price: None,
        stop_price: None,
        time_in_force: TimeInForce::Gtc,
        flags: OrderFlags::empty(),
        leverage: dec!(10),
        margin_mode: MarginMode::Isolated,
        trailing: None,
        oco_peer: None,
        client_order_id: None,
    }
}

pub fn stop_order(user: u64, side: Side, stop: Decimal, qty: Decimal) -> OrderRequest {
    OrderRequest {
        kind: OrderKind::Stop,
        stop_price: Some(stop),
        price: None,
        ..limit(user, side, Decimal::ZERO, qty)
    }
}
