//! The control-plane facade: routes requests onto symbol shards over
//! their mailboxes, with explicit reply channels for synchronous calls.
//!
//! The exchange owns the cross-shard resources (market registry, price
//! feed, wallets, insurance fund, event bus) and one shard thread per
//! listed market. Client-order-id idempotency is resolved here, before a
//! request reaches its shard.

use crossbeam::channel::Sender;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::info;

use crate::book::OrderBookSnapshot;
use crate::engine::{
    ApplyOutcome, CancelReport, ShardCommand, ShardCore, ShardRouter, ShardSender, SubmitReport,
    SymbolShard,
};
use crate::errors::RejectReason;
use crate::events::EventBus;
use crate::feed::{FeedError, MarkPrice, PriceFeed};
use crate::liquidation::{InsuranceFund, Liquidator};
use crate::market::{Market, MarketRegistry, MarketStatus};
use crate::position::Position;
use crate::sequencer::{IntakeCommand, ModifyRequest};
use crate::types::{IdGenerator, OrderId, OrderRequest, OrderStatus, UserId};
use crate::utils::current_time_millis;
use crate::wallet::WalletBook;

/// The assembled exchange core.
pub struct Exchange {
    registry: Arc<MarketRegistry>,
    feed: Arc<PriceFeed>,
    wallets: Arc<WalletBook>,
    insurance: Arc<InsuranceFund>,
    events: Arc<EventBus>,
    ids: Arc<IdGenerator>,
    router: ShardRouter,
    shard_joins: Mutex<Vec<JoinHandle<()>>>,
    liquidation_tx: Mutex<Option<Sender<crate::liquidation::LiquidationRequest>>>,
    liquidator: Mutex<Option<Liquidator>>,
    /// Order-id → symbol routing for cancels and modifies.
    order_symbols: DashMap<OrderId, String>,
    /// Client-order-id idempotency: a repeated id returns the original
    /// report instead of re-executing.
    client_orders: DashMap<(UserId, String), SubmitReport>,
}

impl Exchange {
    /// Assemble an exchange with empty state and a running liquidation
    /// engine.
    #[must_use]
    pub fn new() -> Self {
        let router: ShardRouter = Arc::new(DashMap::new());
        let liquidator = crate::liquidation::spawn(router.clone());
        let liquidation_tx = liquidator.sender();
        Self {
            registry: Arc::new(MarketRegistry::new()),
            feed: Arc::new(PriceFeed::new()),
            wallets: Arc::new(WalletBook::new()),
            insurance: Arc::new(InsuranceFund::default()),
            events: Arc::new(EventBus::new()),
            ids: Arc::new(IdGenerator::new()),
            router,
            shard_joins: Mutex::new(Vec::new()),
            liquidation_tx: Mutex::new(Some(liquidation_tx)),
            liquidator: Mutex::new(Some(liquidator)),
            order_symbols: DashMap::new(),
            client_orders: DashMap::new(),
        }
    }

    /// The shared wallet book (deposits, balance queries).
    #[must_use]
    pub fn wallets(&self) -> &Arc<WalletBook> {
        &self.wallets
    }

    /// The event bus; subscribe before submitting to see everything.
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// The insurance fund.
    #[must_use]
    pub fn insurance(&self) -> &Arc<InsuranceFund> {
        &self.insurance
    }

    /// The market registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<MarketRegistry> {
        &self.registry
    }

    /// The shared price feed cache.
    #[must_use]
    pub fn feed(&self) -> &Arc<PriceFeed> {
        &self.feed
    }

    /// Register a market and spawn its shard.
    pub fn list_market(&self, market: Market) {
        let symbol = market.symbol.clone();
        self.registry.insert(market.clone());
        let liq_tx = self
            .liquidation_tx
            .lock()
            .expect("liquidation sender poisoned")
            .clone();
        let core = ShardCore::new(
            market,
            self.wallets.clone(),
            self.insurance.clone(),
            self.events.clone(),
            liq_tx,
        );
        let (tx, join) = SymbolShard::spawn(core);
        self.router
            .insert(symbol.clone(), ShardSender::new(tx, self.ids.clone()));
        self.shard_joins
            .lock()
            .expect("shard join list poisoned")
            .push(join);
        info!(symbol = %symbol, "shard started");
    }

    /// Submit an order. Idempotent when `client_order_id` is set: a
    /// repeated id returns the original report without re-executing.
    pub fn submit_order(&self, request: OrderRequest) -> SubmitReport {
        if let Some(client_id) = &request.client_order_id {
            let key = (request.user_id, client_id.clone());
            if let Some(previous) = self.client_orders.get(&key) {
                return previous.clone();
            }
        }

        let Some(shard) = self.router.get(&request.symbol).map(|s| s.value().clone()) else {
            let reason = RejectReason::MarketClosed {
                symbol: request.symbol.clone(),
            };
            return SubmitReport::rejected(self.ids.next_order_id(), &reason);
        };

        let order_id = self.ids.next_order_id();
        self.order_symbols.insert(order_id, request.symbol.clone());
        let idempotency_key = request
            .client_order_id
            .as_ref()
            .map(|cid| (request.user_id, cid.clone()));

        let (reply_tx, reply_rx) = crossbeam::channel::bounded(1);
        let command = ShardCommand::Intake {
            command: IntakeCommand::Submit {
                order_id,
                request,
                ts: current_time_millis(),
            },
            reply: Some(reply_tx),
        };
        let report = match shard.send(command) {
            Ok(()) => match reply_rx.recv() {
                Ok(ApplyOutcome::Submit(report)) => report,
                _ => SubmitReport::rejected(
                    order_id,
                    &RejectReason::Internal {
                        detail: "shard reply lost".into(),
                    },
                ),
            },
            Err(_) => SubmitReport::rejected(
                order_id,
                &RejectReason::Internal {
                    detail: "shard unavailable".into(),
                },
            ),
        };

        if let Some(key) = idempotency_key {
            self.client_orders.insert(key, report.clone());
        }
        report
    }

    /// Cancel one order. Idempotent: terminal orders report
    /// `NOT_CANCELLABLE`, unknown ids `NOT_FOUND`.
    pub fn cancel_order(&self, order_id: OrderId) -> CancelReport {
        let Some(symbol) = self.order_symbols.get(&order_id).map(|s| s.value().clone()) else {
            return CancelReport {
                cancelled: false,
                reason: Some(RejectReason::NotFound.to_payload()),
            };
        };
        let Some(shard) = self.router.get(&symbol).map(|s| s.value().clone()) else {
            return CancelReport {
                cancelled: false,
                reason: Some(RejectReason::NotFound.to_payload()),
            };
        };

        let (reply_tx, reply_rx) = crossbeam::channel::bounded(1);
        let command = ShardCommand::Intake {
            command: IntakeCommand::Cancel { order_id },
            reply: Some(reply_tx),
        };
        match shard.send(command) {
            Ok(()) => match reply_rx.recv() {
                Ok(ApplyOutcome::Cancel(report)) => report,
                _ => CancelReport {
                    cancelled: false,
                    reason: Some(
                        RejectReason::Internal {
                            detail: "shard reply lost".into(),
                        }
                        .to_payload(),
                    ),
                },
            },
            Err(_) => CancelReport {
                cancelled: false,
                reason: Some(
                    RejectReason::Internal {
                        detail: "shard unavailable".into(),
                    }
                    .to_payload(),
                ),
            },
        }
    }

    /// Cancel-then-replace. The replacement keeps the order id but loses
    /// time priority.
    pub fn modify_order(&self, order_id: OrderId, changes: ModifyRequest) -> SubmitReport {
        if changes.is_empty() {
            return SubmitReport {
                order_id,
                status: OrderStatus::Open,
                fills: Vec::new(),
                reject_reason: None,
            };
        }
        let Some(symbol) = self.order_symbols.get(&order_id).map(|s| s.value().clone()) else {
            return SubmitReport::rejected(order_id, &RejectReason::NotFound);
        };
        let Some(shard) = self.router.get(&symbol).map(|s| s.value().clone()) else {
            return SubmitReport::rejected(order_id, &RejectReason::NotFound);
        };

        let (reply_tx, reply_rx) = crossbeam::channel::bounded(1);
        let command = ShardCommand::Intake {
            command: IntakeCommand::Modify {
                order_id,
                changes,
                ts: current_time_millis(),
            },
            reply: Some(reply_tx),
        };
        match shard.send(command) {
            Ok(()) => match reply_rx.recv() {
                Ok(ApplyOutcome::Submit(report)) => report,
                _ => SubmitReport::rejected(
                    order_id,
                    &RejectReason::Internal {
                        detail: "shard reply lost".into(),
                    },
                ),
            },
            Err(_) => SubmitReport::rejected(
                order_id,
                &RejectReason::Internal {
                    detail: "shard unavailable".into(),
                },
            ),
        }
    }

    /// Cancel every order a user has on `symbol`, or on all symbols when
    /// `None`. Returns the number cancelled.
    pub fn cancel_all(&self, user: UserId, symbol: Option<&str>) -> usize {
        let symbols: Vec<String> = match symbol {
            Some(s) => vec![s.to_string()],
            None => self.router.iter().map(|e| e.key().clone()).collect(),
        };
        let mut count = 0;
        for symbol in symbols {
            let Some(shard) = self.router.get(&symbol).map(|s| s.value().clone()) else {
                continue;
            };
            let (reply_tx, reply_rx) = crossbeam::channel::bounded(1);
            let command = ShardCommand::Intake {
                command: IntakeCommand::CancelAll { user },
                reply: Some(reply_tx),
            };
            if shard.send(command).is_ok()
                && let Ok(ApplyOutcome::Count(n)) = reply_rx.recv()
            {
                count += n;
            }
        }
        count
    }

    /// Depth snapshot of one book.
    #[must_use]
    pub fn order_book(&self, symbol: &str, depth: usize) -> Option<OrderBookSnapshot> {
        let shard = self.router.get(symbol).map(|s| s.value().clone())?;
        let (reply_tx, reply_rx) = crossbeam::channel::bounded(1);
        shard
            .send(ShardCommand::BookSnapshot {
                depth,
                reply: reply_tx,
            })
            .ok()?;
        reply_rx.recv().ok()
    }

    /// Position records for a user, on one symbol or all.
    #[must_use]
    pub fn positions(&self, user: UserId, symbol: Option<&str>) -> Vec<Position> {
        let symbols: Vec<String> = match symbol {
            Some(s) => vec![s.to_string()],
            None => self.router.iter().map(|e| e.key().clone()).collect(),
        };
        let mut out = Vec::new();
        for symbol in symbols {
            let Some(shard) = self.router.get(&symbol).map(|s| s.value().clone()) else {
                continue;
            };
            let (reply_tx, reply_rx) = crossbeam::channel::bounded(1);
            if shard
                .send(ShardCommand::Positions {
                    user: Some(user),
                    reply: reply_tx,
                })
                .is_ok()
                && let Ok(mut positions) = reply_rx.recv()
            {
                out.append(&mut positions);
            }
        }
        out
    }

    /// Price-feed ingress: validate, publish to the shared cache, and
    /// route the tick into the symbol shard for triggers and risk checks.
    pub fn on_mark_price(&self, symbol: &str, tick: MarkPrice) -> Result<(), FeedError> {
        self.feed.on_tick(symbol, tick)?;
        if let Some(shard) = self.router.get(symbol) {
            let _ = shard.send(ShardCommand::Intake {
                command: IntakeCommand::Mark(tick),
                reply: None,
            });
        }
        Ok(())
    }

    /// Change a market's administrative status.
    pub fn set_market_status(&self, symbol: &str, status: MarketStatus) -> bool {
        if !self.registry.set_status(symbol, status) {
            return false;
        }
        if let Some(shard) = self.router.get(symbol) {
            let _ = shard.send(ShardCommand::Intake {
                command: IntakeCommand::SetStatus(status),
                reply: None,
            });
        }
        true
    }

    /// Halt a market until `resume_at` (millis). It resumes automatically
    /// on the first mark tick at or past that time.
    pub fn halt_market(&self, symbol: &str, resume_at: u64) -> bool {
        if !self.registry.halt(symbol, resume_at) {
            return false;
        }
        if let Some(shard) = self.router.get(symbol) {
            let _ = shard.send(ShardCommand::Intake {
                command: IntakeCommand::Halt { resume_at },
                reply: None,
            });
        }
        true
    }

    /// Seed the insurance fund.
    pub fn fund_insurance(&self, amount: Decimal) {
        self.insurance.deposit(amount);
    }

    /// Stop every shard and the liquidation engine, joining their
    /// threads.
    pub fn shutdown(&self) {
        for entry in self.router.iter() {
            let _ = entry.value().send(ShardCommand::Shutdown);
        }
        let mut joins = self.shard_joins.lock().expect("shard join list poisoned");
        for join in joins.drain(..) {
            let _ = join.join();
        }
        // Every shard core (and its liquidation sender clone) is gone;
        // dropping ours lets the liquidator's queue drain and close.
        self.liquidation_tx
            .lock()
            .expect("liquidation sender poisoned")
            .take();
        if let Some(liquidator) = self
            .liquidator
            .lock()
            .expect("liquidator slot poisoned")
            .take()
        {
            liquidator.shutdown();
        }
    }
}

impl Default for Exchange {
    fn default() -> Self {
        Self::new()
    }
}
