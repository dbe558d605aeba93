//! The per-symbol engine shard: a single-writer actor owning the order
//! book, positions, trigger set, and intake journal for one symbol.
//!
//! All mutation flows through [`ShardCore::apply`], which stamps a
//! shard-local sequence number, journals the command, and dispatches it.
//! The thread wrapper ([`SymbolShard::spawn`]) drains a crossbeam mailbox
//! in arrival order; queries are answered over explicit reply channels.
//! Replaying a journal through a fresh core reproduces state exactly.

use crossbeam::channel::{Receiver, Sender, TrySendError};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::book::{OrderBook, OrderBookSnapshot};
use crate::errors::{ErrorPayload, RejectReason};
use crate::events::{EventBus, ExchangeEvent};
use crate::feed::MarkPrice;
use crate::liquidation::{InsuranceFund, LiquidationRequest};
use crate::margin;
use crate::market::{Market, MarketStatus};
use crate::position::{Position, PositionBook, PositionStatus};
use crate::risk::{self, RiskAction};
use crate::sequencer::{IntakeCommand, IntakeRecord, Journal, MemoryJournal, ModifyRequest};
use crate::types::{
    IdGenerator, OrderFlags, OrderId, OrderKind, OrderRequest, OrderStatus, Seq, Trade, UserId,
};
use crate::validate::{self, ValidationContext};
use crate::wallet::WalletBook;

use super::triggers::TriggerSet;

/// Result of `submit_order` / `modify_order`.
#[derive(Debug, Clone)]
pub struct SubmitReport {
    /// The order addressed.
    pub order_id: OrderId,
    /// Status after processing.
    pub status: OrderStatus,
    /// Trades generated by this submission.
    pub fills: Vec<Trade>,
    /// Present when the order was refused or cut short.
    pub reject_reason: Option<ErrorPayload>,
}

impl SubmitReport {
    pub(crate) fn rejected(order_id: OrderId, reason: &RejectReason) -> Self {
        Self {
            order_id,
            status: OrderStatus::Rejected,
            fills: Vec::new(),
            reject_reason: Some(reason.to_payload()),
        }
    }
}

/// Result of `cancel_order`.
#[derive(Debug, Clone)]
pub struct CancelReport {
    /// Whether anything was cancelled by this call.
    pub cancelled: bool,
    /// Why nothing was cancelled, when `cancelled` is false.
    pub reason: Option<ErrorPayload>,
}

/// Outcome of applying one intake command.
#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    /// A submit or modify finished.
    Submit(SubmitReport),
    /// A cancel finished.
    Cancel(CancelReport),
    /// A mass-cancel finished with this many cancellations.
    Count(usize),
    /// The command produced no direct reply (mark ticks, admin).
    None,
}

/// A message to a shard thread.
#[derive(Debug)]
pub enum ShardCommand {
    /// An intake command, optionally with a reply channel.
    Intake {
        /// The command to apply.
        command: IntakeCommand,
        /// Where to send the outcome, when the caller wants one.
        reply: Option<Sender<ApplyOutcome>>,
    },
    /// Request a depth snapshot.
    BookSnapshot {
        /// Levels per side.
        depth: usize,
        /// Reply channel.
        reply: Sender<OrderBookSnapshot>,
    },
    /// Request position records.
    Positions {
        /// Restrict to one user, or all when `None`.
        user: Option<UserId>,
        /// Reply channel.
        reply: Sender<Vec<Position>>,
    },
    /// Stop the shard thread.
    Shutdown,
}

/// Cloneable handle for enqueuing commands on a shard.
#[derive(Debug, Clone)]
pub struct ShardSender {
    tx: Sender<ShardCommand>,
    ids: Arc<IdGenerator>,
}

impl ShardSender {
    /// Wrap a raw channel sender with the engine's id generator.
    #[must_use]
    pub fn new(tx: Sender<ShardCommand>, ids: Arc<IdGenerator>) -> Self {
        Self { tx, ids }
    }

    /// Blocking send.
    pub fn send(&self, command: ShardCommand) -> Result<(), Box<ShardCommand>> {
        self.tx.send(command).map_err(|e| Box::new(e.0))
    }

    /// Non-blocking send; fails when the mailbox is full or closed.
    pub fn try_send(&self, command: ShardCommand) -> Result<(), Box<ShardCommand>> {
        self.tx.try_send(command).map_err(|e| match e {
            TrySendError::Full(c) | TrySendError::Disconnected(c) => Box::new(c),
        })
    }

    /// Allocate an order id (used by the liquidation engine).
    #[must_use]
    pub fn next_order_id(&self) -> OrderId {
        self.ids.next_order_id()
    }
}

/// Directory of shard senders by symbol, shared with the liquidator.
pub type ShardRouter = Arc<DashMap<String, ShardSender>>;

/// Margin reserved for one live order.
#[derive(Debug, Clone, Copy)]
pub(super) struct OrderLock {
    pub remaining: Decimal,
    pub per_unit: Decimal,
}

/// Stashed liquidation parameters, captured when the risk monitor flips a
/// position to `Closing`.
#[derive(Debug, Clone, Copy)]
pub(super) struct LiqState {
    pub bankruptcy_price: Decimal,
    pub quantity: Decimal,
}

/// All single-writer state for one symbol.
pub struct ShardCore {
    pub(super) market: Market,
    pub(super) book: OrderBook,
    pub(super) positions: PositionBook,
    pub(super) triggers: TriggerSet,
    pub(super) oco: HashMap<OrderId, OrderId>,
    pub(super) wallets: Arc<WalletBook>,
    pub(super) insurance: Arc<InsuranceFund>,
    pub(super) events: Arc<EventBus>,
    pub(super) trade_ids: IdGenerator,
    pub(super) journal: MemoryJournal,
    pub(super) next_seq: u64,
    pub(super) last_seq: Seq,
    pub(super) last_mark: Option<MarkPrice>,
    pub(super) order_locks: HashMap<OrderId, OrderLock>,
    pub(super) cross_margin: HashMap<UserId, Decimal>,
    pub(super) terminal: HashMap<OrderId, OrderStatus>,
    pub(super) shortfalls: HashMap<UserId, Decimal>,
    pub(super) liq_state: HashMap<UserId, LiqState>,
    pub(super) pending_trigger_prices: VecDeque<Decimal>,
    pub(super) liq_tx: Option<Sender<LiquidationRequest>>,
    pub(super) faulted: bool,
    pub(super) fault_checkpoint: Option<OrderBookSnapshot>,
}

impl ShardCore {
    /// Fresh core for `market`.
    ///
    /// Trade ids are drawn from a namespace derived from the symbol, so a
    /// replay of the same intake produces identical trade ids.
    #[must_use]
    pub fn new(
        market: Market,
        wallets: Arc<WalletBook>,
        insurance: Arc<InsuranceFund>,
        events: Arc<EventBus>,
        liq_tx: Option<Sender<LiquidationRequest>>,
    ) -> Self {
        let symbol = market.symbol.clone();
        let namespace = Uuid::new_v5(&Uuid::NAMESPACE_OID, symbol.as_bytes());
        Self {
            book: OrderBook::new(&symbol),
            positions: PositionBook::new(&symbol),
            triggers: TriggerSet::new(),
            oco: HashMap::new(),
            market,
            wallets,
            insurance,
            events,
            trade_ids: IdGenerator::with_namespace(namespace),
            journal: MemoryJournal::new(),
            next_seq: 1,
            last_seq: Seq(0),
            last_mark: None,
            order_locks: HashMap::new(),
            cross_margin: HashMap::new(),
            terminal: HashMap::new(),
            shortfalls: HashMap::new(),
            liq_state: HashMap::new(),
            pending_trigger_prices: VecDeque::new(),
            liq_tx,
            faulted: false,
            fault_checkpoint: None,
        }
    }

    /// The shard's market definition.
    #[must_use]
    pub fn market(&self) -> &Market {
        &self.market
    }

    /// The intake journal.
    #[must_use]
    pub fn journal(&self) -> &MemoryJournal {
        &self.journal
    }

    /// Whether an invariant breach has stopped this shard.
    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// The prior-good snapshot checkpointed when the shard faulted, for
    /// operator inspection and recovery.
    #[must_use]
    pub fn fault_checkpoint(&self) -> Option<&OrderBookSnapshot> {
        self.fault_checkpoint.as_ref()
    }

    /// Rebuild a core by replaying a recorded intake log.
    ///
    /// The replayed core uses no liquidation channel: forced closes are
    /// already present in the log as ordinary submissions.
    #[must_use]
    pub fn replay(
        market: Market,
        wallets: Arc<WalletBook>,
        insurance: Arc<InsuranceFund>,
        events: Arc<EventBus>,
        records: &[IntakeRecord],
    ) -> Self {
        let mut core = Self::new(market, wallets, insurance, events, None);
        for record in records {
            let _ = core.apply(record.command.clone());
        }
        core
    }

    /// Apply one intake command: stamp, journal, dispatch.
    pub fn apply(&mut self, command: IntakeCommand) -> ApplyOutcome {
        if self.faulted {
            return self.faulted_outcome(&command);
        }
        let seq = Seq(self.next_seq);
        self.next_seq += 1;
        self.last_seq = seq;
        if let Err(e) = self.journal.append(IntakeRecord {
            seq,
            command: command.clone(),
        }) {
            self.fault(format!("journal append failed: {e}"));
            return self.faulted_outcome(&command);
        }

        match command {
            IntakeCommand::Submit {
                order_id,
                request,
                ts,
            } => ApplyOutcome::Submit(self.apply_submit(order_id, request, seq, ts)),
            IntakeCommand::Cancel { order_id } => ApplyOutcome::Cancel(self.apply_cancel(order_id)),
            IntakeCommand::CancelAll { user } => ApplyOutcome::Count(self.apply_cancel_all(user)),
            IntakeCommand::Modify {
                order_id,
                changes,
                ts,
            } => ApplyOutcome::Submit(self.apply_modify(order_id, changes, seq, ts)),
            IntakeCommand::Mark(tick) => {
                self.apply_mark(tick);
                ApplyOutcome::None
            }
            IntakeCommand::SetStatus(status) => {
                self.apply_set_status(status);
                ApplyOutcome::None
            }
            IntakeCommand::Halt { resume_at } => {
                info!(symbol = %self.market.symbol, resume_at, "market halted");
                self.market.halted_until = Some(resume_at);
                ApplyOutcome::None
            }
        }
    }

    /// Depth snapshot of the book at the last applied sequence number.
    #[must_use]
    pub fn snapshot(&self, depth: usize) -> OrderBookSnapshot {
        OrderBookSnapshot::capture(
            &self.book,
            depth,
            self.last_seq,
            crate::utils::current_time_millis(),
        )
    }

    /// Position records, for one user or everyone.
    #[must_use]
    pub fn positions_snapshot(&self, user: Option<UserId>) -> Vec<Position> {
        match user {
            Some(user) => self.positions.get(user).cloned().into_iter().collect(),
            None => self.positions.iter().cloned().collect(),
        }
    }

    pub(super) fn emit(&self, event: ExchangeEvent) {
        self.events.emit(&event);
    }

    /// Record an internal invariant breach: emit `ShardFault`, checkpoint
    /// the last good snapshot into the journal's shadow, and stop taking
    /// intake. Neighbouring shards are unaffected.
    pub(super) fn fault(&mut self, detail: String) {
        error!(symbol = %self.market.symbol, detail, "shard fault");
        self.faulted = true;
        if self.fault_checkpoint.is_none() {
            self.fault_checkpoint = Some(self.snapshot(1024));
        }
        self.emit(ExchangeEvent::ShardFault {
            symbol: self.market.symbol.clone(),
            detail,
        });
    }

    fn faulted_outcome(&self, command: &IntakeCommand) -> ApplyOutcome {
        let reason = RejectReason::Internal {
            detail: "shard faulted".into(),
        };
        match command {
            IntakeCommand::Submit { order_id, .. } | IntakeCommand::Modify { order_id, .. } => {
                ApplyOutcome::Submit(SubmitReport::rejected(*order_id, &reason))
            }
            IntakeCommand::Cancel { .. } => ApplyOutcome::Cancel(CancelReport {
                cancelled: false,
                reason: Some(reason.to_payload()),
            }),
            IntakeCommand::CancelAll { .. } => ApplyOutcome::Count(0),
            IntakeCommand::Mark(_) | IntakeCommand::SetStatus(_) | IntakeCommand::Halt { .. } => {
                ApplyOutcome::None
            }
        }
    }

    // ---- submit ----------------------------------------------------------

    fn apply_submit(
        &mut self,
        order_id: OrderId,
        mut request: OrderRequest,
        seq: Seq,
        ts: u64,
    ) -> SubmitReport {
        let is_liquidation = request.flags.contains(OrderFlags::LIQUIDATION);

        // close-position resolves to the full current exposure.
        if request.flags.contains(OrderFlags::CLOSE_POSITION) {
            match self.positions.get(request.user_id) {
                Some(p) if p.is_open() => {
                    request.quantity = p.quantity;
                    request.kind = OrderKind::Market;
                    if let Some(side) = p.side.opening_order_side() {
                        request.side = side.opposite();
                    }
                }
                _ => {
                    let reason = RejectReason::InvalidFlags {
                        detail: "close-position without an open position",
                    };
                    return self.reject(order_id, &request, &reason);
                }
            }
        }

        if !is_liquidation {
            let (verdict, need) = {
                let ctx = self.validation_context(&request);
                (
                    validate::validate(&request, &ctx),
                    validate::required_margin(&request, &ctx),
                )
            };
            if let Err(reason) = verdict {
                return self.reject(order_id, &request, &reason);
            }
            if need > Decimal::ZERO {
                if let Err(short) =
                    self.wallets
                        .reserve(request.user_id, &self.market.quote_asset, need)
                {
                    let reason = RejectReason::InsufficientBalance {
                        asset: short.asset,
                        need: short.need,
                        available: short.available,
                    };
                    return self.reject(order_id, &request, &reason);
                }
                self.order_locks.insert(
                    order_id,
                    OrderLock {
                        remaining: need,
                        per_unit: need / request.quantity,
                    },
                );
            }
        }

        let order = validate::normalize(request, order_id, seq);
        if let Some(peer) = order.oco_peer {
            self.oco.insert(order.id, peer);
            self.oco.insert(peer, order.id);
        }
        self.emit(ExchangeEvent::OrderAccepted {
            order_id: order.id,
            user_id: order.user_id,
            symbol: order.symbol.clone(),
        });

        if order.kind.is_conditional() {
            let mut parked = order;
            parked.status = OrderStatus::Open;
            let report = SubmitReport {
                order_id: parked.id,
                status: parked.status,
                fills: Vec::new(),
                reject_reason: None,
            };
            self.triggers.park(parked);
            return report;
        }

        let report = self.execute_order(order, ts);
        self.cascade_triggers(ts);
        report
    }

    pub(super) fn reject(
        &mut self,
        order_id: OrderId,
        request: &OrderRequest,
        reason: &RejectReason,
    ) -> SubmitReport {
        warn!(symbol = %self.market.symbol, %order_id, %reason, "order rejected");
        self.terminal.insert(order_id, OrderStatus::Rejected);
        self.emit(ExchangeEvent::OrderRejected {
            order_id,
            user_id: request.user_id,
            symbol: request.symbol.clone(),
            reason: reason.to_payload(),
        });
        SubmitReport::rejected(order_id, reason)
    }

    fn validation_context<'a>(&'a self, request: &OrderRequest) -> ValidationContext<'a> {
        let oco_peer = request.oco_peer.and_then(|peer| {
            self.book
                .get(peer)
                .or_else(|| self.triggers.get(peer))
        });
        ValidationContext {
            market: &self.market,
            mark_price: self.last_mark.map(|m| m.mark),
            quote_balance: self
                .wallets
                .balance(request.user_id, &self.market.quote_asset),
            position: self.positions.get(request.user_id),
            oco_peer,
            user_open_orders: self.book.open_orders_for(request.user_id)
                + self.triggers.count_for(request.user_id),
            total_open_orders: self.book.open_orders() + self.triggers.len(),
            now_ms: self.last_mark.map_or(0, |m| m.ts),
        }
    }

    // ---- cancel ----------------------------------------------------------

    fn apply_cancel(&mut self, order_id: OrderId) -> CancelReport {
        if self.cancel_anywhere(order_id) {
            return CancelReport {
                cancelled: true,
                reason: None,
            };
        }
        let reason = if self.terminal.contains_key(&order_id) {
            RejectReason::NotCancellable { order_id }
        } else {
            RejectReason::NotFound
        };
        CancelReport {
            cancelled: false,
            reason: Some(reason.to_payload()),
        }
    }

    fn apply_cancel_all(&mut self, user: UserId) -> usize {
        let mut ids = self.book.order_ids_for(user);
        ids.extend(self.triggers.ids_for(user));
        ids.sort_unstable();
        let mut count = 0;
        for id in ids {
            if self.cancel_anywhere(id) {
                count += 1;
            }
        }
        count
    }

    /// Cancel a resting or parked order; returns whether anything died.
    pub(super) fn cancel_anywhere(&mut self, order_id: OrderId) -> bool {
        let order = match self.book.remove_order(order_id) {
            Some(order) => Some(order),
            None => self.triggers.cancel(order_id),
        };
        let Some(order) = order else {
            return false;
        };
        self.release_lock(order_id, order.user_id);
        self.terminal.insert(order_id, OrderStatus::Cancelled);
        self.emit(ExchangeEvent::OrderCancelled {
            order_id,
            symbol: self.market.symbol.clone(),
        });
        self.cancel_oco_peer(order_id);
        true
    }

    pub(super) fn cancel_oco_peer(&mut self, order_id: OrderId) {
        if let Some(peer) = self.oco.remove(&order_id) {
            self.oco.remove(&peer);
            self.cancel_anywhere(peer);
        }
    }

    pub(super) fn release_lock(&mut self, order_id: OrderId, user: UserId) {
        if let Some(lock) = self.order_locks.remove(&order_id)
            && lock.remaining > Decimal::ZERO
        {
            self.wallets
                .release(user, &self.market.quote_asset, lock.remaining);
        }
    }

    // ---- modify ----------------------------------------------------------

    fn apply_modify(
        &mut self,
        order_id: OrderId,
        changes: ModifyRequest,
        seq: Seq,
        ts: u64,
    ) -> SubmitReport {
        let existing = self
            .book
            .get(order_id)
            .or_else(|| self.triggers.get(order_id))
            .cloned();
        let Some(order) = existing else {
            let reason = if self.terminal.contains_key(&order_id) {
                RejectReason::NotCancellable { order_id }
            } else {
                RejectReason::NotFound
            };
            return SubmitReport::rejected(order_id, &reason);
        };

        // Cancel-then-replace; the OCO link survives on the same id.
        if self.book.remove_order(order_id).is_none() {
            self.triggers.cancel(order_id);
        }
        self.release_lock(order_id, order.user_id);
        self.emit(ExchangeEvent::OrderCancelled {
            order_id,
            symbol: self.market.symbol.clone(),
        });

        let request = OrderRequest {
            user_id: order.user_id,
            symbol: order.symbol.clone(),
            side: order.side,
            kind: order.kind,
            quantity: changes.quantity.unwrap_or(order.remaining()),
            price: changes.price.or(order.price),
            stop_price: changes.stop_price.or(order.stop_price),
            time_in_force: order.time_in_force,
            flags: order.flags,
            leverage: order.leverage,
            margin_mode: order.margin_mode,
            trailing: order.trailing,
            oco_peer: order.oco_peer,
            client_order_id: order.client_order_id.clone(),
        };
        self.apply_submit(order_id, request, seq, ts)
    }

    // ---- marks, risk, admin ---------------------------------------------

    fn apply_mark(&mut self, tick: MarkPrice) {
        self.last_mark = Some(tick);

        // A lapsed halt resumes on the first tick past the resume time.
        if let Some(resume_at) = self.market.halted_until
            && tick.ts >= resume_at
        {
            info!(symbol = %self.market.symbol, "halt lapsed, market resumed");
            self.market.halted_until = None;
        }

        let fired = self.triggers.on_mark(tick.mark);
        for order in fired {
            self.run_triggered(order, tick.ts);
        }
        self.cascade_triggers(tick.ts);

        self.risk_sweep(tick.mark);
    }

    fn apply_set_status(&mut self, status: MarketStatus) {
        self.market.status = status;
        self.market.halted_until = None;
        self.emit(ExchangeEvent::MarketStatusChanged {
            symbol: self.market.symbol.clone(),
            status,
        });
        if status == MarketStatus::Delisted {
            // Delisting kills every live order.
            let mut ids = self.book.all_order_ids();
            ids.extend(self.triggers.all_ids());
            ids.sort_unstable();
            for id in ids {
                self.cancel_anywhere(id);
            }
        }
    }

    fn risk_sweep(&mut self, mark: Decimal) {
        let quote = self.market.quote_asset.clone();
        let mut users: Vec<UserId> = self.positions.iter().map(|p| p.user_id).collect();
        users.sort_unstable();
        let mut requests = Vec::new();

        for user in users {
            let wallet_equity = self.wallets.equity(user, &quote);
            let Some(pos) = self.positions.get_mut(user) else {
                continue;
            };
            if !pos.is_open() {
                continue;
            }
            pos.mark_price = mark;
            let rate = self.market.maintenance_rate_for(pos.notional());
            pos.liquidation_price = margin::liquidation_price(pos, rate);

            match risk::assess(pos, &self.market, wallet_equity) {
                Some(RiskAction::Liquidate { ratio }) => {
                    pos.status = PositionStatus::Closing;
                    let state = LiqState {
                        bankruptcy_price: margin::bankruptcy_price(pos),
                        quantity: pos.quantity,
                    };
                    let close_side = pos
                        .side
                        .opening_order_side()
                        .expect("open position has a side")
                        .opposite();
                    let quantity = pos.quantity;
                    let snapshot = pos.clone();
                    self.liq_state.insert(user, state);
                    warn!(symbol = %self.market.symbol, %user, %ratio, "liquidation queued");
                    self.emit(ExchangeEvent::LiquidationQueued {
                        user_id: user,
                        symbol: self.market.symbol.clone(),
                        mark_price: mark,
                    });
                    self.emit(ExchangeEvent::PositionUpdated(snapshot));
                    requests.push(LiquidationRequest {
                        user,
                        symbol: self.market.symbol.clone(),
                        close_side,
                        quantity,
                    });
                }
                Some(RiskAction::MarginCall { ratio }) => {
                    self.emit(ExchangeEvent::MarginCall {
                        user_id: user,
                        symbol: self.market.symbol.clone(),
                        margin_ratio: ratio,
                    });
                }
                None => {}
            }
        }

        if let Some(tx) = &self.liq_tx {
            for request in requests {
                let _ = tx.send(request);
            }
        }
    }
}

/// Thread wrapper around a [`ShardCore`].
pub struct SymbolShard;

impl SymbolShard {
    /// Mailbox capacity per shard.
    pub const MAILBOX_CAPACITY: usize = 4096;

    /// Spawn the shard thread, returning its sender and join handle.
    #[must_use]
    pub fn spawn(mut core: ShardCore) -> (Sender<ShardCommand>, JoinHandle<()>) {
        let (tx, rx): (Sender<ShardCommand>, Receiver<ShardCommand>) =
            crossbeam::channel::bounded(Self::MAILBOX_CAPACITY);
        let symbol = core.market().symbol.clone();

        let join = std::thread::Builder::new()
            .name(format!("shard-{symbol}"))
            .spawn(move || {
                while let Ok(command) = rx.recv() {
                    match command {
                        ShardCommand::Intake { command, reply } => {
                            let outcome = core.apply(command);
                            if let Some(reply) = reply {
                                let _ = reply.send(outcome);
                            }
                        }
                        ShardCommand::BookSnapshot { depth, reply } => {
                            let _ = reply.send(core.snapshot(depth));
                        }
                        ShardCommand::Positions { user, reply } => {
                            let _ = reply.send(core.positions_snapshot(user));
                        }
                        ShardCommand::Shutdown => break,
                    }
                }
            })
            .expect("failed to spawn shard thread");

        (tx, join)
    }
}
