//! The matching walk and everything a fill sets in motion: wallet and
//! position settlement, trigger cascades, and liquidation finalization
//! (insurance fund draw and auto-deleveraging).
//!
//! One order is processed at a time; the walk consumes opposite levels in
//! price-time order, fills at the maker's price, and handles time-in-force
//! residue. Fill-or-kill runs a dry walk first so a reject leaves the book
//! and every position in the exact pre-state.

use rust_decimal::Decimal;
use tracing::{debug, trace, warn};

use crate::book::BookError;
use crate::errors::RejectReason;
use crate::events::ExchangeEvent;
use crate::margin;
use crate::market::SelfTradePolicy;
use crate::position::{MarginMode, PositionSide, PositionStatus};
use crate::types::qty::{notional, round_amount};
use crate::types::{
    Order, OrderFlags, OrderId, OrderKind, OrderStatus, Side, TimeInForce, Trade, UserId,
};

use super::shard::{ShardCore, SubmitReport};

impl ShardCore {
    /// Run an executable (Market or Limit) order against the book.
    pub(super) fn execute_order(&mut self, mut order: Order, ts: u64) -> SubmitReport {
        debug_assert!(matches!(order.kind, OrderKind::Market | OrderKind::Limit));
        let limit_price = match order.kind {
            OrderKind::Limit => order.price,
            _ => None,
        };

        if order.flags.contains(OrderFlags::POST_ONLY) {
            let opposite = match order.side {
                Side::Buy => self.book.best_ask(),
                Side::Sell => self.book.best_bid(),
            };
            let crossing = match (limit_price, opposite) {
                (Some(px), Some(best)) => match order.side {
                    Side::Buy => px >= best,
                    Side::Sell => px <= best,
                },
                _ => false,
            };
            if crossing {
                self.release_lock(order.id, order.user_id);
                return self.reject_live(
                    &order,
                    &RejectReason::PostOnlyWouldCross {
                        price: limit_price.unwrap_or_default(),
                        opposite: opposite.unwrap_or_default(),
                    },
                );
            }
        }

        if order.time_in_force == TimeInForce::Fok {
            let fillable = self.fillable_qty(&order, limit_price);
            if fillable < order.quantity {
                self.release_lock(order.id, order.user_id);
                return self.reject_live(
                    &order,
                    &RejectReason::FokNotFillable {
                        requested: order.quantity,
                        fillable,
                    },
                );
            }
        }

        let mut fills: Vec<Trade> = Vec::new();
        let mut stp_cancel_taker = false;

        let crossing = self.book.crossing_ids(order.side, limit_price);
        for (price, maker_id) in crossing {
            if order.remaining() <= Decimal::ZERO {
                break;
            }
            let Some(maker) = self.book.get(maker_id) else {
                continue; // removed earlier in this walk
            };
            let maker_user = maker.user_id;
            let maker_remaining = maker.remaining();
            let maker_leverage = maker.leverage;
            let maker_mode = maker.margin_mode;

            if maker_user == order.user_id {
                match self.market.self_trade_policy {
                    SelfTradePolicy::Skip => continue,
                    SelfTradePolicy::CancelOldest => {
                        debug!(maker = %maker_id, "self-trade: cancelling resting order");
                        self.cancel_anywhere(maker_id);
                        continue;
                    }
                    SelfTradePolicy::CancelNewest => {
                        stp_cancel_taker = true;
                        break;
                    }
                }
            }

            let fill_qty = order.remaining().min(maker_remaining);
            if fill_qty <= Decimal::ZERO {
                continue;
            }
            let value = notional(price, fill_qty);
            let taker_fee = self.market.fees.fee(value, false);
            let maker_fee = self.market.fees.fee(value, true);

            let Some((maker_status, maker_avg)) =
                self.book.fill_resting(maker_id, price, fill_qty, maker_fee)
            else {
                continue;
            };
            order.apply_fill(price, fill_qty, taker_fee);

            let trade = Trade {
                id: self.trade_ids.next_trade_id(),
                symbol: self.market.symbol.clone(),
                taker_order_id: order.id,
                maker_order_id: maker_id,
                taker_user_id: order.user_id,
                maker_user_id: maker_user,
                taker_side: order.side,
                price,
                quantity: fill_qty,
                taker_fee,
                maker_fee,
                seq: self.last_seq,
                ts,
            };
            trace!(symbol = %self.market.symbol, %price, qty = %fill_qty,
                   taker = %order.id, maker = %maker_id, "trade");

            self.settle_party(
                maker_user,
                maker_id,
                order.side.opposite(),
                fill_qty,
                price,
                maker_fee,
                maker_leverage,
                maker_mode,
            );
            self.settle_party(
                order.user_id,
                order.id,
                order.side,
                fill_qty,
                price,
                taker_fee,
                order.leverage,
                order.margin_mode,
            );

            self.emit(ExchangeEvent::Trade(trade.clone()));
            self.emit(ExchangeEvent::OrderFilled {
                order_id: maker_id,
                status: maker_status,
                fill_qty,
                avg_fill_price: maker_avg,
            });
            if maker_status == OrderStatus::Filled {
                self.terminal.insert(maker_id, maker_status);
                self.release_lock(maker_id, maker_user);
                self.cancel_oco_peer(maker_id);
            }
            self.pending_trigger_prices.push_back(price);
            fills.push(trade);
        }

        // Residue handling.
        let mut reject_reason: Option<RejectReason> = None;
        if stp_cancel_taker {
            if order.filled_qty.is_zero() {
                self.release_lock(order.id, order.user_id);
                return self.reject_live(&order, &RejectReason::SelfTrade);
            }
            order.status = OrderStatus::Cancelled;
        } else if order.remaining().is_zero() {
            order.status = OrderStatus::Filled;
        } else {
            match order.time_in_force {
                // FOK cannot reach here: the dry walk already proved the
                // full quantity, and nothing mutates between walks.
                TimeInForce::Ioc | TimeInForce::Fok => {
                    order.status = OrderStatus::Cancelled;
                }
                TimeInForce::Gtc => {
                    if order.kind == OrderKind::Limit {
                        order.status = if order.filled_qty.is_zero() {
                            OrderStatus::Open
                        } else {
                            OrderStatus::PartiallyFilled
                        };
                        match self.book.add_resting(order.clone()) {
                            Ok(()) => {}
                            Err(BookError::WouldCrossAtRest { .. }) => {
                                // The walk consumed every crossing order
                                // from other users; what still crosses is
                                // the user's own skipped order. Cancel the
                                // residue rather than rest a crossed book.
                                order.status = OrderStatus::Cancelled;
                                reject_reason = Some(RejectReason::SelfTrade);
                            }
                            Err(e) => {
                                self.fault(format!("resting insert failed: {e}"));
                                order.status = OrderStatus::Rejected;
                                reject_reason = Some(RejectReason::Internal {
                                    detail: "book insert failed".into(),
                                });
                            }
                        }
                    } else {
                        // A market order never rests.
                        order.status = OrderStatus::Cancelled;
                        reject_reason = Some(RejectReason::InsufficientLiquidity {
                            requested: order.quantity,
                            available: order.filled_qty,
                        });
                    }
                }
            }
        }

        if order.filled_qty > Decimal::ZERO {
            self.emit(ExchangeEvent::OrderFilled {
                order_id: order.id,
                status: order.status,
                fill_qty: order.filled_qty,
                avg_fill_price: order.avg_fill_price,
            });
        }
        if order.status.is_terminal() {
            self.finish_order(&order);
        }

        SubmitReport {
            order_id: order.id,
            status: order.status,
            fills,
            reject_reason: reject_reason.map(|r| r.to_payload()),
        }
    }

    /// Quantity a commit walk would fill, without mutating anything.
    /// Used by the fill-or-kill pre-check.
    pub(super) fn fillable_qty(&self, order: &Order, limit_price: Option<Decimal>) -> Decimal {
        let mut total = Decimal::ZERO;
        for (_, maker_id) in self.book.crossing_ids(order.side, limit_price) {
            let Some(maker) = self.book.get(maker_id) else {
                continue;
            };
            if maker.user_id == order.user_id {
                match self.market.self_trade_policy {
                    SelfTradePolicy::Skip | SelfTradePolicy::CancelOldest => continue,
                    SelfTradePolicy::CancelNewest => break,
                }
            }
            total += maker.remaining();
            if total >= order.quantity {
                break;
            }
        }
        total.min(order.quantity)
    }

    /// Terminal bookkeeping shared by every exit path: history, margin
    /// lock release, OCO peer cancellation, and liquidation finalization.
    pub(super) fn finish_order(&mut self, order: &Order) {
        self.terminal.insert(order.id, order.status);
        self.release_lock(order.id, order.user_id);
        if order.status == OrderStatus::Cancelled {
            self.emit(ExchangeEvent::OrderCancelled {
                order_id: order.id,
                symbol: self.market.symbol.clone(),
            });
        }
        self.cancel_oco_peer(order.id);
        if order.flags.contains(OrderFlags::LIQUIDATION) {
            self.finalize_liquidation(order.user_id);
        }
    }

    pub(super) fn reject_live(&mut self, order: &Order, reason: &RejectReason) -> SubmitReport {
        warn!(symbol = %self.market.symbol, id = %order.id, %reason, "order rejected in engine");
        self.terminal.insert(order.id, OrderStatus::Rejected);
        self.cancel_oco_peer(order.id);
        self.emit(ExchangeEvent::OrderRejected {
            order_id: order.id,
            user_id: order.user_id,
            symbol: order.symbol.clone(),
            reason: reason.to_payload(),
        });
        SubmitReport::rejected(order.id, reason)
    }

    /// Convert a fired conditional order and run it immediately, at the
    /// head of the intake.
    pub(super) fn run_triggered(&mut self, mut order: Order, ts: u64) {
        debug!(symbol = %self.market.symbol, id = %order.id, kind = %order.kind, "trigger fired");
        order.status = OrderStatus::Triggered;
        // Triggering one OCO leg cancels the other atomically.
        self.cancel_oco_peer(order.id);
        order.kind = match order.kind {
            OrderKind::StopLimit => OrderKind::Limit,
            _ => OrderKind::Market,
        };
        if order.kind == OrderKind::Market {
            order.price = None;
        }
        let _ = self.execute_order(order, ts);
    }

    /// Drain trade prices produced by the last execution and fire any
    /// conditional orders they crossed, recursively.
    pub(super) fn cascade_triggers(&mut self, ts: u64) {
        while let Some(price) = self.pending_trigger_prices.pop_front() {
            let fired = self.triggers.fire_at_price(price);
            for order in fired {
                self.run_triggered(order, ts);
            }
        }
    }

    // ---- settlement ------------------------------------------------------

    /// Apply one fill to one party: release the order's margin lock
    /// pro-rata, mutate the position, and settle margin, PnL, and fees
    /// against the wallet. Shortfalls of positions under liquidation are
    /// accumulated for the insurance fund instead of debited.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn settle_party(
        &mut self,
        user: UserId,
        order_id: OrderId,
        side: Side,
        qty: Decimal,
        price: Decimal,
        fee: Decimal,
        leverage: Decimal,
        mode: MarginMode,
    ) {
        let quote = self.market.quote_asset.clone();

        let mut slice = Decimal::ZERO;
        if let Some(lock) = self.order_locks.get_mut(&order_id) {
            slice = (lock.per_unit * qty).min(lock.remaining);
            lock.remaining -= slice;
        }
        if slice > Decimal::ZERO {
            self.wallets.release(user, &quote, slice);
        }

        let (outcome, pre_qty, pre_iso_margin, pos_mode, pos_leverage, closing) = {
            let pos = self.positions.get_or_create(user);
            let was_flat = !pos.is_open();
            let pre_qty = pos.quantity;
            let pre_iso = pos.isolated_margin;
            let outcome = pos.apply_fill(side, qty, price);
            if was_flat {
                pos.leverage = leverage;
                pos.margin_mode = mode;
                pos.status = PositionStatus::Open;
            }
            if pos.quantity.is_zero() && pos.status == PositionStatus::Open {
                pos.status = PositionStatus::Closed;
            }
            (
                outcome,
                pre_qty,
                pre_iso,
                pos.margin_mode,
                pos.leverage,
                pos.status == PositionStatus::Closing,
            )
        };

        let fee_settles_with_reduce = outcome.reduced_qty > Decimal::ZERO;

        if outcome.opened_qty > Decimal::ZERO {
            let m = round_amount(
                notional(price, outcome.opened_qty) / pos_leverage.max(Decimal::ONE),
            );
            match pos_mode {
                MarginMode::Isolated => {
                    self.wallets.debit_available(user, &quote, m);
                    if let Some(pos) = self.positions.get_mut(user) {
                        pos.isolated_margin += m;
                    }
                }
                MarginMode::Cross => {
                    let available = self.wallets.balance(user, &quote).available;
                    let locked = m.min(available);
                    let _ = self.wallets.reserve(user, &quote, locked);
                    *self.cross_margin.entry(user).or_default() += locked;
                }
            }
            if !fee_settles_with_reduce {
                self.settle_fee(user, &quote, fee);
            }
        }

        if outcome.reduced_qty > Decimal::ZERO {
            match pos_mode {
                MarginMode::Isolated => {
                    let share = if pre_qty > Decimal::ZERO {
                        round_amount(pre_iso_margin * outcome.reduced_qty / pre_qty)
                    } else {
                        Decimal::ZERO
                    };
                    if let Some(pos) = self.positions.get_mut(user) {
                        pos.isolated_margin = (pos.isolated_margin - share).max(Decimal::ZERO);
                    }
                    let net = share + outcome.realized_pnl - fee;
                    if net >= Decimal::ZERO {
                        self.wallets.credit_available(user, &quote, net);
                    } else if closing {
                        *self.shortfalls.entry(user).or_default() += -net;
                    } else {
                        self.wallets.debit_available(user, &quote, -net);
                    }
                }
                MarginMode::Cross => {
                    let held = self.cross_margin.get(&user).copied().unwrap_or_default();
                    let share = if pre_qty > Decimal::ZERO {
                        round_amount(held * outcome.reduced_qty / pre_qty).min(held)
                    } else {
                        Decimal::ZERO
                    };
                    if share > Decimal::ZERO {
                        self.wallets.release(user, &quote, share);
                        if let Some(cm) = self.cross_margin.get_mut(&user) {
                            *cm -= share;
                        }
                    }
                    let cash = outcome.realized_pnl - fee;
                    if cash >= Decimal::ZERO {
                        self.wallets.credit_available(user, &quote, cash);
                    } else {
                        let need = -cash;
                        let available = self.wallets.balance(user, &quote).available;
                        self.wallets.debit_available(user, &quote, need);
                        if closing && need > available {
                            *self.shortfalls.entry(user).or_default() += need - available;
                        }
                    }
                }
            }
        }

        let fallback_mark = self.last_mark.map_or(price, |m| m.mark);
        let snapshot = {
            let pos = self
                .positions
                .get_mut(user)
                .expect("position created above");
            pos.mark_price = fallback_mark;
            let rate = self.market.maintenance_rate_for(pos.notional());
            pos.liquidation_price = margin::liquidation_price(pos, rate);
            pos.clone()
        };
        self.emit(ExchangeEvent::PositionUpdated(snapshot));
    }

    fn settle_fee(&mut self, user: UserId, quote: &str, fee: Decimal) {
        if fee > Decimal::ZERO {
            self.wallets.debit_available(user, quote, fee);
        } else if fee < Decimal::ZERO {
            self.wallets.credit_available(user, quote, -fee);
        }
    }

    // ---- liquidation finalization ---------------------------------------

    /// Runs after the forced close order for a `Closing` position goes
    /// terminal: auto-deleverages any unclosed remainder, draws the
    /// insurance fund for the cash shortfall, socialises what the fund
    /// cannot cover, and marks the position `Liquidated`.
    pub(super) fn finalize_liquidation(&mut self, user: UserId) {
        let state = self.liq_state.remove(&user);
        let Some(pos) = self.positions.get(user) else {
            return;
        };
        if pos.status != PositionStatus::Closing {
            return;
        }
        let bankruptcy_price =
            state.map_or_else(|| margin::bankruptcy_price(pos), |s| s.bankruptcy_price);
        let total_qty = state.map_or(pos.quantity, |s| s.quantity);
        let bankrupt_side = pos.side;
        let remaining = pos.quantity;

        if remaining > Decimal::ZERO {
            self.auto_deleverage_qty(user, bankrupt_side, bankruptcy_price, remaining);
        }

        let shortfall = self.shortfalls.remove(&user).unwrap_or_default();
        let granted = if shortfall > Decimal::ZERO {
            self.insurance.draw(shortfall)
        } else {
            Decimal::ZERO
        };
        let uncovered = shortfall - granted;
        if uncovered > Decimal::ZERO {
            self.auto_deleverage_cash(user, bankrupt_side, bankruptcy_price, uncovered);
        }

        let snapshot = {
            let pos = self
                .positions
                .get_mut(user)
                .expect("position checked above");
            pos.status = PositionStatus::Liquidated;
            pos.clone()
        };
        warn!(symbol = %self.market.symbol, %user, qty = %total_qty,
              insurance = %granted, "position liquidated");
        self.emit(ExchangeEvent::Liquidated {
            user_id: user,
            symbol: self.market.symbol.clone(),
            quantity: total_qty,
            insurance_draw: granted,
        });
        self.emit(ExchangeEvent::PositionUpdated(snapshot));
    }

    /// Opposite-side candidates for auto-deleveraging, ranked by
    /// (leverage desc, unrealized PnL desc).
    fn adl_candidates(&self, against: PositionSide, exclude: UserId) -> Vec<UserId> {
        let mut rows: Vec<(UserId, Decimal, Decimal)> = self
            .positions
            .iter()
            .filter(|p| {
                p.user_id != exclude
                    && p.is_open()
                    && p.status == PositionStatus::Open
                    && p.side == against
            })
            .map(|p| (p.user_id, p.leverage, p.unrealized_pnl()))
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.cmp(&a.2)).then(a.0.cmp(&b.0)));
        rows.into_iter().map(|(user, _, _)| user).collect()
    }

    /// Close `qty` of the bankrupt position against ranked counterparties
    /// at the bankruptcy price, when the book had no liquidity left.
    fn auto_deleverage_qty(
        &mut self,
        user: UserId,
        bankrupt_side: PositionSide,
        bankruptcy_price: Decimal,
        qty: Decimal,
    ) {
        let Some(opening_side) = bankrupt_side.opening_order_side() else {
            return;
        };
        let bankrupt_fill_side = opening_side.opposite();
        let counter_fill_side = opening_side;
        let counter_side = match bankrupt_side {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
            PositionSide::Flat => return,
        };

        let mut need = qty;
        for counter in self.adl_candidates(counter_side, user) {
            if need <= Decimal::ZERO {
                break;
            }
            let close_qty = self
                .positions
                .get(counter)
                .map_or(Decimal::ZERO, |c| c.quantity.min(need));
            if close_qty <= Decimal::ZERO {
                continue;
            }
            debug!(symbol = %self.market.symbol, %counter, qty = %close_qty,
                   price = %bankruptcy_price, "auto-deleveraging counterparty");
            self.settle_adl_close(counter, counter_fill_side, close_qty, bankruptcy_price);
            self.settle_adl_close(user, bankrupt_fill_side, close_qty, bankruptcy_price);
            need -= close_qty;
        }
        if need > Decimal::ZERO {
            warn!(symbol = %self.market.symbol, remaining = %need,
                  "auto-deleveraging exhausted counterparties");
        }
    }

    /// Socialise a cash shortfall the insurance fund could not cover:
    /// force-close ranked winners at the bankruptcy price instead of the
    /// mark, until the foregone mark-value covers the shortfall.
    fn auto_deleverage_cash(
        &mut self,
        user: UserId,
        bankrupt_side: PositionSide,
        bankruptcy_price: Decimal,
        shortfall: Decimal,
    ) {
        let mark = self.last_mark.map_or(bankruptcy_price, |m| m.mark);
        let counter_side = match bankrupt_side {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
            PositionSide::Flat => return,
        };
        let counter_fill_side = match counter_side {
            PositionSide::Short => Side::Buy,
            PositionSide::Long => Side::Sell,
            PositionSide::Flat => return,
        };
        // Per closed unit, a counterparty realizes at the bankruptcy price
        // what it would otherwise carry at the mark; the difference is the
        // socialised haircut.
        let haircut_per_unit = match counter_side {
            PositionSide::Short => bankruptcy_price - mark,
            PositionSide::Long => mark - bankruptcy_price,
            PositionSide::Flat => Decimal::ZERO,
        };
        if haircut_per_unit <= Decimal::ZERO {
            warn!(symbol = %self.market.symbol, %shortfall,
                  "shortfall not coverable by deleveraging at current prices");
            return;
        }

        let mut uncovered = shortfall;
        for counter in self.adl_candidates(counter_side, user) {
            if uncovered <= Decimal::ZERO {
                break;
            }
            let close_qty = self.positions.get(counter).map_or(Decimal::ZERO, |c| {
                c.quantity.min(uncovered / haircut_per_unit)
            });
            if close_qty <= Decimal::ZERO {
                continue;
            }
            self.settle_adl_close(counter, counter_fill_side, close_qty, bankruptcy_price);
            uncovered -= round_amount(haircut_per_unit * close_qty);
        }
        if uncovered > Decimal::ZERO {
            warn!(symbol = %self.market.symbol, remaining = %uncovered,
                  "socialised loss not fully covered");
        }
    }

    fn settle_adl_close(&mut self, user: UserId, side: Side, qty: Decimal, price: Decimal) {
        let Some((leverage, mode)) = self
            .positions
            .get(user)
            .map(|p| (p.leverage, p.margin_mode))
        else {
            return;
        };
        // No order lock and no fees on forced position-to-position closes.
        self.settle_party(user, OrderId(0), side, qty, price, Decimal::ZERO, leverage, mode);
    }
}
