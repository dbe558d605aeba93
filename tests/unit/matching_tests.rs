//! Matching engine behavior: the seed scenarios plus cancel, modify, and
//! self-trade handling.

use perp_engine::prelude::*;
use perp_engine::{ApplyOutcome, IntakeCommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::common::{Rig, limit, market_order};

fn rig() -> Rig {
    let mut rig = Rig::new(Rig::default_market());
    for user in 1..=6 {
        rig.deposit(user, dec!(1_000_000));
    }
    rig.mark(dec!(100));
    rig
}

#[test]
fn simple_cross_market_buy_fills_resting_ask() {
    let mut rig = rig();
    let maker = rig.submit(limit(1, Side::Sell, dec!(100), dec!(1)));
    assert_eq!(maker.status, OrderStatus::Open);

    let taker = rig.submit(market_order(2, Side::Buy, dec!(1)));
    assert_eq!(taker.status, OrderStatus::Filled);
    assert_eq!(taker.fills.len(), 1);
    assert_eq!(taker.fills[0].price, dec!(100));
    assert_eq!(taker.fills[0].quantity, dec!(1));

    // Maker removed from the book.
    let snap = rig.snapshot();
    assert!(snap.best_ask().is_none());

    // Taker is long 1 @ 100.
    let pos = rig.position(2).unwrap();
    assert_eq!(pos.side, PositionSide::Long);
    assert_eq!(pos.quantity, dec!(1));
    assert_eq!(pos.entry_price, dec!(100));
}

#[test]
fn partial_fill_then_rest_at_makers_price() {
    let mut rig = rig();
    let resting = rig.submit(limit(1, Side::Buy, dec!(100), dec!(2)));
    assert_eq!(resting.status, OrderStatus::Open);

    // Sell 1.5 limited at 99 crosses; execution at the maker's 100.
    let taker = rig.submit(limit(2, Side::Sell, dec!(99), dec!(1.5)));
    assert_eq!(taker.status, OrderStatus::Filled);
    assert_eq!(taker.fills.len(), 1);
    assert_eq!(taker.fills[0].price, dec!(100));
    assert_eq!(taker.fills[0].quantity, dec!(1.5));

    // The original buy still rests with the remainder.
    let snap = rig.snapshot();
    assert_eq!(snap.best_bid(), Some((dec!(100), dec!(0.5))));
}

#[test]
fn price_time_priority_matches_older_first() {
    let mut rig = rig();
    let first = rig.submit(limit(1, Side::Sell, dec!(100), dec!(1)));
    let second = rig.submit(limit(2, Side::Sell, dec!(100), dec!(1)));

    let taker = rig.submit(market_order(3, Side::Buy, dec!(1)));
    assert_eq!(taker.fills.len(), 1);
    assert_eq!(taker.fills[0].maker_order_id, first.order_id);

    // The younger order is untouched.
    let snap = rig.snapshot();
    assert_eq!(snap.best_ask(), Some((dec!(100), dec!(1))));
    assert!(rig.cancel(second.order_id).cancelled);
}

#[test]
fn post_only_that_would_cross_is_rejected() {
    let mut rig = rig();
    rig.submit(limit(1, Side::Sell, dec!(100), dec!(1)));

    let mut req = limit(2, Side::Buy, dec!(100), dec!(1));
    req.flags = OrderFlags::POST_ONLY;
    let report = rig.submit(req);
    assert_eq!(report.status, OrderStatus::Rejected);
    assert_eq!(
        report.reject_reason.unwrap().code,
        "POST_ONLY_WOULD_CROSS"
    );

    // Book unchanged.
    let snap = rig.snapshot();
    assert_eq!(snap.best_ask(), Some((dec!(100), dec!(1))));
    assert!(snap.best_bid().is_none());
}

#[test]
fn post_only_away_from_the_spread_rests() {
    let mut rig = rig();
    rig.submit(limit(1, Side::Sell, dec!(100), dec!(1)));

    let mut req = limit(2, Side::Buy, dec!(99), dec!(1));
    req.flags = OrderFlags::POST_ONLY;
    let report = rig.submit(req);
    assert_eq!(report.status, OrderStatus::Open);
}

#[test]
fn fok_without_full_depth_is_rejected_atomically() {
    let mut rig = rig();
    rig.submit(limit(1, Side::Sell, dec!(100), dec!(0.5)));
    let before = rig.snapshot();

    let mut req = market_order(2, Side::Buy, dec!(1));
    req.time_in_force = TimeInForce::Fok;
    let report = rig.submit(req);
    assert_eq!(report.status, OrderStatus::Rejected);
    assert_eq!(report.reject_reason.unwrap().code, "FOK_NOT_FILLABLE");
    assert!(report.fills.is_empty());

    // Exact pre-state: book levels and positions untouched.
    let after = rig.snapshot();
    assert_eq!(after.bids, before.bids);
    assert_eq!(after.asks, before.asks);
    assert!(rig.position(2).is_none());
}

#[test]
fn fok_with_full_depth_fills_completely() {
    let mut rig = rig();
    rig.submit(limit(1, Side::Sell, dec!(100), dec!(0.6)));
    rig.submit(limit(3, Side::Sell, dec!(101), dec!(0.6)));

    let mut req = market_order(2, Side::Buy, dec!(1));
    req.time_in_force = TimeInForce::Fok;
    let report = rig.submit(req);
    assert_eq!(report.status, OrderStatus::Filled);
    assert_eq!(report.fills.len(), 2);
}

#[test]
fn ioc_cancels_the_residue_but_keeps_partials() {
    let mut rig = rig();
    rig.submit(limit(1, Side::Sell, dec!(100), dec!(0.4)));

    let mut req = limit(2, Side::Buy, dec!(100), dec!(1));
    req.time_in_force = TimeInForce::Ioc;
    let report = rig.submit(req);
    assert_eq!(report.status, OrderStatus::Cancelled);
    assert_eq!(report.fills.len(), 1);
    assert_eq!(report.fills[0].quantity, dec!(0.4));

    // Nothing rested.
    assert!(rig.snapshot().best_bid().is_none());
}

#[test]
fn market_order_never_rests() {
    let mut rig = rig();
    rig.submit(limit(1, Side::Sell, dec!(100), dec!(0.4)));

    let report = rig.submit(market_order(2, Side::Buy, dec!(1)));
    assert_eq!(report.status, OrderStatus::Cancelled);
    assert_eq!(report.fills.len(), 1);
    assert!(rig.snapshot().best_bid().is_none());
}

#[test]
fn self_trade_is_skipped_by_default() {
    let mut rig = rig();
    // User 1 rests at the best price, user 2 behind them.
    let own = rig.submit(limit(1, Side::Sell, dec!(100), dec!(1)));
    rig.submit(limit(2, Side::Sell, dec!(101), dec!(1)));

    let taker = rig.submit(market_order(1, Side::Buy, dec!(1)));
    assert_eq!(taker.status, OrderStatus::Filled);
    // Matched the deeper level, not the user's own order.
    assert_eq!(taker.fills[0].price, dec!(101));

    // The user's own resting order is untouched.
    let snap = rig.snapshot();
    assert_eq!(snap.best_ask(), Some((dec!(100), dec!(1))));
    assert!(rig.cancel(own.order_id).cancelled);
}

#[test]
fn self_trade_cancel_oldest_removes_the_resting_order() {
    let mut market = Rig::default_market();
    market.self_trade_policy = SelfTradePolicy::CancelOldest;
    let mut rig = Rig::new(market);
    rig.deposit(1, dec!(1_000_000));
    rig.deposit(2, dec!(1_000_000));
    rig.mark(dec!(100));

    rig.submit(limit(1, Side::Sell, dec!(100), dec!(1)));
    rig.submit(limit(2, Side::Sell, dec!(101), dec!(1)));

    let taker = rig.submit(market_order(1, Side::Buy, dec!(1)));
    assert_eq!(taker.status, OrderStatus::Filled);
    assert_eq!(taker.fills[0].price, dec!(101));
    // The user's own order was cancelled, leaving 101 empty too.
    let snap = rig.snapshot();
    assert!(snap.best_ask().is_none());
}

#[test]
fn self_trade_cancel_newest_rejects_an_unfilled_taker() {
    let mut market = Rig::default_market();
    market.self_trade_policy = SelfTradePolicy::CancelNewest;
    let mut rig = Rig::new(market);
    rig.deposit(1, dec!(1_000_000));
    rig.mark(dec!(100));

    rig.submit(limit(1, Side::Sell, dec!(100), dec!(1)));
    let taker = rig.submit(market_order(1, Side::Buy, dec!(1)));
    assert_eq!(taker.status, OrderStatus::Rejected);
    assert_eq!(taker.reject_reason.unwrap().code, "SELF_TRADE");
}

#[test]
fn cancel_is_idempotent_on_terminal_orders() {
    let mut rig = rig();
    let report = rig.submit(limit(1, Side::Buy, dec!(99), dec!(1)));

    let first = rig.cancel(report.order_id);
    assert!(first.cancelled);

    let second = rig.cancel(report.order_id);
    assert!(!second.cancelled);
    assert_eq!(second.reason.as_ref().unwrap().code, "NOT_CANCELLABLE");

    let third = rig.cancel(report.order_id);
    assert!(!third.cancelled);
    assert_eq!(third.reason.unwrap().code, "NOT_CANCELLABLE");
}

#[test]
fn cancel_unknown_order_reports_not_found() {
    let mut rig = rig();
    let report = rig.cancel(OrderId(9_999));
    assert!(!report.cancelled);
    assert_eq!(report.reason.unwrap().code, "NOT_FOUND");
}

#[test]
fn cancel_releases_the_margin_lock() {
    let mut rig = rig();
    let before = rig.wallets.balance(UserId(1), "USDT");
    let report = rig.submit(limit(1, Side::Buy, dec!(100), dec!(1)));

    let during = rig.wallets.balance(UserId(1), "USDT");
    assert!(during.locked > Decimal::ZERO);

    rig.cancel(report.order_id);
    let after = rig.wallets.balance(UserId(1), "USDT");
    assert_eq!(after.available, before.available);
    assert_eq!(after.locked, Decimal::ZERO);
}

#[test]
fn modify_replaces_and_loses_time_priority() {
    let mut rig = rig();
    let first = rig.submit(limit(1, Side::Sell, dec!(100), dec!(1)));
    let second = rig.submit(limit(2, Side::Sell, dec!(100), dec!(1)));

    // Reprice the older order back onto the same level: it requeues
    // behind the untouched one.
    let outcome = rig.core.apply(IntakeCommand::Modify {
        order_id: first.order_id,
        changes: ModifyRequest {
            price: Some(dec!(100)),
            quantity: Some(dec!(1)),
            stop_price: None,
        },
        ts: 2,
    });
    let ApplyOutcome::Submit(modified) = outcome else {
        panic!("expected submit outcome");
    };
    assert_eq!(modified.status, OrderStatus::Open);

    let taker = rig.submit(market_order(3, Side::Buy, dec!(1)));
    assert_eq!(taker.fills[0].maker_order_id, second.order_id);
}

#[test]
fn validation_rejections_surface_wire_codes() {
    let mut rig = rig();

    // Off-tick price.
    let mut req = limit(1, Side::Buy, dec!(99.95), dec!(1));
    req.price = Some(dec!(99.95));
    let report = rig.submit(req);
    assert_eq!(report.status, OrderStatus::Rejected);
    assert_eq!(report.reject_reason.unwrap().code, "VALIDATION");

    // Excessive leverage.
    let mut req = limit(1, Side::Buy, dec!(100), dec!(1));
    req.leverage = dec!(5_000);
    let report = rig.submit(req);
    assert_eq!(report.reject_reason.unwrap().code, "INVALID_LEVERAGE");

    // Broke user.
    let report = {
        let mut rig2 = Rig::new(Rig::default_market());
        rig2.mark(dec!(100));
        rig2.submit(limit(9, Side::Buy, dec!(100), dec!(1)))
    };
    assert_eq!(
        report.reject_reason.unwrap().code,
        "INSUFFICIENT_BALANCE"
    );
}

#[test]
fn suspended_market_rejects_orders() {
    let mut rig = rig();
    let _ = rig.core.apply(IntakeCommand::SetStatus(MarketStatus::Suspended));
    let report = rig.submit(limit(1, Side::Buy, dec!(99), dec!(1)));
    assert_eq!(report.status, OrderStatus::Rejected);
    assert_eq!(report.reject_reason.unwrap().code, "MARKET_CLOSED");
}

#[test]
fn halt_blocks_and_lapses_on_a_late_tick() {
    let mut rig = rig();
    let _ = rig.core.apply(IntakeCommand::Halt { resume_at: 1_000 });

    rig.mark_at(dec!(100), 500);
    let report = rig.submit(limit(1, Side::Buy, dec!(99), dec!(1)));
    assert_eq!(report.reject_reason.unwrap().code, "MARKET_CLOSED");

    // A tick past the resume time reopens intake.
    rig.mark_at(dec!(100), 1_000);
    let report = rig.submit(limit(1, Side::Buy, dec!(99), dec!(1)));
    assert_eq!(report.status, OrderStatus::Open);
}

#[test]
fn delisting_cancels_every_live_order() {
    let mut rig = rig();
    rig.submit(limit(1, Side::Buy, dec!(99), dec!(1)));
    rig.submit(limit(2, Side::Sell, dec!(101), dec!(1)));
    rig.submit(super::common::stop_order(3, Side::Buy, dec!(105), dec!(1)));

    let _ = rig.core.apply(IntakeCommand::SetStatus(MarketStatus::Delisted));

    let snap = rig.snapshot();
    assert!(snap.best_bid().is_none());
    assert!(snap.best_ask().is_none());
    let cancelled = rig
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, ExchangeEvent::OrderCancelled { .. }))
        .count();
    assert_eq!(cancelled, 3);
}

#[test]
fn maker_price_improvement_goes_to_the_taker() {
    let mut rig = rig();
    rig.submit(limit(1, Side::Sell, dec!(99.5), dec!(1)));
    // Buyer willing to pay 101 executes at 99.5.
    let taker = rig.submit(limit(2, Side::Buy, dec!(101), dec!(1)));
    assert_eq!(taker.fills[0].price, dec!(99.5));
    let pos = rig.position(2).unwrap();
    assert_eq!(pos.entry_price, dec!(99.5));
}

#[test]
fn fees_settle_in_quote_and_accrue_to_the_trade() {
    let mut market = Rig::default_market();
    market.fees = FeeSchedule::from_bps(-2, 5);
    let mut rig = Rig::new(market);
    rig.deposit(1, dec!(1_000_000));
    rig.deposit(2, dec!(1_000_000));
    rig.mark(dec!(100));

    rig.submit(limit(1, Side::Sell, dec!(100), dec!(1)));
    let taker = rig.submit(market_order(2, Side::Buy, dec!(1)));
    let trade = &taker.fills[0];
    // 5 bps of 100 notional = 0.05; maker rebate 2 bps = -0.02.
    assert_eq!(trade.taker_fee, dec!(0.05));
    assert_eq!(trade.maker_fee, dec!(-0.02));
}
