//! Conditional orders: stops, stop-limits, take-profits, trailing stops,
//! and one-cancels-other pairs.

use perp_engine::prelude::*;
use rust_decimal_macros::dec;

use super::common::{Rig, limit, market_order, stop_order};

fn rig() -> Rig {
    let mut rig = Rig::new(Rig::default_market());
    for user in 1..=6 {
        rig.deposit(user, dec!(1_000_000));
    }
    rig.mark(dec!(100));
    rig
}

#[test]
fn stop_parks_until_the_trigger_price_trades() {
    let mut rig = rig();
    // Liquidity above the trigger so the converted market order can fill.
    rig.submit(limit(1, Side::Sell, dec!(105), dec!(2)));

    let stop = rig.submit(stop_order(2, Side::Buy, dec!(105), dec!(1)));
    assert_eq!(stop.status, OrderStatus::Open);
    assert!(rig.snapshot().best_bid().is_none());

    // A trade through 105: maker at 105 lifted by another taker.
    let taker = rig.submit(limit(3, Side::Buy, dec!(105), dec!(0.5)));
    assert_eq!(taker.status, OrderStatus::Filled);

    // The stop converted to a market buy and consumed the remaining ask.
    let pos = rig.position(2).unwrap();
    assert_eq!(pos.side, PositionSide::Long);
    assert_eq!(pos.quantity, dec!(1));
    assert_eq!(pos.entry_price, dec!(105));
}

#[test]
fn stop_triggers_on_mark_ticks_too() {
    let mut rig = rig();
    rig.submit(limit(1, Side::Sell, dec!(106), dec!(1)));

    rig.submit(stop_order(2, Side::Buy, dec!(105), dec!(1)));
    rig.mark(dec!(104.9));
    assert!(rig.position(2).is_none());

    rig.mark(dec!(105));
    let pos = rig.position(2).unwrap();
    assert_eq!(pos.quantity, dec!(1));
    assert_eq!(pos.entry_price, dec!(106));
}

#[test]
fn stop_limit_converts_to_a_limit_order() {
    let mut rig = rig();
    let mut req = stop_order(2, Side::Buy, dec!(105), dec!(1));
    req.kind = OrderKind::StopLimit;
    req.price = Some(dec!(105.5));
    let report = rig.submit(req);
    assert_eq!(report.status, OrderStatus::Open);

    // Trigger on a mark tick with an empty book: the limit rests.
    rig.mark(dec!(105));
    let snap = rig.snapshot();
    assert_eq!(snap.best_bid(), Some((dec!(105.5), dec!(1))));
}

#[test]
fn take_profit_fires_on_the_favourable_side() {
    let mut rig = rig();
    rig.submit(limit(1, Side::Buy, dec!(109.9), dec!(1)));

    // Sell take-profit at 110 fires when the mark rises through it.
    let mut req = stop_order(2, Side::Sell, dec!(110), dec!(1));
    req.kind = OrderKind::TakeProfit;
    rig.submit(req);

    rig.mark(dec!(109));
    assert!(rig.position(2).is_none());

    rig.mark(dec!(110));
    let pos = rig.position(2).unwrap();
    assert_eq!(pos.side, PositionSide::Short);
    assert_eq!(pos.entry_price, dec!(109.9));
}

#[test]
fn conditional_orders_are_cancellable_until_triggered() {
    let mut rig = rig();
    let stop = rig.submit(stop_order(2, Side::Buy, dec!(105), dec!(1)));

    let report = rig.cancel(stop.order_id);
    assert!(report.cancelled);

    // The trigger never fires afterwards.
    rig.mark(dec!(120));
    assert!(rig.position(2).is_none());
}

#[test]
fn trailing_stop_follows_the_high_water_mark() {
    let mut rig = rig();
    // A bid to absorb the eventual sell.
    rig.submit(limit(1, Side::Buy, dec!(107.9), dec!(2)));

    let mut req = stop_order(2, Side::Sell, dec!(0), dec!(1));
    req.kind = OrderKind::TrailingStop;
    req.stop_price = None;
    req.trailing = Some(TrailingConfig {
        activation_price: dec!(100),
        callback_rate: dec!(0.1),
        high_water_mark: None,
    });
    let report = rig.submit(req);
    assert_eq!(report.status, OrderStatus::Open);

    rig.mark(dec!(100)); // activates, hwm 100
    rig.mark(dec!(120)); // hwm 120, stop 108
    assert!(rig.position(2).is_none());

    rig.mark(dec!(108)); // pullback to the trail: fires
    let pos = rig.position(2).unwrap();
    assert_eq!(pos.side, PositionSide::Short);
    assert_eq!(pos.quantity, dec!(1));
}

#[test]
fn oco_fill_of_one_leg_cancels_the_other() {
    let mut rig = rig();
    // Long position to protect.
    rig.submit(limit(1, Side::Sell, dec!(100), dec!(1)));
    rig.submit(market_order(2, Side::Buy, dec!(1)));

    // Leg A: profit-taking limit sell above the mark.
    let leg_a = rig.submit(limit(2, Side::Sell, dec!(110), dec!(1)));
    assert_eq!(leg_a.status, OrderStatus::Open);

    // Leg B: the opposite-side stop, linked to A.
    let mut leg_b = stop_order(2, Side::Buy, dec!(120), dec!(1));
    leg_b.oco_peer = Some(leg_a.order_id);
    let leg_b = rig.submit(leg_b);
    assert_eq!(leg_b.status, OrderStatus::Open);

    // The limit leg fills; the stop leg dies with it.
    let taker = rig.submit(market_order(3, Side::Buy, dec!(1)));
    assert_eq!(taker.status, OrderStatus::Filled);

    let report = rig.cancel(leg_b.order_id);
    assert!(!report.cancelled);
    assert_eq!(report.reason.unwrap().code, "NOT_CANCELLABLE");
}

#[test]
fn oco_cancel_of_one_leg_cancels_the_other() {
    let mut rig = rig();
    let leg_a = rig.submit(limit(2, Side::Sell, dec!(110), dec!(1)));
    let mut leg_b = stop_order(2, Side::Buy, dec!(120), dec!(1));
    leg_b.oco_peer = Some(leg_a.order_id);
    let leg_b = rig.submit(leg_b);

    assert!(rig.cancel(leg_b.order_id).cancelled);

    // Leg A went with it.
    let report = rig.cancel(leg_a.order_id);
    assert!(!report.cancelled);
    assert_eq!(report.reason.unwrap().code, "NOT_CANCELLABLE");
}

#[test]
fn oco_requires_a_legal_pair() {
    let mut rig = rig();
    let leg_a = rig.submit(limit(2, Side::Sell, dec!(110), dec!(1)));

    // Same-side pair is rejected.
    let mut bad = limit(2, Side::Sell, dec!(120), dec!(1));
    bad.oco_peer = Some(leg_a.order_id);
    let report = rig.submit(bad);
    assert_eq!(report.status, OrderStatus::Rejected);
    assert_eq!(report.reject_reason.unwrap().code, "VALIDATION");
}

#[test]
fn trailing_callback_out_of_range_is_rejected() {
    let mut rig = rig();
    let mut req = stop_order(2, Side::Sell, dec!(0), dec!(1));
    req.kind = OrderKind::TrailingStop;
    req.stop_price = None;
    req.trailing = Some(TrailingConfig {
        activation_price: dec!(110),
        callback_rate: dec!(0.0005),
        high_water_mark: None,
    });
    let report = rig.submit(req);
    assert_eq!(report.status, OrderStatus::Rejected);
    assert_eq!(report.reject_reason.unwrap().code, "VALIDATION");
}
