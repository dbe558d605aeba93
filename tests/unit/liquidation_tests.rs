//! Liquidation flow: margin breach detection, forced closes, insurance
//! fund draws, and auto-deleveraging.

use perp_engine::liquidation::forced_close_request;
use perp_engine::prelude::*;
use perp_engine::{ApplyOutcome, IntakeCommand, LiquidationRequest};
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

/// Open a 1 BTC long at 100 with 10x isolated margin for user 1, against
/// user 2's short.
fn open_long(rig: &mut Rig) {
    rig.submit(limit(2, Side::Sell, dec!(100), dec!(1)));
    let report = rig.submit(market_order(1, Side::Buy, dec!(1)));
    assert_eq!(report.status, OrderStatus::Filled);
    let pos = rig.position(1).unwrap();
    assert_eq!(pos.side, PositionSide::Long);
    assert_eq!(pos.isolated_margin, dec!(10));
    // E(1 - 1/L + r) = 100 * 0.905 = 90.5
    assert_eq!(pos.liquidation_price, dec!(90.5));
}

/// Apply the forced close the liquidation engine would submit.
fn force_close(rig: &mut Rig, user: u64, side: Side, qty: Decimal) -> SubmitReport {
    let request = forced_close_request(&LiquidationRequest {
        user: UserId(user),
        symbol: "BTCUSDT".into(),
        close_side: side,
        quantity: qty,
    });
    let outcome = rig.core.apply(IntakeCommand::Submit {
        order_id: OrderId(900 + user),
        request,
        ts: 9,
    });
    match outcome {
        ApplyOutcome::Submit(report) => report,
        other => panic!("expected submit outcome, got {other:?}"),
    }
}

#[test]
fn mark_above_liquidation_price_does_not_enqueue() {
    let mut rig = rig();
    open_long(&mut rig);

    rig.mark(dec!(90.6));
    let pos = rig.position(1).unwrap();
    assert_eq!(pos.status, PositionStatus::Open);
}

#[test]
fn breach_flips_position_to_closing_exactly_once() {
    let mut rig = rig();
    open_long(&mut rig);

    rig.mark(dec!(90.5));
    let pos = rig.position(1).unwrap();
    assert_eq!(pos.status, PositionStatus::Closing);

    let queued_before = rig
        .drain_events()
        .iter()
        .filter(|e| matches!(e, ExchangeEvent::LiquidationQueued { .. }))
        .count();
    assert_eq!(queued_before, 1);

    // Re-ticking a Closing position is a no-op.
    rig.mark(dec!(85));
    let queued_again = rig
        .drain_events()
        .iter()
        .filter(|e| matches!(e, ExchangeEvent::LiquidationQueued { .. }))
        .count();
    assert_eq!(queued_again, 0);
}

#[test]
fn liquidation_with_residual_equity_credits_the_user() {
    let mut rig = rig();
    open_long(&mut rig);
    let before = rig.wallets.balance(UserId(1), "USDT");

    rig.mark(dec!(90.4));
    assert_eq!(rig.position(1).unwrap().status, PositionStatus::Closing);

    // Book liquidity just under the breach: the close realizes a small
    // positive residue (margin 10 - loss 9.7).
    rig.submit(limit(3, Side::Buy, dec!(90.3), dec!(1)));
    let report = force_close(&mut rig, 1, Side::Sell, dec!(1));
    assert_eq!(report.status, OrderStatus::Filled);

    let pos = rig.position(1).unwrap();
    assert_eq!(pos.status, PositionStatus::Liquidated);
    assert_eq!(pos.side, PositionSide::Flat);

    let after = rig.wallets.balance(UserId(1), "USDT");
    // The 10 margin was spent at entry; the 0.3 residue comes back.
    assert_eq!(after.available, before.available + dec!(0.3));
    assert_eq!(rig.insurance.balance(), Decimal::ZERO);

    let liquidated = rig
        .drain_events()
        .into_iter()
        .find_map(|e| match e {
            ExchangeEvent::Liquidated {
                insurance_draw, ..
            } => Some(insurance_draw),
            _ => None,
        })
        .unwrap();
    assert_eq!(liquidated, Decimal::ZERO);
}

#[test]
fn shortfall_is_drawn_from_the_insurance_fund() {
    let mut rig = rig();
    rig.insurance.deposit(dec!(50));
    open_long(&mut rig);

    rig.mark(dec!(89));
    assert_eq!(rig.position(1).unwrap().status, PositionStatus::Closing);

    // The close fills below the bankruptcy price (90): loss exceeds the
    // margin by 1.
    rig.submit(limit(3, Side::Buy, dec!(89), dec!(1)));
    let report = force_close(&mut rig, 1, Side::Sell, dec!(1));
    assert_eq!(report.status, OrderStatus::Filled);

    assert_eq!(rig.position(1).unwrap().status, PositionStatus::Liquidated);
    assert_eq!(rig.insurance.balance(), dec!(49));

    let draw = rig
        .drain_events()
        .into_iter()
        .find_map(|e| match e {
            ExchangeEvent::Liquidated {
                insurance_draw, ..
            } => Some(insurance_draw),
            _ => None,
        })
        .unwrap();
    assert_eq!(draw, dec!(1));
}

#[test]
fn unfillable_forced_close_deleverages_counterparties() {
    let mut rig = rig();
    open_long(&mut rig);

    // Crash well below bankruptcy with an empty book.
    rig.mark(dec!(85));
    assert_eq!(rig.position(1).unwrap().status, PositionStatus::Closing);

    let report = force_close(&mut rig, 1, Side::Sell, dec!(1));
    // Nothing in the book: the market order cancels...
    assert_eq!(report.status, OrderStatus::Cancelled);

    // ...and the remainder is closed against the short at the bankruptcy
    // price (90).
    let bankrupt = rig.position(1).unwrap();
    assert_eq!(bankrupt.status, PositionStatus::Liquidated);
    assert_eq!(bankrupt.side, PositionSide::Flat);

    let counter = rig.position(2).unwrap();
    assert_eq!(counter.side, PositionSide::Flat);
    // The short entered at 100 and was closed at 90: +10 realized.
    assert_eq!(counter.realized_pnl, dec!(10));
}

#[test]
fn exhausted_fund_socialises_the_loss_at_the_bankruptcy_price() {
    let mut rig = rig();
    open_long(&mut rig);

    rig.mark(dec!(85));

    // A fresh buyer absorbs the forced close at 85, five under the
    // bankruptcy price: shortfall 5, fund empty.
    rig.submit(limit(3, Side::Buy, dec!(85), dec!(1)));
    let report = force_close(&mut rig, 1, Side::Sell, dec!(1));
    assert_eq!(report.status, OrderStatus::Filled);

    assert_eq!(rig.position(1).unwrap().status, PositionStatus::Liquidated);
    assert_eq!(rig.insurance.balance(), Decimal::ZERO);

    // The winning short was force-closed at 90 instead of the 85 mark,
    // absorbing the 5 as a haircut: +10 realized instead of +15.
    let counter = rig.position(2).unwrap();
    assert_eq!(counter.side, PositionSide::Flat);
    assert_eq!(counter.realized_pnl, dec!(10));
}

#[test]
fn margin_call_warns_before_breach() {
    let mut rig = rig();
    open_long(&mut rig);
    rig.drain_events();

    rig.mark(dec!(90.55));
    let called = rig
        .drain_events()
        .iter()
        .any(|e| matches!(e, ExchangeEvent::MarginCall { .. }));
    assert!(called);
    assert_eq!(rig.position(1).unwrap().status, PositionStatus::Open);
}

#[test]
fn short_positions_liquidate_on_rallies() {
    let mut rig = rig();
    // User 1 shorts against user 2's bid.
    rig.submit(limit(2, Side::Buy, dec!(100), dec!(1)));
    rig.submit(market_order(1, Side::Sell, dec!(1)));

    let pos = rig.position(1).unwrap();
    assert_eq!(pos.side, PositionSide::Short);
    // E(1 + 1/L - r) = 100 * 1.095 = 109.5
    assert_eq!(pos.liquidation_price, dec!(109.5));

    rig.mark(dec!(109.5));
    assert_eq!(rig.position(1).unwrap().status, PositionStatus::Closing);
}
