//! Property tests over randomized operation sequences: book integrity,
//! quantity conservation, position identity, price-time priority, FOK
//! atomicity, and replay determinism.

use proptest::prelude::*;
use perp_engine::prelude::*;
use perp_engine::ShardCore;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;

use super::common::{Rig, limit, market_order};

#[derive(Debug, Clone)]
enum Op {
    Limit {
        user: u64,
        side: Side,
        price_ticks: u32,
        qty_steps: u32,
    },
    Market {
        user: u64,
        side: Side,
        qty_steps: u32,
    },
    CancelNth(usize),
}

fn side_strategy() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Buy), Just(Side::Sell)]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..=4, side_strategy(), 0u32..80, 1u32..20).prop_map(
            |(user, side, price_ticks, qty_steps)| Op::Limit {
                user,
                side,
                price_ticks,
                qty_steps,
            }
        ),
        (1u64..=4, side_strategy(), 1u32..20).prop_map(|(user, side, qty_steps)| Op::Market {
            user,
            side,
            qty_steps,
        }),
        (0usize..32).prop_map(Op::CancelNth),
    ]
}

fn price_at(ticks: u32) -> Decimal {
    dec!(80) + Decimal::from(ticks) * dec!(0.5)
}

fn qty_at(steps: u32) -> Decimal {
    Decimal::from(steps) * dec!(0.1)
}

fn fresh_rig() -> Rig {
    let mut rig = Rig::new(Rig::default_market());
    for user in 1..=4 {
        rig.deposit(user, dec!(100_000_000));
    }
    rig.mark(dec!(100));
    rig
}

fn apply_ops(rig: &mut Rig, ops: &[Op]) -> Vec<(OrderId, Decimal)> {
    let mut submitted: Vec<(OrderId, Decimal)> = Vec::new();
    for op in ops {
        match op {
            Op::Limit {
                user,
                side,
                price_ticks,
                qty_steps,
            } => {
                let report = rig.submit(limit(
                    *user,
                    *side,
                    price_at(*price_ticks),
                    qty_at(*qty_steps),
                ));
                submitted.push((report.order_id, qty_at(*qty_steps)));
            }
            Op::Market {
                user,
                side,
                qty_steps,
            } => {
                let report = rig.submit(market_order(*user, *side, qty_at(*qty_steps)));
                submitted.push((report.order_id, qty_at(*qty_steps)));
            }
            Op::CancelNth(n) => {
                if let Some((order_id, _)) = submitted.get(n % submitted.len().max(1)) {
                    let _ = rig.cancel(*order_id);
                }
            }
        }
    }
    submitted
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn book_is_never_crossed_at_rest(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let mut rig = fresh_rig();
        for op in &ops {
            apply_ops(&mut rig, std::slice::from_ref(op));
            let snap = rig.snapshot();
            if let (Some((bid, _)), Some((ask, _))) = (snap.best_bid(), snap.best_ask()) {
                prop_assert!(bid < ask, "crossed book: bid {bid} >= ask {ask}");
            }
        }
        prop_assert!(!rig.core.is_faulted());
    }

    #[test]
    fn filled_quantity_never_exceeds_order_quantity(
        ops in proptest::collection::vec(op_strategy(), 1..40),
    ) {
        let mut rig = fresh_rig();
        let submitted = apply_ops(&mut rig, &ops);
        let quantities: HashMap<OrderId, Decimal> = submitted.into_iter().collect();

        let mut filled: HashMap<OrderId, Decimal> = HashMap::new();
        for event in rig.drain_events() {
            if let ExchangeEvent::Trade(trade) = event {
                *filled.entry(trade.taker_order_id).or_default() += trade.quantity;
                *filled.entry(trade.maker_order_id).or_default() += trade.quantity;
            }
        }
        for (order_id, total) in filled {
            if let Some(quantity) = quantities.get(&order_id) {
                prop_assert!(
                    total <= *quantity,
                    "order {order_id} filled {total} of {quantity}"
                );
            }
        }
    }

    #[test]
    fn position_identity_holds(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let mut rig = fresh_rig();
        apply_ops(&mut rig, &ops);

        // Signed base flow per user across every trade.
        let mut net: HashMap<UserId, Decimal> = HashMap::new();
        for event in rig.drain_events() {
            if let ExchangeEvent::Trade(trade) = event {
                let taker_delta = trade.quantity * trade.taker_side.sign();
                *net.entry(trade.taker_user_id).or_default() += taker_delta;
                *net.entry(trade.maker_user_id).or_default() -= taker_delta;
            }
        }
        for user in 1..=4u64 {
            let expected = net.get(&UserId(user)).copied().unwrap_or_default();
            let actual = rig
                .position(user)
                .map(|p| p.quantity * p.side.sign())
                .unwrap_or_default();
            prop_assert_eq!(actual, expected, "user {} position identity", user);
        }
    }

    #[test]
    fn pnl_is_consistent_at_the_mark(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let mut rig = fresh_rig();
        apply_ops(&mut rig, &ops);

        // Expected total PnL per user at the mark (100): the sum of
        // (mark - fill price) * qty, signed by fill direction.
        let mark = dec!(100);
        let mut expected: HashMap<UserId, Decimal> = HashMap::new();
        for event in rig.drain_events() {
            if let ExchangeEvent::Trade(trade) = event {
                let per_unit = mark - trade.price;
                let taker = per_unit * trade.quantity * trade.taker_side.sign();
                *expected.entry(trade.taker_user_id).or_default() += taker;
                *expected.entry(trade.maker_user_id).or_default() -= taker;
            }
        }

        let tolerance = dec!(0.000001);
        for user in 1..=4u64 {
            let want = expected.get(&UserId(user)).copied().unwrap_or_default();
            let got = rig
                .position(user)
                .map(|p| p.realized_pnl + p.unrealized_pnl())
                .unwrap_or_default();
            let diff = (got - want).abs();
            prop_assert!(
                diff <= tolerance,
                "user {user}: pnl {got} vs expected {want}"
            );
        }
    }

    #[test]
    fn fok_reject_leaves_exact_pre_state(
        ops in proptest::collection::vec(op_strategy(), 1..20),
        qty_steps in 1u32..20,
    ) {
        let mut rig = fresh_rig();
        apply_ops(&mut rig, &ops);

        let before = rig.core.snapshot(256);
        let before_positions = rig.core.positions_snapshot(None);

        // Ask for more than the whole ask side plus one step: never fillable.
        let ask_depth: Decimal = before.asks.iter().map(|l| l.quantity).sum();
        let mut request = market_order(1, Side::Buy, ask_depth + qty_at(qty_steps));
        request.time_in_force = TimeInForce::Fok;
        let report = rig.submit(request);

        prop_assert_eq!(report.status, OrderStatus::Rejected);
        prop_assert!(report.fills.is_empty());

        let after = rig.core.snapshot(256);
        prop_assert_eq!(after.bids, before.bids);
        prop_assert_eq!(after.asks, before.asks);
        prop_assert_eq!(rig.core.positions_snapshot(None).len(), before_positions.len());
    }

    #[test]
    fn same_price_orders_match_in_arrival_order(count in 2usize..6) {
        let mut rig = fresh_rig();
        let mut makers = Vec::new();
        for i in 0..count {
            let report = rig.submit(limit(1 + (i as u64 % 2), Side::Sell, dec!(100), dec!(1)));
            makers.push(report.order_id);
        }

        // Lift the whole level; user 3 never rests so no self-trade skips.
        let report = rig.submit(market_order(3, Side::Buy, Decimal::from(count as u64)));
        prop_assert_eq!(report.status, OrderStatus::Filled);
        let matched: Vec<OrderId> = report.fills.iter().map(|f| f.maker_order_id).collect();
        prop_assert_eq!(matched, makers);
    }

    #[test]
    fn replay_matches_original(ops in proptest::collection::vec(op_strategy(), 1..30)) {
        let mut rig = fresh_rig();
        apply_ops(&mut rig, &ops);

        let wallets = Arc::new(WalletBook::new());
        for user in 1..=4 {
            wallets.deposit(UserId(user), "USDT", dec!(100_000_000));
        }
        let replayed = ShardCore::replay(
            Rig::default_market(),
            wallets,
            Arc::new(InsuranceFund::default()),
            Arc::new(EventBus::new()),
            rig.core.journal().records(),
        );

        let original = rig.core.snapshot(256);
        let replay = replayed.snapshot(256);
        prop_assert_eq!(replay.bids, original.bids);
        prop_assert_eq!(replay.asks, original.asks);
    }
}
