//! Order validation: a pure function over the request and read-only
//! snapshots of market, wallet, and position state.
//!
//! Checks run in a fixed order and stop at the first failure, so clients
//! always see the highest-priority problem first. The validator never
//! mutates anything; margin reservation happens afterwards in the shard.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::errors::RejectReason;
use crate::market::Market;
use crate::position::Position;
use crate::types::qty::{is_multiple_of, notional, round_amount};
use crate::types::{
    Order, OrderFlags, OrderId, OrderKind, OrderRequest, OrderStatus, Seq, Side,
};
use crate::wallet::Balance;

/// Lower bound (exclusive) for trailing callback rates: 0.1%.
const MIN_CALLBACK_RATE: Decimal = dec!(0.001);
/// Upper bound (exclusive) for trailing callback rates: 50%.
const MAX_CALLBACK_RATE: Decimal = dec!(0.5);

/// Read-only state the validator consults.
#[derive(Debug)]
pub struct ValidationContext<'a> {
    /// The market addressed by the request.
    pub market: &'a Market,
    /// Current mark price, when the feed has published one.
    pub mark_price: Option<Decimal>,
    /// The user's quote-asset balance.
    pub quote_balance: Balance,
    /// The user's position on this symbol, if any.
    pub position: Option<&'a Position>,
    /// The other leg of an OCO pair, resolved by the shard.
    pub oco_peer: Option<&'a Order>,
    /// The user's open-order count on this symbol.
    pub user_open_orders: usize,
    /// Total open orders on this symbol.
    pub total_open_orders: usize,
    /// Wall-clock now (millis), used only to resolve halts.
    pub now_ms: u64,
}

/// Validate a request against the context. `Ok(())` means the shard may
/// reserve margin and hand the normalized order to the matching engine.
pub fn validate(req: &OrderRequest, ctx: &ValidationContext<'_>) -> Result<(), RejectReason> {
    check_market_open(req, ctx)?;
    check_kind_allowed(req, ctx)?;
    check_required_fields(req)?;
    check_increments(req, ctx)?;
    check_min_notional(req, ctx)?;
    check_order_caps(ctx)?;
    check_balance(req, ctx)?;
    check_leverage(req, ctx)?;
    check_reduce_only(req, ctx)?;
    check_flags(req, ctx)?;
    check_oco(req, ctx)?;
    check_trailing(req, ctx)?;
    Ok(())
}

/// Build the engine-owned order record from a validated request.
#[must_use]
pub fn normalize(req: OrderRequest, id: OrderId, seq: Seq) -> Order {
    Order {
        id,
        user_id: req.user_id,
        symbol: req.symbol,
        side: req.side,
        kind: req.kind,
        quantity: round_amount(req.quantity),
        price: req.price.map(round_amount),
        stop_price: req.stop_price.map(round_amount),
        time_in_force: req.time_in_force,
        flags: req.flags,
        leverage: req.leverage,
        margin_mode: req.margin_mode,
        filled_qty: Decimal::ZERO,
        avg_fill_price: Decimal::ZERO,
        fees_paid: Decimal::ZERO,
        status: OrderStatus::Pending,
        created_at: seq,
        trailing: req.trailing,
        oco_peer: req.oco_peer,
        client_order_id: req.client_order_id,
    }
}

fn check_market_open(req: &OrderRequest, ctx: &ValidationContext<'_>) -> Result<(), RejectReason> {
    if !ctx.market.accepts_orders(ctx.now_ms) {
        return Err(RejectReason::MarketClosed {
            symbol: req.symbol.clone(),
        });
    }
    Ok(())
}

fn check_kind_allowed(req: &OrderRequest, ctx: &ValidationContext<'_>) -> Result<(), RejectReason> {
    if !ctx.market.allowed_kinds.contains(&req.kind) {
        return Err(RejectReason::OrderKindNotAllowed { kind: req.kind });
    }
    Ok(())
}

fn check_required_fields(req: &OrderRequest) -> Result<(), RejectReason> {
    if req.quantity <= Decimal::ZERO {
        return Err(RejectReason::MissingField { field: "quantity" });
    }
    match req.kind {
        OrderKind::Limit => {
            if req.price.is_none() {
                return Err(RejectReason::MissingField { field: "price" });
            }
        }
        OrderKind::StopLimit => {
            if req.price.is_none() {
                return Err(RejectReason::MissingField { field: "price" });
            }
            if req.stop_price.is_none() {
                return Err(RejectReason::MissingField { field: "stop_price" });
            }
        }
        OrderKind::Stop | OrderKind::TakeProfit => {
            if req.stop_price.is_none() {
                return Err(RejectReason::MissingField { field: "stop_price" });
            }
        }
        OrderKind::TrailingStop => {
            if req.trailing.is_none() {
                return Err(RejectReason::MissingField { field: "trailing" });
            }
        }
        OrderKind::Market => {}
    }
    Ok(())
}

fn check_increments(req: &OrderRequest, ctx: &ValidationContext<'_>) -> Result<(), RejectReason> {
    if let Some(price) = req.price
        && !is_multiple_of(price, ctx.market.tick_size)
    {
        return Err(RejectReason::InvalidTick {
            price,
            tick_size: ctx.market.tick_size,
        });
    }
    if !is_multiple_of(req.quantity, ctx.market.step_size) {
        return Err(RejectReason::InvalidStep {
            quantity: req.quantity,
            step_size: ctx.market.step_size,
        });
    }
    Ok(())
}

/// Price used for notional and margin estimates: the limit price when one
/// exists, then the stop price, then the current mark.
fn reference_price(req: &OrderRequest, ctx: &ValidationContext<'_>) -> Option<Decimal> {
    req.price.or(req.stop_price).or(ctx.mark_price)
}

fn check_min_notional(req: &OrderRequest, ctx: &ValidationContext<'_>) -> Result<(), RejectReason> {
    if ctx.market.min_notional.is_zero() {
        return Ok(());
    }
    let Some(price) = reference_price(req, ctx) else {
        return Ok(());
    };
    let value = notional(price, req.quantity);
    if value < ctx.market.min_notional {
        return Err(RejectReason::BelowMinNotional {
            notional: value,
            min_notional: ctx.market.min_notional,
        });
    }
    Ok(())
}

fn check_order_caps(ctx: &ValidationContext<'_>) -> Result<(), RejectReason> {
    if ctx.user_open_orders >= ctx.market.max_open_orders_per_user {
        return Err(RejectReason::TooManyOrders {
            open: ctx.user_open_orders,
            cap: ctx.market.max_open_orders_per_user,
        });
    }
    if ctx.total_open_orders >= ctx.market.max_open_orders {
        return Err(RejectReason::TooManyOrders {
            open: ctx.total_open_orders,
            cap: ctx.market.max_open_orders,
        });
    }
    Ok(())
}

/// Margin the wallet must be able to reserve for this request, in quote.
/// Reducing orders reserve nothing.
#[must_use]
pub fn required_margin(req: &OrderRequest, ctx: &ValidationContext<'_>) -> Decimal {
    if req
        .flags
        .intersects(OrderFlags::REDUCE_ONLY | OrderFlags::CLOSE_POSITION)
    {
        return Decimal::ZERO;
    }
    let Some(price) = reference_price(req, ctx) else {
        return Decimal::ZERO;
    };
    let leverage = req.leverage.max(Decimal::ONE);
    let value = notional(price, req.quantity);
    round_amount(value * (Decimal::ONE + ctx.market.fees.taker_rate) / leverage)
}

fn check_balance(req: &OrderRequest, ctx: &ValidationContext<'_>) -> Result<(), RejectReason> {
    let need = required_margin(req, ctx);
    if need > ctx.quote_balance.available {
        return Err(RejectReason::InsufficientBalance {
            asset: ctx.market.quote_asset.clone(),
            need,
            available: ctx.quote_balance.available,
        });
    }
    Ok(())
}

fn check_leverage(req: &OrderRequest, ctx: &ValidationContext<'_>) -> Result<(), RejectReason> {
    let Some(price) = reference_price(req, ctx) else {
        return Ok(());
    };
    let value = notional(price, req.quantity);
    let max = ctx.market.max_leverage_for(value);
    if req.leverage < Decimal::ONE || req.leverage > max {
        return Err(RejectReason::InvalidLeverage {
            requested: req.leverage,
            max,
        });
    }
    Ok(())
}

fn check_reduce_only(req: &OrderRequest, ctx: &ValidationContext<'_>) -> Result<(), RejectReason> {
    if !req.flags.contains(OrderFlags::REDUCE_ONLY) {
        return Ok(());
    }
    let position_qty = match ctx.position {
        Some(p) if p.side.opening_order_side() == Some(req.side.opposite()) => p.quantity,
        _ => Decimal::ZERO,
    };
    if position_qty < req.quantity {
        return Err(RejectReason::ReduceOnlyViolation {
            side: req.side,
            quantity: req.quantity,
            position_qty,
        });
    }
    Ok(())
}

fn check_flags(req: &OrderRequest, ctx: &ValidationContext<'_>) -> Result<(), RejectReason> {
    if req.flags.contains(OrderFlags::POST_ONLY) && req.kind == OrderKind::Market {
        return Err(RejectReason::InvalidFlags {
            detail: "post-only is meaningless on a market order",
        });
    }
    if req.flags.contains(OrderFlags::CLOSE_POSITION) {
        if req.kind != OrderKind::Market {
            return Err(RejectReason::InvalidFlags {
                detail: "close-position requires a market order",
            });
        }
        let has_position = ctx.position.is_some_and(Position::is_open);
        if !has_position {
            return Err(RejectReason::InvalidFlags {
                detail: "close-position without an open position",
            });
        }
    }
    Ok(())
}

fn check_oco(req: &OrderRequest, ctx: &ValidationContext<'_>) -> Result<(), RejectReason> {
    if req.oco_peer.is_none() {
        return Ok(());
    }
    let Some(peer) = ctx.oco_peer else {
        return Err(RejectReason::InvalidOcoPair {
            detail: "linked order not found",
        });
    };
    if peer.side == req.side {
        return Err(RejectReason::InvalidOcoPair {
            detail: "legs must be opposite sides",
        });
    }
    // One leg Limit, the other Stop or StopLimit.
    let (limit_kind, other_kind) = if req.kind == OrderKind::Limit {
        (Some((req.side, req.price)), peer.kind)
    } else if peer.kind == OrderKind::Limit {
        (Some((peer.side, peer.price)), req.kind)
    } else {
        (None, req.kind)
    };
    let Some((limit_side, limit_price)) = limit_kind else {
        return Err(RejectReason::InvalidOcoPair {
            detail: "one leg must be a limit order",
        });
    };
    if !matches!(other_kind, OrderKind::Stop | OrderKind::StopLimit) {
        return Err(RejectReason::InvalidOcoPair {
            detail: "the non-limit leg must be a stop or stop-limit",
        });
    }
    // The limit leg must sit on the profit-taking side of the mark.
    if let (Some(mark), Some(price)) = (ctx.mark_price, limit_price) {
        let profit_side_ok = match limit_side {
            Side::Sell => price > mark,
            Side::Buy => price < mark,
        };
        if !profit_side_ok {
            return Err(RejectReason::InvalidOcoPair {
                detail: "limit leg is not on the profit-taking side of the mark",
            });
        }
    }
    Ok(())
}

fn check_trailing(req: &OrderRequest, ctx: &ValidationContext<'_>) -> Result<(), RejectReason> {
    if req.kind != OrderKind::TrailingStop {
        return Ok(());
    }
    let trailing = req
        .trailing
        .ok_or(RejectReason::MissingField { field: "trailing" })?;
    if trailing.callback_rate <= MIN_CALLBACK_RATE || trailing.callback_rate >= MAX_CALLBACK_RATE {
        return Err(RejectReason::InvalidTrailing {
            detail: "callback rate must be within (0.1%, 50%)",
        });
    }
    if let Some(mark) = ctx.mark_price {
        // A sell trailing stop arms above the mark, a buy one below.
        let direction_ok = match req.side {
            Side::Sell => trailing.activation_price >= mark,
            Side::Buy => trailing.activation_price <= mark,
        };
        if !direction_ok {
            return Err(RejectReason::InvalidTrailing {
                detail: "activation price on the wrong side of the mark",
            });
        }
    }
    Ok(())
}
