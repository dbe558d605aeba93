//! The per-symbol limit order book: two price-ordered sides, an order
//! arena for O(1) id lookup, a per-user index for mass cancellation, and
//! cached best prices.
//!
//! The book is owned by exactly one shard and mutated single-threaded;
//! readers outside the shard see it only through snapshots requested over
//! the shard mailbox.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::trace;

use super::level::PriceLevel;
use crate::types::{Order, OrderId, OrderStatus, Side, UserId};

/// Internal book failures. These are invariant-class errors: the shard
/// treats them as faults, not user errors.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum BookError {
    /// An order with this id already rests in the book.
    DuplicateOrder(OrderId),
    /// A resting insert would cross the opposite side.
    WouldCrossAtRest {
        /// The offending price.
        price: Decimal,
        /// Side of the insert.
        side: Side,
        /// The opposite best it would cross.
        opposite: Decimal,
    },
    /// Only limit orders (or their remainders) may rest.
    NotRestable(OrderId),
}

impl fmt::Display for BookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookError::DuplicateOrder(id) => write!(f, "order {id} already rests in the book"),
            BookError::WouldCrossAtRest {
                price,
                side,
                opposite,
            } => {
                write!(
                    f,
                    "resting {side} at {price} would cross opposite best {opposite}"
                )
            }
            BookError::NotRestable(id) => write!(f, "order {id} is not a restable limit order"),
        }
    }
}

impl std::error::Error for BookError {}

/// A double-sided limit order book for one symbol.
#[derive(Debug, Default)]
pub struct OrderBook {
    symbol: String,
    bids: BTreeMap<Decimal, PriceLevel>,
    asks: BTreeMap<Decimal, PriceLevel>,
    /// Resting orders by id. An id in a level queue that misses here is a
    /// tombstone.
    orders: HashMap<OrderId, Order>,
    /// Open orders per user, for mass cancel and open-order caps.
    user_orders: HashMap<UserId, HashSet<OrderId>>,
    best_bid: Option<Decimal>,
    best_ask: Option<Decimal>,
}

impl OrderBook {
    /// Empty book for `symbol`.
    #[must_use]
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ..Default::default()
        }
    }

    /// The book's symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Best (highest) bid price.
    #[must_use]
    #[inline]
    pub fn best_bid(&self) -> Option<Decimal> {
        self.best_bid
    }

    /// Best (lowest) ask price.
    #[must_use]
    #[inline]
    pub fn best_ask(&self) -> Option<Decimal> {
        self.best_ask
    }

    /// Spread `ask − bid`, when both sides are populated.
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Resting order by id.
    #[must_use]
    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    /// Whether `id` rests in the book.
    #[must_use]
    pub fn contains(&self, id: OrderId) -> bool {
        self.orders.contains_key(&id)
    }

    /// Number of resting orders.
    #[must_use]
    pub fn open_orders(&self) -> usize {
        self.orders.len()
    }

    /// Number of resting orders owned by `user`.
    #[must_use]
    pub fn open_orders_for(&self, user: UserId) -> usize {
        self.user_orders.get(&user).map_or(0, HashSet::len)
    }

    /// Ids of every resting order.
    #[must_use]
    pub fn all_order_ids(&self) -> Vec<OrderId> {
        self.orders.keys().copied().collect()
    }

    /// Ids of the user's resting orders, in no particular order.
    #[must_use]
    pub fn order_ids_for(&self, user: UserId) -> Vec<OrderId> {
        self.user_orders
            .get(&user)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Rest an order (a GTC limit or its remainder).
    ///
    /// The matching engine must have exhausted crossing liquidity first;
    /// an insert that would cross at rest is an invariant breach.
    pub fn add_resting(&mut self, order: Order) -> Result<(), BookError> {
        let price = order.price.ok_or(BookError::NotRestable(order.id))?;
        if self.orders.contains_key(&order.id) {
            return Err(BookError::DuplicateOrder(order.id));
        }
        let crossing = match order.side {
            Side::Buy => self.best_ask.is_some_and(|ask| price >= ask),
            Side::Sell => self.best_bid.is_some_and(|bid| price <= bid),
        };
        if crossing {
            let opposite = match order.side {
                Side::Buy => self.best_ask.unwrap_or_default(),
                Side::Sell => self.best_bid.unwrap_or_default(),
            };
            return Err(BookError::WouldCrossAtRest {
                price,
                side: order.side,
                opposite,
            });
        }

        trace!(symbol = %self.symbol, id = %order.id, %price, side = %order.side, "resting order");
        let side_map = match order.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        side_map
            .entry(price)
            .or_insert_with(|| PriceLevel::new(price))
            .push(order.id, order.remaining());

        self.user_orders
            .entry(order.user_id)
            .or_default()
            .insert(order.id);
        self.orders.insert(order.id, order);
        self.refresh_best();
        Ok(())
    }

    /// Remove a resting order by id. Returns the removed record, or `None`
    /// when the id does not rest here.
    ///
    /// O(1) on the arena; the id becomes a tombstone in its level queue.
    pub fn remove_order(&mut self, id: OrderId) -> Option<Order> {
        let order = self.orders.remove(&id)?;
        let price = order.price.expect("resting order always has a price");
        self.unindex(&order);

        let orders = &self.orders;
        let side_map = match order.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let exhausted = match side_map.get_mut(&price) {
            Some(level) => {
                level.reduce(order.remaining());
                level.purge_front(|front| front != id && orders.contains_key(&front));
                level.is_exhausted()
            }
            None => false,
        };
        if exhausted {
            side_map.remove(&price);
        }
        self.refresh_best();
        Some(order)
    }

    /// Decrease a resting order's remaining quantity after a fill.
    ///
    /// Removes the order entirely when it is exhausted. Returns the
    /// resulting status and running average fill price, or `None` if the
    /// id is not resting.
    pub fn fill_resting(
        &mut self,
        id: OrderId,
        price: Decimal,
        qty: Decimal,
        fee: Decimal,
    ) -> Option<(OrderStatus, Decimal)> {
        let order = self.orders.get_mut(&id)?;
        order.apply_fill(price, qty, fee);
        let status = order.status;
        let avg = order.avg_fill_price;
        let side = order.side;

        {
            let side_map = match side {
                Side::Buy => &mut self.bids,
                Side::Sell => &mut self.asks,
            };
            if let Some(level) = side_map.get_mut(&price) {
                level.reduce(qty);
            }
        }
        if status == OrderStatus::Filled {
            let order = self.orders.remove(&id).expect("checked above");
            self.unindex(&order);
            let side_map = match side {
                Side::Buy => &mut self.bids,
                Side::Sell => &mut self.asks,
            };
            let exhausted = side_map.get(&price).is_some_and(PriceLevel::is_exhausted);
            if exhausted {
                side_map.remove(&price);
            }
        }
        self.refresh_best();
        Some((status, avg))
    }

    /// Live orders at the best opposite levels, in match order, up to and
    /// including `limit` price (inclusive). Collects `(price, order_id)`
    /// pairs without mutating the book; the matching walk re-resolves each
    /// id as it commits fills.
    #[must_use]
    pub fn crossing_ids(&self, taker_side: Side, limit: Option<Decimal>) -> Vec<(Decimal, OrderId)> {
        let mut out = Vec::new();
        match taker_side {
            Side::Buy => {
                for (price, level) in self.asks.iter() {
                    if let Some(limit) = limit
                        && *price > limit
                    {
                        break;
                    }
                    out.extend(
                        level
                            .ids()
                            .filter(|id| self.orders.contains_key(id))
                            .map(|id| (*price, id)),
                    );
                }
            }
            Side::Sell => {
                for (price, level) in self.bids.iter().rev() {
                    if let Some(limit) = limit
                        && *price < limit
                    {
                        break;
                    }
                    out.extend(
                        level
                            .ids()
                            .filter(|id| self.orders.contains_key(id))
                            .map(|id| (*price, id)),
                    );
                }
            }
        }
        out
    }

    /// Aggregate depth per side: `(price, total_qty, live_order_count)` in
    /// price-priority order, up to `depth` levels per side.
    #[must_use]
    pub fn depth(&self, side: Side, depth: usize) -> Vec<(Decimal, Decimal, usize)> {
        let levels: Box<dyn Iterator<Item = (&Decimal, &PriceLevel)>> = match side {
            Side::Buy => Box::new(self.bids.iter().rev()),
            Side::Sell => Box::new(self.asks.iter()),
        };
        levels
            .take(depth)
            .map(|(price, level)| {
                let live = level.ids().filter(|id| self.orders.contains_key(id)).count();
                (*price, level.total_qty(), live)
            })
            .collect()
    }

    /// Invariant check: the book is never crossed at rest and every level
    /// aggregate equals the sum of its live orders' remainders. Used by
    /// the shard's fault detection and by property tests.
    #[must_use]
    pub fn check_invariants(&self) -> bool {
        if let (Some(bid), Some(ask)) = (self.best_bid, self.best_ask)
            && bid >= ask
        {
            return false;
        }
        for (side_map, _side) in [(&self.bids, Side::Buy), (&self.asks, Side::Sell)] {
            for (price, level) in side_map.iter() {
                let sum: Decimal = level
                    .ids()
                    .filter_map(|id| self.orders.get(&id))
                    .map(Order::remaining)
                    .sum();
                if sum != level.total_qty() {
                    return false;
                }
                if level
                    .ids()
                    .filter_map(|id| self.orders.get(&id))
                    .any(|o| o.price != Some(*price))
                {
                    return false;
                }
            }
        }
        true
    }

    fn unindex(&mut self, order: &Order) {
        if let Some(ids) = self.user_orders.get_mut(&order.user_id) {
            ids.remove(&order.id);
            if ids.is_empty() {
                self.user_orders.remove(&order.user_id);
            }
        }
    }

    fn refresh_best(&mut self) {
        self.best_bid = self.bids.keys().next_back().copied();
        self.best_ask = self.asks.keys().next().copied();
    }
}
