//! Conditional order parking and trigger evaluation.
//!
//! Stop, stop-limit, and take-profit orders park here keyed on their
//! trigger price and comparison direction; trailing stops are tracked
//! separately because their effective trigger moves with the high-water
//! mark. On every trade print and mark tick the set releases the orders
//! whose trigger has been crossed, in parking order.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::trace;

use crate::types::{Order, OrderId, OrderKind, Side, UserId};

/// Which way a price must move through the trigger to fire it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerDirection {
    /// Fires when the observed price rises to or through the trigger.
    Up,
    /// Fires when the observed price falls to or through the trigger.
    Down,
}

fn direction_for(kind: OrderKind, side: Side) -> TriggerDirection {
    match (kind, side) {
        // A buy stop sits above the market, a sell stop below.
        (OrderKind::Stop | OrderKind::StopLimit, Side::Buy) => TriggerDirection::Up,
        (OrderKind::Stop | OrderKind::StopLimit, Side::Sell) => TriggerDirection::Down,
        // Take-profits are the mirror image.
        (OrderKind::TakeProfit, Side::Sell) => TriggerDirection::Up,
        (OrderKind::TakeProfit, Side::Buy) => TriggerDirection::Down,
        // Trailing stops never use the static maps.
        (OrderKind::TrailingStop, _) | (OrderKind::Market | OrderKind::Limit, _) => {
            TriggerDirection::Up
        }
    }
}

/// Parked conditional orders for one symbol.
#[derive(Debug, Default)]
pub struct TriggerSet {
    parked: HashMap<OrderId, Order>,
    /// Fires when price >= key.
    up: BTreeMap<Decimal, Vec<OrderId>>,
    /// Fires when price <= key.
    down: BTreeMap<Decimal, Vec<OrderId>>,
    /// Trailing stops, evaluated on every mark tick.
    trailing: Vec<OrderId>,
    by_user: HashMap<UserId, HashSet<OrderId>>,
}

impl TriggerSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a conditional order. The caller guarantees the kind is
    /// conditional and the required trigger fields are present.
    pub fn park(&mut self, order: Order) {
        debug_assert!(order.kind.is_conditional());
        let id = order.id;
        trace!(id = %id, kind = %order.kind, "parking conditional order");

        if order.kind == OrderKind::TrailingStop {
            self.trailing.push(id);
        } else {
            let stop = order.stop_price.unwrap_or_default();
            match direction_for(order.kind, order.side) {
                TriggerDirection::Up => self.up.entry(stop).or_default().push(id),
                TriggerDirection::Down => self.down.entry(stop).or_default().push(id),
            }
        }
        self.by_user.entry(order.user_id).or_default().insert(id);
        self.parked.insert(id, order);
    }

    /// A parked order, if present.
    #[must_use]
    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.parked.get(&id)
    }

    /// Whether `id` is parked.
    #[must_use]
    pub fn contains(&self, id: OrderId) -> bool {
        self.parked.contains_key(&id)
    }

    /// Number of parked orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parked.len()
    }

    /// Whether nothing is parked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parked.is_empty()
    }

    /// Parked order count for one user.
    #[must_use]
    pub fn count_for(&self, user: UserId) -> usize {
        self.by_user.get(&user).map_or(0, HashSet::len)
    }

    /// Ids of every parked order.
    #[must_use]
    pub fn all_ids(&self) -> Vec<OrderId> {
        self.parked.keys().copied().collect()
    }

    /// Ids parked by one user.
    #[must_use]
    pub fn ids_for(&self, user: UserId) -> Vec<OrderId> {
        self.by_user
            .get(&user)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Remove a parked order (cancel, OCO peer cancel).
    pub fn cancel(&mut self, id: OrderId) -> Option<Order> {
        let order = self.parked.remove(&id)?;
        self.unindex(&order);
        // The id stays in its price bucket as a tombstone; release paths
        // skip ids that no longer resolve.
        Some(order)
    }

    /// Release every static-trigger order fired by an observed price
    /// (a trade print or a mark), in parking order.
    pub fn fire_at_price(&mut self, price: Decimal) -> Vec<Order> {
        let mut fired_ids: Vec<OrderId> = Vec::new();

        let up_keys: Vec<Decimal> = self
            .up
            .range(..=price)
            .map(|(k, _)| *k)
            .collect();
        for key in up_keys {
            if let Some(ids) = self.up.remove(&key) {
                fired_ids.extend(ids);
            }
        }
        let down_keys: Vec<Decimal> = self
            .down
            .range(price..)
            .map(|(k, _)| *k)
            .collect();
        for key in down_keys {
            if let Some(ids) = self.down.remove(&key) {
                fired_ids.extend(ids);
            }
        }

        fired_ids
            .into_iter()
            .filter_map(|id| {
                let order = self.parked.remove(&id)?;
                self.unindex(&order);
                Some(order)
            })
            .collect()
    }

    /// Update trailing stops for a mark tick and release any that fired.
    ///
    /// Before activation the trail is inert; once the mark crosses the
    /// activation price the high-water mark starts tracking, and the
    /// effective stop is `hwm × (1 − callback)` for sells and
    /// `hwm × (1 + callback)` for buys.
    pub fn on_mark(&mut self, mark: Decimal) -> Vec<Order> {
        let mut fired = Vec::new();
        let mut kept = Vec::with_capacity(self.trailing.len());

        for id in std::mem::take(&mut self.trailing) {
            let Some(order) = self.parked.get_mut(&id) else {
                continue; // cancelled tombstone
            };
            let Some(trailing) = order.trailing.as_mut() else {
                continue;
            };

            match trailing.high_water_mark {
                None => {
                    let activated = match order.side {
                        Side::Sell => mark >= trailing.activation_price,
                        Side::Buy => mark <= trailing.activation_price,
                    };
                    if activated {
                        trailing.high_water_mark = Some(mark);
                    }
                    kept.push(id);
                }
                Some(hwm) => {
                    let hwm = match order.side {
                        Side::Sell => hwm.max(mark),
                        Side::Buy => hwm.min(mark),
                    };
                    trailing.high_water_mark = Some(hwm);
                    let (effective, crossed) = match order.side {
                        Side::Sell => {
                            let eff = hwm * (Decimal::ONE - trailing.callback_rate);
                            (eff, mark <= eff)
                        }
                        Side::Buy => {
                            let eff = hwm * (Decimal::ONE + trailing.callback_rate);
                            (eff, mark >= eff)
                        }
                    };
                    if crossed {
                        trace!(id = %id, %effective, %mark, "trailing stop fired");
                        let mut order = self.parked.remove(&id).expect("parked above");
                        self.unindex(&order);
                        order.stop_price = Some(effective);
                        fired.push(order);
                    } else {
                        kept.push(id);
                    }
                }
            }
        }

        self.trailing = kept;
        fired.extend(self.fire_at_price(mark));
        fired
    }

    fn unindex(&mut self, order: &Order) {
        if let Some(ids) = self.by_user.get_mut(&order.user_id) {
            ids.remove(&order.id);
            if ids.is_empty() {
                self.by_user.remove(&order.user_id);
            }
        }
    }
}
