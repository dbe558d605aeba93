//! Identifier newtypes and monotonic generators.
//!
//! Order ids and arrival sequence numbers are plain `u64` counters drawn
//! from per-engine atomics, so equal-price orders never tie on time
//! priority. Trade ids are UUIDs drawn from a per-engine v4 namespace.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Unique identifier of an order, monotonic within an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of a trade (match between two orders).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradeId(pub Uuid);

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Arrival sequence number: the price-time priority tie breaker.
///
/// Stamped at ingress from a monotonic per-engine counter. Not a wall-clock
/// timestamp; two orders never share a sequence number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Seq(pub u64);

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generator for order ids, arrival sequence numbers, and trade ids.
///
/// One instance per engine. Order ids and sequence numbers come from
/// independent atomic counters; trade ids are v5 UUIDs derived from a
/// per-engine namespace so replays of the same intake produce the same
/// trade ids.
#[derive(Debug)]
pub struct IdGenerator {
    next_order_id: AtomicU64,
    next_seq: AtomicU64,
    trade_namespace: Uuid,
    next_trade_nonce: AtomicU64,
}

impl IdGenerator {
    /// Create a generator with a fresh random trade-id namespace.
    #[must_use]
    pub fn new() -> Self {
        Self::with_namespace(Uuid::new_v4())
    }

    /// Create a generator with an explicit namespace.
    ///
    /// Replay uses the recorded namespace so regenerated trade ids are
    /// byte-identical to the original run.
    #[must_use]
    pub fn with_namespace(trade_namespace: Uuid) -> Self {
        Self {
            next_order_id: AtomicU64::new(1),
            next_seq: AtomicU64::new(1),
            trade_namespace,
            next_trade_nonce: AtomicU64::new(1),
        }
    }

    /// Next monotonic order id.
    pub fn next_order_id(&self) -> OrderId {
        OrderId(self.next_order_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Next arrival sequence number.
    pub fn next_seq(&self) -> Seq {
        Seq(self.next_seq.fetch_add(1, Ordering::Relaxed))
    }

    /// Next trade id, derived deterministically from the namespace.
    pub fn next_trade_id(&self) -> TradeId {
        let nonce = self.next_trade_nonce.fetch_add(1, Ordering::Relaxed);
        TradeId(Uuid::new_v5(
            &self.trade_namespace,
            &nonce.to_be_bytes(),
        ))
    }

    /// The trade-id namespace, for journaling alongside the intake log.
    #[must_use]
    #[inline]
    pub fn trade_namespace(&self) -> Uuid {
        self.trade_namespace
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
