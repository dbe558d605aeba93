//! The event stream the core emits for adapters to bridge onto
//! WebSocket/Kafka/etc.
//!
//! Listeners are shared closures in the same shape as the trade listener
//! pattern used throughout the book: `Arc<dyn Fn(&ExchangeEvent)>`. Two
//! bridge helpers are provided: a crossbeam channel forwarder for
//! synchronous consumers and a Tokio broadcast forwarder for async ones.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::error;

use crate::errors::ErrorPayload;
use crate::market::MarketStatus;
use crate::position::Position;
use crate::types::{OrderId, OrderStatus, Trade, UserId};

/// Everything the core tells the outside world.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ExchangeEvent {
    /// An order passed validation and entered the engine.
    OrderAccepted {
        /// The accepted order id.
        order_id: OrderId,
        /// Owner.
        user_id: UserId,
        /// Symbol.
        symbol: String,
    },
    /// An order was refused.
    OrderRejected {
        /// The refused order id (already allocated at ingress).
        order_id: OrderId,
        /// Owner.
        user_id: UserId,
        /// Symbol.
        symbol: String,
        /// Wire-form reason.
        reason: ErrorPayload,
    },
    /// An order filled, fully or partially.
    OrderFilled {
        /// The filled order id.
        order_id: OrderId,
        /// Status after the fill (PartiallyFilled or Filled).
        status: OrderStatus,
        /// Quantity filled in this step.
        fill_qty: Decimal,
        /// Running average fill price.
        avg_fill_price: Decimal,
    },
    /// An order was cancelled (user request, IOC residue, OCO, delisting).
    OrderCancelled {
        /// The cancelled order id.
        order_id: OrderId,
        /// Symbol.
        symbol: String,
    },
    /// A match occurred.
    Trade(Trade),
    /// A position changed (fill applied, mark moved, margin changed).
    PositionUpdated(Position),
    /// The risk monitor queued a position for liquidation.
    LiquidationQueued {
        /// Owner of the position.
        user_id: UserId,
        /// Symbol.
        symbol: String,
        /// Mark price that breached.
        mark_price: Decimal,
    },
    /// A liquidation completed.
    Liquidated {
        /// Owner of the position.
        user_id: UserId,
        /// Symbol.
        symbol: String,
        /// Quantity force-closed.
        quantity: Decimal,
        /// Amount drawn from the insurance fund (zero when equity covered
        /// the close).
        insurance_draw: Decimal,
    },
    /// Margin ratio is approaching 1; informational warning.
    MarginCall {
        /// Owner of the position.
        user_id: UserId,
        /// Symbol.
        symbol: String,
        /// Current margin ratio.
        margin_ratio: Decimal,
    },
    /// A market's administrative status changed.
    MarketStatusChanged {
        /// Symbol.
        symbol: String,
        /// New status.
        status: MarketStatus,
    },
    /// A shard hit an internal invariant breach and stopped.
    ShardFault {
        /// Symbol of the faulted shard.
        symbol: String,
        /// Diagnostic detail.
        detail: String,
    },
}

/// Shared listener callback.
pub type EventListener = Arc<dyn Fn(&ExchangeEvent) + Send + Sync>;

/// Fan-out bus for [`ExchangeEvent`]s.
///
/// Emission happens on the shard thread; listeners must be fast and must
/// not call back into the engine.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<EventListener>>,
}

impl EventBus {
    /// Bus with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Attach a listener.
    pub fn subscribe(&self, listener: EventListener) {
        self.listeners
            .write()
            .expect("event bus lock poisoned")
            .push(listener);
    }

    /// Emit an event to every listener.
    pub fn emit(&self, event: &ExchangeEvent) {
        let listeners = self.listeners.read().expect("event bus lock poisoned");
        for listener in listeners.iter() {
            listener(event);
        }
    }

    /// Number of attached listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().expect("event bus lock poisoned").len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// A listener that forwards every event into a crossbeam channel.
#[must_use]
pub fn channel_listener(sender: crossbeam::channel::Sender<ExchangeEvent>) -> EventListener {
    Arc::new(move |event: &ExchangeEvent| {
        if let Err(e) = sender.send(event.clone()) {
            error!("event channel closed: {e}");
        }
    })
}

/// A listener that forwards every event into a Tokio broadcast channel,
/// for async consumers (WebSocket fan-out and the like). Lagging receivers
/// drop events per broadcast semantics; the engine never blocks.
#[must_use]
pub fn broadcast_listener(sender: tokio::sync::broadcast::Sender<ExchangeEvent>) -> EventListener {
    Arc::new(move |event: &ExchangeEvent| {
        // send only fails when there are no receivers, which is fine.
        let _ = sender.send(event.clone());
    })
}
