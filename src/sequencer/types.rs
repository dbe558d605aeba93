//! Serializable intake commands: the journaled mirror of everything a
//! shard applies, minus reply channels.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::feed::MarkPrice;
use crate::market::MarketStatus;
use crate::types::{OrderId, OrderRequest, Seq, UserId};

/// Requested changes for a modify (cancel-then-replace).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModifyRequest {
    /// New limit price, when changing.
    pub price: Option<Decimal>,
    /// New quantity, when changing.
    pub quantity: Option<Decimal>,
    /// New stop price, when changing.
    pub stop_price: Option<Decimal>,
}

impl ModifyRequest {
    /// Whether the request changes anything at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.price.is_none() && self.quantity.is_none() && self.stop_price.is_none()
    }
}

/// One command in a shard's intake, in journal form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IntakeCommand {
    /// Submit an order.
    Submit {
        /// Pre-allocated order id.
        order_id: OrderId,
        /// The request as received.
        request: OrderRequest,
        /// Ingress timestamp (millis).
        ts: u64,
    },
    /// Cancel one order.
    Cancel {
        /// The order to cancel.
        order_id: OrderId,
    },
    /// Cancel all of a user's orders on this symbol.
    CancelAll {
        /// The user whose orders are cancelled.
        user: UserId,
    },
    /// Cancel-then-replace one order.
    Modify {
        /// The order to replace.
        order_id: OrderId,
        /// The changes to apply.
        changes: ModifyRequest,
        /// Ingress timestamp (millis).
        ts: u64,
    },
    /// Apply a mark-price tick.
    Mark(MarkPrice),
    /// Change the market's administrative status.
    SetStatus(MarketStatus),
    /// Halt the market until the given timestamp (millis).
    Halt {
        /// Resume time.
        resume_at: u64,
    },
}

/// A journaled intake entry: the command plus the shard-local sequence
/// number it was applied under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeRecord {
    /// Shard-local sequence number, dense and ascending.
    pub seq: Seq,
    /// The applied command.
    pub command: IntakeCommand,
}
