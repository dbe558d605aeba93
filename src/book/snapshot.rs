//! Serializable order book snapshots for external consumers.
//!
//! A snapshot carries up to `depth` aggregate levels per side, the last
//! applied intake sequence number, and a SHA-256 digest so a restore (or a
//! downstream consumer) can verify integrity.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::book::OrderBook;
use crate::types::{Seq, Side};

/// One aggregate price level in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSnapshot {
    /// The level price.
    pub price: Decimal,
    /// Total live quantity at this price.
    pub quantity: Decimal,
    /// Number of live orders at this price.
    pub order_count: usize,
}

/// A depth snapshot of one symbol's book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    /// Symbol.
    pub symbol: String,
    /// Wall-clock capture time (millis).
    pub timestamp: u64,
    /// Sequence number of the last intake command applied before capture.
    pub last_seq: Seq,
    /// Bid levels, best (highest) first.
    pub bids: Vec<LevelSnapshot>,
    /// Ask levels, best (lowest) first.
    pub asks: Vec<LevelSnapshot>,
    /// Hex SHA-256 over the level data; empty until sealed.
    #[serde(default)]
    pub checksum: String,
}

impl OrderBookSnapshot {
    /// Capture up to `depth` levels per side from `book`.
    #[must_use]
    pub fn capture(book: &OrderBook, depth: usize, last_seq: Seq, timestamp: u64) -> Self {
        let to_levels = |rows: Vec<(Decimal, Decimal, usize)>| {
            rows.into_iter()
                .map(|(price, quantity, order_count)| LevelSnapshot {
                    price,
                    quantity,
                    order_count,
                })
                .collect()
        };
        let mut snapshot = Self {
            symbol: book.symbol().to_string(),
            timestamp,
            last_seq,
            bids: to_levels(book.depth(Side::Buy, depth)),
            asks: to_levels(book.depth(Side::Sell, depth)),
            checksum: String::new(),
        };
        snapshot.checksum = snapshot.compute_checksum();
        snapshot
    }

    /// Best bid price and quantity.
    #[must_use]
    pub fn best_bid(&self) -> Option<(Decimal, Decimal)> {
        self.bids.first().map(|l| (l.price, l.quantity))
    }

    /// Best ask price and quantity.
    #[must_use]
    pub fn best_ask(&self) -> Option<(Decimal, Decimal)> {
        self.asks.first().map(|l| (l.price, l.quantity))
    }

    /// Midpoint of best bid and ask.
    #[must_use]
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// Spread `ask − bid`.
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some(ask - bid),
            _ => None,
        }
    }

    /// Hex SHA-256 over symbol, sequence, and level rows.
    #[must_use]
    pub fn compute_checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.symbol.as_bytes());
        hasher.update(self.last_seq.0.to_be_bytes());
        for level in self.bids.iter().chain(self.asks.iter()) {
            hasher.update(level.price.to_string().as_bytes());
            hasher.update(level.quantity.to_string().as_bytes());
            hasher.update(level.order_count.to_be_bytes());
        }
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Whether the stored checksum matches the level data.
    #[must_use]
    pub fn verify_checksum(&self) -> bool {
        self.checksum == self.compute_checksum()
    }
}
