//! Price feed ingress: accepts external mark/bid/ask ticks and publishes
//! the current per-symbol price for anyone who needs a read outside the
//! shard (validation estimates, admin queries).
//!
//! The authoritative copy used by matching and risk checks travels through
//! the shard mailbox so it is totally ordered with order flow; this module
//! is the shared last-known-value cache.

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

/// One tick from the external mark-price source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkPrice {
    /// Best bid on the reference market, when known.
    pub bid: Option<Decimal>,
    /// Best ask on the reference market, when known.
    pub ask: Option<Decimal>,
    /// The mark price used for margining and triggers.
    pub mark: Decimal,
    /// Source timestamp in milliseconds.
    pub ts: u64,
}

/// Why a tick was refused at ingress.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// Mark price must be strictly positive.
    #[error("mark price must be positive, got {0}")]
    NonPositiveMark(String),
    /// Bid must not exceed ask when both are present.
    #[error("crossed tick: bid {bid} > ask {ask}")]
    CrossedTick {
        /// The offending bid.
        bid: String,
        /// The offending ask.
        ask: String,
    },
}

/// Shared last-known mark price per symbol.
#[derive(Debug, Default)]
pub struct PriceFeed {
    prices: DashMap<String, MarkPrice>,
}

impl PriceFeed {
    /// Empty feed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            prices: DashMap::new(),
        }
    }

    /// Validate and publish a tick. The caller is responsible for routing
    /// the tick into the symbol shard as well.
    pub fn on_tick(&self, symbol: &str, tick: MarkPrice) -> Result<(), FeedError> {
        if tick.mark <= Decimal::ZERO {
            return Err(FeedError::NonPositiveMark(tick.mark.to_string()));
        }
        if let (Some(bid), Some(ask)) = (tick.bid, tick.ask)
            && bid > ask
        {
            return Err(FeedError::CrossedTick {
                bid: bid.to_string(),
                ask: ask.to_string(),
            });
        }
        trace!(symbol, mark = %tick.mark, "mark tick");
        self.prices.insert(symbol.to_string(), tick);
        Ok(())
    }

    /// Last accepted tick for `symbol`.
    #[must_use]
    pub fn current(&self, symbol: &str) -> Option<MarkPrice> {
        self.prices.get(symbol).map(|p| *p)
    }

    /// Last mark price for `symbol`.
    #[must_use]
    pub fn mark(&self, symbol: &str) -> Option<Decimal> {
        self.current(symbol).map(|p| p.mark)
    }
}
