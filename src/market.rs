//! Market metadata: symbols, tick/step/notional filters, fee schedules,
//! leverage tiers, and the concurrent registry that owns them.

use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

use crate::types::OrderKind;
use crate::types::qty::round_fee;

/// Administrative status of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStatus {
    /// Accepting orders.
    Active,
    /// Order intake suspended; resting orders remain.
    Suspended,
    /// Permanently removed; resting orders are cancelled.
    Delisted,
}

/// One row of the ordered leverage tier table.
///
/// A position whose notional falls within `[min_notional, max_notional)`
/// uses this tier's maintenance margin rate and leverage cap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeverageTier {
    /// Inclusive lower notional bound.
    pub min_notional: Decimal,
    /// Exclusive upper notional bound.
    pub max_notional: Decimal,
    /// Maintenance margin rate as a fraction (0.005 = 0.5%).
    pub maintenance_margin_rate: Decimal,
    /// Maximum leverage within this tier.
    pub max_leverage: Decimal,
}

/// Maker/taker fee rates, expressed as fractions of notional.
///
/// A negative maker rate is a rebate. Fees settle in the quote asset and
/// are rounded to 2 decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Maker rate (negative = rebate).
    pub maker_rate: Decimal,
    /// Taker rate (non-negative).
    pub taker_rate: Decimal,
}

impl FeeSchedule {
    /// Build a schedule from basis points (1 bps = 0.01%).
    #[must_use]
    pub fn from_bps(maker_bps: i64, taker_bps: i64) -> Self {
        let bps = dec!(0.0001);
        Self {
            maker_rate: Decimal::from(maker_bps) * bps,
            taker_rate: Decimal::from(taker_bps) * bps,
        }
    }

    /// Zero fees on both sides.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            maker_rate: Decimal::ZERO,
            taker_rate: Decimal::ZERO,
        }
    }

    /// Fee for a fill of the given notional. Negative values are rebates.
    #[must_use]
    #[inline]
    pub fn fee(&self, notional: Decimal, is_maker: bool) -> Decimal {
        let rate = if is_maker {
            self.maker_rate
        } else {
            self.taker_rate
        };
        round_fee(notional * rate)
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self::zero()
    }
}

/// What to do when an incoming order would match the same user's resting
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelfTradePolicy {
    /// Pass over the resting order and keep matching deeper (default).
    #[default]
    Skip,
    /// Cancel the resting (older) order and keep matching.
    CancelOldest,
    /// Cancel the incoming (newer) order; fills so far stand.
    CancelNewest,
}

/// Static and administrative metadata for one trading symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    /// Symbol, e.g. `BTCUSDT`.
    pub symbol: String,
    /// Base asset name, e.g. `BTC`.
    pub base_asset: String,
    /// Quote asset name, e.g. `USDT`.
    pub quote_asset: String,
    /// Minimum price increment.
    pub tick_size: Decimal,
    /// Minimum quantity increment.
    pub step_size: Decimal,
    /// Minimum `price × quantity`.
    pub min_notional: Decimal,
    /// Order kinds this market accepts.
    pub allowed_kinds: HashSet<OrderKind>,
    /// Maker/taker fee schedule.
    pub fees: FeeSchedule,
    /// Hard leverage cap, before tier restrictions.
    pub max_leverage: Decimal,
    /// Ordered leverage tiers, ascending by notional.
    pub leverage_tiers: Vec<LeverageTier>,
    /// Administrative status.
    pub status: MarketStatus,
    /// When set, the market is halted until this timestamp (millis);
    /// a mark tick at or past it resumes trading.
    pub halted_until: Option<u64>,
    /// Self-trade handling policy.
    pub self_trade_policy: SelfTradePolicy,
    /// Per-user open-order cap.
    pub max_open_orders_per_user: usize,
    /// Whole-book open-order cap.
    pub max_open_orders: usize,
}

impl Market {
    /// A market with sensible derivative defaults: all order kinds allowed,
    /// one maintenance tier at 0.5%, leverage up to 100.
    #[must_use]
    pub fn new(symbol: &str, base: &str, quote: &str) -> Self {
        let allowed_kinds = [
            OrderKind::Market,
            OrderKind::Limit,
            OrderKind::Stop,
            OrderKind::StopLimit,
            OrderKind::TakeProfit,
            OrderKind::TrailingStop,
        ]
        .into_iter()
        .collect();

        Self {
            symbol: symbol.to_string(),
            base_asset: base.to_string(),
            quote_asset: quote.to_string(),
            tick_size: dec!(0.00000001),
            step_size: dec!(0.00000001),
            min_notional: Decimal::ZERO,
            allowed_kinds,
            fees: FeeSchedule::zero(),
            max_leverage: dec!(100),
            leverage_tiers: vec![LeverageTier {
                min_notional: Decimal::ZERO,
                max_notional: Decimal::MAX,
                maintenance_margin_rate: dec!(0.005),
                max_leverage: dec!(100),
            }],
            status: MarketStatus::Active,
            halted_until: None,
            self_trade_policy: SelfTradePolicy::default(),
            max_open_orders_per_user: 200,
            max_open_orders: 100_000,
        }
    }

    /// The tier covering `notional`, or the last tier when notional exceeds
    /// the table.
    #[must_use]
    pub fn tier_for(&self, notional: Decimal) -> Option<&LeverageTier> {
        self.leverage_tiers
            .iter()
            .find(|t| notional >= t.min_notional && notional < t.max_notional)
            .or_else(|| self.leverage_tiers.last())
    }

    /// Maximum leverage permitted at `notional`, after both the market cap
    /// and the tier cap.
    #[must_use]
    pub fn max_leverage_for(&self, notional: Decimal) -> Decimal {
        let tier_cap = self
            .tier_for(notional)
            .map_or(self.max_leverage, |t| t.max_leverage);
        tier_cap.min(self.max_leverage)
    }

    /// Maintenance margin rate at `notional`.
    #[must_use]
    pub fn maintenance_rate_for(&self, notional: Decimal) -> Decimal {
        self.tier_for(notional)
            .map_or(Decimal::ZERO, |t| t.maintenance_margin_rate)
    }

    /// Whether the market accepts new orders right now.
    ///
    /// `now_ms` resolves a temporary halt: a halt whose `halted_until` has
    /// passed no longer blocks intake.
    #[must_use]
    pub fn accepts_orders(&self, now_ms: u64) -> bool {
        match self.status {
            MarketStatus::Active => match self.halted_until {
                Some(resume_at) => now_ms >= resume_at,
                None => true,
            },
            MarketStatus::Suspended | MarketStatus::Delisted => false,
        }
    }
}

/// Concurrent directory of markets, keyed by symbol.
///
/// The registry is the admin-facing source of truth; each symbol shard
/// keeps its own copy that is updated through the shard mailbox so status
/// changes are totally ordered with matching.
#[derive(Debug, Default)]
pub struct MarketRegistry {
    markets: DashMap<String, Market>,
}

impl MarketRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            markets: DashMap::new(),
        }
    }

    /// Register a market, replacing any previous definition.
    pub fn insert(&self, market: Market) {
        info!(symbol = %market.symbol, "registering market");
        self.markets.insert(market.symbol.clone(), market);
    }

    /// Clone of the market for `symbol`, if registered.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<Market> {
        self.markets.get(symbol).map(|m| m.clone())
    }

    /// Update a market's administrative status. Returns false if the symbol
    /// is unknown.
    pub fn set_status(&self, symbol: &str, status: MarketStatus) -> bool {
        match self.markets.get_mut(symbol) {
            Some(mut m) => {
                m.status = status;
                m.halted_until = None;
                true
            }
            None => false,
        }
    }

    /// Halt a market until `resume_at` (millis). Returns false if unknown.
    pub fn halt(&self, symbol: &str, resume_at: u64) -> bool {
        match self.markets.get_mut(symbol) {
            Some(mut m) => {
                m.halted_until = Some(resume_at);
                true
            }
            None => false,
        }
    }

    /// Clear a halt. Returns false if unknown.
    pub fn resume(&self, symbol: &str) -> bool {
        match self.markets.get_mut(symbol) {
            Some(mut m) => {
                m.halted_until = None;
                true
            }
            None => false,
        }
    }

    /// All registered symbols.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        self.markets.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of registered markets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.markets.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }
}
