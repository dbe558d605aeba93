//! Positions: per-(user, symbol) aggregation of fills into a directional
//! exposure with entry price, margin, and PnL accounting.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::types::{Side, UserId};

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    /// Net long exposure.
    Long,
    /// Net short exposure.
    Short,
    /// No exposure. `quantity` is zero exactly when the side is Flat.
    Flat,
}

impl PositionSide {
    /// +1 for Long, -1 for Short, 0 for Flat.
    #[must_use]
    pub fn sign(self) -> Decimal {
        match self {
            PositionSide::Long => Decimal::ONE,
            PositionSide::Short => Decimal::NEGATIVE_ONE,
            PositionSide::Flat => Decimal::ZERO,
        }
    }

    /// The order side that increases this position.
    #[must_use]
    pub fn opening_order_side(self) -> Option<Side> {
        match self {
            PositionSide::Long => Some(Side::Buy),
            PositionSide::Short => Some(Side::Sell),
            PositionSide::Flat => None,
        }
    }
}

impl From<Side> for PositionSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Buy => PositionSide::Long,
            Side::Sell => PositionSide::Short,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PositionSide::Long => "Long",
            PositionSide::Short => "Short",
            PositionSide::Flat => "Flat",
        };
        write!(f, "{s}")
    }
}

/// Margin mode of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MarginMode {
    /// Margin drawn from the whole wallet.
    #[default]
    Cross,
    /// Margin dedicated to this position only.
    Isolated,
}

/// Lifecycle of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    /// Live exposure.
    Open,
    /// Queued for liquidation; the risk monitor will not re-enqueue.
    Closing,
    /// Closed by the user.
    Closed,
    /// Force-closed by the liquidation engine.
    Liquidated,
}

/// A user's aggregated exposure on one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Owner.
    pub user_id: UserId,
    /// Symbol.
    pub symbol: String,
    /// Direction. Flat exactly when `quantity` is zero.
    pub side: PositionSide,
    /// Absolute size in base asset, never negative.
    pub quantity: Decimal,
    /// Size-weighted average entry price.
    pub entry_price: Decimal,
    /// Last mark price applied.
    pub mark_price: Decimal,
    /// Cross or isolated margining.
    pub margin_mode: MarginMode,
    /// Leverage the position was opened with.
    pub leverage: Decimal,
    /// Margin dedicated to the position (isolated mode only).
    pub isolated_margin: Decimal,
    /// Cumulative realized PnL since the position opened.
    pub realized_pnl: Decimal,
    /// Price at which maintenance margin is breached.
    pub liquidation_price: Decimal,
    /// Lifecycle status.
    pub status: PositionStatus,
}

/// What applying one fill did to a position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillOutcome {
    /// PnL realized by the reducing part of the fill (zero when opening).
    pub realized_pnl: Decimal,
    /// Quantity that reduced the existing exposure.
    pub reduced_qty: Decimal,
    /// Quantity that opened (or flipped into) new exposure.
    pub opened_qty: Decimal,
    /// The position went through zero and re-opened on the other side.
    pub flipped: bool,
    /// The position is now flat.
    pub closed: bool,
}

impl Position {
    /// A flat position for `user` on `symbol`.
    #[must_use]
    pub fn flat(user_id: UserId, symbol: &str) -> Self {
        Self {
            user_id,
            symbol: symbol.to_string(),
            side: PositionSide::Flat,
            quantity: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            mark_price: Decimal::ZERO,
            margin_mode: MarginMode::default(),
            leverage: Decimal::ONE,
            isolated_margin: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            liquidation_price: Decimal::ZERO,
            status: PositionStatus::Open,
        }
    }

    /// `quantity × mark` in quote.
    #[must_use]
    #[inline]
    pub fn notional(&self) -> Decimal {
        self.quantity * self.mark_price
    }

    /// Unrealized PnL at the current mark: `(mark − entry) × qty × sign`.
    #[must_use]
    pub fn unrealized_pnl(&self) -> Decimal {
        (self.mark_price - self.entry_price) * self.quantity * self.side.sign()
    }

    /// Whether there is exposure to close.
    #[must_use]
    #[inline]
    pub fn is_open(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    /// Apply one fill.
    ///
    /// Rules:
    /// - Flat → open on the fill side at the fill price.
    /// - Same side → weighted-average entry, quantity adds.
    /// - Opposite side → realize PnL on the overlap; any residue flips the
    ///   position, with the fill price as the new entry.
    ///
    /// The caller recomputes the liquidation price afterwards.
    pub fn apply_fill(&mut self, fill_side: Side, qty: Decimal, price: Decimal) -> FillOutcome {
        debug_assert!(qty > Decimal::ZERO);
        let fill_dir = PositionSide::from(fill_side);

        let mut outcome = FillOutcome {
            realized_pnl: Decimal::ZERO,
            reduced_qty: Decimal::ZERO,
            opened_qty: Decimal::ZERO,
            flipped: false,
            closed: false,
        };

        if self.side == PositionSide::Flat || self.side == fill_dir {
            // Opening or adding.
            let prev_notional = self.entry_price * self.quantity;
            self.quantity += qty;
            self.entry_price = (prev_notional + price * qty) / self.quantity;
            self.side = fill_dir;
            outcome.opened_qty = qty;
            return outcome;
        }

        // Reducing (and possibly flipping).
        let reduce = qty.min(self.quantity);
        let pnl = (price - self.entry_price) * reduce * self.side.sign();
        self.realized_pnl += pnl;
        self.quantity -= reduce;
        outcome.realized_pnl = pnl;
        outcome.reduced_qty = reduce;

        let residue = qty - reduce;
        if self.quantity.is_zero() {
            self.side = PositionSide::Flat;
            self.entry_price = Decimal::ZERO;
            outcome.closed = residue.is_zero();
        }
        if residue > Decimal::ZERO {
            // Close-then-open: the residue opens on the fill side.
            self.side = fill_dir;
            self.quantity = residue;
            self.entry_price = price;
            outcome.opened_qty = residue;
            outcome.flipped = true;
        }
        outcome
    }
}

/// All positions on one symbol, owned by that symbol's shard.
#[derive(Debug, Default)]
pub struct PositionBook {
    symbol: String,
    positions: HashMap<UserId, Position>,
}

impl PositionBook {
    /// Empty book for `symbol`.
    #[must_use]
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            positions: HashMap::new(),
        }
    }

    /// The position for `user`, if one exists.
    #[must_use]
    pub fn get(&self, user: UserId) -> Option<&Position> {
        self.positions.get(&user)
    }

    /// Mutable position for `user`, creating a flat one on first touch.
    pub fn get_or_create(&mut self, user: UserId) -> &mut Position {
        self.positions
            .entry(user)
            .or_insert_with(|| Position::flat(user, &self.symbol))
    }

    /// Mutable position for `user`, if one exists.
    pub fn get_mut(&mut self, user: UserId) -> Option<&mut Position> {
        self.positions.get_mut(&user)
    }

    /// Remove a flat position record entirely.
    pub fn remove(&mut self, user: UserId) -> Option<Position> {
        self.positions.remove(&user)
    }

    /// Iterate all positions.
    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Iterate all positions mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Position> {
        self.positions.values_mut()
    }

    /// Number of tracked positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether no positions are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
