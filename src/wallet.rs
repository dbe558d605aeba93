//! Per-user wallets with two-phase margin reservation.
//!
//! A balance is split into `available` and `locked`. Reserving margin moves
//! value from available to locked in one synchronous step; the engine later
//! either releases the lock (cancel, unfilled residue) or settles it
//! (debit on fill). The reservation either succeeds atomically or the
//! order is rejected; there is no partial grant and no re-entrant locking.
//!
//! Lock ordering across subsystems is wallet → position → book and is
//! never reversed.

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::trace;

use crate::types::UserId;

/// A single asset balance.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Balance {
    /// Spendable amount.
    pub available: Decimal,
    /// Amount reserved for open orders and position margin.
    pub locked: Decimal,
}

impl Balance {
    /// `available + locked`.
    #[must_use]
    #[inline]
    pub fn total(&self) -> Decimal {
        self.available + self.locked
    }
}

/// Outcome of a failed reservation.
#[derive(Debug, Clone, PartialEq)]
pub struct InsufficientBalance {
    /// The asset that was short.
    pub asset: String,
    /// Amount requested.
    pub need: Decimal,
    /// Amount available at the time.
    pub available: Decimal,
}

/// All wallets, keyed by user. Entries are per-user shards: a mutation
/// holds exactly one user's entry and never reaches into another's.
#[derive(Debug, Default)]
pub struct WalletBook {
    wallets: DashMap<UserId, HashMap<String, Balance>>,
}

impl WalletBook {
    /// Empty book.
    #[must_use]
    pub fn new() -> Self {
        Self {
            wallets: DashMap::new(),
        }
    }

    /// Credit `amount` of `asset` to the user's available balance.
    pub fn deposit(&self, user: UserId, asset: &str, amount: Decimal) {
        let mut wallet = self.wallets.entry(user).or_default();
        wallet.entry(asset.to_string()).or_default().available += amount;
        trace!(%user, asset, %amount, "deposit");
    }

    /// Balance of `asset` for `user`.
    #[must_use]
    pub fn balance(&self, user: UserId, asset: &str) -> Balance {
        self.wallets
            .get(&user)
            .and_then(|w| w.get(asset).copied())
            .unwrap_or_default()
    }

    /// Phase one of the reservation protocol: atomically move `need` from
    /// available to locked, or refuse without changing anything.
    pub fn reserve(
        &self,
        user: UserId,
        asset: &str,
        need: Decimal,
    ) -> Result<(), InsufficientBalance> {
        if need <= Decimal::ZERO {
            return Ok(());
        }
        let mut wallet = self.wallets.entry(user).or_default();
        let bal = wallet.entry(asset.to_string()).or_default();
        if bal.available < need {
            return Err(InsufficientBalance {
                asset: asset.to_string(),
                need,
                available: bal.available,
            });
        }
        bal.available -= need;
        bal.locked += need;
        trace!(%user, asset, %need, "reserved");
        Ok(())
    }

    /// Release a previous reservation back to available. Amounts beyond the
    /// current lock are clamped; the lock never goes negative.
    pub fn release(&self, user: UserId, asset: &str, amount: Decimal) {
        if amount <= Decimal::ZERO {
            return;
        }
        let mut wallet = self.wallets.entry(user).or_default();
        let bal = wallet.entry(asset.to_string()).or_default();
        let freed = amount.min(bal.locked);
        bal.locked -= freed;
        bal.available += freed;
        trace!(%user, asset, %freed, "released");
    }

    /// Settle (consume) part of a reservation: the locked amount leaves the
    /// wallet entirely, e.g. converted into position margin or paid as fees.
    pub fn settle_locked(&self, user: UserId, asset: &str, amount: Decimal) {
        if amount <= Decimal::ZERO {
            return;
        }
        let mut wallet = self.wallets.entry(user).or_default();
        let bal = wallet.entry(asset.to_string()).or_default();
        bal.locked = (bal.locked - amount).max(Decimal::ZERO);
        trace!(%user, asset, %amount, "settled from lock");
    }

    /// Debit straight from available (fees on reducing fills, loss
    /// settlement). Clamps at zero; the risk path is responsible for not
    /// over-debiting solvent users.
    pub fn debit_available(&self, user: UserId, asset: &str, amount: Decimal) {
        if amount <= Decimal::ZERO {
            return;
        }
        let mut wallet = self.wallets.entry(user).or_default();
        let bal = wallet.entry(asset.to_string()).or_default();
        bal.available = (bal.available - amount).max(Decimal::ZERO);
    }

    /// Credit straight to available (realized profit, margin refunds).
    pub fn credit_available(&self, user: UserId, asset: &str, amount: Decimal) {
        if amount <= Decimal::ZERO {
            return;
        }
        let mut wallet = self.wallets.entry(user).or_default();
        wallet.entry(asset.to_string()).or_default().available += amount;
    }

    /// Total equity in `asset` for `user` (available + locked).
    #[must_use]
    pub fn equity(&self, user: UserId, asset: &str) -> Decimal {
        self.balance(user, asset).total()
    }

    /// Snapshot of every balance for `user`.
    #[must_use]
    pub fn snapshot(&self, user: UserId) -> HashMap<String, Balance> {
        self.wallets
            .get(&user)
            .map(|w| w.clone())
            .unwrap_or_default()
    }
}
