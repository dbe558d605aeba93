//! Liquidation plumbing: the global insurance fund and the engine that
//! turns risk-monitor verdicts into forced market closes.
//!
//! The liquidation engine runs on its own thread with its own mailbox.
//! It never touches books or positions directly; it crosses back into a
//! symbol only by enqueuing a forced close order on that symbol's intake,
//! retrying a bounded number of times if the mailbox is saturated.

use crossbeam::channel::{Receiver, Sender};
use rust_decimal::Decimal;
use std::sync::Mutex;
use std::thread::JoinHandle;
use tracing::{info, warn};

use crate::engine::shard::{ShardCommand, ShardRouter};
use crate::position::MarginMode;
use crate::sequencer::IntakeCommand;
use crate::types::{OrderFlags, OrderKind, OrderRequest, Side, TimeInForce, UserId};

/// Submission attempts per request before the request is dropped.
const MAX_SUBMIT_ATTEMPTS: u32 = 3;

/// The single global insurance fund, denominated in quote asset.
///
/// Mutated only by liquidation actions; the mutex is its mailbox.
#[derive(Debug, Default)]
pub struct InsuranceFund {
    balance: Mutex<Decimal>,
}

impl InsuranceFund {
    /// Fund seeded with `balance`.
    #[must_use]
    pub fn with_balance(balance: Decimal) -> Self {
        Self {
            balance: Mutex::new(balance),
        }
    }

    /// Current balance.
    #[must_use]
    pub fn balance(&self) -> Decimal {
        *self.balance.lock().expect("insurance fund lock poisoned")
    }

    /// Credit the fund (liquidation surplus, operator top-up).
    pub fn deposit(&self, amount: Decimal) {
        if amount <= Decimal::ZERO {
            return;
        }
        let mut bal = self.balance.lock().expect("insurance fund lock poisoned");
        *bal += amount;
    }

    /// Draw up to `amount`; returns what was actually granted. The fund
    /// never goes negative; an underflow is resolved by the caller via
    /// auto-deleveraging.
    pub fn draw(&self, amount: Decimal) -> Decimal {
        if amount <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let mut bal = self.balance.lock().expect("insurance fund lock poisoned");
        let granted = amount.min(*bal);
        *bal -= granted;
        if granted < amount {
            warn!(%amount, %granted, "insurance fund exhausted");
        }
        granted
    }
}

/// A position queued for forced closure.
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidationRequest {
    /// Owner of the breached position.
    pub user: UserId,
    /// Symbol of the breached position.
    pub symbol: String,
    /// Side of the forced close order (opposite the position).
    pub close_side: Side,
    /// Quantity to close.
    pub quantity: Decimal,
}

/// Handle to the liquidation engine thread.
#[derive(Debug)]
pub struct Liquidator {
    tx: Sender<LiquidationRequest>,
    join: Option<JoinHandle<()>>,
}

impl Liquidator {
    /// Sender half for risk monitors to enqueue requests.
    #[must_use]
    pub fn sender(&self) -> Sender<LiquidationRequest> {
        self.tx.clone()
    }

    /// Stop the engine after the queue drains.
    pub fn shutdown(mut self) {
        drop(self.tx);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Spawn the liquidation engine: drains its queue and submits forced
/// market closes onto the owning symbol's intake.
#[must_use]
pub fn spawn(router: ShardRouter) -> Liquidator {
    let (tx, rx): (Sender<LiquidationRequest>, Receiver<LiquidationRequest>) =
        crossbeam::channel::unbounded();

    let join = std::thread::Builder::new()
        .name("liquidator".into())
        .spawn(move || {
            while let Ok(request) = rx.recv() {
                submit_forced_close(&router, &request);
            }
        })
        .expect("failed to spawn liquidator thread");

    Liquidator {
        tx,
        join: Some(join),
    }
}

/// The forced close order for a request: a reduce-only market order owned
/// by the position holder, marked as a liquidation submission.
#[must_use]
pub fn forced_close_request(request: &LiquidationRequest) -> OrderRequest {
    OrderRequest {
        user_id: request.user,
        symbol: request.symbol.clone(),
        side: request.close_side,
        kind: OrderKind::Market,
        quantity: request.quantity,
        price: None,
        stop_price: None,
        time_in_force: TimeInForce::Gtc,
        flags: OrderFlags::CLOSE_POSITION | OrderFlags::REDUCE_ONLY | OrderFlags::LIQUIDATION,
        leverage: Decimal::ONE,
        margin_mode: MarginMode::Cross,
        trailing: None,
        oco_peer: None,
        client_order_id: None,
    }
}

fn submit_forced_close(router: &ShardRouter, request: &LiquidationRequest) {
    let Some(shard) = router.get(&request.symbol) else {
        warn!(symbol = %request.symbol, "liquidation for unknown shard dropped");
        return;
    };
    info!(user = %request.user, symbol = %request.symbol, qty = %request.quantity,
          "submitting forced close");

    for attempt in 1..=MAX_SUBMIT_ATTEMPTS {
        let command = ShardCommand::Intake {
            command: IntakeCommand::Submit {
                order_id: shard.next_order_id(),
                request: forced_close_request(request),
                ts: crate::utils::current_time_millis(),
            },
            reply: None,
        };
        match shard.try_send(command) {
            Ok(()) => return,
            Err(_) if attempt < MAX_SUBMIT_ATTEMPTS => {
                std::thread::sleep(std::time::Duration::from_millis(10 * u64::from(attempt)));
            }
            Err(_) => {
                warn!(user = %request.user, symbol = %request.symbol,
                      "forced close dropped after {MAX_SUBMIT_ATTEMPTS} attempts");
            }
        }
    }
}
