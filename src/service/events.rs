//! Typed event stream.
//!
//! Every component reports through an [`EventBus`] handle instead of an
//! implicit subscription graph. The bus is a `tokio::sync::broadcast`
//! channel: emitters never block, and a slow subscriber only loses its own
//! backlog. [`LogSink`] is the always-on subscriber that renders events
//! through `tracing`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::domain::{
    NormalizedTick, Opportunity, PositionId, RejectReason, ReservationId, VenueId,
};

/// Circuit breaker state as reported on the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitEventState {
    Open,
    HalfOpen,
    Closed,
}

/// Kinds of risk limit the ledger can breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    Position,
    Exposure,
    Loss,
    Drawdown,
    Slippage,
    Liquidity,
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Position => "position",
            Self::Exposure => "exposure",
            Self::Loss => "loss",
            Self::Drawdown => "drawdown",
            Self::Slippage => "slippage",
            Self::Liquidity => "liquidity",
        };
        write!(f, "{s}")
    }
}

/// Everything observable about the core, as append-only events.
///
/// Failure events carry enough context to act on: execution id, stage,
/// venue(s) and a remediation hint where one exists.
#[derive(Debug, Clone)]
pub enum Event {
    /// A validated, normalized tick entered the pipeline.
    Tick(NormalizedTick),
    /// A profitable opportunity was detected.
    Opportunity(Opportunity),
    /// A candidate or opportunity was rejected. Flow control, not an error.
    OpportunityRejected {
        venue_pair: Option<(VenueId, VenueId)>,
        reason: RejectReason,
    },
    ExecutionStarted {
        execution_id: String,
        opportunity_id: String,
        buy_venue: VenueId,
        sell_venue: VenueId,
    },
    StageStarted {
        execution_id: String,
        stage: &'static str,
    },
    StageCompleted {
        execution_id: String,
        stage: &'static str,
    },
    StageTimeout {
        execution_id: String,
        stage: &'static str,
    },
    /// The execution has consumed `warning_threshold` of its settlement
    /// budget without completing.
    ExecutionWarning {
        execution_id: String,
        elapsed_ms: u64,
    },
    SettlementCompleted {
        execution_id: String,
        profit_quote: Decimal,
    },
    SettlementFailed {
        execution_id: String,
        stage: &'static str,
        reason: String,
        /// What an operator should do about it.
        remediation: &'static str,
    },
    PositionOpened {
        position_id: PositionId,
        venue: VenueId,
    },
    PositionUpdated {
        position_id: PositionId,
        unrealized_pnl: Decimal,
    },
    PositionClosed {
        position_id: PositionId,
        realized_pnl: Decimal,
    },
    Circuit {
        venue: VenueId,
        state: CircuitEventState,
    },
    ReserveTimeout {
        reservation_id: ReservationId,
        venue: VenueId,
        currency: String,
        amount: Decimal,
        expired_at: DateTime<Utc>,
    },
    LimitBreached {
        kind: LimitKind,
        value: Decimal,
        limit: Decimal,
        context: String,
    },
    BalanceUpdated {
        venue: VenueId,
        currency: String,
        total: Decimal,
        available: Decimal,
    },
}

/// Cloneable handle onto the event stream.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus with the given subscriber backlog capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event. Never blocks; a send with no subscribers is fine.
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to the stream from this point on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Always-on subscriber that renders events through `tracing`.
pub struct LogSink;

impl LogSink {
    /// Run until the bus is dropped. Spawn as a task.
    pub async fn run(mut rx: broadcast::Receiver<Event>) {
        loop {
            match rx.recv().await {
                Ok(event) => Self::log(&event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event log sink lagged, dropped events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    fn log(event: &Event) {
        match event {
            Event::Tick(tick) => {
                debug!(venue = %tick.venue, price = %tick.price, "tick");
            }
            Event::Opportunity(opp) => {
                info!(
                    id = %opp.id,
                    buy = %opp.buy_venue,
                    sell = %opp.sell_venue,
                    spread_pct = %opp.spread_pct,
                    est_net = %opp.est_net,
                    "opportunity detected"
                );
            }
            Event::OpportunityRejected { venue_pair, reason } => {
                debug!(pair = ?venue_pair, reason = %reason, "opportunity rejected");
            }
            Event::ExecutionStarted {
                execution_id,
                buy_venue,
                sell_venue,
                ..
            } => {
                info!(execution_id, buy = %buy_venue, sell = %sell_venue, "execution started");
            }
            Event::StageStarted {
                execution_id,
                stage,
            } => {
                debug!(execution_id, stage, "stage started");
            }
            Event::StageCompleted {
                execution_id,
                stage,
            } => {
                debug!(execution_id, stage, "stage completed");
            }
            Event::StageTimeout {
                execution_id,
                stage,
            } => {
                warn!(execution_id, stage, "stage timed out");
            }
            Event::ExecutionWarning {
                execution_id,
                elapsed_ms,
            } => {
                warn!(execution_id, elapsed_ms, "execution nearing settlement timeout");
            }
            Event::SettlementCompleted {
                execution_id,
                profit_quote,
            } => {
                info!(execution_id, profit = %profit_quote, "settlement completed");
            }
            Event::SettlementFailed {
                execution_id,
                stage,
                reason,
                remediation,
            } => {
                warn!(execution_id, stage, reason, remediation, "settlement failed");
            }
            Event::PositionOpened { position_id, venue } => {
                info!(position = %position_id, venue = %venue, "position opened");
            }
            Event::PositionUpdated {
                position_id,
                unrealized_pnl,
            } => {
                debug!(position = %position_id, unrealized_pnl = %unrealized_pnl, "position updated");
            }
            Event::PositionClosed {
                position_id,
                realized_pnl,
            } => {
                info!(position = %position_id, realized_pnl = %realized_pnl, "position closed");
            }
            Event::Circuit { venue, state } => {
                warn!(venue = %venue, state = ?state, "circuit breaker transition");
            }
            Event::ReserveTimeout {
                reservation_id,
                venue,
                currency,
                amount,
                ..
            } => {
                warn!(
                    reservation = %reservation_id,
                    venue = %venue,
                    currency,
                    amount = %amount,
                    "reservation expired"
                );
            }
            Event::LimitBreached {
                kind,
                value,
                limit,
                context,
            } => {
                warn!(kind = %kind, value = %value, limit = %limit, context, "risk limit breached");
            }
            Event::BalanceUpdated {
                venue,
                currency,
                total,
                available,
            } => {
                debug!(venue = %venue, currency, total = %total, available = %available, "balance updated");
            }
        }
    }
}
