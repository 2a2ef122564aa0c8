//! Atomic two-leg execution.
//!
//! An execution runs a validated plan through a staged state machine:
//! reserve balances, place and fill the buy leg, place and fill the sell
//! leg, settle. Every stage is deadline-bound; every placement carries an
//! idempotency key derived from the execution id, and a placement whose
//! outcome is unknown is *resolved* through that key — never re-placed.
//! Recovery guarantees that a filled buy without a matching sell always
//! leaves exactly one position behind.

mod stages;

pub use stages::{ExecutionConfig, ExecutionOutcome, SettlementReport};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::domain::{RejectReason, VenueId};
use crate::ledger::Ledger;
use crate::service::{Event, EventBus};
use crate::validator::ValidatedPlan;
use crate::venue::VenueAdapter;

/// Executes validated plans, one at a time per venue.
pub struct AtomicExecutor {
    config: ExecutionConfig,
    adapters: HashMap<VenueId, Arc<dyn VenueAdapter>>,
    ledger: Arc<Ledger>,
    events: EventBus,
    /// Per-venue serialization. An execution holds both its venues' locks
    /// for the entire state machine, which is what makes reservation
    /// accounting race-free.
    venue_locks: Mutex<HashMap<VenueId, Arc<AsyncMutex<()>>>>,
}

impl AtomicExecutor {
    #[must_use]
    pub fn new(
        config: ExecutionConfig,
        adapters: HashMap<VenueId, Arc<dyn VenueAdapter>>,
        ledger: Arc<Ledger>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            adapters,
            ledger,
            events,
            venue_locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, venue: &VenueId) -> Arc<AsyncMutex<()>> {
        Arc::clone(
            self.venue_locks
                .lock()
                .entry(venue.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Execute one validated plan.
    ///
    /// If either venue already hosts a running execution the plan is
    /// dropped with `executor_busy` — the detector will surface the
    /// opportunity again if it survives.
    pub async fn execute(&self, plan: ValidatedPlan) -> ExecutionOutcome {
        let buy_venue = plan.opportunity.buy_venue.clone();
        let sell_venue = plan.opportunity.sell_venue.clone();

        // Take both venue locks in a canonical order so two executions on
        // crossed pairs cannot deadlock.
        let (first, second) = if buy_venue.as_str() <= sell_venue.as_str() {
            (buy_venue.clone(), sell_venue.clone())
        } else {
            (sell_venue.clone(), buy_venue.clone())
        };
        let first_lock = self.lock_for(&first);
        let second_lock = self.lock_for(&second);

        let Ok(_first_guard) = first_lock.try_lock() else {
            return self.busy(&buy_venue, &sell_venue);
        };
        let second_guard = if first == second {
            None
        } else {
            match second_lock.try_lock() {
                Ok(guard) => Some(guard),
                Err(_) => return self.busy(&buy_venue, &sell_venue),
            }
        };
        let _second_guard = second_guard;

        let Some(buy_adapter) = self.adapters.get(&buy_venue).cloned() else {
            return ExecutionOutcome::Failed {
                stage: "reserving",
                reason: format!("no adapter for {buy_venue}"),
            };
        };
        let Some(sell_adapter) = self.adapters.get(&sell_venue).cloned() else {
            return ExecutionOutcome::Failed {
                stage: "reserving",
                reason: format!("no adapter for {sell_venue}"),
            };
        };

        let run = stages::ExecutionRun::new(
            &self.config,
            Arc::clone(&self.ledger),
            self.events.clone(),
            buy_adapter,
            sell_adapter,
            plan,
        );
        let outcome = run.drive().await;

        match &outcome {
            ExecutionOutcome::Settled(report) => {
                info!(
                    execution = %report.execution_id,
                    profit = %report.profit_quote,
                    "execution settled"
                );
            }
            ExecutionOutcome::CompensatedSettled(report) => {
                warn!(
                    execution = %report.execution_id,
                    position = ?report.position,
                    "execution settled with compensation"
                );
            }
            ExecutionOutcome::Failed { stage, reason } => {
                warn!(stage, reason = %reason, "execution failed");
            }
            ExecutionOutcome::Busy => {}
        }
        outcome
    }

    fn busy(&self, buy: &VenueId, sell: &VenueId) -> ExecutionOutcome {
        self.events.emit(Event::OpportunityRejected {
            venue_pair: Some((buy.clone(), sell.clone())),
            reason: RejectReason::ExecutorBusy,
        });
        ExecutionOutcome::Busy
    }
}
