//! Application wiring.
//!
//! Builds every component from the loaded config and runs the pipeline:
//! fabric -> detector -> validator -> executor, with the ledger and event
//! bus shared across all of them. Ownership flows strictly downward; the
//! only upward paths are the tick channel and the event stream.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::app::Config;
use crate::detector::OpportunityDetector;
use crate::domain::{Currency, FeeSchedule, VenueId};
use crate::error::Result;
use crate::executor::{AtomicExecutor, ExecutionOutcome};
use crate::ingest::{spawn_fabric, HealthRegistry};
use crate::ledger::{spawn_expiry_sweeper, Ledger};
use crate::pricing::PriceNormalizer;
use crate::service::{EventBus, LogSink};
use crate::validator::OpportunityValidator;
use crate::venue::{ClobVenue, VenueAdapter};

/// The running application.
pub struct App;

impl App {
    /// Run the full pipeline until the tick stream ends (all workers gone)
    /// or the surrounding task is cancelled.
    pub async fn run(config: Config) -> Result<()> {
        let events = EventBus::default();
        tokio::spawn(LogSink::run(events.subscribe()));

        let ledger = Arc::new(Ledger::new(
            config.base_currency(),
            config.quote_currency(),
            config.risk_limits(),
            events.clone(),
        ));
        let _sweeper = spawn_expiry_sweeper(Arc::clone(&ledger));

        let health = Arc::new(HealthRegistry::new());

        // Venue adapters from config.
        let mut adapters: HashMap<VenueId, Arc<dyn VenueAdapter>> = HashMap::new();
        let mut worker_configs = HashMap::new();
        let mut bridge_routes = HashMap::new();
        for entry in &config.venues {
            let venue_id = VenueId::new(&entry.id);
            let adapter: Arc<dyn VenueAdapter> =
                Arc::new(ClobVenue::new(config.clob_config(entry)));
            adapters.insert(venue_id.clone(), adapter);
            worker_configs.insert(venue_id.clone(), config.worker_config(entry));
            if let Some(currency) = &entry.bridge_for {
                bridge_routes.insert(venue_id, Currency::new(currency));
            }
        }

        // Seed fees and balances from the venues that answer.
        let fees = load_fees(&adapters).await;
        seed_balances(&adapters, &ledger).await;

        let normalizer =
            PriceNormalizer::new(config.price_validator_config(), config.quote_currency());
        let (mut ticks, fabric) = spawn_fabric(
            adapters.values().cloned().collect(),
            worker_configs,
            bridge_routes,
            normalizer,
            Arc::clone(&health),
            events.clone(),
            1024,
        );

        let mut detector = OpportunityDetector::new(
            config.detector_config(),
            Arc::clone(&ledger),
            fees.clone(),
            events.clone(),
        );
        let validator = Arc::new(OpportunityValidator::new(
            config.validator_config(),
            adapters.clone(),
            fabric.limiters.clone(),
            fees,
            Arc::clone(&ledger),
            Arc::clone(&health),
            events.clone(),
        ));
        let executor = Arc::new(AtomicExecutor::new(
            config.execution_config(),
            adapters,
            Arc::clone(&ledger),
            events.clone(),
        ));

        info!(
            venues = config.venues.len(),
            dry_run = config.dry_run,
            "pipeline ready, consuming ticks"
        );

        while let Some(tick) = ticks.recv().await {
            // Mark open positions on this venue so stop-loss and
            // take-profit ladders see every price update.
            for position in ledger.open_positions() {
                if position.venue == tick.venue {
                    let _ = ledger.update_position(position.id, tick.price);
                }
            }

            let opportunities = detector.on_tick(tick, Utc::now());
            for opportunity in opportunities {
                let validator = Arc::clone(&validator);
                let executor = Arc::clone(&executor);
                let dry_run = config.dry_run;
                tokio::spawn(async move {
                    let Ok(plan) = validator.validate(&opportunity).await else {
                        return;
                    };
                    if dry_run {
                        info!(
                            opportunity = %plan.opportunity.id,
                            est_net = %plan.est_net,
                            "dry run: skipping execution"
                        );
                        return;
                    }
                    match executor.execute(plan).await {
                        ExecutionOutcome::Settled(_)
                        | ExecutionOutcome::CompensatedSettled(_)
                        | ExecutionOutcome::Busy => {}
                        ExecutionOutcome::Failed { stage, reason } => {
                            warn!(stage, reason = %reason, "execution attempt failed");
                        }
                    }
                });
            }
        }

        for task in fabric.tasks {
            task.abort();
        }
        Ok(())
    }
}

/// Fetch taker/maker schedules for every venue; venues that cannot answer
/// fall back to the default schedule.
async fn load_fees(
    adapters: &HashMap<VenueId, Arc<dyn VenueAdapter>>,
) -> HashMap<VenueId, FeeSchedule> {
    let mut fees = HashMap::new();
    for (venue, adapter) in adapters {
        match adapter.get_fees().await {
            Ok(schedule) => {
                fees.insert(venue.clone(), schedule);
            }
            Err(err) => {
                warn!(venue = %venue, error = %err, "fee fetch failed, using defaults");
                fees.insert(venue.clone(), FeeSchedule::default());
            }
        }
    }
    fees
}

/// Seed the ledger with venue-reported balances.
async fn seed_balances(adapters: &HashMap<VenueId, Arc<dyn VenueAdapter>>, ledger: &Arc<Ledger>) {
    for (venue, adapter) in adapters {
        match adapter.get_balances().await {
            Ok(balances) => {
                for (currency, total) in balances {
                    if let Err(err) = ledger.update_balance(venue, &currency, total) {
                        warn!(venue = %venue, error = %err, "balance seed rejected");
                    }
                }
            }
            Err(err) => {
                warn!(venue = %venue, error = %err, "balance fetch failed, starting at zero");
            }
        }
    }
}
