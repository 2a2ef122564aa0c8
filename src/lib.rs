//! Spreadrunner - cross-venue arbitrage monitoring and atomic execution.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── domain/      # Ids, money, ticks, depth, orders, opportunities, positions
//! ├── venue/       # Venue capability trait + CLOB (REST/WS) adapter
//! ├── ingest/      # Per-venue workers, breaker, limiter, heartbeat, hub
//! ├── pricing/     # Tick validation and canonical-quote normalization
//! ├── detector/    # Cross-venue spread detection
//! ├── validator/   # Live-state pre-execution gate
//! ├── executor/    # Staged atomic two-leg execution with recovery
//! ├── ledger/      # Balances, reservations, positions, daily limits
//! ├── service/     # Typed event bus
//! └── app/         # Config loading and pipeline wiring
//! ```
//!
//! Data flows left to right: venue adapters feed the ingestion fabric,
//! validated ticks drive detection, validated opportunities drive the
//! executor, and every decision reads the ledger. Health and risk signals
//! flow back over the event bus.

pub mod app;
pub mod detector;
pub mod domain;
pub mod error;
pub mod executor;
pub mod ingest;
pub mod ledger;
pub mod pricing;
pub mod service;
pub mod validator;
pub mod venue;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
