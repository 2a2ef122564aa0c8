//! Application configuration.
//!
//! Loaded from a TOML file with environment overrides for secrets (API
//! keys are named by env var, never stored in the file). Every threshold
//! has a serde default matching the documented behavior, so a minimal
//! config is just the venue list.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

use crate::detector::DetectorConfig;
use crate::domain::{Currency, VenueId};
use crate::error::{ConfigError, Result};
use crate::executor::ExecutionConfig;
use crate::ingest::{
    CircuitBreakerConfig, HeartbeatConfig, RateLimitConfig, ReconnectConfig, RetryPolicy,
    WorkerConfig,
};
use crate::ledger::{RiskLimits, TakeProfitLevel};
use crate::pricing::PriceValidatorConfig;
use crate::validator::ValidatorConfig;
use crate::venue::ClobVenueConfig;

/// Trading pair.
#[derive(Debug, Clone, Deserialize)]
pub struct PairConfig {
    pub base: String,
    /// Canonical quote currency; prices from all venues normalize to it.
    #[serde(default = "default_quote")]
    pub quote: String,
}

fn default_quote() -> String {
    "USDT".to_string()
}

impl Default for PairConfig {
    fn default() -> Self {
        Self {
            base: "TON".to_string(),
            quote: default_quote(),
        }
    }
}

/// One venue entry.
#[derive(Debug, Clone, Deserialize)]
pub struct VenueEntry {
    pub id: String,
    /// Quote currency of the venue's own book.
    #[serde(default = "default_quote")]
    pub quote: String,
    /// Venue-native symbol for the pair.
    pub symbol: String,
    pub rest_url: String,
    pub ws_url: String,
    /// Name of the env var holding this venue's API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// If set, this venue's canonical-quote feed is the bridge for the
    /// named currency (e.g. the BTC/USDT feed bridging BTC quotes).
    #[serde(default)]
    pub bridge_for: Option<String>,
    #[serde(default)]
    pub rate_limit: RateLimitEntry,
}

/// Per-venue rate limit entry.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitEntry {
    #[serde(default = "default_rps")]
    pub rps: f64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_rps() -> f64 {
    5.0
}

fn default_concurrency() -> usize {
    1
}

impl Default for RateLimitEntry {
    fn default() -> Self {
        Self {
            rps: default_rps(),
            concurrency: default_concurrency(),
        }
    }
}

/// Circuit breaker section.
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitSection {
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
    #[serde(default = "default_recovery_threshold")]
    pub recovery_threshold: u32,
}

fn default_error_threshold() -> u32 {
    5
}
fn default_reset_timeout_ms() -> u64 {
    60_000
}
fn default_recovery_threshold() -> u32 {
    3
}

impl Default for CircuitSection {
    fn default() -> Self {
        Self {
            error_threshold: default_error_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            recovery_threshold: default_recovery_threshold(),
        }
    }
}

/// Heartbeat section.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatSection {
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_missed")]
    pub max_missed: u32,
}

fn default_check_interval_ms() -> u64 {
    5_000
}
fn default_heartbeat_timeout_ms() -> u64 {
    30_000
}
fn default_max_missed() -> u32 {
    3
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval_ms(),
            timeout_ms: default_heartbeat_timeout_ms(),
            max_missed: default_max_missed(),
        }
    }
}

/// Reconnection section.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectSection {
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_attempts")]
    pub max_attempts: u32,
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}
fn default_reconnect_max_attempts() -> u32 {
    5
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            base_delay_ms: default_reconnect_base_delay_ms(),
            max_attempts: default_reconnect_max_attempts(),
        }
    }
}

/// Ingestion section.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestionSection {
    #[serde(default)]
    pub circuit: CircuitSection,
    #[serde(default)]
    pub heartbeat: HeartbeatSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    15_000
}

impl Default for IngestionSection {
    fn default() -> Self {
        Self {
            circuit: CircuitSection::default(),
            heartbeat: HeartbeatSection::default(),
            reconnect: ReconnectSection::default(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Price validation section.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationSection {
    #[serde(default = "default_min_price")]
    pub min_price: Decimal,
    #[serde(default = "default_max_price")]
    pub max_price: Decimal,
    #[serde(default = "default_max_price_deviation")]
    pub max_price_deviation: Decimal,
    #[serde(default = "default_price_validity_ms")]
    pub price_validity_ms: u64,
    #[serde(default = "default_max_stale_price_ms")]
    pub max_stale_price_ms: u64,
}

fn default_min_price() -> Decimal {
    Decimal::new(1, 4)
}
fn default_max_price() -> Decimal {
    Decimal::from(1_000_000)
}
fn default_max_price_deviation() -> Decimal {
    Decimal::new(10, 2)
}
fn default_price_validity_ms() -> u64 {
    30_000
}
fn default_max_stale_price_ms() -> u64 {
    300_000
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            min_price: default_min_price(),
            max_price: default_max_price(),
            max_price_deviation: default_max_price_deviation(),
            price_validity_ms: default_price_validity_ms(),
            max_stale_price_ms: default_max_stale_price_ms(),
        }
    }
}

/// Detection section.
#[derive(Debug, Clone, Deserialize)]
pub struct ArbitrageSection {
    /// As a fraction: 0.005 = 0.5%.
    #[serde(default = "default_min_spread_percent")]
    pub min_spread_percent: Decimal,
    #[serde(default = "default_min_volume_quote")]
    pub min_volume_quote: Decimal,
    #[serde(default = "default_min_profit_quote")]
    pub min_profit_quote: Decimal,
    #[serde(default = "default_max_tick_age_ms")]
    pub max_tick_age_ms: u64,
}

fn default_min_spread_percent() -> Decimal {
    Decimal::new(5, 3)
}
fn default_min_volume_quote() -> Decimal {
    Decimal::from(1000)
}
fn default_min_profit_quote() -> Decimal {
    Decimal::ONE
}
fn default_max_tick_age_ms() -> u64 {
    5_000
}

impl Default for ArbitrageSection {
    fn default() -> Self {
        Self {
            min_spread_percent: default_min_spread_percent(),
            min_volume_quote: default_min_volume_quote(),
            min_profit_quote: default_min_profit_quote(),
            max_tick_age_ms: default_max_tick_age_ms(),
        }
    }
}

/// Execution section.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionSection {
    #[serde(default = "default_max_slippage")]
    pub max_slippage: Decimal,
    #[serde(default = "default_min_fill_fraction")]
    pub min_fill_fraction: Decimal,
    #[serde(default = "default_order_timeout_ms")]
    pub order_timeout_ms: u64,
    #[serde(default = "default_fill_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_settlement_timeout_ms")]
    pub settlement_timeout_ms: u64,
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,
    #[serde(default = "default_confirmations")]
    pub confirmations: u32,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_orphan_resolve_deadline_ms")]
    pub orphan_resolve_deadline_ms: u64,
    #[serde(default = "default_fee_buffer")]
    pub fee_buffer: Decimal,
}

fn default_max_slippage() -> Decimal {
    Decimal::new(3, 3)
}
fn default_min_fill_fraction() -> Decimal {
    Decimal::new(95, 2)
}
fn default_order_timeout_ms() -> u64 {
    30_000
}
fn default_fill_poll_interval_ms() -> u64 {
    1_000
}
fn default_settlement_timeout_ms() -> u64 {
    300_000
}
fn default_warning_threshold() -> f64 {
    0.8
}
fn default_confirmations() -> u32 {
    3
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    10_000
}
fn default_orphan_resolve_deadline_ms() -> u64 {
    180_000
}
fn default_fee_buffer() -> Decimal {
    Decimal::new(1, 2)
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            max_slippage: default_max_slippage(),
            min_fill_fraction: default_min_fill_fraction(),
            order_timeout_ms: default_order_timeout_ms(),
            poll_interval_ms: default_fill_poll_interval_ms(),
            settlement_timeout_ms: default_settlement_timeout_ms(),
            warning_threshold: default_warning_threshold(),
            confirmations: default_confirmations(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            orphan_resolve_deadline_ms: default_orphan_resolve_deadline_ms(),
            fee_buffer: default_fee_buffer(),
        }
    }
}

/// Risk section.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskSection {
    #[serde(default = "default_max_position_size")]
    pub max_position_size: Decimal,
    #[serde(default = "default_max_total_exposure")]
    pub max_total_exposure: Decimal,
    #[serde(default = "default_max_daily_exposure")]
    pub max_daily_exposure: Decimal,
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: Decimal,
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: Decimal,
    #[serde(default = "default_min_liquidity")]
    pub min_liquidity: Decimal,
    #[serde(default = "default_reserve_timeout_ms")]
    pub reserve_timeout_ms: u64,
    #[serde(default = "default_max_positions_per_venue")]
    pub max_positions_per_venue: usize,
    #[serde(default = "default_stop_loss_percent")]
    pub stop_loss_percent: Decimal,
    #[serde(default = "default_take_profit_targets")]
    pub take_profit_targets: Vec<TakeProfitEntry>,
}

/// One configured take-profit rung.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TakeProfitEntry {
    pub percent: Decimal,
    pub fraction: Decimal,
}

fn default_max_position_size() -> Decimal {
    Decimal::from(1000)
}
fn default_max_total_exposure() -> Decimal {
    Decimal::from(10_000)
}
fn default_max_daily_exposure() -> Decimal {
    Decimal::from(50_000)
}
fn default_max_daily_loss() -> Decimal {
    Decimal::from(500)
}
fn default_max_drawdown() -> Decimal {
    Decimal::from(1000)
}
fn default_min_liquidity() -> Decimal {
    Decimal::from(1000)
}
fn default_reserve_timeout_ms() -> u64 {
    30_000
}
fn default_max_positions_per_venue() -> usize {
    5
}
fn default_stop_loss_percent() -> Decimal {
    Decimal::new(5, 2)
}
fn default_take_profit_targets() -> Vec<TakeProfitEntry> {
    vec![
        TakeProfitEntry {
            percent: Decimal::new(2, 2),
            fraction: Decimal::new(5, 1),
        },
        TakeProfitEntry {
            percent: Decimal::new(5, 2),
            fraction: Decimal::new(5, 1),
        },
    ]
}

impl Default for RiskSection {
    fn default() -> Self {
        Self {
            max_position_size: default_max_position_size(),
            max_total_exposure: default_max_total_exposure(),
            max_daily_exposure: default_max_daily_exposure(),
            max_daily_loss: default_max_daily_loss(),
            max_drawdown: default_max_drawdown(),
            min_liquidity: default_min_liquidity(),
            reserve_timeout_ms: default_reserve_timeout_ms(),
            max_positions_per_venue: default_max_positions_per_venue(),
            stop_loss_percent: default_stop_loss_percent(),
            take_profit_targets: default_take_profit_targets(),
        }
    }
}

/// Logging section.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// The whole configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pair: PairConfig,
    #[serde(default)]
    pub venues: Vec<VenueEntry>,
    #[serde(default)]
    pub ingestion: IngestionSection,
    #[serde(default)]
    pub validation: ValidationSection,
    #[serde(default)]
    pub arbitrage: ArbitrageSection,
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default)]
    pub risk: RiskSection,
    #[serde(default)]
    pub logging: LoggingSection,
    /// Detect and validate but never execute.
    #[serde(default)]
    pub dry_run: bool,
    /// Resolved API keys, loaded from env at startup. Never serialized.
    #[serde(skip)]
    pub api_keys: HashMap<String, String>,
}

impl Config {
    /// Load, resolve env secrets, and validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        let mut config: Self = toml::from_str(&content).map_err(ConfigError::Parse)?;

        for venue in &config.venues {
            if let Some(env_name) = &venue.api_key_env {
                if let Ok(key) = std::env::var(env_name) {
                    config.api_keys.insert(venue.id.clone(), key);
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.venues.is_empty() {
            return Err(ConfigError::MissingField { field: "venues" }.into());
        }
        if self.validation.max_price <= self.validation.min_price {
            return Err(ConfigError::InvalidValue {
                field: "validation.max_price",
                reason: "must exceed validation.min_price".to_string(),
            }
            .into());
        }
        if self.execution.min_fill_fraction <= Decimal::ZERO
            || self.execution.min_fill_fraction > Decimal::ONE
        {
            return Err(ConfigError::InvalidValue {
                field: "execution.min_fill_fraction",
                reason: "must be in (0, 1]".to_string(),
            }
            .into());
        }
        if !(0.0..=1.0).contains(&self.execution.warning_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "execution.warning_threshold",
                reason: "must be in [0, 1]".to_string(),
            }
            .into());
        }
        for venue in &self.venues {
            if venue.rest_url.is_empty() || venue.ws_url.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "venues",
                    reason: format!("venue {} is missing endpoints", venue.id),
                }
                .into());
            }
        }
        Ok(())
    }

    pub fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.logging.level));
        match self.logging.format.as_str() {
            "json" => fmt().json().with_env_filter(filter).init(),
            _ => fmt().with_env_filter(filter).init(),
        }
    }

    // ---- Typed views consumed by the components -----------------------

    #[must_use]
    pub fn base_currency(&self) -> Currency {
        Currency::new(&self.pair.base)
    }

    #[must_use]
    pub fn quote_currency(&self) -> Currency {
        Currency::new(&self.pair.quote)
    }

    #[must_use]
    pub fn clob_config(&self, entry: &VenueEntry) -> ClobVenueConfig {
        ClobVenueConfig {
            id: VenueId::new(&entry.id),
            quote: Currency::new(&entry.quote),
            symbol: entry.symbol.clone(),
            rest_url: entry.rest_url.clone(),
            ws_url: entry.ws_url.clone(),
            api_key: self.api_keys.get(&entry.id).cloned(),
            request_timeout_ms: self.ingestion.request_timeout_ms,
        }
    }

    #[must_use]
    pub fn worker_config(&self, entry: &VenueEntry) -> WorkerConfig {
        WorkerConfig {
            rate_limit: RateLimitConfig {
                rps: entry.rate_limit.rps,
                concurrency: entry.rate_limit.concurrency,
            },
            retry: RetryPolicy::default(),
            circuit: CircuitBreakerConfig {
                error_threshold: self.ingestion.circuit.error_threshold,
                reset_timeout: Duration::from_millis(self.ingestion.circuit.reset_timeout_ms),
                recovery_threshold: self.ingestion.circuit.recovery_threshold,
            },
            heartbeat: HeartbeatConfig {
                check_interval: Duration::from_millis(self.ingestion.heartbeat.check_interval_ms),
                timeout: Duration::from_millis(self.ingestion.heartbeat.timeout_ms),
                max_missed: self.ingestion.heartbeat.max_missed,
            },
            reconnect: ReconnectConfig {
                base_delay: Duration::from_millis(self.ingestion.reconnect.base_delay_ms),
                max_attempts: self.ingestion.reconnect.max_attempts,
            },
            poll_interval: Duration::from_millis(self.ingestion.poll_interval_ms),
        }
    }

    #[must_use]
    pub fn price_validator_config(&self) -> PriceValidatorConfig {
        PriceValidatorConfig {
            min_price: self.validation.min_price,
            max_price: self.validation.max_price,
            max_price_deviation: self.validation.max_price_deviation,
            price_validity_ms: self.validation.price_validity_ms,
            max_stale_price_ms: self.validation.max_stale_price_ms,
        }
    }

    #[must_use]
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            min_spread_pct: self.arbitrage.min_spread_percent,
            min_volume_quote: self.arbitrage.min_volume_quote,
            min_profit_quote: self.arbitrage.min_profit_quote,
            max_tick_age: Duration::from_millis(self.arbitrage.max_tick_age_ms),
            max_slippage: self.execution.max_slippage,
            top_k: 5,
        }
    }

    #[must_use]
    pub fn validator_config(&self) -> ValidatorConfig {
        ValidatorConfig {
            max_slippage: self.execution.max_slippage,
            min_profit_quote: self.arbitrage.min_profit_quote,
            fee_buffer: self.execution.fee_buffer,
            depth_levels: 20,
        }
    }

    #[must_use]
    pub fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            min_fill_fraction: self.execution.min_fill_fraction,
            order_timeout: Duration::from_millis(self.execution.order_timeout_ms),
            poll_interval: Duration::from_millis(self.execution.poll_interval_ms),
            settlement_timeout: Duration::from_millis(self.execution.settlement_timeout_ms),
            warning_threshold: self.execution.warning_threshold,
            confirmations: self.execution.confirmations,
            confirmation_interval: Duration::from_millis(self.execution.poll_interval_ms),
            retry_attempts: self.execution.retry_attempts,
            retry_delay: Duration::from_millis(self.execution.retry_delay_ms),
            orphan_resolve_deadline: Duration::from_millis(
                self.execution.orphan_resolve_deadline_ms,
            ),
            fee_buffer: self.execution.fee_buffer,
            reserve_ttl: Duration::from_millis(self.risk.reserve_timeout_ms),
        }
    }

    #[must_use]
    pub fn risk_limits(&self) -> RiskLimits {
        RiskLimits {
            max_position_size: self.risk.max_position_size,
            max_total_exposure: self.risk.max_total_exposure,
            max_daily_exposure: self.risk.max_daily_exposure,
            max_daily_loss: self.risk.max_daily_loss,
            max_drawdown: self.risk.max_drawdown,
            min_liquidity: self.risk.min_liquidity,
            reserve_timeout_ms: self.risk.reserve_timeout_ms,
            max_positions_per_venue: self.risk.max_positions_per_venue,
            stop_loss_percent: self.risk.stop_loss_percent,
            take_profit_targets: self
                .risk
                .take_profit_targets
                .iter()
                .map(|t| TakeProfitLevel {
                    percent: t.percent,
                    fraction: t.fraction,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn minimal_toml() -> &'static str {
        r#"
            [pair]
            base = "TON"

            [[venues]]
            id = "north"
            symbol = "TON-USDT"
            rest_url = "https://api.north.example"
            ws_url = "wss://stream.north.example/ws"

            [[venues]]
            id = "east"
            quote = "BTC"
            symbol = "TON-BTC"
            rest_url = "https://api.east.example"
            ws_url = "wss://stream.east.example/ws"
        "#
    }

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: Config = toml::from_str(minimal_toml()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.venues.len(), 2);
        assert_eq!(config.quote_currency(), Currency::new("USDT"));
        assert_eq!(config.arbitrage.min_spread_percent, dec!(0.005));
        assert_eq!(config.execution.min_fill_fraction, dec!(0.95));
        assert_eq!(config.risk.reserve_timeout_ms, 30_000);
        assert_eq!(config.ingestion.circuit.error_threshold, 5);
        assert_eq!(config.ingestion.poll_interval_ms, 5_000);
        assert!(!config.dry_run);
    }

    #[test]
    fn empty_venues_is_invalid() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn crossed_price_bounds_are_invalid() {
        let raw = format!(
            "{}\n[validation]\nmin_price = \"10\"\nmax_price = \"1\"\n",
            minimal_toml()
        );
        let config: Config = toml::from_str(&raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn fill_fraction_bounds_checked() {
        let raw = format!(
            "{}\n[execution]\nmin_fill_fraction = \"1.5\"\n",
            minimal_toml()
        );
        let config: Config = toml::from_str(&raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn sections_convert_to_component_configs() {
        let config: Config = toml::from_str(minimal_toml()).unwrap();

        let exec = config.execution_config();
        assert_eq!(exec.order_timeout, Duration::from_secs(30));
        assert_eq!(exec.settlement_timeout, Duration::from_secs(300));
        assert_eq!(exec.reserve_ttl, Duration::from_secs(30));

        let limits = config.risk_limits();
        assert_eq!(limits.max_total_exposure, dec!(10000));
        assert_eq!(limits.take_profit_targets.len(), 2);

        let worker = config.worker_config(&config.venues[0]);
        assert_eq!(worker.circuit.error_threshold, 5);
        assert_eq!(worker.heartbeat.max_missed, 3);
    }

    #[test]
    fn take_profit_targets_parse() {
        let raw = format!(
            "{}\n[[risk.take_profit_targets]]\npercent = \"0.03\"\nfraction = \"1.0\"\n",
            minimal_toml()
        );
        let config: Config = toml::from_str(&raw).unwrap();
        assert_eq!(config.risk.take_profit_targets.len(), 1);
        assert_eq!(config.risk.take_profit_targets[0].percent, dec!(0.03));
    }
}
