//! Crate-wide error types.
//!
//! Venue-facing operations return [`VenueError`], the typed taxonomy every
//! adapter must map its wire errors into. Everything else funnels into the
//! top-level [`Error`].

use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::VenueId;

/// Typed error taxonomy for venue adapter operations.
///
/// Adapters translate their wire-level failures into exactly one of these
/// variants so the ingestion fabric and executor can react uniformly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VenueError {
    /// Network or socket-level failure, including stream disconnects.
    #[error("transport error: {0}")]
    Transport(String),

    /// The venue (or our own limiter) refused the call for rate reasons.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The venue answered but the payload could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Authentication or signature failure.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The venue is unavailable (circuit open or hard down).
    #[error("venue down")]
    VenueDown,

    /// The referenced order or resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The venue rejected the order for lack of funds.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// A venue-side precondition failed (e.g. market closed, bad tick size).
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// The operation exceeded its deadline; outcome may be unknown.
    #[error("timeout")]
    Timeout,
}

impl VenueError {
    /// Whether a retry of the same call can reasonably succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::RateLimited(_) | Self::Timeout
        )
    }
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Ledger operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Reservation failed: the available balance cannot cover the hold.
    #[error("insufficient available balance on {venue}/{currency}: requested {requested}, available {available}")]
    InsufficientAvailable {
        venue: VenueId,
        currency: String,
        requested: Decimal,
        available: Decimal,
    },

    /// Referenced reservation does not exist (released, consumed or expired).
    #[error("unknown reservation: {0}")]
    UnknownReservation(String),

    /// Referenced position does not exist.
    #[error("unknown position: {0}")]
    UnknownPosition(String),

    /// Negative amount passed where only non-negative values are legal.
    #[error("negative amount for {context}: {amount}")]
    NegativeAmount { context: &'static str, amount: Decimal },
}

/// Execution engine errors surfaced by the atomic executor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// A leg order's outcome stayed unknown past the orphan deadline.
    #[error("orphaned order on {venue} (client_ref {client_ref})")]
    OrphanedOrder { venue: VenueId, client_ref: String },

    /// A leg filled strictly less than requested and then terminated.
    #[error("partial fill: {filled} of {requested}")]
    PartialFill { filled: Decimal, requested: Decimal },

    /// Another execution already holds this venue pair.
    #[error("executor busy for pair {buy_venue}/{sell_venue}")]
    ExecutorBusy { buy_venue: VenueId, sell_venue: VenueId },

    /// Pre-execution validation rejected the opportunity.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// A risk limit rejected the execution.
    #[error("risk rejected: {0}")]
    RiskRejected(String),

    /// A stage breached its deadline.
    #[error("stage {stage} timed out")]
    StageTimeout { stage: &'static str },
}

/// Top-level error for the crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("venue error on {venue} during {operation}: {source}")]
    Venue {
        venue: VenueId,
        operation: &'static str,
        #[source]
        source: VenueError,
    },

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Wrap a [`VenueError`] with venue and operation context.
    #[must_use]
    pub fn venue(venue: VenueId, operation: &'static str, source: VenueError) -> Self {
        Self::Venue {
            venue,
            operation,
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(VenueError::Timeout.is_transient());
        assert!(VenueError::Transport("reset".into()).is_transient());
        assert!(VenueError::RateLimited("slow down".into()).is_transient());
        assert!(!VenueError::Auth("bad key".into()).is_transient());
        assert!(!VenueError::InsufficientFunds.is_transient());
        assert!(!VenueError::VenueDown.is_transient());
    }

    #[test]
    fn venue_error_carries_context() {
        let err = Error::venue(
            VenueId::new("north"),
            "place_order",
            VenueError::Timeout,
        );
        let msg = err.to_string();
        assert!(msg.contains("north"));
        assert!(msg.contains("place_order"));
    }
}
