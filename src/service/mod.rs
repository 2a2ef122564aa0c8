//! Cross-cutting services.

pub mod events;

pub use events::{CircuitEventState, Event, EventBus, LimitKind, LogSink};
