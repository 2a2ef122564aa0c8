//! Venue-agnostic domain types.

pub mod depth;
pub mod id;
pub mod money;
pub mod opportunity;
pub mod order;
pub mod position;
pub mod tick;

pub use depth::{DepthLevel, OrderBookDepth, SimulatedFill};
pub use id::{
    ClientRef, ExecutionId, OpportunityId, OrderId, PositionId, ReservationId, VenueId,
};
pub use money::{canonical_quote, Amount, Currency, FeeSchedule, Price};
pub use opportunity::{Opportunity, RejectReason};
pub use order::{Fill, Order, OrderState, Side};
pub use position::{Position, PositionStatus, TakeProfitTarget};
pub use tick::{NormalizedTick, Tick, TickSource};
